//! Gateway configuration types.
//!
//! [`GatewayConfig`] is the single source of truth for all runtime settings.
//! It is built once at startup from the config file and CLI overrides (see
//! `infrastructure::config_file` and `main.rs`) or from defaults in tests.
//!
//! Keeping configuration as a plain struct (no global state, no environment
//! reads inside the library) makes the gateway client easy to embed in a host
//! automation framework and to drive from tests.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use junghome_core::GestureConfig;

/// Which frame vocabulary the gateway speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// The Jung Home gateway: token in the handshake header, implicit
    /// subscription, native datapoint frames, commands confirmed by echo.
    #[default]
    JungHome,
    /// Device-level frames: `authenticate`, `subscribe`, `command_ack`.
    Logical,
}

impl Dialect {
    /// Parses `"junghome"` or `"logical"` (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "junghome" | "jung" | "native" => Some(Dialect::JungHome),
            "logical" => Some(Dialect::Logical),
            _ => None,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::JungHome => f.write_str("junghome"),
            Dialect::Logical => f.write_str("logical"),
        }
    }
}

/// All runtime configuration for one gateway.
///
/// # Defaults
///
/// | Setting | Default |
/// |---------|---------|
/// | `tls` / `verify_tls` | `true` / `false` (self-signed gateway certificate) |
/// | `hold_duration` | 600 ms |
/// | `inter_click_window` | 400 ms |
/// | `command_timeout` | 5 s |
/// | `liveness_timeout` | 90 s |
/// | `keepalive_interval` | 30 s |
/// | `backoff_base` … `backoff_max` | 1 s … 60 s |
/// | `resync_interval` | 60 s |
///
/// # Example
///
/// ```rust
/// use junghome_bridge::domain::GatewayConfig;
///
/// let cfg = GatewayConfig {
///     host: "192.168.1.20".to_string(),
///     token: "secret".to_string(),
///     ..GatewayConfig::default()
/// };
/// assert_eq!(cfg.ws_url(), "wss://192.168.1.20/ws");
/// ```
#[derive(Clone)]
pub struct GatewayConfig {
    /// Gateway host name or IP address, optionally with `:port`.
    pub host: String,
    /// Bearer token, confirmed beforehand in the vendor app.
    pub token: String,
    /// Limits the bridge to these device ids; `None` accepts all devices.
    pub devices_of_interest: Option<HashSet<String>>,
    pub dialect: Dialect,
    /// `wss://` + `https://` when `true`, `ws://` + `http://` otherwise.
    pub tls: bool,
    /// Verify the gateway certificate against the web PKI roots.
    pub verify_tls: bool,
    pub ws_path: String,
    pub rest_path: String,
    pub hold_duration: Duration,
    pub inter_click_window: Duration,
    /// How long a command may wait for its acknowledgement.
    pub command_timeout: Duration,
    /// Silence after which the connection is considered dead.
    pub liveness_timeout: Duration,
    /// Interval of WebSocket pings sent to keep traffic flowing.
    pub keepalive_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Periodic full resync; `None` resyncs only after (re)connecting.
    pub resync_interval: Option<Duration>,
    /// Timeout for one REST snapshot request.
    pub request_timeout: Duration,
}

impl GatewayConfig {
    /// URL of the gateway's WebSocket endpoint.
    pub fn ws_url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!("{scheme}://{}{}", self.host, self.ws_path)
    }

    /// URL of the gateway's function list.
    pub fn rest_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}{}", self.host, self.rest_path)
    }

    /// Timing windows for the gesture engine.
    pub fn gesture_config(&self) -> GestureConfig {
        GestureConfig {
            hold_duration: self.hold_duration,
            inter_click_window: self.inter_click_window,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let gestures = GestureConfig::default();
        Self {
            host: String::new(),
            token: String::new(),
            devices_of_interest: None,
            dialect: Dialect::default(),
            tls: true,
            verify_tls: false,
            ws_path: "/ws".to_string(),
            rest_path: "/api/junghome/functions".to_string(),
            hold_duration: gestures.hold_duration,
            inter_click_window: gestures.inter_click_window,
            command_timeout: Duration::from_secs(5),
            liveness_timeout: Duration::from_secs(90),
            keepalive_interval: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            resync_interval: Some(Duration::from_secs(60)),
            request_timeout: Duration::from_secs(10),
        }
    }
}

// The token is a credential; keep it out of logs.
impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("host", &self.host)
            .field("token", &"<redacted>")
            .field("devices_of_interest", &self.devices_of_interest)
            .field("dialect", &self.dialect)
            .field("tls", &self.tls)
            .field("verify_tls", &self.verify_tls)
            .field("ws_path", &self.ws_path)
            .field("rest_path", &self.rest_path)
            .field("hold_duration", &self.hold_duration)
            .field("inter_click_window", &self.inter_click_window)
            .field("command_timeout", &self.command_timeout)
            .field("liveness_timeout", &self.liveness_timeout)
            .field("keepalive_interval", &self.keepalive_interval)
            .field("backoff_base", &self.backoff_base)
            .field("backoff_max", &self.backoff_max)
            .field("resync_interval", &self.resync_interval)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}
