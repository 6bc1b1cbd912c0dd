//! TOML configuration file for the `junghome-bridge` binary.
//!
//! # Example file
//!
//! ```toml
//! [gateway]
//! host = "192.168.1.20"
//! token = "4b1d…"
//! dialect = "junghome"
//! verify_tls = false
//! devices = ["light-kitchen", "rocker-hall"]
//!
//! [timing]
//! hold_ms = 600
//! inter_click_ms = 400
//! command_timeout_ms = 5000
//! liveness_timeout_secs = 90
//! resync_interval_secs = 60   # 0 disables periodic resync
//!
//! [reconnect]
//! backoff_base_ms = 1000
//! backoff_max_secs = 60
//! ```
//!
//! Every field is optional.  Missing fields take the defaults of
//! [`GatewayConfig`], and a missing file is the same as an empty one.  The
//! CLI overrides whatever the file says.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Dialect, GatewayConfig};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error other than "not found".
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The values parse but cannot be used.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── File schema ───────────────────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileConfig {
    #[serde(default)]
    pub gateway: GatewaySection,
    #[serde(default)]
    pub timing: TimingSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
}

/// Where the gateway is and how to talk to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewaySection {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub token: String,
    /// `"junghome"` or `"logical"`.
    #[serde(default = "default_dialect")]
    pub dialect: String,
    #[serde(default = "default_true")]
    pub tls: bool,
    #[serde(default)]
    pub verify_tls: bool,
    /// Devices of interest; empty means every device.
    #[serde(default)]
    pub devices: Vec<String>,
}

/// Gesture, command and liveness timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimingSection {
    #[serde(default = "default_hold_ms")]
    pub hold_ms: u64,
    #[serde(default = "default_inter_click_ms")]
    pub inter_click_ms: u64,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_liveness_timeout_secs")]
    pub liveness_timeout_secs: u64,
    /// `0` disables the periodic resync.
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,
}

/// Reconnect backoff bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconnectSection {
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_dialect() -> String {
    "junghome".to_string()
}

fn default_true() -> bool {
    true
}

fn default_hold_ms() -> u64 {
    600
}

fn default_inter_click_ms() -> u64 {
    400
}

fn default_command_timeout_ms() -> u64 {
    5_000
}

fn default_liveness_timeout_secs() -> u64 {
    90
}

fn default_resync_interval_secs() -> u64 {
    60
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_max_secs() -> u64 {
    60
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            host: String::new(),
            token: String::new(),
            dialect: default_dialect(),
            tls: default_true(),
            verify_tls: false,
            devices: Vec::new(),
        }
    }
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            hold_ms: default_hold_ms(),
            inter_click_ms: default_inter_click_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            liveness_timeout_secs: default_liveness_timeout_secs(),
            resync_interval_secs: default_resync_interval_secs(),
        }
    }
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_secs: default_backoff_max_secs(),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Loads the file at `path`, returning defaults if it does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<FileConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

impl FileConfig {
    /// Converts the file into a [`GatewayConfig`].  Host and token are not
    /// checked here; see [`validate`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unknown dialect or zero
    /// timing windows.
    pub fn into_gateway_config(self) -> Result<GatewayConfig, ConfigError> {
        let dialect = Dialect::parse(&self.gateway.dialect).ok_or_else(|| {
            ConfigError::Invalid(format!("unknown dialect {:?}", self.gateway.dialect))
        })?;
        if self.timing.hold_ms == 0 || self.timing.inter_click_ms == 0 {
            return Err(ConfigError::Invalid(
                "gesture timing windows must be positive".to_string(),
            ));
        }
        let devices: HashSet<String> = self.gateway.devices.into_iter().collect();

        Ok(GatewayConfig {
            host: self.gateway.host,
            token: self.gateway.token,
            devices_of_interest: (!devices.is_empty()).then_some(devices),
            dialect,
            tls: self.gateway.tls,
            verify_tls: self.gateway.verify_tls,
            hold_duration: Duration::from_millis(self.timing.hold_ms),
            inter_click_window: Duration::from_millis(self.timing.inter_click_ms),
            command_timeout: Duration::from_millis(self.timing.command_timeout_ms),
            liveness_timeout: Duration::from_secs(self.timing.liveness_timeout_secs),
            resync_interval: (self.timing.resync_interval_secs > 0)
                .then(|| Duration::from_secs(self.timing.resync_interval_secs)),
            backoff_base: Duration::from_millis(self.reconnect.backoff_base_ms),
            backoff_max: Duration::from_secs(self.reconnect.backoff_max_secs),
            ..GatewayConfig::default()
        })
    }
}

/// Checks the settings every connection needs.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] if the host or token is empty, a timing
/// value is zero, or the backoff bounds are inverted.
pub fn validate(config: &GatewayConfig) -> Result<(), ConfigError> {
    if config.host.trim().is_empty() {
        return Err(ConfigError::Invalid("gateway host is empty".to_string()));
    }
    if config.token.trim().is_empty() {
        return Err(ConfigError::Invalid("gateway token is empty".to_string()));
    }
    let timings = [
        ("hold duration", config.hold_duration),
        ("inter-click window", config.inter_click_window),
        ("command timeout", config.command_timeout),
        ("liveness timeout", config.liveness_timeout),
        ("keepalive interval", config.keepalive_interval),
        ("backoff base", config.backoff_base),
        ("request timeout", config.request_timeout),
    ];
    if let Some((name, _)) = timings.iter().find(|(_, value)| value.is_zero()) {
        return Err(ConfigError::Invalid(format!("{name} must be positive")));
    }
    if config.backoff_base > config.backoff_max {
        return Err(ConfigError::Invalid(
            "backoff base exceeds backoff maximum".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_yields_gateway_defaults() {
        // Arrange
        let file: FileConfig = toml::from_str("").unwrap();

        // Act
        let cfg = file.into_gateway_config().unwrap();

        // Assert
        let defaults = GatewayConfig::default();
        assert_eq!(cfg.hold_duration, defaults.hold_duration);
        assert_eq!(cfg.inter_click_window, defaults.inter_click_window);
        assert_eq!(cfg.resync_interval, defaults.resync_interval);
        assert_eq!(cfg.dialect, Dialect::JungHome);
        assert!(cfg.devices_of_interest.is_none());
    }

    #[test]
    fn test_partial_file_overrides_only_given_fields() {
        let toml = r#"
            [gateway]
            host = "gw.local"
            token = "abc"
            dialect = "logical"
            devices = ["a", "b"]

            [timing]
            hold_ms = 800
            resync_interval_secs = 0
        "#;

        let cfg = toml::from_str::<FileConfig>(toml)
            .unwrap()
            .into_gateway_config()
            .unwrap();

        assert_eq!(cfg.host, "gw.local");
        assert_eq!(cfg.dialect, Dialect::Logical);
        assert_eq!(cfg.hold_duration, Duration::from_millis(800));
        assert_eq!(cfg.inter_click_window, Duration::from_millis(400));
        assert_eq!(cfg.resync_interval, None);
        assert_eq!(cfg.devices_of_interest.unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_dialect_is_rejected() {
        let file: FileConfig = toml::from_str("[gateway]\ndialect = \"mqtt\"").unwrap();

        assert!(matches!(
            file.into_gateway_config(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_missing_file_returns_defaults() {
        let path = std::env::temp_dir().join("junghome-bridge-no-such-config.toml");

        let file = load_config(&path).unwrap();

        assert_eq!(file, FileConfig::default());
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let path = std::env::temp_dir().join(format!("junghome-bridge-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "[gateway\nhost = ").unwrap();

        let result = load_config(&path);
        let _ = std::fs::remove_file(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_validate_requires_host_and_token() {
        let mut cfg = GatewayConfig::default();
        assert!(validate(&cfg).is_err());

        cfg.host = "gw".to_string();
        assert!(validate(&cfg).is_err());

        cfg.token = "t".to_string();
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_durations() {
        // Arrange
        let valid = GatewayConfig {
            host: "gw".to_string(),
            token: "t".to_string(),
            ..GatewayConfig::default()
        };
        let zero_liveness = GatewayConfig {
            liveness_timeout: Duration::ZERO,
            ..valid.clone()
        };
        let zero_backoff = GatewayConfig {
            backoff_base: Duration::ZERO,
            ..valid.clone()
        };

        // Act
        let liveness = validate(&zero_liveness).unwrap_err();
        let backoff = validate(&zero_backoff).unwrap_err();

        // Assert
        assert!(liveness.to_string().contains("liveness timeout"));
        assert!(backoff.to_string().contains("backoff base"));
        assert!(validate(&valid).is_ok());
    }
}
