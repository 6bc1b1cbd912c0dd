//! Jung Home gateway bridge: entry point.
//!
//! Connects to one Jung Home gateway, keeps the session alive, and logs every
//! device change and recognised button gesture.  The same library powers
//! host automation integrations; this binary is the standalone way to watch a
//! gateway and check a configuration.
//!
//! # Usage
//!
//! ```text
//! junghome-bridge [OPTIONS]
//!
//! Options:
//!   --config         <PATH>   TOML configuration file [default: junghome-bridge.toml]
//!   --host           <HOST>   Gateway host name or IP address
//!   --token          <TOKEN>  Token confirmed in the vendor app
//!   --device         <ID>     Device of interest (repeatable)
//!   --dialect        <NAME>   junghome | logical
//!   --verify-tls              Verify the gateway certificate
//!   --hold-ms        <MS>     Press duration that counts as a hold
//!   --inter-click-ms <MS>     Gap that closes a click sequence
//!   --log-level      <LEVEL>  Fallback log filter when RUST_LOG is unset [default: info]
//! ```
//!
//! # Environment variable overrides
//!
//! CLI args take precedence over environment variables, which take
//! precedence over the config file.
//!
//! | Variable            | Description                         |
//! |---------------------|-------------------------------------|
//! | `JUNGHOME_CONFIG`   | Config file path                    |
//! | `JUNGHOME_HOST`     | Gateway host                        |
//! | `JUNGHOME_TOKEN`    | Gateway token                       |
//! | `JUNGHOME_DIALECT`  | Frame dialect                       |
//! | `RUST_LOG`          | Log filter (e.g. `junghome_bridge=debug`) |
//!
//! # Exit status
//!
//! `0` after Ctrl+C, non-zero if the configuration is invalid or the gateway
//! rejects the token.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use junghome_bridge::domain::{Dialect, GatewayConfig};
use junghome_bridge::infrastructure::config_file::{load_config, validate};
use junghome_bridge::GatewayStatus;
use junghome_core::DeviceEvent;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Jung Home gateway bridge.
///
/// Holds a WebSocket session to the gateway and logs device state changes and
/// button gestures.
#[derive(Debug, Parser)]
#[command(
    name = "junghome-bridge",
    about = "WebSocket client for Jung Home gateways",
    version
)]
struct Cli {
    /// Path of the TOML configuration file.  A missing file means defaults.
    #[arg(long, default_value = "junghome-bridge.toml", env = "JUNGHOME_CONFIG")]
    config: PathBuf,

    /// Gateway host name or IP address, optionally with `:port`.
    #[arg(long, env = "JUNGHOME_HOST")]
    host: Option<String>,

    /// Token confirmed beforehand in the vendor app.
    #[arg(long, env = "JUNGHOME_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Limit the bridge to this device id.  Repeat for several devices.
    #[arg(long = "device")]
    devices: Vec<String>,

    /// Frame dialect: `junghome` or `logical`.
    #[arg(long, env = "JUNGHOME_DIALECT")]
    dialect: Option<String>,

    /// Verify the gateway certificate against the web PKI roots.
    #[arg(long)]
    verify_tls: bool,

    /// Press duration in milliseconds that counts as a hold.
    #[arg(long)]
    hold_ms: Option<u64>,

    /// Gap in milliseconds after a release that closes a click sequence.
    #[arg(long)]
    inter_click_ms: Option<u64>,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    /// Loads the config file and applies the CLI overrides on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, a value is out
    /// of range, or host or token is still missing afterwards.
    fn into_gateway_config(self) -> anyhow::Result<GatewayConfig> {
        let file = load_config(&self.config)
            .with_context(|| format!("cannot load config file {}", self.config.display()))?;
        let mut config = file
            .into_gateway_config()
            .with_context(|| format!("invalid config file {}", self.config.display()))?;

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(token) = self.token {
            config.token = token;
        }
        if !self.devices.is_empty() {
            config.devices_of_interest = Some(self.devices.into_iter().collect());
        }
        if let Some(name) = self.dialect {
            config.dialect = Dialect::parse(&name)
                .with_context(|| format!("unknown dialect '{name}' (expected junghome or logical)"))?;
        }
        if self.verify_tls {
            config.verify_tls = true;
        }
        if let Some(ms) = self.hold_ms {
            anyhow::ensure!(ms > 0, "--hold-ms must be positive");
            config.hold_duration = Duration::from_millis(ms);
        }
        if let Some(ms) = self.inter_click_ms {
            anyhow::ensure!(ms > 0, "--inter-click-ms must be positive");
            config.inter_click_window = Duration::from_millis(ms);
        }

        validate(&config).context("incomplete gateway configuration")?;
        Ok(config)
    }
}

// ── Event logging ─────────────────────────────────────────────────────────────

fn log_device_event(event: &DeviceEvent) {
    match event {
        DeviceEvent::Changed {
            device_id,
            created,
            changes,
        } => {
            for change in changes {
                info!(
                    device = %device_id,
                    created,
                    attribute = %change.attribute,
                    value = %change.new,
                    "device changed"
                );
            }
        }
        DeviceEvent::Availability {
            device_id,
            available,
        } => info!(device = %device_id, available, "device availability"),
        DeviceEvent::Removed { device_id } => info!(device = %device_id, "device removed"),
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. CLI arguments are parsed and merged over the config file.
/// 2. `tracing_subscriber` is initialised from `RUST_LOG`, falling back to
///    `--log-level`.
/// 3. The gateway client is spawned and device and gesture logging is
///    attached.
/// 4. The process runs until Ctrl+C or until the gateway rejects the token.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ─────────────────────────────────────────────────────────
    let fallback = cli.log_level.clone();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .init();

    let config = cli.into_gateway_config()?;
    info!(
        gateway = %config.host,
        dialect = %config.dialect,
        "Jung Home bridge starting"
    );

    let handle = junghome_bridge::connect(config).context("cannot start gateway client")?;

    handle.subscribe_devices(log_device_event);
    handle.subscribe_gestures(None, |g| {
        info!(button = %g.button_id, gesture = %g.gesture, "gesture");
    });

    // ── Run until Ctrl+C or a fatal authentication error ──────────────────────
    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("received Ctrl+C, shutting down"),
                Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
            }
            Ok(())
        }
        status = handle.wait_for_status(|s| s.is_terminal()) => match status {
            Ok(GatewayStatus::AuthFailed) => {
                Err(anyhow::anyhow!("gateway rejected the token; confirm it in the Jung Home app"))
            }
            Ok(other) => {
                warn!(status = %other, "gateway client stopped");
                Ok(())
            }
            Err(e) => Err(e).context("gateway client ended unexpectedly"),
        },
    };

    handle.shutdown().await;
    info!("Jung Home bridge stopped");
    outcome
}

// ── Tests ─────────────────────────────────────────────────────────────────────
