//! junghome-bridge library crate.
//!
//! Connects a home-automation host to a Jung Home gateway over WebSocket and
//! exposes the gateway's devices as an in-memory registry, button presses as
//! classified gestures, and writes as awaitable commands.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Host automation framework
//!         ↕  GatewayHandle: set / get / subscribe
//! [junghome-bridge]
//!   ├── domain/           GatewayConfig, Dialect
//!   ├── application/      Session actor, pending commands, event dispatcher,
//!   │                     transport and snapshot ports
//!   └── infrastructure/
//!         ├── transport/  WebSocket connector (tokio-tungstenite + rustls)
//!         ├── snapshot/   REST function list (reqwest)
//!         └── config_file TOML loading
//!         ↕
//! Jung Home gateway  (JSON over wss://<host>/ws, HTTPS function list)
//! ```
//!
//! The protocol codec, device registry and gesture engine live in the
//! I/O-free `junghome-core` crate.
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `junghome-core`, and reaches the
//!   network only through the traits in `application::ports`.
//! - `infrastructure` implements those traits with real sockets.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use junghome_bridge::domain::GatewayConfig;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let handle = junghome_bridge::connect(GatewayConfig {
//!     host: "192.168.1.20".to_string(),
//!     token: "confirmed-token".to_string(),
//!     ..GatewayConfig::default()
//! })?;
//! handle.subscribe_gestures(None, |g| println!("{} → {}", g.button_id, g.gesture));
//! handle.set("light-kitchen", "brightness", 60).await?;
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use thiserror::Error;

/// Domain layer: configuration types (no I/O).
pub mod domain;

/// Application layer: session actor and event fan-out.
pub mod application;

/// Infrastructure layer: WebSocket, TLS, REST and config file adapters.
pub mod infrastructure;

pub use application::{Gateway, GatewayError, GatewayHandle, GatewayStatus, SubscriptionId};
pub use domain::{Dialect, GatewayConfig};

use application::ports::{SnapshotError, SnapshotSource, TransportError};
use infrastructure::config_file::{validate, ConfigError};
use infrastructure::snapshot::RestSnapshotSource;
use infrastructure::transport::WsConnector;

/// Errors starting a gateway client with the real adapters.
#[derive(Debug, Error)]
pub enum StartError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot build transport: {0}")]
    Transport(#[from] TransportError),

    #[error("cannot build snapshot client: {0}")]
    Snapshot(#[from] SnapshotError),
}

/// Validates `config`, wires the WebSocket connector and the REST snapshot
/// source, and spawns the session actor on the current tokio runtime.
///
/// The logical dialect has no REST endpoint, so it runs without a snapshot
/// source and relies on the gateway replaying state after subscribe.
///
/// # Errors
///
/// Returns [`StartError`] if the configuration is incomplete or the TLS or
/// HTTP clients cannot be built.  Connection problems are not errors here:
/// the session keeps reconnecting and reports them through
/// [`GatewayHandle::status`].
pub fn connect(config: GatewayConfig) -> Result<GatewayHandle, StartError> {
    validate(&config)?;
    let connector = Arc::new(WsConnector::new(&config)?);
    let snapshots: Option<Arc<dyn SnapshotSource>> = match config.dialect {
        Dialect::JungHome => Some(Arc::new(RestSnapshotSource::new(&config)?)),
        Dialect::Logical => None,
    };
    Ok(Gateway::spawn(config, connector, snapshots))
}
