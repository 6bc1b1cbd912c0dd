//! Domain layer: configuration shared by every other layer.

pub mod config;

pub use config::{Dialect, GatewayConfig};
