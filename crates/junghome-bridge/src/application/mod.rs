//! Application layer: the session actor and everything it orchestrates.
//!
//! # What lives here? (for beginners)
//!
//! The application layer sits between the pure domain logic in
//! `junghome-core` (registry, gesture engine, codec) and the infrastructure
//! that talks to the outside world (WebSocket, HTTP, files).  It depends on
//! infrastructure only through the traits in [`ports`], so every use case
//! here can be driven by in-process fakes in tests.
//!
//! # Sub-modules
//!
//! - **`gateway`**    – The single-task session actor and the public
//!   [`GatewayHandle`](gateway::GatewayHandle).
//! - **`session`**    – Connection status, the per-connection [`Session`](session::Session)
//!   value and reconnect backoff.
//! - **`commands`**   – Pending command tracking and [`GatewayError`](commands::GatewayError).
//! - **`dispatcher`** – Fault-isolated fan-out of device and gesture events.
//! - **`ports`**      – Transport and snapshot traits implemented by
//!   infrastructure.

pub mod commands;
pub mod dispatcher;
pub mod gateway;
pub mod ports;
pub mod session;

pub use commands::GatewayError;
pub use dispatcher::{EventDispatcher, SubscriptionId};
pub use gateway::{Gateway, GatewayHandle};
pub use session::GatewayStatus;
