//! Infrastructure layer: adapters to the network and the file system.
//!
//! - **`transport`**   – WebSocket [`Connector`](crate::application::ports::Connector)
//!   with rustls, plus an in-process mock gateway.
//! - **`snapshot`**    – REST [`SnapshotSource`](crate::application::ports::SnapshotSource)
//!   for the function list, plus a scripted mock.
//! - **`config_file`** – TOML configuration loading.
//!
//! **Dependency rule**: this layer may depend on `application`, `domain` and
//! `junghome_core`, but MUST NOT be imported by the `application` or domain
//! layers outside of tests.

pub mod config_file;
pub mod snapshot;
pub mod transport;
