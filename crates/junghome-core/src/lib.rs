//! # junghome-core
//!
//! Shared library for the Jung Home gateway bridge containing the wire codec,
//! the typed device model, and the gesture engine.
//!
//! This crate has zero dependencies on sockets, timers, or the filesystem.
//! Every function that needs "now" takes it as an argument, which keeps the
//! whole crate deterministic and trivially testable.
//!
//! # Architecture overview (for beginners)
//!
//! A Jung Home gateway sits between the physical installation (light switches,
//! dimmers, sockets, push-button panels) and the local network.  It exposes a
//! WebSocket endpoint that pushes every state change as a small JSON frame and
//! accepts JSON frames that change device state.
//!
//! This crate (`junghome-core`) is the pure foundation.  It defines:
//!
//! - **`protocol`** – How frames travel over the WebSocket.  Inbound JSON text
//!   is decoded into a typed [`ParsedMessage`]; outbound commands are encoded
//!   into JSON text.  Decoding errors are values, never panics.
//!
//! - **`domain`** – Pure logic with no I/O.  The [`DeviceRegistry`] turns
//!   state updates into device snapshots and change notifications, and the
//!   [`GestureEngine`] turns raw press/release edges into single, double,
//!   triple, and hold gestures.
//!
//! The async runtime, the actual WebSocket, and the subscriber fan-out live in
//! the `junghome-bridge` crate, which drives these types from a single task.

// Declare the two top-level modules.  Rust will look for each in a
// subdirectory with the same name (e.g., src/protocol/mod.rs).
pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `junghome_core::DeviceRegistry` instead of the full module path.
pub use domain::device::{Capability, Device, DeviceClass};
pub use domain::gesture::{Gesture, GestureConfig, GestureEffect, GestureEngine, GestureEvent};
pub use domain::registry::{DeviceEvent, DeviceRegistry, RegistryError};
pub use protocol::codec::{decode_message, encode_message, DecodeError};
pub use protocol::messages::{AttributeValue, Command, Edge, OutboundMessage, ParsedMessage};
