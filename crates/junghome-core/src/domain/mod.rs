//! Domain module: pure device and gesture logic with no I/O.
//!
//! - [`device`] – the [`Device`](device::Device) entity and its capability model.
//! - [`registry`] – the [`DeviceRegistry`](registry::DeviceRegistry) that owns
//!   every device and reports changes.
//! - [`gesture`] – the [`GestureEngine`](gesture::GestureEngine) that classifies
//!   button edges.

pub mod device;
pub mod gesture;
pub mod registry;
