//! Interfaces the application layer needs from infrastructure.
//!
//! The session actor never touches a socket or an HTTP client directly.  It
//! asks a [`Connector`] for a [`Connection`] and a [`SnapshotSource`] for the
//! full device list.  Production implementations live in `infrastructure`;
//! the mock implementations next to them let tests play the gateway's part.
//!
//! # Channel-based connections (for beginners)
//!
//! A [`Connection`] is two channels rather than a socket:
//!
//! ```text
//!  session actor                          transport tasks
//!  ───────────────────────────────────────────────────────────────
//!  outbound.send(text)  ─────────────────►  writer task → WebSocket
//!  inbound.recv()       ◄─────────────────  reader task ← WebSocket
//! ```
//!
//! Dropping the `outbound` sender tells the writer task to close the socket,
//! so dropping a session is all it takes to tear a connection down.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use junghome_core::protocol::{DecodeError, FunctionDescriptor};

/// Errors establishing or using the gateway transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// DNS, TCP, or WebSocket handshake failure.
    #[error("connection failed: {0}")]
    Connect(String),

    /// TLS setup or handshake failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The gateway refused the token during the handshake (HTTP 401/403).
    #[error("gateway rejected the token (HTTP {status})")]
    Unauthorized { status: u16 },

    /// Any other non-101 HTTP answer to the upgrade request.
    #[error("unexpected HTTP status {status} during handshake")]
    Http { status: u16 },

    /// The connection closed while sending.
    #[error("connection closed")]
    Closed,
}

/// One event read from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text or binary data frame.
    Frame(Vec<u8>),
    /// Control traffic (ping/pong) that proves the link is alive.
    Alive,
    /// The connection ended.  No further events follow.
    Closed(Option<String>),
}

/// An established gateway connection.
#[derive(Debug)]
pub struct Connection {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens connections to the gateway.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Performs the transport handshake.  For the Jung Home dialect the token
    /// travels in the handshake, so a 401/403 here is an authentication
    /// failure rather than a transient error.
    async fn connect(&self) -> Result<Connection, TransportError>;
}

/// Errors fetching the full device snapshot.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("snapshot request failed: {0}")]
    Request(String),

    #[error("gateway rejected the token (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("snapshot body invalid: {0}")]
    Decode(#[from] DecodeError),
}

/// Supplies the gateway's full device list for resynchronization.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<FunctionDescriptor>, SnapshotError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_decode_error_is_cloneable() {
        // Arrange
        let err = SnapshotError::from(DecodeError::MissingType);

        // Act
        let copy = err.clone();

        // Assert
        assert_eq!(copy, SnapshotError::Decode(DecodeError::MissingType));
        assert!(copy.to_string().contains("type"));
    }
}
