//! In-process fake gateway for tests.
//!
//! [`MockConnector`] implements [`Connector`] without any sockets.  Every
//! successful `connect()` hands the test a [`MockLink`]: the gateway's end of
//! the connection.  The test pushes frames into the bridge and reads what the
//! bridge sent, exactly as a real gateway would see it.
//!
//! ```text
//!  test ──► MockLink::push(json) ──► Connection.inbound ──► session actor
//!  test ◄── MockLink::next_sent() ◄── Connection.outbound ◄── session actor
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::application::ports::{Connection, Connector, TransportError, TransportEvent};

/// A [`Connector`] whose connections are driven by the test.
pub struct MockConnector {
    links: mpsc::UnboundedSender<MockLink>,
    failures: Mutex<VecDeque<TransportError>>,
    attempts: AtomicUsize,
}

impl MockConnector {
    /// Creates the connector and the receiver on which each new connection's
    /// [`MockLink`] arrives.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockLink>) {
        let (links, rx) = mpsc::unbounded_channel();
        let connector = Self {
            links,
            failures: Mutex::new(VecDeque::new()),
            attempts: AtomicUsize::new(0),
        };
        (connector, rx)
    }

    fn failures(&self) -> MutexGuard<'_, VecDeque<TransportError>> {
        self.failures.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Makes the next `connect()` fail with `err`.  Calls queue up.
    pub fn fail_next(&self, err: TransportError) {
        self.failures().push_back(err);
    }

    /// Number of `connect()` calls so far, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Connection, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures().pop_front() {
            return Err(err);
        }

        let (outbound, sent) = mpsc::unbounded_channel();
        let (events, inbound) = mpsc::unbounded_channel();
        self.links
            .send(MockLink { sent, events })
            .map_err(|_| TransportError::Connect("mock gateway dropped".to_string()))?;
        Ok(Connection { outbound, inbound })
    }
}

/// The gateway's end of one mock connection.
///
/// Dropping the link closes the connection from the gateway side.
#[derive(Debug)]
pub struct MockLink {
    sent: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl MockLink {
    /// Delivers a text frame to the bridge.  Returns `false` if the bridge
    /// already dropped this connection.
    pub fn push(&self, frame: &str) -> bool {
        self.events
            .send(TransportEvent::Frame(frame.as_bytes().to_vec()))
            .is_ok()
    }

    /// Delivers control traffic (as a ping would).
    pub fn alive(&self) -> bool {
        self.events.send(TransportEvent::Alive).is_ok()
    }

    /// Closes the connection from the gateway side.
    pub fn close(&self) {
        let _ = self
            .events
            .send(TransportEvent::Closed(Some("closed by mock gateway".to_string())));
    }

    /// Waits for the next frame the bridge sent.  `None` once the bridge
    /// dropped the connection.
    pub async fn next_sent(&mut self) -> Option<String> {
        self.sent.recv().await
    }

    /// Returns an already sent frame without waiting.
    pub fn try_next_sent(&mut self) -> Option<String> {
        self.sent.try_recv().ok()
    }

    /// `true` once the bridge dropped this connection.
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}
