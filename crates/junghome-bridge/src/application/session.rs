//! Session state: the connection lifecycle and reconnect backoff.
//!
//! # Lifecycle (for beginners)
//!
//! ```text
//!  Disconnected ──► Connecting ──► Authenticating ──► Subscribing ──► Active
//!                       ▲                │                               │
//!                       │                └──► AuthFailed (fatal)         │
//!                       │                                                │
//!                       └──────── Reconnecting { attempt } ◄─────────────┘
//!                                   (backoff delay)          transport lost /
//!                                                            liveness timeout
//!
//!  any state ──► Stopped  (explicit shutdown)
//! ```
//!
//! A [`Session`] value exists only while a transport connection exists.  It
//! is created on every successful handshake and dropped wholesale when the
//! connection ends, so nothing from an old connection (its correlation of
//! the subscribe frame, its last-seen time, its reader task) can leak into
//! the next one.  Each session carries a `generation` number; events tagged
//! with an older generation are discarded by the session actor.

use std::fmt;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use junghome_core::protocol::{encode_message, OutboundMessage};

use crate::application::ports::TransportError;

// ── Status ────────────────────────────────────────────────────────────────────

/// Observable connection status, published on a `watch` channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GatewayStatus {
    #[default]
    Disconnected,
    Connecting,
    Authenticating,
    Subscribing,
    Active,
    /// Waiting out the backoff delay before reconnect attempt `attempt`.
    Reconnecting { attempt: u32 },
    /// The gateway rejected the token.  Not retried.
    AuthFailed,
    /// Shut down on request.
    Stopped,
}

impl GatewayStatus {
    pub fn is_active(self) -> bool {
        self == GatewayStatus::Active
    }

    /// `true` for states the session never leaves on its own.
    pub fn is_terminal(self) -> bool {
        matches!(self, GatewayStatus::AuthFailed | GatewayStatus::Stopped)
    }
}

impl fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayStatus::Disconnected => f.write_str("disconnected"),
            GatewayStatus::Connecting => f.write_str("connecting"),
            GatewayStatus::Authenticating => f.write_str("authenticating"),
            GatewayStatus::Subscribing => f.write_str("subscribing"),
            GatewayStatus::Active => f.write_str("active"),
            GatewayStatus::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            GatewayStatus::AuthFailed => f.write_str("authentication failed"),
            GatewayStatus::Stopped => f.write_str("stopped"),
        }
    }
}

// ── Backoff ───────────────────────────────────────────────────────────────────

/// Exponential reconnect backoff with jitter.
///
/// Attempt 1 waits about `base`, attempt 2 about `2 × base`, and so on,
/// never more than `max`.  Each delay is scaled by a random factor in
/// `[0.8, 1.2]` so many bridges restarted together do not reconnect in
/// lock-step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

/// Jitter is applied as a factor in `1 ± JITTER`.
const JITTER: f64 = 0.2;

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before `attempt` (1-based) without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let secs = self.base.as_secs_f64() * 2f64.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max.as_secs_f64()))
    }

    /// Delay before `attempt` (1-based) with jitter, capped at `max`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = rand::thread_rng().gen_range((1.0 - JITTER)..=(1.0 + JITTER));
        let secs = self.base_delay(attempt).as_secs_f64() * factor;
        Duration::from_secs_f64(secs.min(self.max.as_secs_f64()))
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// One live connection to the gateway.
///
/// Owns the outbound half of the transport and the task that forwards the
/// inbound half to the session actor.  Dropping a `Session` aborts that task
/// and closes the outbound channel, which makes the writer task close the
/// socket.
pub struct Session {
    /// Log correlation id.
    pub id: Uuid,
    pub generation: u64,
    pub status: GatewayStatus,
    /// Correlation id of the `subscribe` frame awaiting its acknowledgement.
    pub pending_subscribe: Option<u64>,
    outbound: mpsc::UnboundedSender<String>,
    forwarder: JoinHandle<()>,
    last_seen: Instant,
}

impl Session {
    pub fn new(
        generation: u64,
        outbound: mpsc::UnboundedSender<String>,
        forwarder: JoinHandle<()>,
    ) -> Self {
        let session = Self {
            id: Uuid::new_v4(),
            generation,
            status: GatewayStatus::Authenticating,
            pending_subscribe: None,
            outbound,
            forwarder,
            last_seen: Instant::now(),
        };
        debug!(session_id = %session.id, generation, "session created");
        session
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Encodes and queues an outbound frame.  Only the frame kind is logged;
    /// `authenticate` frames carry the token.
    pub fn send(&self, msg: &OutboundMessage) -> Result<(), TransportError> {
        debug!(session_id = %self.id, kind = msg.kind(), "sending frame");
        self.send_text(encode_message(msg))
    }

    /// Queues an already encoded frame.
    pub fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.outbound.send(text).map_err(|_| TransportError::Closed)
    }

    /// Records inbound traffic for the liveness check.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// How long the gateway has been silent.
    pub fn silence(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_seen)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.forwarder.abort();
        debug!(session_id = %self.id, generation = self.generation, "session dropped");
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("status", &self.status)
            .field("pending_subscribe", &self.pending_subscribe)
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
