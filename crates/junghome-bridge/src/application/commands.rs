//! Pending command tracking and the public [`GatewayError`] type.
//!
//! Every command sent to the gateway gets a correlation id and an entry in
//! [`PendingCommands`] until exactly one of these happens:
//!
//! | Outcome | Caller sees |
//! |---------|-------------|
//! | `command_ack` with status ok, or a matching echo | `Ok(())` |
//! | `command_ack` with status error | [`GatewayError::CommandRejected`] |
//! | timeout elapsed | [`GatewayError::CommandTimeout`] |
//! | connection lost | [`GatewayError::ConnectionLost`] |
//! | shutdown | [`GatewayError::Cancelled`] |
//!
//! Each entry owns its timeout task and aborts it when resolved, so a
//! resolved command can never also time out.

use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use junghome_core::protocol::{AckStatus, CommandAck};
use junghome_core::{Command, RegistryError};

use crate::application::session::GatewayStatus;

// ── Error type ────────────────────────────────────────────────────────────────

/// Errors surfaced to callers of the public gateway API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The gateway rejected the token.  Requires operator action.
    #[error("gateway rejected the token: {0}")]
    Auth(String),

    /// No active session; the bridge is connecting or reconnecting.
    #[error("gateway unavailable ({status})")]
    Unavailable { status: GatewayStatus },

    #[error("no acknowledgement for command {correlation_id} within {timeout:?}")]
    CommandTimeout {
        correlation_id: u64,
        timeout: Duration,
    },

    #[error("gateway rejected the command: {message}")]
    CommandRejected {
        code: Option<String>,
        message: String,
    },

    /// The connection dropped before the command was acknowledged.
    #[error("connection lost before acknowledgement")]
    ConnectionLost,

    /// The bridge shut down while the command was pending.
    #[error("command cancelled by shutdown")]
    Cancelled,

    #[error("device {device_id} does not support attribute {attribute}")]
    UnsupportedAttribute { device_id: String, attribute: String },

    #[error("device {0} not found")]
    NotFound(String),

    #[error("invalid value {value} for attribute {attribute} of device {device_id}")]
    InvalidValue {
        device_id: String,
        attribute: String,
        value: String,
    },

    #[error("attribute {attribute} of device {device_id} is read-only")]
    ReadOnlyAttribute { device_id: String, attribute: String },

    /// The session task is gone.
    #[error("gateway client has shut down")]
    Shutdown,
}

impl From<RegistryError> for GatewayError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => GatewayError::NotFound(id),
            RegistryError::UnsupportedAttribute {
                device_id,
                attribute,
            } => GatewayError::UnsupportedAttribute {
                device_id,
                attribute,
            },
            RegistryError::ReadOnlyAttribute {
                device_id,
                attribute,
            } => GatewayError::ReadOnlyAttribute {
                device_id,
                attribute,
            },
            RegistryError::InvalidValue {
                device_id,
                attribute,
                value,
            } => GatewayError::InvalidValue {
                device_id,
                attribute,
                value,
            },
        }
    }
}

// ── Pending commands ──────────────────────────────────────────────────────────

/// Where a command caller is waiting for its result.
pub type CommandReply = oneshot::Sender<Result<(), GatewayError>>;

/// How the gateway confirms a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// An explicit `command_ack` with the correlation id.
    Explicit,
    /// The first state update reporting the requested value.
    Echo,
}

#[derive(Debug)]
struct PendingCommand {
    command: Command,
    mode: AckMode,
    reply: CommandReply,
    timer: JoinHandle<()>,
}

impl PendingCommand {
    fn resolve(self, result: Result<(), GatewayError>) -> Command {
        self.timer.abort();
        // The caller may have stopped waiting; that is not an error here.
        let _ = self.reply.send(result);
        self.command
    }
}

/// In-flight commands keyed by correlation id.
///
/// Kept in a `BTreeMap` so echo matching resolves commands in send order.
#[derive(Debug, Default)]
pub struct PendingCommands {
    entries: BTreeMap<u64, PendingCommand>,
}

impl PendingCommands {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tracks a sent command.  `timer` is the task that reports its timeout.
    pub fn insert(
        &mut self,
        correlation_id: u64,
        command: Command,
        mode: AckMode,
        reply: CommandReply,
        timer: JoinHandle<()>,
    ) {
        self.entries.insert(
            correlation_id,
            PendingCommand {
                command,
                mode,
                reply,
                timer,
            },
        );
    }

    /// Resolves the command an acknowledgement refers to.
    ///
    /// Returns the command if the gateway accepted it, so the caller can
    /// apply the confirmed value.  Unknown correlation ids return `None`.
    pub fn acknowledge(&mut self, ack: &CommandAck) -> Option<Command> {
        let Some(pending) = self.entries.remove(&ack.correlation_id) else {
            debug!(correlation_id = ack.correlation_id, "ack for unknown command");
            return None;
        };
        match &ack.status {
            AckStatus::Ok => Some(pending.resolve(Ok(()))),
            AckStatus::Error { code, message } => {
                warn!(
                    correlation_id = ack.correlation_id,
                    device_id = %pending.command.device_id,
                    code = code.as_deref().unwrap_or("-"),
                    message = %message,
                    "command rejected"
                );
                pending.resolve(Err(GatewayError::CommandRejected {
                    code: code.clone(),
                    message: message.clone(),
                }));
                None
            }
        }
    }

    /// Resolves every echo-confirmed command for which `confirms` holds.
    /// Returns how many were resolved.
    pub fn confirm_echo<F>(&mut self, confirms: F) -> usize
    where
        F: Fn(&Command) -> bool,
    {
        let matched: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, p)| p.mode == AckMode::Echo && confirms(&p.command))
            .map(|(id, _)| *id)
            .collect();
        for id in &matched {
            if let Some(pending) = self.entries.remove(id) {
                debug!(correlation_id = *id, "command confirmed by echo");
                pending.resolve(Ok(()));
            }
        }
        matched.len()
    }

    /// Fails a command whose timeout elapsed.  Returns `false` if it was
    /// already resolved.
    pub fn time_out(&mut self, correlation_id: u64, timeout: Duration) -> bool {
        match self.entries.remove(&correlation_id) {
            Some(pending) => {
                warn!(correlation_id, device_id = %pending.command.device_id, "command timed out");
                pending.resolve(Err(GatewayError::CommandTimeout {
                    correlation_id,
                    timeout,
                }));
                true
            }
            None => false,
        }
    }

    /// Fails every pending command with `err`.  Returns how many there were.
    pub fn fail_all(&mut self, err: GatewayError) -> usize {
        let count = self.entries.len();
        for (_, pending) in std::mem::take(&mut self.entries) {
            pending.resolve(Err(err.clone()));
        }
        count
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
