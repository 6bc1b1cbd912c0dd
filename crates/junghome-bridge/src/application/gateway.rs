//! The session actor and its public handle.
//!
//! # One task, one queue (for beginners)
//!
//! Everything that touches shared state (the device registry, the gesture
//! machines, the pending commands, the current session) runs on a single
//! tokio task.  Every other task talks to it by posting an [`Input`] into
//! one unbounded queue:
//!
//! ```text
//!   GatewayHandle::set/get ──┐
//!   transport reader task ───┤
//!   gesture / command timers ┼──► Input queue ──► Gateway::run (single task)
//!   reconnect timer ─────────┤                        │
//!   snapshot fetch task ─────┘                        ├─► DeviceRegistry
//!                                                     ├─► GestureEngine
//!                                                     └─► EventDispatcher
//! ```
//!
//! Because inputs are handled one at a time, a hold timer firing and a
//! release edge arriving "at the same time" are simply processed in queue
//! order.  No locks are needed around the registry or the gesture engine.
//!
//! Spawned tasks only hold a *weak* sender to the queue.  Once the last
//! [`GatewayHandle`] is dropped the queue closes and the actor shuts down as
//! if [`GatewayHandle::shutdown`] had been called.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use junghome_core::domain::gesture::TimerToken;
use junghome_core::domain::registry::ResolvedDatapoint;
use junghome_core::protocol::{
    decode_message, encode_command, AckStatus, ButtonEdgeEvent, CommandAck, CorrelationCounter,
    DeviceStateUpdate, FunctionDescriptor, OutboundMessage, ParsedMessage,
};
use junghome_core::{
    AttributeValue, Device, DeviceEvent, DeviceRegistry, GestureEffect, GestureEngine, GestureEvent,
};

use crate::application::commands::{AckMode, CommandReply, GatewayError, PendingCommands};
use crate::application::dispatcher::{EventDispatcher, SubscriptionId};
use crate::application::ports::{
    Connection, Connector, SnapshotError, SnapshotSource, TransportError, TransportEvent,
};
use crate::application::session::{Backoff, GatewayStatus, Session};
use crate::domain::{Dialect, GatewayConfig};

// ── Actor inputs ──────────────────────────────────────────────────────────────

enum Input {
    Connected {
        generation: u64,
        result: Result<Connection, TransportError>,
    },
    Transport {
        generation: u64,
        event: TransportEvent,
    },
    Set {
        device_id: String,
        attribute: String,
        value: AttributeValue,
        reply: CommandReply,
    },
    Get {
        device_id: String,
        reply: oneshot::Sender<Result<Device, GatewayError>>,
    },
    Devices {
        reply: oneshot::Sender<Vec<Device>>,
    },
    GestureTimer(TimerToken),
    CommandTimeout {
        correlation_id: u64,
    },
    Reconnect,
    Snapshot {
        generation: u64,
        requested_at: std::time::Instant,
        result: Result<Vec<FunctionDescriptor>, SnapshotError>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

type Inbox = mpsc::WeakUnboundedSender<Input>;

/// Posts an input from a helper task.  Returns `false` once the actor is gone.
fn post(inbox: &Inbox, input: Input) -> bool {
    match inbox.upgrade() {
        Some(tx) => tx.send(input).is_ok(),
        None => false,
    }
}

/// Spawns a task that posts `input` after `delay`.
fn post_after(inbox: &Inbox, delay: Duration, input: Input) -> JoinHandle<()> {
    let inbox = inbox.clone();
    tokio::spawn(async move {
        time::sleep(delay).await;
        post(&inbox, input);
    })
}

/// Local monotonic receipt time.  Follows tokio's clock so paused-time tests
/// see the same instants as the timers.
fn now() -> std::time::Instant {
    time::Instant::now().into_std()
}

// ── Actor ─────────────────────────────────────────────────────────────────────

/// The session actor.  Create it with [`Gateway::spawn`]; talk to it through
/// the returned [`GatewayHandle`].
pub struct Gateway {
    config: GatewayConfig,
    connector: Arc<dyn Connector>,
    snapshots: Option<Arc<dyn SnapshotSource>>,
    inbox: Inbox,

    registry: DeviceRegistry,
    gestures: GestureEngine,
    gesture_timers: HashMap<TimerToken, JoinHandle<()>>,
    pending: PendingCommands,
    correlation: CorrelationCounter,
    dispatcher: Arc<EventDispatcher>,
    status: watch::Sender<GatewayStatus>,

    session: Option<Session>,
    generation: u64,
    attempt: u32,
    backoff: Backoff,
    connect_task: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
    snapshot_task: Option<JoinHandle<()>>,
}

impl Gateway {
    /// Starts the session actor on the current tokio runtime and begins
    /// connecting immediately.
    ///
    /// `snapshots` supplies the full device list after every (re)connect and
    /// on the periodic resync; pass `None` when the gateway replays state on
    /// subscribe.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn(
        config: GatewayConfig,
        connector: Arc<dyn Connector>,
        snapshots: Option<Arc<dyn SnapshotSource>>,
    ) -> GatewayHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(GatewayStatus::Disconnected);
        let dispatcher = Arc::new(EventDispatcher::new());

        let actor = Gateway {
            registry: DeviceRegistry::new(config.devices_of_interest.clone()),
            gestures: GestureEngine::new(config.gesture_config()),
            backoff: Backoff::new(config.backoff_base, config.backoff_max),
            config,
            connector,
            snapshots,
            inbox: tx.downgrade(),
            gesture_timers: HashMap::new(),
            pending: PendingCommands::new(),
            correlation: CorrelationCounter::new(),
            dispatcher: Arc::clone(&dispatcher),
            status: status_tx,
            session: None,
            generation: 0,
            attempt: 0,
            connect_task: None,
            reconnect_timer: None,
            snapshot_task: None,
        };
        tokio::spawn(actor.run(rx));

        GatewayHandle {
            inbox: tx,
            dispatcher,
            status: status_rx,
        }
    }

    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Input>) {
        info!(host = %self.config.host, dialect = %self.config.dialect, "gateway client starting");
        self.start_connect();

        let check_every = (self.config.liveness_timeout / 3).max(Duration::from_millis(100));
        let mut liveness = delayed_interval(check_every);
        let mut resync = self.config.resync_interval.map(delayed_interval);

        loop {
            tokio::select! {
                input = inbox.recv() => match input {
                    Some(Input::Shutdown { reply }) => {
                        self.stop();
                        let _ = reply.send(());
                        break;
                    }
                    Some(input) => self.handle(input),
                    None => {
                        debug!("all gateway handles dropped");
                        self.stop();
                        break;
                    }
                },
                _ = liveness.tick() => self.check_liveness(),
                _ = tick_optional(&mut resync) => {
                    if self.status().is_active() {
                        debug!("periodic resync");
                        self.request_snapshot();
                    }
                }
            }
        }
    }

    fn handle(&mut self, input: Input) {
        match input {
            Input::Connected { generation, result } => self.on_connected(generation, result),
            Input::Transport { generation, event } => self.on_transport(generation, event),
            Input::Set {
                device_id,
                attribute,
                value,
                reply,
            } => self.on_set(&device_id, &attribute, &value, reply),
            Input::Get { device_id, reply } => {
                let result = self
                    .registry
                    .get(&device_id)
                    .cloned()
                    .map_err(GatewayError::from);
                let _ = reply.send(result);
            }
            Input::Devices { reply } => {
                let _ = reply.send(self.registry.devices());
            }
            Input::GestureTimer(token) => {
                self.gesture_timers.remove(&token);
                let effects = self.gestures.on_timer(&token, now());
                self.run_effects(effects);
            }
            Input::CommandTimeout { correlation_id } => {
                self.pending
                    .time_out(correlation_id, self.config.command_timeout);
            }
            Input::Reconnect => {
                self.reconnect_timer = None;
                if matches!(self.status(), GatewayStatus::Reconnecting { .. }) {
                    self.start_connect();
                }
            }
            Input::Snapshot {
                generation,
                requested_at,
                result,
            } => self.on_snapshot(generation, requested_at, result),
            Input::Shutdown { .. } => {}
        }
    }

    // ── Connection lifecycle ──────────────────────────────────────────────────

    fn status(&self) -> GatewayStatus {
        *self.status.borrow()
    }

    fn set_status(&mut self, status: GatewayStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            debug!(from = %previous, to = %status, "status changed");
        }
        if let Some(session) = self.session.as_mut() {
            session.status = status;
        }
    }

    fn start_connect(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        self.set_status(GatewayStatus::Connecting);
        info!(url = %self.config.ws_url(), generation, attempt = self.attempt, "connecting to gateway");

        let connector = Arc::clone(&self.connector);
        let inbox = self.inbox.clone();
        self.connect_task = Some(tokio::spawn(async move {
            let result = connector.connect().await;
            post(&inbox, Input::Connected { generation, result });
        }));
    }

    fn on_connected(&mut self, generation: u64, result: Result<Connection, TransportError>) {
        self.connect_task = None;
        if generation != self.generation || self.status() != GatewayStatus::Connecting {
            trace!(generation, "discarding stale connect result");
            return;
        }

        let connection = match result {
            Ok(connection) => connection,
            Err(TransportError::Unauthorized { status }) => {
                self.auth_failed(format!("HTTP {status} during handshake"));
                return;
            }
            Err(e) => {
                warn!(error = %e, "connection attempt failed");
                self.schedule_reconnect();
                return;
            }
        };

        let Connection {
            outbound,
            mut inbound,
        } = connection;
        let inbox = self.inbox.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                let closed = matches!(event, TransportEvent::Closed(_));
                if !post(&inbox, Input::Transport { generation, event }) || closed {
                    return;
                }
            }
            post(
                &inbox,
                Input::Transport {
                    generation,
                    event: TransportEvent::Closed(None),
                },
            );
        });

        let session = Session::new(generation, outbound, forwarder);
        info!(session_id = %session.id, generation, "transport connected");
        self.session = Some(session);
        self.set_status(GatewayStatus::Authenticating);

        match self.config.dialect {
            // The token travelled in the handshake and the gateway pushes
            // every datapoint without an explicit subscription.
            Dialect::JungHome => {
                self.set_status(GatewayStatus::Subscribing);
                self.activate();
            }
            Dialect::Logical => {
                let auth = OutboundMessage::Authenticate {
                    token: self.config.token.clone(),
                };
                if let Some(Err(e)) = self.session.as_ref().map(|s| s.send(&auth)) {
                    self.connection_lost(&e.to_string());
                }
            }
        }
    }

    fn activate(&mut self) {
        self.attempt = 0;
        self.set_status(GatewayStatus::Active);
        if let Some(session) = &self.session {
            info!(session_id = %session.id, generation = session.generation, "session active");
        }
        self.request_snapshot();
    }

    fn subscribe(&mut self) {
        let correlation_id = self.correlation.next();
        let topics = match &self.config.devices_of_interest {
            Some(ids) => {
                let mut topics: Vec<String> = ids.iter().cloned().collect();
                topics.sort();
                topics
            }
            None => vec!["*".to_string()],
        };
        self.set_status(GatewayStatus::Subscribing);
        let sent = match self.session.as_mut() {
            Some(session) => {
                session.pending_subscribe = Some(correlation_id);
                session.send(&OutboundMessage::Subscribe {
                    correlation_id,
                    topics,
                })
            }
            None => return,
        };
        if let Err(e) = sent {
            self.connection_lost(&e.to_string());
        }
    }

    /// Tears down the current session and schedules a reconnect.
    fn connection_lost(&mut self, reason: &str) {
        let Some(session) = self.session.take() else {
            return;
        };
        warn!(
            session_id = %session.id,
            generation = session.generation,
            reason,
            "gateway connection lost"
        );
        drop(session);
        self.leave_active(GatewayError::ConnectionLost);
        self.schedule_reconnect();
    }

    /// Bookkeeping shared by every way of leaving `Active`.
    fn leave_active(&mut self, pending_error: GatewayError) {
        let failed = self.pending.fail_all(pending_error);
        if failed > 0 {
            debug!(failed, "pending commands resolved");
        }
        let effects = self.gestures.reset();
        self.run_effects(effects);
        for (_, timer) in self.gesture_timers.drain() {
            timer.abort();
        }
        if let Some(task) = self.snapshot_task.take() {
            task.abort();
        }
        let events = self.registry.set_online(false);
        self.dispatch_devices(&events);
    }

    fn schedule_reconnect(&mut self) {
        self.attempt = self.attempt.saturating_add(1);
        let delay = self.backoff.delay_for_attempt(self.attempt);
        self.set_status(GatewayStatus::Reconnecting {
            attempt: self.attempt,
        });
        info!(
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            "reconnecting after backoff"
        );
        if let Some(old) = self.reconnect_timer.take() {
            old.abort();
        }
        self.reconnect_timer = Some(post_after(&self.inbox, delay, Input::Reconnect));
    }

    fn auth_failed(&mut self, reason: String) {
        error!(reason = %reason, "gateway rejected the token; not retrying");
        self.session = None;
        self.leave_active(GatewayError::Auth(reason));
        self.set_status(GatewayStatus::AuthFailed);
    }

    fn check_liveness(&mut self) {
        let silent = match &self.session {
            Some(session) => session.silence() > self.config.liveness_timeout,
            None => false,
        };
        if silent {
            self.connection_lost("liveness timeout");
        }
    }

    fn stop(&mut self) {
        info!("gateway client stopping");
        for task in [
            self.connect_task.take(),
            self.reconnect_timer.take(),
            self.snapshot_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
        self.session = None;
        self.leave_active(GatewayError::Cancelled);
        self.set_status(GatewayStatus::Stopped);
    }

    // ── Inbound traffic ───────────────────────────────────────────────────────

    fn on_transport(&mut self, generation: u64, event: TransportEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.generation != generation {
            trace!(generation, "discarding event from old session");
            return;
        }
        match event {
            TransportEvent::Frame(bytes) => {
                session.touch();
                self.on_frame(&bytes);
            }
            TransportEvent::Alive => session.touch(),
            TransportEvent::Closed(reason) => {
                let reason = reason.unwrap_or_else(|| "closed by peer".to_string());
                self.connection_lost(&reason);
            }
        }
    }

    fn on_frame(&mut self, bytes: &[u8]) {
        let msg = match decode_message(bytes) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "dropping undecodable frame");
                return;
            }
        };
        trace!(kind = msg.kind(), "frame received");
        let status = self.status();

        match msg {
            ParsedMessage::AuthResult(result) if status == GatewayStatus::Authenticating => {
                if result.success {
                    debug!("authenticated");
                    self.subscribe();
                } else {
                    let reason = result
                        .message
                        .unwrap_or_else(|| "authentication failed".to_string());
                    self.auth_failed(reason);
                }
            }
            ParsedMessage::AuthResult(_) => debug!(%status, "ignoring unexpected auth_result"),
            ParsedMessage::CommandAck(ack) if self.is_subscribe_ack(&ack) => {
                if let Some(session) = self.session.as_mut() {
                    session.pending_subscribe = None;
                }
                match ack.status {
                    AckStatus::Ok => self.activate(),
                    AckStatus::Error { message, .. } => {
                        self.connection_lost(&format!("subscription refused: {message}"));
                    }
                }
            }
            ParsedMessage::CommandAck(ack) => {
                if let Some(command) = self.pending.acknowledge(&ack) {
                    if let Some(event) = self.registry.apply_acknowledged(&command, now()) {
                        self.dispatcher.dispatch_device(&event);
                    }
                }
            }
            ParsedMessage::DeviceStateUpdate(update) if status.is_active() => {
                self.on_state(&update);
            }
            ParsedMessage::ButtonEdgeEvent(edge) if status.is_active() => self.on_edge(&edge),
            ParsedMessage::Datapoint(update) if status.is_active() => {
                match self.registry.resolve_datapoint(&update) {
                    Some(ResolvedDatapoint::State(state)) => self.on_state(&state),
                    Some(ResolvedDatapoint::Edge(edge)) => self.on_edge(&edge),
                    None => trace!(datapoint_id = %update.datapoint_id, "unmapped datapoint"),
                }
            }
            ParsedMessage::DeviceRemoved { device_id } => {
                if let Some(event) = self.registry.remove(&device_id) {
                    self.dispatcher.dispatch_device(&event);
                }
            }
            ParsedMessage::Error { code, message } => {
                warn!(code = %code, message = %message, "gateway reported an error");
            }
            ParsedMessage::Heartbeat => trace!("heartbeat"),
            ParsedMessage::Info { kind } => trace!(kind = %kind, "informational frame"),
            other => debug!(kind = other.kind(), %status, "frame ignored outside active session"),
        }
    }

    fn is_subscribe_ack(&self, ack: &CommandAck) -> bool {
        self.session
            .as_ref()
            .and_then(|s| s.pending_subscribe)
            .map_or(false, |id| id == ack.correlation_id)
    }

    fn on_state(&mut self, update: &DeviceStateUpdate) {
        let registry = &self.registry;
        self.pending
            .confirm_echo(|command| registry.confirms(update, command));
        if let Some(event) = self.registry.apply(update, now()) {
            self.dispatcher.dispatch_device(&event);
        }
    }

    fn on_edge(&mut self, edge: &ButtonEdgeEvent) {
        if !self.registry.is_button_of_interest(&edge.button_id) {
            return;
        }
        let effects = self.gestures.handle_edge(&edge.button_id, edge.edge, now());
        self.run_effects(effects);
    }

    fn run_effects(&mut self, effects: Vec<GestureEffect>) {
        for effect in effects {
            match effect {
                GestureEffect::ArmTimer { token, after } => {
                    let timer = post_after(&self.inbox, after, Input::GestureTimer(token.clone()));
                    if let Some(old) = self.gesture_timers.insert(token, timer) {
                        old.abort();
                    }
                }
                GestureEffect::CancelTimer { token } => {
                    if let Some(timer) = self.gesture_timers.remove(&token) {
                        timer.abort();
                    }
                }
                GestureEffect::Emit(event) => self.emit_gesture(&event),
            }
        }
    }

    fn emit_gesture(&self, event: &GestureEvent) {
        info!(button_id = %event.button_id, gesture = %event.gesture, "gesture");
        self.dispatcher.dispatch_gesture(event);
    }

    fn dispatch_devices(&self, events: &[DeviceEvent]) {
        for event in events {
            self.dispatcher.dispatch_device(event);
        }
    }

    // ── Resync ────────────────────────────────────────────────────────────────

    fn request_snapshot(&mut self) {
        let Some(source) = self.snapshots.clone() else {
            let events = self.registry.set_online(true);
            self.dispatch_devices(&events);
            return;
        };
        if self.snapshot_task.is_some() {
            trace!("snapshot already in flight");
            return;
        }
        let generation = self.generation;
        let requested_at = now();
        let inbox = self.inbox.clone();
        self.snapshot_task = Some(tokio::spawn(async move {
            let result = source.fetch().await;
            post(
                &inbox,
                Input::Snapshot {
                    generation,
                    requested_at,
                    result,
                },
            );
        }));
    }

    fn on_snapshot(
        &mut self,
        generation: u64,
        requested_at: std::time::Instant,
        result: Result<Vec<FunctionDescriptor>, SnapshotError>,
    ) {
        if generation != self.generation || !self.status().is_active() {
            debug!(generation, "discarding stale snapshot");
            return;
        }
        self.snapshot_task = None;

        match result {
            Ok(functions) => {
                // Pushes handled while the fetch was in flight are newer.
                let events = self.registry.replace_all_since(&functions, requested_at, now());
                info!(
                    devices = self.registry.len(),
                    changes = events.len(),
                    "resync complete"
                );
                self.dispatch_devices(&events);
            }
            Err(SnapshotError::Unauthorized { status }) => {
                self.auth_failed(format!("HTTP {status} from function list"));
                return;
            }
            Err(e) => warn!(error = %e, "resync failed; keeping last known state"),
        }
        let events = self.registry.set_online(true);
        self.dispatch_devices(&events);
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    fn on_set(&mut self, device_id: &str, attribute: &str, value: &AttributeValue, reply: CommandReply) {
        // Validation never needs the network, so it runs in every state.
        let mut command = match self.registry.prepare_command(device_id, attribute, value) {
            Ok(command) => command,
            Err(e) => {
                debug!(device_id, attribute, error = %e, "command rejected locally");
                let _ = reply.send(Err(e.into()));
                return;
            }
        };
        match self.config.dialect {
            Dialect::JungHome if command.target.is_none() => {
                debug!(device_id, attribute, "no datapoint accepts this attribute");
                let _ = reply.send(Err(GatewayError::UnsupportedAttribute {
                    device_id: device_id.to_string(),
                    attribute: attribute.to_string(),
                }));
                return;
            }
            Dialect::JungHome => {}
            Dialect::Logical => command.target = None,
        }

        let status = self.status();
        let Some(session) = self.session.as_ref().filter(|s| s.is_active()) else {
            let err = match status {
                GatewayStatus::AuthFailed => GatewayError::Auth("token rejected earlier".to_string()),
                GatewayStatus::Stopped => GatewayError::Shutdown,
                status => GatewayError::Unavailable { status },
            };
            let _ = reply.send(Err(err));
            return;
        };

        let correlation_id = self.correlation.next();
        command.correlation_id = Some(correlation_id);
        // The frame follows `target`: datapoint writes are confirmed by their
        // echo, logical commands by an explicit acknowledgement.
        let mode = if command.target.is_some() {
            AckMode::Echo
        } else {
            AckMode::Explicit
        };

        if let Err(e) = session.send_text(encode_command(&command)) {
            let _ = reply.send(Err(GatewayError::ConnectionLost));
            self.connection_lost(&e.to_string());
            return;
        }
        debug!(
            correlation_id,
            device_id,
            attribute = %command.attribute,
            value = %command.value,
            "command sent"
        );

        let timer = post_after(
            &self.inbox,
            self.config.command_timeout,
            Input::CommandTimeout { correlation_id },
        );
        self.pending
            .insert(correlation_id, command, mode, reply, timer);
    }
}

/// An interval whose first tick is one period from now.
fn delayed_interval(period: Duration) -> Interval {
    let mut interval = time::interval_at(time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick_optional(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

// ── Public handle ─────────────────────────────────────────────────────────────

/// Cheap-to-clone handle to a running gateway client.
///
/// # Example
///
/// ```rust,no_run
/// # async fn demo(handle: junghome_bridge::GatewayHandle) {
/// handle.subscribe_gestures(Some("panel1:up"), |g| println!("{} {}", g.button_id, g.gesture));
/// handle.set("light1", "brightness", 40).await.ok();
/// # }
/// ```
#[derive(Clone)]
pub struct GatewayHandle {
    inbox: mpsc::UnboundedSender<Input>,
    dispatcher: Arc<EventDispatcher>,
    status: watch::Receiver<GatewayStatus>,
}

impl GatewayHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Input,
    ) -> Result<T, GatewayError> {
        let (tx, rx) = oneshot::channel();
        self.inbox
            .send(make(tx))
            .map_err(|_| GatewayError::Shutdown)?;
        rx.await.map_err(|_| GatewayError::Shutdown)
    }

    /// Writes one attribute and waits for the gateway to confirm it.
    ///
    /// The registry is only updated once the gateway confirms the value.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::UnsupportedAttribute`], [`GatewayError::NotFound`],
    ///   [`GatewayError::ReadOnlyAttribute`], [`GatewayError::InvalidValue`]
    ///   before anything is sent.
    /// - [`GatewayError::Unavailable`] or [`GatewayError::Auth`] when no
    ///   session is active.
    /// - [`GatewayError::CommandTimeout`], [`GatewayError::CommandRejected`],
    ///   [`GatewayError::ConnectionLost`] or [`GatewayError::Cancelled`] after
    ///   sending.
    pub async fn set(
        &self,
        device_id: &str,
        attribute: &str,
        value: impl Into<AttributeValue>,
    ) -> Result<(), GatewayError> {
        let value = value.into();
        self.request(|reply| Input::Set {
            device_id: device_id.to_string(),
            attribute: attribute.to_string(),
            value,
            reply,
        })
        .await?
    }

    /// Snapshot of one device.
    pub async fn get(&self, device_id: &str) -> Result<Device, GatewayError> {
        self.request(|reply| Input::Get {
            device_id: device_id.to_string(),
            reply,
        })
        .await?
    }

    /// Snapshot of every known device, sorted by id.
    pub async fn devices(&self) -> Result<Vec<Device>, GatewayError> {
        self.request(|reply| Input::Devices { reply }).await
    }

    /// Calls `handler` for every device event.
    pub fn subscribe_devices<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&DeviceEvent) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe_devices(handler)
    }

    /// Calls `handler` for gestures of `button_id`, or of every button.
    pub fn subscribe_gestures<F>(&self, button_id: Option<&str>, handler: F) -> SubscriptionId
    where
        F: Fn(&GestureEvent) + Send + Sync + 'static,
    {
        self.dispatcher
            .subscribe_gestures(button_id.map(str::to_string), handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.dispatcher.unsubscribe(id)
    }

    /// Channel feed of device events.  Dropping the receiver unsubscribes.
    pub fn device_events(&self) -> mpsc::UnboundedReceiver<DeviceEvent> {
        self.dispatcher.device_channel().1
    }

    /// Channel feed of gestures.  Dropping the receiver unsubscribes.
    pub fn gesture_events(&self, button_id: Option<&str>) -> mpsc::UnboundedReceiver<GestureEvent> {
        self.dispatcher
            .gesture_channel(button_id.map(str::to_string))
            .1
    }

    pub fn status(&self) -> GatewayStatus {
        *self.status.borrow()
    }

    pub fn status_watch(&self) -> watch::Receiver<GatewayStatus> {
        self.status.clone()
    }

    /// Waits until the status satisfies `predicate` and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Shutdown`] if the session task ends first.
    pub async fn wait_for_status<F>(&self, predicate: F) -> Result<GatewayStatus, GatewayError>
    where
        F: FnMut(&GatewayStatus) -> bool,
    {
        let mut rx = self.status.clone();
        let status = rx
            .wait_for(predicate)
            .await
            .map_err(|_| GatewayError::Shutdown)?;
        Ok(*status)
    }

    /// Stops the client: cancels every timer, resolves pending commands with
    /// [`GatewayError::Cancelled`] and closes the connection.  Returns once
    /// the session task has finished.  Calling it twice is harmless.
    pub async fn shutdown(&self) {
        if self.request(|reply| Input::Shutdown { reply }).await.is_err() {
            debug!("gateway client already stopped");
        }
    }
}

impl std::fmt::Debug for GatewayHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayHandle")
            .field("status", &self.status())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MockSnapshotSource;
    use crate::infrastructure::transport::mock::{MockConnector, MockLink};
    use junghome_core::protocol::{DatapointDescriptor, DatapointValue};

    fn config(dialect: Dialect) -> GatewayConfig {
        GatewayConfig {
            host: "gw.test".to_string(),
            token: "secret".to_string(),
            dialect,
            ..GatewayConfig::default()
        }
    }

    fn dimmer_snapshot(brightness: &str) -> Vec<FunctionDescriptor> {
        let dp = |id: &str, kind: &str, value: &str| DatapointDescriptor {
            id: id.to_string(),
            kind: kind.to_string(),
            values: vec![DatapointValue {
                key: kind.to_string(),
                value: value.to_string(),
            }],
        };
        vec![FunctionDescriptor {
            id: "dimmer1".to_string(),
            label: Some("Hall".to_string()),
            function_type: "DimmerLight".to_string(),
            datapoints: vec![dp("dp1", "switch", "1"), dp("dp2", "brightness", brightness)],
        }]
    }

    fn snapshot_source(brightness: &'static str) -> Arc<dyn SnapshotSource> {
        let mut source = MockSnapshotSource::new();
        source
            .expect_fetch()
            .returning(move || Ok(dimmer_snapshot(brightness)));
        Arc::new(source)
    }

    async fn logical_active(handle: &GatewayHandle, link: &mut MockLink) {
        let auth = link.next_sent().await.unwrap();
        assert!(auth.contains(r#""type":"authenticate""#));
        link.push(r#"{"type":"auth_result","status":"ok"}"#);
        let subscribe = link.next_sent().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&subscribe).unwrap();
        let cid = value["correlation_id"].as_u64().unwrap();
        link.push(&format!(r#"{{"type":"command_ack","correlation_id":{cid},"status":"ok"}}"#));
        handle
            .wait_for_status(|s| s.is_active())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_jung_home_session_becomes_active_and_resyncs() {
        // Arrange
        let (connector, mut links) = MockConnector::new();
        let handle = Gateway::spawn(
            config(Dialect::JungHome),
            Arc::new(connector),
            Some(snapshot_source("40")),
        );
        let mut events = handle.device_events();

        // Act
        let _link = links.recv().await.unwrap();
        handle.wait_for_status(|s| s.is_active()).await.unwrap();
        let first = events.recv().await.unwrap();

        // Assert
        assert!(matches!(first, DeviceEvent::Changed { created: true, .. }));
        let device = handle.get("dimmer1").await.unwrap();
        assert!(device.available);
        assert_eq!(device.attribute("brightness"), Some(&AttributeValue::Int(40)));
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_logical_handshake_authenticates_then_subscribes() {
        let (connector, mut links) = MockConnector::new();
        let handle = Gateway::spawn(config(Dialect::Logical), Arc::new(connector), None);
        let mut link = links.recv().await.unwrap();

        logical_active(&handle, &mut link).await;

        assert_eq!(handle.status(), GatewayStatus::Active);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_auth_result_is_fatal_and_not_retried() {
        // Arrange
        let (connector, mut links) = MockConnector::new();
        let connector = Arc::new(connector);
        let handle = Gateway::spawn(
            config(Dialect::Logical),
            Arc::clone(&connector) as Arc<dyn Connector>,
            None,
        );
        let mut link = links.recv().await.unwrap();
        link.next_sent().await.unwrap();

        // Act
        link.push(r#"{"type":"auth_result","status":"error","message":"unknown token"}"#);
        handle
            .wait_for_status(|s| *s == GatewayStatus::AuthFailed)
            .await
            .unwrap();
        time::sleep(Duration::from_secs(300)).await;

        // Assert
        assert_eq!(connector.attempts(), 1);
        assert_eq!(handle.status(), GatewayStatus::AuthFailed);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_attribute_fails_without_contacting_transport() {
        // Arrange
        let (connector, mut links) = MockConnector::new();
        let handle = Gateway::spawn(
            config(Dialect::JungHome),
            Arc::new(connector),
            Some(snapshot_source("40")),
        );
        let mut link = links.recv().await.unwrap();
        let mut events = handle.device_events();
        events.recv().await.unwrap();

        // Act
        let result = handle.set("dimmer1", "color_temperature", 2700).await;

        // Assert
        assert!(matches!(result, Err(GatewayError::UnsupportedAttribute { .. })));
        assert!(link.try_next_sent().is_none());
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_without_ack_times_out() {
        let (connector, mut links) = MockConnector::new();
        let handle = Gateway::spawn(config(Dialect::Logical), Arc::new(connector), None);
        let mut link = links.recv().await.unwrap();
        logical_active(&handle, &mut link).await;
        link.push(r#"{"type":"device_state_update","device_id":"s1","class":"switch","attributes":{"switch":false}}"#);
        handle.wait_for_device("s1").await;

        let result = handle.set("s1", "switch", true).await;

        assert!(matches!(result, Err(GatewayError::CommandTimeout { .. })));
        let device = handle.get("s1").await.unwrap();
        assert_eq!(device.attribute("switch"), Some(&AttributeValue::Bool(false)));
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_applies_value_only_after_confirmation() {
        // Arrange
        let (connector, mut links) = MockConnector::new();
        let handle = Gateway::spawn(config(Dialect::Logical), Arc::new(connector), None);
        let mut link = links.recv().await.unwrap();
        logical_active(&handle, &mut link).await;
        link.push(r#"{"type":"device_state_update","device_id":"s1","class":"switch","attributes":{"switch":false}}"#);
        handle.wait_for_device("s1").await;

        // Act
        let setter = handle.clone();
        let pending = tokio::spawn(async move { setter.set("s1", "switch", true).await });
        let sent = link.next_sent().await.unwrap();
        let before = handle.get("s1").await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&sent).unwrap();
        let cid = value["correlation_id"].as_u64().unwrap();
        link.push(&format!(r#"{{"type":"command_ack","correlation_id":{cid},"status":"ok"}}"#));

        // Assert
        assert_eq!(pending.await.unwrap(), Ok(()));
        assert_eq!(before.attribute("switch"), Some(&AttributeValue::Bool(false)));
        let after = handle.get("s1").await.unwrap();
        assert_eq!(after.attribute("switch"), Some(&AttributeValue::Bool(true)));
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_loss_marks_devices_unavailable_and_reconnects() {
        // Arrange
        let (connector, mut links) = MockConnector::new();
        let handle = Gateway::spawn(
            config(Dialect::JungHome),
            Arc::new(connector),
            Some(snapshot_source("40")),
        );
        let link = links.recv().await.unwrap();
        let mut events = handle.device_events();
        events.recv().await.unwrap();
        events.recv().await.unwrap();

        // Act
        link.close();
        let status = handle
            .wait_for_status(|s| matches!(s, GatewayStatus::Reconnecting { .. }))
            .await
            .unwrap();
        let unavailable = events.recv().await.unwrap();
        let _second = links.recv().await.unwrap();
        handle.wait_for_status(|s| s.is_active()).await.unwrap();

        // Assert
        assert_eq!(status, GatewayStatus::Reconnecting { attempt: 1 });
        assert_eq!(
            unavailable,
            DeviceEvent::Availability {
                device_id: "dimmer1".to_string(),
                available: false,
            }
        );
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_commands() {
        let (connector, mut links) = MockConnector::new();
        let handle = Gateway::spawn(config(Dialect::Logical), Arc::new(connector), None);
        let mut link = links.recv().await.unwrap();
        logical_active(&handle, &mut link).await;
        link.push(r#"{"type":"device_state_update","device_id":"s1","class":"switch","attributes":{"switch":false}}"#);
        handle.wait_for_device("s1").await;

        let setter = handle.clone();
        let pending = tokio::spawn(async move { setter.set("s1", "switch", true).await });
        link.next_sent().await.unwrap();
        handle.shutdown().await;

        assert_eq!(pending.await.unwrap(), Err(GatewayError::Cancelled));
        assert_eq!(handle.status(), GatewayStatus::Stopped);
        assert_eq!(handle.set("s1", "switch", true).await, Err(GatewayError::Shutdown));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_function_list_request_is_fatal() {
        // Arrange
        let (connector, mut links) = MockConnector::new();
        let connector = Arc::new(connector);
        let mut source = MockSnapshotSource::new();
        source
            .expect_fetch()
            .returning(|| Err(SnapshotError::Unauthorized { status: 401 }));
        let handle = Gateway::spawn(
            config(Dialect::JungHome),
            Arc::clone(&connector) as Arc<dyn Connector>,
            Some(Arc::new(source) as Arc<dyn SnapshotSource>),
        );
        let _link = links.recv().await.unwrap();

        // Act
        let status = handle.wait_for_status(|s| s.is_terminal()).await.unwrap();
        time::sleep(Duration::from_secs(300)).await;

        // Assert
        assert_eq!(status, GatewayStatus::AuthFailed);
        assert_eq!(connector.attempts(), 1);
        assert!(links.try_recv().is_err());
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_logical_dimmer_color_report_is_kept_and_writable() {
        // Arrange
        let (connector, mut links) = MockConnector::new();
        let handle = Gateway::spawn(config(Dialect::Logical), Arc::new(connector), None);
        let mut link = links.recv().await.unwrap();
        logical_active(&handle, &mut link).await;

        // Act
        link.push(r#"{"type":"device_state_update","device_id":"l1","class":"dimmer","attributes":{"brightness":40,"color_temperature":2700}}"#);
        handle.wait_for_device("l1").await;
        let setter = handle.clone();
        let pending = tokio::spawn(async move { setter.set("l1", "color_temperature", 3000).await });
        let sent = link.next_sent().await.unwrap();

        // Assert
        let device = handle.get("l1").await.unwrap();
        assert_eq!(device.attribute("color_temperature"), Some(&AttributeValue::Int(2700)));
        let frame: serde_json::Value = serde_json::from_str(&sent).unwrap();
        assert_eq!(frame["type"], "command");
        assert_eq!(frame["attribute"], "color_temperature");
        let cid = frame["correlation_id"].as_u64().unwrap();
        link.push(&format!(r#"{{"type":"command_ack","correlation_id":{cid},"status":"ok"}}"#));
        assert_eq!(pending.await.unwrap(), Ok(()));
        handle.shutdown().await;
    }

    impl GatewayHandle {
        /// Polls until the registry knows `device_id`.
        async fn wait_for_device(&self, device_id: &str) {
            while self.get(device_id).await.is_err() {
                time::sleep(Duration::from_millis(1)).await;
            }
        }
    }
}
