//! EventDispatcher: fan-out of device and gesture events to subscribers.
//!
//! The dispatcher keeps an explicit registry of subscribers, each identified
//! by a [`SubscriptionId`] that doubles as its unsubscribe token.  Two kinds
//! of subscriber are supported:
//!
//! - **Callbacks** – `Fn(&Event)` closures called on the session task.  They
//!   must return quickly; anything slow belongs on a channel subscriber.
//! - **Channels** – an unbounded `mpsc` receiver handed to the caller.  A
//!   channel whose receiver was dropped is removed on the next dispatch.
//!
//! # Fault isolation
//!
//! Subscribers are snapshotted under the lock and called after it is
//! released, so a handler may subscribe or unsubscribe without deadlocking.
//! Each callback runs inside `catch_unwind`: a panicking subscriber is logged
//! and the remaining subscribers still receive the event.
//!
//! # Ordering
//!
//! All dispatch happens on the single session task in the order events were
//! produced, so every subscriber sees the events of one device in the order
//! the registry applied them.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::error;

use junghome_core::{DeviceEvent, GestureEvent};

/// Unsubscribe token returned by every `subscribe_*` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

enum Sink<T> {
    Callback(Callback<T>),
    Channel(mpsc::UnboundedSender<T>),
}

impl<T> Clone for Sink<T> {
    fn clone(&self) -> Self {
        match self {
            Sink::Callback(f) => Sink::Callback(Arc::clone(f)),
            Sink::Channel(tx) => Sink::Channel(tx.clone()),
        }
    }
}

enum Delivery {
    Delivered,
    Panicked,
    Closed,
}

impl<T: Clone> Sink<T> {
    fn deliver(&self, event: &T) -> Delivery {
        match self {
            Sink::Callback(f) => match catch_unwind(AssertUnwindSafe(|| f(event))) {
                Ok(()) => Delivery::Delivered,
                Err(_) => Delivery::Panicked,
            },
            Sink::Channel(tx) => match tx.send(event.clone()) {
                Ok(()) => Delivery::Delivered,
                Err(_) => Delivery::Closed,
            },
        }
    }
}

struct GestureSubscriber {
    id: SubscriptionId,
    /// `None` receives gestures of every button.
    button_id: Option<String>,
    sink: Sink<GestureEvent>,
}

#[derive(Default)]
struct Subscribers {
    devices: Vec<(SubscriptionId, Sink<DeviceEvent>)>,
    gestures: Vec<GestureSubscriber>,
}

/// Registry of event subscribers.
///
/// Shared between the session task (which dispatches) and every
/// [`GatewayHandle`](crate::application::gateway::GatewayHandle) clone (which
/// subscribes and unsubscribes).
#[derive(Default)]
pub struct EventDispatcher {
    next_id: AtomicU64,
    inner: Mutex<Subscribers>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        // Handlers never run under this lock, so a poisoned guard still holds
        // a consistent subscriber list.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers a callback for every device event.
    pub fn subscribe_devices<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&DeviceEvent) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.lock()
            .devices
            .push((id, Sink::Callback(Arc::new(handler))));
        id
    }

    /// Registers a channel for every device event.
    pub fn device_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<DeviceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id();
        self.lock().devices.push((id, Sink::Channel(tx)));
        (id, rx)
    }

    /// Registers a callback for gestures of one button, or of all buttons when
    /// `button_id` is `None`.
    pub fn subscribe_gestures<F>(&self, button_id: Option<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&GestureEvent) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.lock().gestures.push(GestureSubscriber {
            id,
            button_id,
            sink: Sink::Callback(Arc::new(handler)),
        });
        id
    }

    /// Registers a channel for gestures of one button or of all buttons.
    pub fn gesture_channel(
        &self,
        button_id: Option<String>,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<GestureEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id();
        self.lock().gestures.push(GestureSubscriber {
            id,
            button_id,
            sink: Sink::Channel(tx),
        });
        (id, rx)
    }

    /// Removes a subscriber.  Returns `false` if the id was unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.lock();
        let before = subs.devices.len() + subs.gestures.len();
        subs.devices.retain(|(sid, _)| *sid != id);
        subs.gestures.retain(|s| s.id != id);
        before != subs.devices.len() + subs.gestures.len()
    }

    /// Number of registered subscribers of both kinds.
    pub fn subscriber_count(&self) -> usize {
        let subs = self.lock();
        subs.devices.len() + subs.gestures.len()
    }

    /// Delivers a device event to every device subscriber.  Returns how many
    /// subscribers received it.
    pub fn dispatch_device(&self, event: &DeviceEvent) -> usize {
        let sinks: Vec<(SubscriptionId, Sink<DeviceEvent>)> = self.lock().devices.clone();
        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, sink) in &sinks {
            match sink.deliver(event) {
                Delivery::Delivered => delivered += 1,
                Delivery::Panicked => {
                    error!(subscription = id.0, device_id = %event.device_id(), "device subscriber panicked");
                }
                Delivery::Closed => closed.push(*id),
            }
        }
        if !closed.is_empty() {
            self.lock().devices.retain(|(id, _)| !closed.contains(id));
        }
        delivered
    }

    /// Delivers a gesture to every subscriber of that button and every
    /// all-buttons subscriber.  Returns how many subscribers received it.
    pub fn dispatch_gesture(&self, event: &GestureEvent) -> usize {
        let sinks: Vec<(SubscriptionId, Sink<GestureEvent>)> = self
            .lock()
            .gestures
            .iter()
            .filter(|s| s.button_id.as_deref().map_or(true, |b| b == event.button_id))
            .map(|s| (s.id, s.sink.clone()))
            .collect();
        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, sink) in &sinks {
            match sink.deliver(event) {
                Delivery::Delivered => delivered += 1,
                Delivery::Panicked => {
                    error!(subscription = id.0, button_id = %event.button_id, "gesture subscriber panicked");
                }
                Delivery::Closed => closed.push(*id),
            }
        }
        if !closed.is_empty() {
            self.lock().gestures.retain(|s| !closed.contains(&s.id));
        }
        delivered
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subs = self.lock();
        f.debug_struct("EventDispatcher")
            .field("device_subscribers", &subs.devices.len())
            .field("gesture_subscribers", &subs.gestures.len())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
