//! Gesture engine: turns raw press/release edges into classified gestures.
//!
//! # How click counting works (for beginners)
//!
//! A physical button only reports two things: "pressed" and "released".
//! Users, however, think in gestures: a single tap, a double tap, a long
//! press.  The engine watches the timing between edges to tell these apart:
//!
//! ```text
//!  press   release      press  release                 (silence)
//!    │────────│───────────│──────│─────────────────────────────►
//!    0       50          200    240                    640
//!    └ hold timer armed  └ inter-click timer cancelled, hold re-armed
//!            └ count=1, inter-click armed  └ count=2, inter-click armed
//!                                                       └ emit "double"
//! ```
//!
//! - A press arms a **hold timer** (default 600 ms).  If it fires before the
//!   release, the gesture is a hold; the release that eventually follows
//!   only ends it.
//! - A release arms an **inter-click timer** (default 400 ms).  Every further
//!   press/release pair inside that window adds one click.  When the window
//!   expires the accumulated count is classified: 1 single, 2 double, 3 or
//!   more triple.
//!
//! # Explicit timer effects
//!
//! The engine owns no clocks and spawns no tasks.  Each input returns a list
//! of [`GestureEffect`]s: arm this timer, cancel that one, emit this gesture.
//! The runtime carries them out and feeds expired timers back through
//! [`GestureEngine::on_timer`].  Every armed timer carries a unique
//! [`TimerToken`]; a firing whose token is no longer the armed one is stale
//! and ignored, so a cancelled timer that races its own cancellation can
//! never misclassify a gesture.
//!
//! Every button has its own machine, created on first press and dropped once
//! it returns to idle.  Machines never look at each other.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::protocol::messages::Edge;

/// Clicks beyond this count still extend the window but classify as triple.
pub const MAX_CLICKS: u8 = 3;

// ── Public types ──────────────────────────────────────────────────────────────

/// Classified button interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gesture {
    Single,
    Double,
    Triple,
    Hold,
}

impl Gesture {
    /// Classifies a completed click sequence.  Returns `None` for zero.
    pub fn from_clicks(count: u8) -> Option<Self> {
        match count {
            0 => None,
            1 => Some(Gesture::Single),
            2 => Some(Gesture::Double),
            _ => Some(Gesture::Triple),
        }
    }
}

impl fmt::Display for Gesture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Gesture::Single => "single",
            Gesture::Double => "double",
            Gesture::Triple => "triple",
            Gesture::Hold => "hold",
        };
        f.write_str(name)
    }
}

/// A gesture recognised on one button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GestureEvent {
    pub button_id: String,
    pub gesture: Gesture,
    pub emitted_at: Instant,
}

/// Timing windows used by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GestureConfig {
    /// How long a press must last to become a hold.
    pub hold_duration: Duration,
    /// Silence after a release that closes a click sequence.
    pub inter_click_window: Duration,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            hold_duration: Duration::from_millis(600),
            inter_click_window: Duration::from_millis(400),
        }
    }
}

/// Which of the two per-button timers a token refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Hold,
    InterClick,
}

/// Identity of one armed timer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerToken {
    pub button_id: String,
    pub kind: TimerKind,
    /// Unique across the whole engine, never reused.
    pub generation: u64,
}

/// Side effect requested by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GestureEffect {
    /// Start a timer that calls [`GestureEngine::on_timer`] after `after`.
    ArmTimer { token: TimerToken, after: Duration },
    /// Abort a previously armed timer.
    CancelTimer { token: TimerToken },
    /// Deliver a recognised gesture.
    Emit(GestureEvent),
}

// ── Per-button machine ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ButtonState {
    /// Button is down, hold timer armed; `clicks` completed before this press.
    PressedWaiting { clicks: u8 },
    /// Button is up, inter-click timer armed.
    ReleasedCounting { clicks: u8 },
    /// Hold emitted; waiting for the terminating release.
    Held,
}

#[derive(Debug)]
struct ButtonMachine {
    state: ButtonState,
    armed: Option<TimerToken>,
    pressed_at: Instant,
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// Arena of independent per-button state machines.
///
/// # Examples
///
/// ```rust
/// use std::time::Instant;
/// use junghome_core::domain::gesture::{GestureEffect, GestureEngine, GestureConfig};
/// use junghome_core::protocol::Edge;
///
/// let mut engine = GestureEngine::new(GestureConfig::default());
/// let effects = engine.handle_edge("b1", Edge::Press, Instant::now());
/// assert!(matches!(effects[0], GestureEffect::ArmTimer { .. }));
/// ```
#[derive(Debug)]
pub struct GestureEngine {
    config: GestureConfig,
    buttons: HashMap<String, ButtonMachine>,
    next_generation: u64,
}

impl GestureEngine {
    pub fn new(config: GestureConfig) -> Self {
        Self {
            config,
            buttons: HashMap::new(),
            next_generation: 1,
        }
    }

    pub fn config(&self) -> GestureConfig {
        self.config
    }

    /// Number of buttons with a gesture in progress.
    pub fn active_buttons(&self) -> usize {
        self.buttons.len()
    }

    /// Feeds one edge.  `now` is the local monotonic receipt time.
    pub fn handle_edge(&mut self, button_id: &str, edge: Edge, now: Instant) -> Vec<GestureEffect> {
        let state = self.buttons.get(button_id).map(|m| m.state);
        match (state, edge) {
            (None, Edge::Press) => {
                let token = self.token(button_id, TimerKind::Hold);
                self.buttons.insert(
                    button_id.to_string(),
                    ButtonMachine {
                        state: ButtonState::PressedWaiting { clicks: 0 },
                        armed: Some(token.clone()),
                        pressed_at: now,
                    },
                );
                vec![GestureEffect::ArmTimer {
                    token,
                    after: self.config.hold_duration,
                }]
            }
            (None, Edge::Release) => {
                trace!(button_id, "release without press ignored");
                Vec::new()
            }
            (Some(ButtonState::PressedWaiting { clicks }), Edge::Release) => {
                let clicks = clicks.saturating_add(1).min(MAX_CLICKS);
                let token = self.token(button_id, TimerKind::InterClick);
                let after = self.config.inter_click_window;
                if let Some(machine) = self.buttons.get(button_id) {
                    let pressed_ms =
                        now.saturating_duration_since(machine.pressed_at).as_millis() as u64;
                    trace!(button_id, clicks, pressed_ms, "click");
                }
                self.transition(button_id, ButtonState::ReleasedCounting { clicks }, token, after)
            }
            (Some(ButtonState::ReleasedCounting { clicks }), Edge::Press) => {
                let token = self.token(button_id, TimerKind::Hold);
                let after = self.config.hold_duration;
                if let Some(machine) = self.buttons.get_mut(button_id) {
                    machine.pressed_at = now;
                }
                self.transition(button_id, ButtonState::PressedWaiting { clicks }, token, after)
            }
            (Some(ButtonState::Held), Edge::Release) => {
                debug!(button_id, "hold released");
                self.buttons.remove(button_id);
                Vec::new()
            }
            (Some(ButtonState::PressedWaiting { .. }), Edge::Press)
            | (Some(ButtonState::ReleasedCounting { .. }), Edge::Release)
            | (Some(ButtonState::Held), Edge::Press) => {
                trace!(button_id, ?edge, "duplicate edge ignored");
                Vec::new()
            }
        }
    }

    /// Feeds an expired timer.  Stale tokens produce no effects.
    pub fn on_timer(&mut self, token: &TimerToken, now: Instant) -> Vec<GestureEffect> {
        let Some(machine) = self.buttons.get_mut(&token.button_id) else {
            return Vec::new();
        };
        if machine.armed.as_ref() != Some(token) {
            trace!(button_id = %token.button_id, generation = token.generation, "stale timer ignored");
            return Vec::new();
        }
        machine.armed = None;

        let gesture = match (machine.state, token.kind) {
            (ButtonState::PressedWaiting { .. }, TimerKind::Hold) => {
                machine.state = ButtonState::Held;
                Gesture::Hold
            }
            (ButtonState::ReleasedCounting { clicks }, TimerKind::InterClick) => {
                self.buttons.remove(&token.button_id);
                match Gesture::from_clicks(clicks) {
                    Some(g) => g,
                    None => return Vec::new(),
                }
            }
            _ => return Vec::new(),
        };

        debug!(button_id = %token.button_id, %gesture, "gesture recognised");
        vec![GestureEffect::Emit(GestureEvent {
            button_id: token.button_id.clone(),
            gesture,
            emitted_at: now,
        })]
    }

    /// Drops every machine and cancels every armed timer.  Used when the
    /// gateway connection is lost, since the matching releases will never
    /// arrive.
    pub fn reset(&mut self) -> Vec<GestureEffect> {
        self.buttons
            .drain()
            .filter_map(|(_, m)| m.armed)
            .map(|token| GestureEffect::CancelTimer { token })
            .collect()
    }

    fn token(&mut self, button_id: &str, kind: TimerKind) -> TimerToken {
        let generation = self.next_generation;
        self.next_generation += 1;
        TimerToken {
            button_id: button_id.to_string(),
            kind,
            generation,
        }
    }

    /// Moves a machine to `state`, cancelling its armed timer before arming
    /// `token`.  At most one timer is ever armed per button.
    fn transition(
        &mut self,
        button_id: &str,
        state: ButtonState,
        token: TimerToken,
        after: Duration,
    ) -> Vec<GestureEffect> {
        let mut effects = Vec::new();
        let Some(machine) = self.buttons.get_mut(button_id) else {
            return effects;
        };
        if let Some(old) = machine.armed.take() {
            effects.push(GestureEffect::CancelTimer { token: old });
        }
        machine.state = state;
        machine.armed = Some(token.clone());
        effects.push(GestureEffect::ArmTimer { token, after });
        effects
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
