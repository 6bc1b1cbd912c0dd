//! Device registry: the bridge's in-memory view of every device.
//!
//! The registry is the only owner of [`Device`] values.  It is mutated from a
//! single task (the session actor in `junghome-bridge`), so it needs no
//! interior locking.
//!
//! # Lifecycle of a device entry (for beginners)
//!
//! ```text
//!   snapshot / first update           later updates             resync without it
//!  ─────────────────────────► Known ───────────────────► Known ──────────────────► gone
//!                              │  ▲                                 device_removed ──►
//!              gateway lost    │  │  gateway back
//!                              ▼  │
//!                          Unavailable
//! ```
//!
//! Entries are never dropped just because the connection went away; they are
//! marked unavailable so callers can tell "last known state" from "live".
//!
//! # Change notifications
//!
//! Every mutating method returns the [`DeviceEvent`]s it caused.  An update
//! that repeats the current value produces no event, so subscribers only ever
//! see real transitions.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::device::{AttributeChange, Capability, Device, DeviceClass};
use crate::protocol::messages::{
    AttributeValue, ButtonEdgeEvent, Command, DatapointUpdate, DeviceStateUpdate, Edge,
    FunctionDescriptor,
};

/// Errors returned by registry lookups and command validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("device {0} not found")]
    NotFound(String),

    #[error("device {device_id} does not support attribute {attribute}")]
    UnsupportedAttribute { device_id: String, attribute: String },

    #[error("attribute {attribute} of device {device_id} is read-only")]
    ReadOnlyAttribute { device_id: String, attribute: String },

    #[error("invalid value {value} for attribute {attribute} of device {device_id}")]
    InvalidValue {
        device_id: String,
        attribute: String,
        value: String,
    },
}

/// Notification produced by a registry mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// Attribute values changed, or the device was just created.
    Changed {
        device_id: String,
        created: bool,
        changes: Vec<AttributeChange>,
    },
    /// The device became reachable or unreachable.
    Availability { device_id: String, available: bool },
    /// The device no longer exists on the gateway.
    Removed { device_id: String },
}

impl DeviceEvent {
    pub fn device_id(&self) -> &str {
        match self {
            DeviceEvent::Changed { device_id, .. }
            | DeviceEvent::Availability { device_id, .. }
            | DeviceEvent::Removed { device_id } => device_id,
        }
    }
}

/// What a native datapoint push means in device terms.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedDatapoint {
    State(DeviceStateUpdate),
    Edge(ButtonEdgeEvent),
}

#[derive(Debug, Clone)]
struct DatapointRef {
    device_id: String,
    kind: String,
}

/// In-memory registry of all known devices.
///
/// # BTreeMap choice
///
/// Devices are kept in a `BTreeMap` so [`devices`](Self::devices) returns
/// them sorted by id without an extra sort, which keeps CLI output and test
/// assertions stable.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<String, Device>,
    datapoints: HashMap<String, DatapointRef>,
    interest: Option<HashSet<String>>,
    online: bool,
}

impl DeviceRegistry {
    /// Creates an empty registry.  `interest` limits the registry to the
    /// given device ids; `None` accepts every device.
    pub fn new(interest: Option<HashSet<String>>) -> Self {
        Self {
            interest,
            ..Self::default()
        }
    }

    /// Returns `true` if the device id passes the devices-of-interest filter.
    pub fn is_of_interest(&self, device_id: &str) -> bool {
        self.interest
            .as_ref()
            .map_or(true, |ids| ids.contains(device_id))
    }

    /// Button ids have the form `<device_id>:<side>`; the filter applies to
    /// the device part.
    pub fn is_button_of_interest(&self, button_id: &str) -> bool {
        let device_id = button_id.split(':').next().unwrap_or(button_id);
        self.is_of_interest(device_id) || self.is_of_interest(button_id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Returns the device, or [`RegistryError::NotFound`].
    pub fn get(&self, device_id: &str) -> Result<&Device, RegistryError> {
        self.devices
            .get(device_id)
            .ok_or_else(|| RegistryError::NotFound(device_id.to_string()))
    }

    /// Returns a snapshot of all devices sorted by id.
    pub fn devices(&self) -> Vec<Device> {
        self.devices.values().cloned().collect()
    }

    /// Upserts a device's attributes from a state update.
    ///
    /// Creates the entry if the id is unseen.  Returns a
    /// [`DeviceEvent::Changed`] only if the device was created or at least
    /// one attribute value actually changed.
    pub fn apply(&mut self, update: &DeviceStateUpdate, now: Instant) -> Option<DeviceEvent> {
        if !self.is_of_interest(&update.device_id) {
            return None;
        }

        let created = !self.devices.contains_key(&update.device_id);
        if created {
            let class = match update.function_type.as_deref() {
                Some(t) => match DeviceClass::from_function_type(t) {
                    Some(class) => class,
                    None => {
                        warn!(device_id = %update.device_id, function_type = t, "skipping device of unsupported type");
                        return None;
                    }
                },
                None => DeviceClass::infer(update.attributes.keys().map(String::as_str)),
            };
            let mut device =
                Device::new(update.device_id.clone(), class, update.function_type.clone());
            device.available = self.online;
            debug!(device_id = %device.id, class = %class, "new device");
            self.devices.insert(update.device_id.clone(), device);
        }

        let device = self.devices.get_mut(&update.device_id)?;
        if update.label.is_some() {
            device.label = update.label.clone();
        }
        device.learn_capabilities(update.attributes.keys().map(String::as_str));
        let changes = device.merge(&update.attributes, now);

        if created || !changes.is_empty() {
            Some(DeviceEvent::Changed {
                device_id: update.device_id.clone(),
                created,
                changes,
            })
        } else {
            None
        }
    }

    /// Applies a command the gateway has confirmed.
    pub fn apply_acknowledged(&mut self, command: &Command, now: Instant) -> Option<DeviceEvent> {
        if !self.devices.contains_key(&command.device_id) {
            return None;
        }
        let update = DeviceStateUpdate {
            device_id: command.device_id.clone(),
            function_type: None,
            label: None,
            attributes: BTreeMap::from([(command.attribute.clone(), command.value.clone())]),
        };
        self.apply(&update, now)
    }

    /// Translates a native datapoint push into a state update or a button
    /// edge.  Returns `None` for datapoints of unknown or filtered devices.
    ///
    /// Request datapoints (`up_request`, `down_request`, `trigger_request`) on
    /// button devices become edges with button id `<device_id>:<side>`;
    /// `"1"` is a press and `"0"` a release.
    pub fn resolve_datapoint(&self, update: &DatapointUpdate) -> Option<ResolvedDatapoint> {
        let dp = self.datapoints.get(&update.datapoint_id)?;
        let device = self.devices.get(&dp.device_id)?;

        if let Some(side) = dp.kind.strip_suffix("_request") {
            let raw = update
                .values
                .iter()
                .find(|v| v.key == dp.kind)
                .or_else(|| update.values.first())?;
            let edge = match raw.value.as_str() {
                "1" => Edge::Press,
                "0" => Edge::Release,
                other => {
                    debug!(datapoint_id = %update.datapoint_id, value = other, "ignoring request value");
                    return None;
                }
            };
            return Some(ResolvedDatapoint::Edge(ButtonEdgeEvent {
                button_id: format!("{}:{side}", device.id),
                edge,
                timestamp_ms: None,
            }));
        }

        let attributes = update
            .values
            .iter()
            .filter_map(|v| {
                let cap = Capability::from_attribute(&v.key)?;
                Some((cap.attribute().to_string(), cap.parse_wire(&v.value)?))
            })
            .collect();
        Some(ResolvedDatapoint::State(DeviceStateUpdate {
            device_id: device.id.clone(),
            function_type: None,
            label: None,
            attributes,
        }))
    }

    /// Validates a write and builds the [`Command`] for it.
    ///
    /// Never touches the network; the caller sends the command only if this
    /// returns `Ok`.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::NotFound`] for an unknown device.
    /// - [`RegistryError::UnsupportedAttribute`] if the attribute is not in
    ///   the device's capability set.
    /// - [`RegistryError::ReadOnlyAttribute`] for energy readings.
    /// - [`RegistryError::InvalidValue`] if the value cannot be normalized.
    pub fn prepare_command(
        &self,
        device_id: &str,
        attribute: &str,
        value: &AttributeValue,
    ) -> Result<Command, RegistryError> {
        let device = self.get(device_id)?;
        let cap = Capability::from_attribute(attribute)
            .filter(|cap| device.supports(*cap))
            .ok_or_else(|| RegistryError::UnsupportedAttribute {
                device_id: device_id.to_string(),
                attribute: attribute.to_string(),
            })?;
        if !cap.is_writable() {
            return Err(RegistryError::ReadOnlyAttribute {
                device_id: device_id.to_string(),
                attribute: attribute.to_string(),
            });
        }
        let value = cap
            .normalize(value)
            .ok_or_else(|| RegistryError::InvalidValue {
                device_id: device_id.to_string(),
                attribute: attribute.to_string(),
                value: value.to_string(),
            })?;

        Ok(Command {
            correlation_id: None,
            device_id: device_id.to_string(),
            attribute: cap.attribute().to_string(),
            value,
            target: device.target_for(cap),
        })
    }

    /// Returns `true` if `update` reports the value `command` asked for.
    ///
    /// Used to confirm commands on gateways that echo state instead of
    /// sending acknowledgements.  Compares normalized values, so an echo of
    /// `"1"` confirms a request for `true`.
    pub fn confirms(&self, update: &DeviceStateUpdate, command: &Command) -> bool {
        if update.device_id != command.device_id {
            return false;
        }
        let Some(cap) = Capability::from_attribute(&command.attribute) else {
            return false;
        };
        update.attributes.iter().any(|(name, raw)| {
            Capability::from_attribute(name) == Some(cap)
                && cap.normalize(raw).as_ref() == Some(&command.value)
        })
    }

    /// Replaces the registry contents with a full gateway snapshot.
    ///
    /// Existing devices are diffed against the snapshot, new ones created,
    /// and devices missing from the snapshot removed.  The datapoint index is
    /// rebuilt from scratch.
    pub fn replace_all(
        &mut self,
        functions: &[FunctionDescriptor],
        now: Instant,
    ) -> Vec<DeviceEvent> {
        self.replace_all_since(functions, now, now)
    }

    /// Like [`replace_all`](Self::replace_all) for a snapshot requested at
    /// `requested_at`.
    ///
    /// A device updated after `requested_at` keeps its attribute values: the
    /// snapshot is older than what the registry already holds.  Its
    /// description (label, capabilities, datapoints) is still refreshed.
    pub fn replace_all_since(
        &mut self,
        functions: &[FunctionDescriptor],
        requested_at: Instant,
        now: Instant,
    ) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        let mut seen = HashSet::new();
        let mut index = HashMap::new();

        for function in functions {
            if !self.is_of_interest(&function.id) {
                continue;
            }
            let Some(mut fresh) = Device::from_function(function) else {
                warn!(device_id = %function.id, function_type = %function.function_type, "skipping device of unsupported type");
                continue;
            };
            seen.insert(function.id.clone());
            for (kind, dp_id) in &fresh.datapoints {
                index.insert(
                    dp_id.clone(),
                    DatapointRef {
                        device_id: function.id.clone(),
                        kind: kind.clone(),
                    },
                );
            }

            match self.devices.get_mut(&function.id) {
                Some(existing) => {
                    existing.label = fresh.label.take();
                    existing.class = fresh.class;
                    existing.function_type = fresh.function_type.take();
                    existing.capabilities = std::mem::take(&mut fresh.capabilities);
                    existing.metadata = std::mem::take(&mut fresh.metadata);
                    existing.datapoints = std::mem::take(&mut fresh.datapoints);
                    let caps = existing.capabilities.clone();
                    existing.attributes.retain(|name, _| {
                        Capability::from_attribute(name).map_or(false, |c| caps.contains(&c))
                    });
                    if existing.last_update.map_or(false, |t| t > requested_at) {
                        debug!(device_id = %function.id, "newer than snapshot, keeping attributes");
                        continue;
                    }
                    let changes = existing.merge(&fresh.attributes, now);
                    if !changes.is_empty() {
                        events.push(DeviceEvent::Changed {
                            device_id: function.id.clone(),
                            created: false,
                            changes,
                        });
                    }
                }
                None => {
                    let changes = fresh
                        .attributes
                        .iter()
                        .map(|(name, value)| AttributeChange {
                            attribute: name.clone(),
                            old: None,
                            new: value.clone(),
                        })
                        .collect();
                    fresh.available = self.online;
                    fresh.last_update = Some(now);
                    self.devices.insert(function.id.clone(), fresh);
                    events.push(DeviceEvent::Changed {
                        device_id: function.id.clone(),
                        created: true,
                        changes,
                    });
                }
            }
        }

        let stale: Vec<String> = self
            .devices
            .keys()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();
        for device_id in stale {
            self.devices.remove(&device_id);
            debug!(device_id = %device_id, "device missing from snapshot, removed");
            events.push(DeviceEvent::Removed { device_id });
        }

        self.datapoints = index;
        events
    }

    /// Removes a device after an explicit `device_removed` message.
    pub fn remove(&mut self, device_id: &str) -> Option<DeviceEvent> {
        self.devices.remove(device_id)?;
        self.datapoints.retain(|_, dp| dp.device_id != device_id);
        Some(DeviceEvent::Removed {
            device_id: device_id.to_string(),
        })
    }

    /// Marks every device reachable or unreachable.  Returns one
    /// [`DeviceEvent::Availability`] per device whose flag changed.
    pub fn set_online(&mut self, online: bool) -> Vec<DeviceEvent> {
        self.online = online;
        self.devices
            .values_mut()
            .filter(|d| d.available != online)
            .map(|d| {
                d.available = online;
                DeviceEvent::Availability {
                    device_id: d.id.clone(),
                    available: online,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{DatapointDescriptor, DatapointValue};

    fn update(device_id: &str, attrs: &[(&str, AttributeValue)]) -> DeviceStateUpdate {
        DeviceStateUpdate {
            device_id: device_id.to_string(),
            function_type: None,
            label: None,
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    fn dp(id: &str, kind: &str, value: &str) -> DatapointDescriptor {
        DatapointDescriptor {
            id: id.to_string(),
            kind: kind.to_string(),
            values: vec![DatapointValue {
                key: kind.to_string(),
                value: value.to_string(),
            }],
        }
    }

    fn function(id: &str, function_type: &str, datapoints: Vec<DatapointDescriptor>) -> FunctionDescriptor {
        FunctionDescriptor {
            id: id.to_string(),
            label: Some(format!("{id} label")),
            function_type: function_type.to_string(),
            datapoints,
        }
    }

    fn snapshot() -> Vec<FunctionDescriptor> {
        vec![
            function(
                "dimmer1",
                "DimmerLight",
                vec![dp("dp1", "switch", "1"), dp("dp2", "brightness", "40")],
            ),
            function(
                "rocker1",
                "RockerSwitch",
                vec![dp("dp3", "up_request", "0"), dp("dp4", "down_request", "0")],
            ),
        ]
    }

    #[test]
    fn test_registry_starts_empty() {
        let registry = DeviceRegistry::new(None);
        assert!(registry.is_empty());
        assert_eq!(
            registry.get("x").unwrap_err(),
            RegistryError::NotFound("x".to_string())
        );
    }

    #[test]
    fn test_apply_creates_unseen_device() {
        // Arrange
        let mut registry = DeviceRegistry::new(None);

        // Act
        let event = registry.apply(
            &update("dimmer1", &[("brightness", AttributeValue::Int(40))]),
            Instant::now(),
        );

        // Assert
        assert!(matches!(event, Some(DeviceEvent::Changed { created: true, .. })));
        let device = registry.get("dimmer1").unwrap();
        assert_eq!(device.class, DeviceClass::Dimmer);
        assert_eq!(device.attribute("brightness"), Some(&AttributeValue::Int(40)));
    }

    #[test]
    fn test_identical_update_produces_exactly_one_notification() {
        // Arrange
        let mut registry = DeviceRegistry::new(None);
        registry.replace_all(&snapshot(), Instant::now());
        let msg = update("dimmer1", &[("brightness", AttributeValue::Int(55))]);

        // Act
        let first = registry.apply(&msg, Instant::now());
        let second = registry.apply(&msg, Instant::now());

        // Assert
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[test]
    fn test_apply_ignores_devices_outside_interest() {
        let mut registry = DeviceRegistry::new(Some(HashSet::from(["a".to_string()])));

        let event = registry.apply(&update("b", &[("switch", AttributeValue::Bool(true))]), Instant::now());

        assert!(event.is_none());
        assert!(registry.get("b").is_err());
    }

    #[test]
    fn test_apply_skips_unsupported_function_type() {
        let mut registry = DeviceRegistry::new(None);
        let mut msg = update("t1", &[("switch", AttributeValue::Bool(true))]);
        msg.function_type = Some("Thermostat".to_string());

        assert!(registry.apply(&msg, Instant::now()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_prepare_command_rejects_unsupported_attribute() {
        // Arrange
        let mut registry = DeviceRegistry::new(None);
        registry.replace_all(&snapshot(), Instant::now());

        // Act
        let err = registry
            .prepare_command("dimmer1", "color_temperature", &AttributeValue::Int(2700))
            .unwrap_err();

        // Assert
        assert_eq!(
            err,
            RegistryError::UnsupportedAttribute {
                device_id: "dimmer1".to_string(),
                attribute: "color_temperature".to_string(),
            }
        );
    }

    #[test]
    fn test_prepare_command_normalizes_and_targets_datapoint() {
        let mut registry = DeviceRegistry::new(None);
        registry.replace_all(&snapshot(), Instant::now());

        let cmd = registry
            .prepare_command("dimmer1", "power", &AttributeValue::Text("off".to_string()))
            .unwrap();

        assert_eq!(cmd.attribute, "switch");
        assert_eq!(cmd.value, AttributeValue::Bool(false));
        assert_eq!(cmd.target.unwrap().datapoint_id, "dp1");
    }

    #[test]
    fn test_prepare_command_rejects_read_only_and_invalid_values() {
        let mut registry = DeviceRegistry::new(None);
        registry.replace_all(
            &[function("s1", "Socket", vec![dp("dp9", "switch", "0"), dp("dp10", "quantity", "3.5")])],
            Instant::now(),
        );

        assert!(matches!(
            registry.prepare_command("s1", "quantity", &AttributeValue::Float(1.0)),
            Err(RegistryError::ReadOnlyAttribute { .. })
        ));
        assert!(matches!(
            registry.prepare_command("s1", "switch", &AttributeValue::Int(7)),
            Err(RegistryError::InvalidValue { .. })
        ));
        assert!(matches!(
            registry.prepare_command("nope", "switch", &AttributeValue::Bool(true)),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn test_resolve_datapoint_state_update() {
        let mut registry = DeviceRegistry::new(None);
        registry.replace_all(&snapshot(), Instant::now());
        let push = DatapointUpdate {
            datapoint_id: "dp2".to_string(),
            datapoint_type: None,
            values: vec![DatapointValue {
                key: "brightness".to_string(),
                value: "70".to_string(),
            }],
        };

        let resolved = registry.resolve_datapoint(&push).unwrap();

        assert_eq!(
            resolved,
            ResolvedDatapoint::State(update("dimmer1", &[("brightness", AttributeValue::Int(70))]))
        );
    }

    #[test]
    fn test_resolve_request_datapoint_to_button_edge() {
        let mut registry = DeviceRegistry::new(None);
        registry.replace_all(&snapshot(), Instant::now());
        let push = DatapointUpdate {
            datapoint_id: "dp4".to_string(),
            datapoint_type: Some("down_request".to_string()),
            values: vec![DatapointValue {
                key: "down_request".to_string(),
                value: "1".to_string(),
            }],
        };

        let resolved = registry.resolve_datapoint(&push).unwrap();

        assert_eq!(
            resolved,
            ResolvedDatapoint::Edge(ButtonEdgeEvent {
                button_id: "rocker1:down".to_string(),
                edge: Edge::Press,
                timestamp_ms: None,
            })
        );
    }

    #[test]
    fn test_resolve_unknown_datapoint_is_none() {
        let registry = DeviceRegistry::new(None);
        let push = DatapointUpdate {
            datapoint_id: "ghost".to_string(),
            datapoint_type: None,
            values: vec![],
        };
        assert!(registry.resolve_datapoint(&push).is_none());
    }

    #[test]
    fn test_confirms_compares_normalized_values() {
        let mut registry = DeviceRegistry::new(None);
        registry.replace_all(&snapshot(), Instant::now());
        let cmd = registry
            .prepare_command("dimmer1", "switch", &AttributeValue::Bool(true))
            .unwrap();

        let echo = update("dimmer1", &[("switch", AttributeValue::Text("1".to_string()))]);
        let other = update("dimmer1", &[("brightness", AttributeValue::Int(1))]);

        assert!(registry.confirms(&echo, &cmd));
        assert!(!registry.confirms(&other, &cmd));
    }

    #[test]
    fn test_apply_learns_reported_capabilities_for_undescribed_device() {
        // Arrange
        let mut registry = DeviceRegistry::new(None);
        let mut msg = update(
            "l1",
            &[
                ("brightness", AttributeValue::Int(40)),
                ("color_temperature", AttributeValue::Int(2700)),
            ],
        );
        msg.function_type = Some("dimmer".to_string());

        // Act
        registry.apply(&msg, Instant::now());
        let cmd = registry.prepare_command("l1", "color_temperature", &AttributeValue::Int(3000));

        // Assert
        let device = registry.get("l1").unwrap();
        assert_eq!(device.attribute("color_temperature"), Some(&AttributeValue::Int(2700)));
        assert_eq!(cmd.unwrap().value, AttributeValue::Int(3000));
    }

    #[test]
    fn test_prepare_command_rejects_led_without_datapoint() {
        let mut registry = DeviceRegistry::new(None);
        registry.replace_all(
            &[function("rocker1", "RockerSwitch", vec![dp("dp3", "up_request", "0")])],
            Instant::now(),
        );

        let err = registry
            .prepare_command("rocker1", "status_led", &AttributeValue::Bool(true))
            .unwrap_err();

        assert!(matches!(err, RegistryError::UnsupportedAttribute { .. }));
    }

    #[test]
    fn test_replace_all_since_keeps_values_pushed_during_fetch() {
        // Arrange
        let mut registry = DeviceRegistry::new(None);
        registry.replace_all(&snapshot(), Instant::now());
        let requested_at = Instant::now();
        std::thread::sleep(std::time::Duration::from_millis(2));
        registry.apply(&update("dimmer1", &[("brightness", AttributeValue::Int(70))]), Instant::now());

        // Act: the snapshot still carries the value from before the push.
        let events = registry.replace_all_since(&snapshot(), requested_at, Instant::now());

        // Assert
        let device = registry.get("dimmer1").unwrap();
        assert_eq!(device.attribute("brightness"), Some(&AttributeValue::Int(70)));
        assert!(events.is_empty());
    }

    #[test]
    fn test_replace_all_since_applies_values_older_than_request() {
        let mut registry = DeviceRegistry::new(None);
        registry.replace_all(&snapshot(), Instant::now());
        registry.apply(&update("dimmer1", &[("brightness", AttributeValue::Int(70))]), Instant::now());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let requested_at = Instant::now();

        let events = registry.replace_all_since(&snapshot(), requested_at, Instant::now());

        let device = registry.get("dimmer1").unwrap();
        assert_eq!(device.attribute("brightness"), Some(&AttributeValue::Int(40)));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_replace_all_converges_and_removes_missing_devices() {
        // Arrange
        let mut registry = DeviceRegistry::new(None);
        registry.replace_all(&snapshot(), Instant::now());
        registry.apply(&update("ghost", &[("switch", AttributeValue::Bool(true))]), Instant::now());
        let newer = vec![function(
            "dimmer1",
            "DimmerLight",
            vec![dp("dp1", "switch", "0"), dp("dp2", "brightness", "15")],
        )];

        // Act
        let events = registry.replace_all(&newer, Instant::now());

        // Assert
        let device = registry.get("dimmer1").unwrap();
        assert_eq!(device.attribute("switch"), Some(&AttributeValue::Bool(false)));
        assert_eq!(device.attribute("brightness"), Some(&AttributeValue::Int(15)));
        assert!(registry.get("ghost").is_err());
        assert!(registry.get("rocker1").is_err());
        assert!(events.contains(&DeviceEvent::Removed {
            device_id: "ghost".to_string()
        }));
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn test_replace_all_unchanged_snapshot_is_silent() {
        let mut registry = DeviceRegistry::new(None);
        registry.replace_all(&snapshot(), Instant::now());

        let events = registry.replace_all(&snapshot(), Instant::now());

        assert!(events.is_empty());
    }

    #[test]
    fn test_remove_drops_device_and_datapoints() {
        let mut registry = DeviceRegistry::new(None);
        registry.replace_all(&snapshot(), Instant::now());

        assert!(registry.remove("dimmer1").is_some());
        assert!(registry.remove("dimmer1").is_none());
        let push = DatapointUpdate {
            datapoint_id: "dp1".to_string(),
            datapoint_type: None,
            values: vec![],
        };
        assert!(registry.resolve_datapoint(&push).is_none());
    }

    #[test]
    fn test_set_online_reports_only_transitions() {
        let mut registry = DeviceRegistry::new(None);
        registry.replace_all(&snapshot(), Instant::now());

        let up = registry.set_online(true);
        let again = registry.set_online(true);
        let down = registry.set_online(false);

        assert_eq!(up.len(), 2);
        assert!(again.is_empty());
        assert_eq!(down.len(), 2);
        assert!(!registry.get("dimmer1").unwrap().available);
    }

    #[test]
    fn test_is_button_of_interest_uses_device_prefix() {
        let registry = DeviceRegistry::new(Some(HashSet::from(["rocker1".to_string()])));
        assert!(registry.is_button_of_interest("rocker1:up"));
        assert!(!registry.is_button_of_interest("rocker2:up"));
    }
}
