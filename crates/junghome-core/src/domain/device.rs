//! Device entity: class, capabilities, and typed attribute values.
//!
//! # Device model (for beginners)
//!
//! The gateway calls each controllable thing a *function*: a light, a socket,
//! a rocker panel.  A function owns several *datapoints*, each a single value
//! such as on/off or brightness.  The bridge folds that into one [`Device`]
//! per function:
//!
//! ```text
//! function "Kitchen" (DimmerLight)        Device "f1"
//!   datapoint dp1  type=switch      ──►     capabilities {power, brightness}
//!   datapoint dp2  type=brightness          attributes   {switch: true, brightness: 40}
//! ```
//!
//! Attribute names are the gateway's datapoint keys (`switch`, `brightness`,
//! `color_temperature`, `quantity`, `status_led`).  Friendlier aliases
//! (`power`, `color`, `led`) are accepted from callers and mapped to the
//! canonical name.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Instant;

use crate::protocol::messages::{AttributeValue, DatapointTarget, FunctionDescriptor};

/// Lowest accepted colour temperature in Kelvin.
pub const COLOR_TEMPERATURE_MIN: i64 = 1000;
/// Highest accepted colour temperature in Kelvin.
pub const COLOR_TEMPERATURE_MAX: i64 = 10000;

// ── Device class ──────────────────────────────────────────────────────────────

/// Coarse kind of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceClass {
    /// Plain on/off switch (`OnOff`).
    Switch,
    /// Switching actuator without dimming.
    Actuator,
    /// Dimmable light, optionally with colour temperature.
    Dimmer,
    /// Switchable socket, optionally with energy metering.
    Socket,
    /// Push-button or rocker panel.  Produces edges, not state.
    Button,
}

impl DeviceClass {
    /// Maps a gateway function type (or its snake_case logical spelling) to a
    /// class.  Returns `None` for function types the bridge does not model.
    pub fn from_function_type(function_type: &str) -> Option<Self> {
        match function_type {
            "OnOff" | "on_off" | "switch" => Some(DeviceClass::Switch),
            "Actuator" | "SwitchActuator" | "actuator" => Some(DeviceClass::Actuator),
            "DimmerLight" | "ColorLight" | "dimmer" => Some(DeviceClass::Dimmer),
            "Socket" | "socket" => Some(DeviceClass::Socket),
            "RockerSwitch" | "Button" | "button" | "rocker" => Some(DeviceClass::Button),
            _ => None,
        }
    }

    /// Capabilities assumed when the gateway has not listed datapoints.
    pub fn default_capabilities(self, function_type: Option<&str>) -> BTreeSet<Capability> {
        let caps: &[Capability] = match (self, function_type) {
            (DeviceClass::Dimmer, Some("ColorLight")) => {
                &[Capability::Power, Capability::Brightness, Capability::Color]
            }
            (DeviceClass::Dimmer, _) => &[Capability::Power, Capability::Brightness],
            (DeviceClass::Socket, _) => &[Capability::Power, Capability::EnergyMetering],
            (DeviceClass::Button, _) => &[Capability::LedState],
            (DeviceClass::Switch | DeviceClass::Actuator, _) => &[Capability::Power],
        };
        caps.iter().copied().collect()
    }

    /// Guesses a class from the attribute names of an update for a device the
    /// gateway never described.
    pub fn infer<'a>(attributes: impl IntoIterator<Item = &'a str>) -> Self {
        let caps: BTreeSet<Capability> = attributes
            .into_iter()
            .filter_map(Capability::from_attribute)
            .collect();
        if caps.contains(&Capability::Brightness) || caps.contains(&Capability::Color) {
            DeviceClass::Dimmer
        } else if caps.contains(&Capability::EnergyMetering) {
            DeviceClass::Socket
        } else if caps.contains(&Capability::LedState) && !caps.contains(&Capability::Power) {
            DeviceClass::Button
        } else {
            DeviceClass::Switch
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceClass::Switch => "switch",
            DeviceClass::Actuator => "actuator",
            DeviceClass::Dimmer => "dimmer",
            DeviceClass::Socket => "socket",
            DeviceClass::Button => "button",
        };
        f.write_str(name)
    }
}

// ── Capabilities ──────────────────────────────────────────────────────────────

/// One controllable or observable aspect of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    Power,
    Brightness,
    Color,
    EnergyMetering,
    LedState,
}

impl Capability {
    /// Canonical attribute name, identical to the gateway's datapoint key.
    pub fn attribute(self) -> &'static str {
        match self {
            Capability::Power => "switch",
            Capability::Brightness => "brightness",
            Capability::Color => "color_temperature",
            Capability::EnergyMetering => "quantity",
            Capability::LedState => "status_led",
        }
    }

    /// Resolves a canonical attribute name or one of its aliases.
    pub fn from_attribute(name: &str) -> Option<Self> {
        match name {
            "switch" | "power" => Some(Capability::Power),
            "brightness" => Some(Capability::Brightness),
            "color_temperature" | "color" => Some(Capability::Color),
            "quantity" | "energy" => Some(Capability::EnergyMetering),
            "status_led" | "led" => Some(Capability::LedState),
            _ => None,
        }
    }

    /// Energy readings are reported by the gateway and cannot be written.
    pub fn is_writable(self) -> bool {
        !matches!(self, Capability::EnergyMetering)
    }

    /// Parses the gateway's string form into the typed value for this
    /// capability.
    pub fn parse_wire(self, raw: &str) -> Option<AttributeValue> {
        self.normalize(&AttributeValue::Text(raw.to_string()))
    }

    /// Converts `value` into the canonical type for this capability and checks
    /// its range.
    ///
    /// | Capability | Canonical type | Accepted input |
    /// |------------|----------------|----------------|
    /// | power, led-state | `Bool` | bool, 0/1, `"1"`/`"0"`, `"on"`/`"off"`, `"true"`/`"false"` |
    /// | brightness | `Int` 0–100 | integer, finite float (rounded), numeric string |
    /// | color | `Int` Kelvin | integer or numeric string in the Kelvin range |
    /// | energy-metering | `Float` | any finite number or numeric string |
    pub fn normalize(self, value: &AttributeValue) -> Option<AttributeValue> {
        match self {
            Capability::Power | Capability::LedState => to_bool(value).map(AttributeValue::Bool),
            Capability::Brightness => to_int(value)
                .filter(|v| (0..=100).contains(v))
                .map(AttributeValue::Int),
            Capability::Color => to_int(value)
                .filter(|v| (COLOR_TEMPERATURE_MIN..=COLOR_TEMPERATURE_MAX).contains(v))
                .map(AttributeValue::Int),
            Capability::EnergyMetering => to_float(value).map(AttributeValue::Float),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.attribute())
    }
}

fn to_bool(value: &AttributeValue) -> Option<bool> {
    match value {
        AttributeValue::Bool(b) => Some(*b),
        AttributeValue::Int(0) => Some(false),
        AttributeValue::Int(1) => Some(true),
        AttributeValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "on" | "true" => Some(true),
            "0" | "off" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn to_int(value: &AttributeValue) -> Option<i64> {
    match value {
        AttributeValue::Int(v) => Some(*v),
        AttributeValue::Float(v) if v.is_finite() => Some(v.round() as i64),
        AttributeValue::Text(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .map(|v| v.round() as i64)
            })
        }
        _ => None,
    }
}

fn to_float(value: &AttributeValue) -> Option<f64> {
    match value {
        AttributeValue::Int(v) => Some(*v as f64),
        AttributeValue::Float(v) if v.is_finite() => Some(*v),
        AttributeValue::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

// ── Device ────────────────────────────────────────────────────────────────────

/// A single change produced by merging new values into a device.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeChange {
    pub attribute: String,
    pub old: Option<AttributeValue>,
    pub new: AttributeValue,
}

/// Current snapshot of one device.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: String,
    pub label: Option<String>,
    pub class: DeviceClass,
    pub function_type: Option<String>,
    pub capabilities: BTreeSet<Capability>,
    /// Only ever contains canonical names of capabilities in `capabilities`.
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Descriptive values such as `quantity_label` and `quantity_unit`.
    pub metadata: BTreeMap<String, String>,
    /// Datapoint type → datapoint id.
    pub datapoints: BTreeMap<String, String>,
    /// `false` while the gateway is unreachable.
    pub available: bool,
    pub last_update: Option<Instant>,
}

impl Device {
    /// Creates an empty device of the given class with its default
    /// capabilities.
    pub fn new(id: impl Into<String>, class: DeviceClass, function_type: Option<String>) -> Self {
        let capabilities = class.default_capabilities(function_type.as_deref());
        Self {
            id: id.into(),
            label: None,
            class,
            function_type,
            capabilities,
            attributes: BTreeMap::new(),
            metadata: BTreeMap::new(),
            datapoints: BTreeMap::new(),
            available: false,
            last_update: None,
        }
    }

    /// Builds a device from one entry of the gateway's function list.
    ///
    /// Returns `None` if the function type is not modelled.
    pub fn from_function(function: &FunctionDescriptor) -> Option<Self> {
        let class = DeviceClass::from_function_type(&function.function_type)?;
        let mut device = Device::new(
            function.id.clone(),
            class,
            Some(function.function_type.clone()),
        );
        device.label = function.label.clone();

        // A listed function is only writable through its datapoints, so the
        // class defaults apply only when the gateway listed none at all.
        if !function.datapoints.is_empty() {
            device.capabilities = function
                .datapoints
                .iter()
                .filter_map(|dp| Capability::from_attribute(&dp.kind))
                .collect();
        }

        for dp in &function.datapoints {
            device.datapoints.insert(dp.kind.clone(), dp.id.clone());
            for v in &dp.values {
                match Capability::from_attribute(&v.key) {
                    Some(cap) if device.capabilities.contains(&cap) => {
                        if let Some(parsed) = cap.parse_wire(&v.value) {
                            device.attributes.insert(cap.attribute().to_string(), parsed);
                        }
                    }
                    Some(_) => {}
                    None if v.key != dp.kind => {
                        device.metadata.insert(v.key.clone(), v.value.clone());
                    }
                    None => {}
                }
            }
        }
        Some(device)
    }

    /// Returns `true` if the device has `capability`.
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Looks up an attribute by canonical name or alias.
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        let cap = Capability::from_attribute(name)?;
        self.attributes.get(cap.attribute())
    }

    /// Native datapoint that accepts writes for `capability`, if listed.
    pub fn target_for(&self, capability: Capability) -> Option<DatapointTarget> {
        let kind = capability.attribute();
        self.datapoints.get(kind).map(|id| DatapointTarget {
            datapoint_id: id.clone(),
            datapoint_type: kind.to_string(),
        })
    }

    /// Adds the capabilities behind recognised attribute names.
    ///
    /// Only for devices the gateway never described with datapoints; their
    /// capability set is otherwise just a guess from the class.
    pub fn learn_capabilities<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        if !self.datapoints.is_empty() {
            return;
        }
        for cap in names.into_iter().filter_map(Capability::from_attribute) {
            if self.capabilities.insert(cap) {
                tracing::debug!(device_id = %self.id, capability = %cap, "capability learned from report");
            }
        }
    }

    /// Merges `values` into the attribute map and returns what actually
    /// changed.  Attributes outside the capability set and values that fail
    /// normalization are skipped.
    pub fn merge(
        &mut self,
        values: &BTreeMap<String, AttributeValue>,
        now: Instant,
    ) -> Vec<AttributeChange> {
        let mut changes = Vec::new();
        for (name, raw) in values {
            let Some(cap) = Capability::from_attribute(name) else {
                tracing::debug!(device_id = %self.id, attribute = %name, "ignoring unknown attribute");
                continue;
            };
            if !self.supports(cap) {
                tracing::debug!(device_id = %self.id, attribute = %name, "attribute outside capability set");
                continue;
            }
            let Some(value) = cap.normalize(raw) else {
                tracing::warn!(device_id = %self.id, attribute = %name, value = %raw, "ignoring out-of-range value");
                continue;
            };
            let key = cap.attribute();
            if self.attributes.get(key) != Some(&value) {
                let old = self.attributes.insert(key.to_string(), value.clone());
                changes.push(AttributeChange {
                    attribute: key.to_string(),
                    old,
                    new: value,
                });
            }
        }
        self.last_update = Some(now);
        changes
    }
}
