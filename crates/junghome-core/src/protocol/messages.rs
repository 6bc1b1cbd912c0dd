//! All message types exchanged with the Jung Home gateway.
//!
//! The gateway speaks JSON over a WebSocket.  Every frame is a JSON object
//! with a `"type"` field naming the message kind:
//!
//! ```json
//! {"type":"datapoint","data":{"id":"a1b2","values":[{"key":"brightness","value":"40"}]}}
//! {"type":"device_state_update","device_id":"dimmer1","attributes":{"brightness":40}}
//! {"type":"button_edge","button_id":"b1","edge":"press","ts":1712}
//! ```
//!
//! Two families of frames share the same [`ParsedMessage`] type:
//!
//! - **Native datapoint frames** – what the real gateway pushes.  A datapoint
//!   is one addressable value of a device (its on/off state, its brightness,
//!   the "up" rocker of a button panel).  The frame only carries the datapoint
//!   id; the device registry knows which device owns it.
//! - **Logical frames** – device-level messages (`device_state_update`,
//!   `button_edge`, `command_ack`, ...) used by gateways and simulators that
//!   speak the device-oriented dialect.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ── Attribute values ──────────────────────────────────────────────────────────

/// A typed attribute value.
///
/// The gateway transports every value as a string (`"1"`, `"40"`, `"2700"`).
/// The codec keeps strings as they are; the device model converts them into
/// the typed variant that matches the attribute's capability.
///
/// # Serde representation
///
/// Untagged, so a logical frame can carry plain JSON scalars:
///
/// ```json
/// {"switch": true, "brightness": 40, "quantity": 12.5, "mode": "eco"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl AttributeValue {
    /// Returns the string the gateway expects on the wire.
    ///
    /// Booleans are sent as `"1"` / `"0"`, numbers in their decimal form.
    pub fn to_wire_string(&self) -> String {
        match self {
            AttributeValue::Bool(true) => "1".to_string(),
            AttributeValue::Bool(false) => "0".to_string(),
            AttributeValue::Int(v) => v.to_string(),
            AttributeValue::Float(v) => v.to_string(),
            AttributeValue::Text(s) => s.clone(),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Bool(v) => write!(f, "{v}"),
            AttributeValue::Int(v) => write!(f, "{v}"),
            AttributeValue::Float(v) => write!(f, "{v}"),
            AttributeValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<i32> for AttributeValue {
    fn from(v: i32) -> Self {
        AttributeValue::Int(i64::from(v))
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Float(v)
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::Text(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::Text(v.to_string())
    }
}

// ── Button edges ──────────────────────────────────────────────────────────────

/// A single physical button transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Edge {
    Press,
    Release,
}

// ── Inbound messages ──────────────────────────────────────────────────────────

/// Attribute changes for one device, in device-level terms.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStateUpdate {
    pub device_id: String,
    /// Gateway function type (e.g. `"DimmerLight"`), if the frame named one.
    pub function_type: Option<String>,
    pub label: Option<String>,
    pub attributes: BTreeMap<String, AttributeValue>,
}

/// A press or release of one physical button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonEdgeEvent {
    pub button_id: String,
    pub edge: Edge,
    /// Gateway-side timestamp in milliseconds.  Informational only: gesture
    /// timing always uses the local monotonic clock at receipt.
    pub timestamp_ms: Option<u64>,
}

/// Outcome reported by the gateway for a command or subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckStatus {
    Ok,
    Error {
        code: Option<String>,
        message: String,
    },
}

/// Acknowledgement of a previously sent frame, matched by correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandAck {
    pub correlation_id: u64,
    pub status: AckStatus,
}

/// Result of the authenticate step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResult {
    pub success: bool,
    pub message: Option<String>,
}

/// One `key = value` pair inside a native datapoint frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatapointValue {
    pub key: String,
    pub value: String,
}

/// A native datapoint push: one or more values for a single datapoint id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatapointUpdate {
    pub datapoint_id: String,
    pub datapoint_type: Option<String>,
    pub values: Vec<DatapointValue>,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedMessage {
    DeviceStateUpdate(DeviceStateUpdate),
    ButtonEdgeEvent(ButtonEdgeEvent),
    CommandAck(CommandAck),
    AuthResult(AuthResult),
    Heartbeat,
    Error { code: String, message: String },
    /// Native datapoint push; resolved to a device by the registry.
    Datapoint(DatapointUpdate),
    DeviceRemoved { device_id: String },
    /// Informational frames (`version`, `message`, `groups`, `scenes`) that
    /// carry no device state.
    Info { kind: String },
}

impl ParsedMessage {
    /// Short name of the variant for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            ParsedMessage::DeviceStateUpdate(_) => "device_state_update",
            ParsedMessage::ButtonEdgeEvent(_) => "button_edge",
            ParsedMessage::CommandAck(_) => "command_ack",
            ParsedMessage::AuthResult(_) => "auth_result",
            ParsedMessage::Heartbeat => "heartbeat",
            ParsedMessage::Error { .. } => "error",
            ParsedMessage::Datapoint(_) => "datapoint",
            ParsedMessage::DeviceRemoved { .. } => "device_removed",
            ParsedMessage::Info { .. } => "info",
        }
    }
}

// ── REST snapshot ─────────────────────────────────────────────────────────────

/// One datapoint as listed by the gateway's function list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatapointDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub values: Vec<DatapointValue>,
}

/// One gateway function (a logical device) with all of its datapoints.
///
/// ```json
/// {"id":"f1","label":"Kitchen","type":"DimmerLight",
///  "datapoints":[{"id":"dp1","type":"switch","values":[{"key":"switch","value":"1"}]}]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(rename = "type")]
    pub function_type: String,
    #[serde(default)]
    pub datapoints: Vec<DatapointDescriptor>,
}

// ── Outbound messages ─────────────────────────────────────────────────────────

/// Native address of a writable attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatapointTarget {
    pub datapoint_id: String,
    pub datapoint_type: String,
}

/// A request to change one attribute of one device.
///
/// Created by the caller, consumed once by the session, never retained.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub correlation_id: Option<u64>,
    pub device_id: String,
    /// Canonical attribute name (e.g. `"brightness"`).
    pub attribute: String,
    pub value: AttributeValue,
    /// Native datapoint for this attribute, when the gateway listed one.
    pub target: Option<DatapointTarget>,
}

/// All frames the bridge sends to the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Authenticate { token: String },
    Subscribe { correlation_id: u64, topics: Vec<String> },
    Command(Command),
}

impl OutboundMessage {
    /// Short name of the variant for log lines.  Never includes the token.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Authenticate { .. } => "authenticate",
            OutboundMessage::Subscribe { .. } => "subscribe",
            OutboundMessage::Command(_) => "command",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_value_wire_string_for_bool_uses_digits() {
        assert_eq!(AttributeValue::Bool(true).to_wire_string(), "1");
        assert_eq!(AttributeValue::Bool(false).to_wire_string(), "0");
    }

    #[test]
    fn test_attribute_value_untagged_deserialization_picks_narrowest_type() {
        // Arrange
        let json = r#"{"a":true,"b":40,"c":12.5,"d":"eco"}"#;

        // Act
        let map: BTreeMap<String, AttributeValue> = serde_json::from_str(json).unwrap();

        // Assert
        assert_eq!(map["a"], AttributeValue::Bool(true));
        assert_eq!(map["b"], AttributeValue::Int(40));
        assert_eq!(map["c"], AttributeValue::Float(12.5));
        assert_eq!(map["d"], AttributeValue::Text("eco".to_string()));
    }

    #[test]
    fn test_function_descriptor_tolerates_missing_label_and_values() {
        // Arrange
        let json = r#"{"id":"f1","type":"OnOff","datapoints":[{"id":"dp1","type":"switch"}]}"#;

        // Act
        let f: FunctionDescriptor = serde_json::from_str(json).unwrap();

        // Assert
        assert_eq!(f.label, None);
        assert_eq!(f.datapoints[0].kind, "switch");
        assert!(f.datapoints[0].values.is_empty());
    }

    #[test]
    fn test_outbound_kind_never_exposes_token() {
        let msg = OutboundMessage::Authenticate {
            token: "secret".to_string(),
        };
        assert_eq!(msg.kind(), "authenticate");
    }
}
