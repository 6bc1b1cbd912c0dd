//! JSON codec for encoding and decoding gateway frames.
//!
//! Wire format: one JSON object per WebSocket text frame, discriminated by a
//! `"type"` field.
//!
//! Decoding is two-step.  The frame is first parsed into a generic JSON value
//! so the `"type"` field can be read on its own; the rest of the object is
//! then deserialized into the private frame struct for that kind.  This lets
//! the codec report *which* kind was malformed instead of a generic serde
//! message.
//!
//! Decode failures are ordinary values.  The caller logs them and carries on
//! reading the stream; a bad frame never tears down the connection.

use std::collections::BTreeMap;

use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::protocol::messages::{
    AckStatus, AttributeValue, AuthResult, ButtonEdgeEvent, Command, CommandAck, DatapointUpdate,
    DatapointValue, DeviceStateUpdate, Edge, FunctionDescriptor, OutboundMessage, ParsedMessage,
};

/// Errors that can occur while decoding an inbound frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The frame is not valid UTF-8 JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// The frame is JSON but not an object with a string `"type"` field.
    #[error("frame has no \"type\" field")]
    MissingType,

    /// The `"type"` field names a message kind this codec does not know.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// The kind is known but its fields are missing or have the wrong shape.
    #[error("malformed {kind} frame: {reason}")]
    Malformed { kind: String, reason: String },
}

// ── Private frame shapes ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct DatapointFrame {
    data: DatapointData,
}

#[derive(Deserialize)]
struct DatapointData {
    #[serde(deserialize_with = "scalar_string")]
    id: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    values: Vec<WireValue>,
}

#[derive(Deserialize)]
struct WireValue {
    key: String,
    #[serde(deserialize_with = "scalar_string")]
    value: String,
}

#[derive(Deserialize)]
struct DeviceStateFrame {
    device_id: String,
    #[serde(default)]
    class: Option<String>,
    #[serde(default)]
    label: Option<String>,
    attributes: BTreeMap<String, AttributeValue>,
}

#[derive(Deserialize)]
struct ButtonEdgeFrame {
    button_id: String,
    edge: Edge,
    #[serde(default)]
    ts: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum StatusWord {
    Ok,
    Error,
}

#[derive(Deserialize)]
struct CommandAckFrame {
    correlation_id: u64,
    status: StatusWord,
    #[serde(default, deserialize_with = "optional_scalar_string")]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct AuthResultFrame {
    status: StatusWord,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct ErrorFrame {
    #[serde(deserialize_with = "scalar_string")]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct DeviceRemovedFrame {
    device_id: String,
}

/// Accepts a JSON string, number, or boolean and returns it as the gateway's
/// string form.  Ids and values are strings on the real gateway but numbers
/// in some firmware versions.
fn scalar_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(if b { "1" } else { "0" }.to_string()),
        other => Err(de::Error::custom(format!("expected a scalar, got {other}"))),
    }
}

fn optional_scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(de::Error::custom(format!("expected a scalar, got {other}"))),
    }
}

fn parse_kind<T>(kind: &str, value: Value) -> Result<T, DecodeError>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_value(value).map_err(|e| DecodeError::Malformed {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Decodes one inbound frame.
///
/// # Errors
///
/// Returns [`DecodeError`] if the bytes are not JSON, carry no `"type"`, name
/// an unknown type, or have the wrong shape for their type.
///
/// # Examples
///
/// ```rust
/// use junghome_core::protocol::{decode_message, ParsedMessage};
///
/// let msg = decode_message(br#"{"type":"heartbeat"}"#).unwrap();
/// assert_eq!(msg, ParsedMessage::Heartbeat);
/// ```
pub fn decode_message(bytes: &[u8]) -> Result<ParsedMessage, DecodeError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType)?
        .to_string();

    let msg = match kind.as_str() {
        "datapoint" => {
            let frame: DatapointFrame = parse_kind(&kind, value)?;
            ParsedMessage::Datapoint(DatapointUpdate {
                datapoint_id: frame.data.id,
                datapoint_type: frame.data.kind,
                values: frame
                    .data
                    .values
                    .into_iter()
                    .map(|v| DatapointValue {
                        key: v.key,
                        value: v.value,
                    })
                    .collect(),
            })
        }
        "device_state_update" => {
            let frame: DeviceStateFrame = parse_kind(&kind, value)?;
            ParsedMessage::DeviceStateUpdate(DeviceStateUpdate {
                device_id: frame.device_id,
                function_type: frame.class,
                label: frame.label,
                attributes: frame.attributes,
            })
        }
        "button_edge" => {
            let frame: ButtonEdgeFrame = parse_kind(&kind, value)?;
            ParsedMessage::ButtonEdgeEvent(ButtonEdgeEvent {
                button_id: frame.button_id,
                edge: frame.edge,
                timestamp_ms: frame.ts,
            })
        }
        "command_ack" => {
            let frame: CommandAckFrame = parse_kind(&kind, value)?;
            let status = match frame.status {
                StatusWord::Ok => AckStatus::Ok,
                StatusWord::Error => AckStatus::Error {
                    code: frame.code,
                    message: frame.message.unwrap_or_default(),
                },
            };
            ParsedMessage::CommandAck(CommandAck {
                correlation_id: frame.correlation_id,
                status,
            })
        }
        "auth_result" => {
            let frame: AuthResultFrame = parse_kind(&kind, value)?;
            ParsedMessage::AuthResult(AuthResult {
                success: matches!(frame.status, StatusWord::Ok),
                message: frame.message,
            })
        }
        "heartbeat" => ParsedMessage::Heartbeat,
        "error" => {
            let frame: ErrorFrame = parse_kind(&kind, value)?;
            ParsedMessage::Error {
                code: frame.code,
                message: frame.message,
            }
        }
        "device_removed" => {
            let frame: DeviceRemovedFrame = parse_kind(&kind, value)?;
            ParsedMessage::DeviceRemoved {
                device_id: frame.device_id,
            }
        }
        "version" | "message" | "groups" | "scenes" => ParsedMessage::Info { kind },
        _ => return Err(DecodeError::UnknownType(kind)),
    };

    Ok(msg)
}

/// Decodes the gateway's REST function list (`GET /api/junghome/functions`).
///
/// # Errors
///
/// Returns [`DecodeError::InvalidJson`] if the body is not JSON and
/// [`DecodeError::Malformed`] if it is not a list of functions.
pub fn decode_function_list(bytes: &[u8]) -> Result<Vec<FunctionDescriptor>, DecodeError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
    parse_kind("functions", value)
}

/// Encodes an outbound frame as JSON text.
///
/// Never fails: every field is a string, an integer, or an [`AttributeValue`].
///
/// A [`Command`] with a known native [`target`](Command::target) is encoded as
/// a datapoint frame; otherwise it is encoded as a logical `command` frame.
///
/// # Examples
///
/// ```rust
/// use junghome_core::protocol::{encode_message, OutboundMessage};
///
/// let text = encode_message(&OutboundMessage::Subscribe {
///     correlation_id: 7,
///     topics: vec!["dimmer1".to_string()],
/// });
/// assert!(text.contains(r#""type":"subscribe""#));
/// ```
pub fn encode_message(msg: &OutboundMessage) -> String {
    let value = match msg {
        OutboundMessage::Authenticate { token } => json!({
            "type": "authenticate",
            "token": token,
        }),
        OutboundMessage::Subscribe {
            correlation_id,
            topics,
        } => json!({
            "type": "subscribe",
            "correlation_id": correlation_id,
            "topics": topics,
        }),
        OutboundMessage::Command(cmd) => command_value(cmd),
    };
    value.to_string()
}

/// Shorthand for `encode_message(&OutboundMessage::Command(cmd.clone()))`
/// without the clone.
pub fn encode_command(cmd: &Command) -> String {
    command_value(cmd).to_string()
}

fn command_value(cmd: &Command) -> Value {
    match &cmd.target {
        Some(target) => json!({
            "type": "datapoint",
            "data": {
                "id": target.datapoint_id,
                "type": target.datapoint_type,
                "values": [{ "key": cmd.attribute, "value": cmd.value.to_wire_string() }],
            },
        }),
        None => json!({
            "type": "command",
            "correlation_id": cmd.correlation_id,
            "device_id": cmd.device_id,
            "attribute": cmd.attribute,
            "value": cmd.value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::DatapointTarget;

    fn command(target: Option<DatapointTarget>) -> Command {
        Command {
            correlation_id: Some(3),
            device_id: "dimmer1".to_string(),
            attribute: "brightness".to_string(),
            value: AttributeValue::Int(40),
            target,
        }
    }

    #[test]
    fn test_decode_native_datapoint_frame() {
        // Arrange
        let frame = br#"{"type":"datapoint","data":{"id":"dp7","type":"brightness","values":[{"key":"brightness","value":"40"}]}}"#;

        // Act
        let msg = decode_message(frame).unwrap();

        // Assert
        assert_eq!(
            msg,
            ParsedMessage::Datapoint(DatapointUpdate {
                datapoint_id: "dp7".to_string(),
                datapoint_type: Some("brightness".to_string()),
                values: vec![DatapointValue {
                    key: "brightness".to_string(),
                    value: "40".to_string(),
                }],
            })
        );
    }

    #[test]
    fn test_decode_datapoint_coerces_numeric_id_and_value() {
        let frame = br#"{"type":"datapoint","data":{"id":12,"values":[{"key":"switch","value":1}]}}"#;

        let msg = decode_message(frame).unwrap();

        match msg {
            ParsedMessage::Datapoint(dp) => {
                assert_eq!(dp.datapoint_id, "12");
                assert_eq!(dp.datapoint_type, None);
                assert_eq!(dp.values[0].value, "1");
            }
            other => panic!("expected datapoint, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_device_state_update() {
        let frame = br#"{"type":"device_state_update","device_id":"dimmer1","class":"DimmerLight","attributes":{"brightness":40,"switch":true}}"#;

        let msg = decode_message(frame).unwrap();

        match msg {
            ParsedMessage::DeviceStateUpdate(update) => {
                assert_eq!(update.device_id, "dimmer1");
                assert_eq!(update.function_type.as_deref(), Some("DimmerLight"));
                assert_eq!(update.attributes["brightness"], AttributeValue::Int(40));
                assert_eq!(update.attributes["switch"], AttributeValue::Bool(true));
            }
            other => panic!("expected device_state_update, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_button_edge_without_timestamp() {
        let msg = decode_message(br#"{"type":"button_edge","button_id":"b1","edge":"release"}"#)
            .unwrap();

        assert_eq!(
            msg,
            ParsedMessage::ButtonEdgeEvent(ButtonEdgeEvent {
                button_id: "b1".to_string(),
                edge: Edge::Release,
                timestamp_ms: None,
            })
        );
    }

    #[test]
    fn test_decode_command_ack_error_keeps_code_and_message() {
        let frame =
            br#"{"type":"command_ack","correlation_id":9,"status":"error","code":404,"message":"no such datapoint"}"#;

        let msg = decode_message(frame).unwrap();

        assert_eq!(
            msg,
            ParsedMessage::CommandAck(CommandAck {
                correlation_id: 9,
                status: AckStatus::Error {
                    code: Some("404".to_string()),
                    message: "no such datapoint".to_string(),
                },
            })
        );
    }

    #[test]
    fn test_decode_auth_result_failure() {
        let msg =
            decode_message(br#"{"type":"auth_result","status":"error","message":"bad token"}"#)
                .unwrap();

        assert_eq!(
            msg,
            ParsedMessage::AuthResult(AuthResult {
                success: false,
                message: Some("bad token".to_string()),
            })
        );
    }

    #[test]
    fn test_decode_informational_frames_ignore_payload() {
        let msg = decode_message(br#"{"type":"version","data":"1.2.3"}"#).unwrap();
        assert_eq!(
            msg,
            ParsedMessage::Info {
                kind: "version".to_string()
            }
        );
    }

    #[test]
    fn test_decode_invalid_json_is_an_error_not_a_panic() {
        let err = decode_message(b"{not json").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidJson(_)));
    }

    #[test]
    fn test_decode_missing_type_field() {
        assert_eq!(
            decode_message(br#"{"device_id":"x"}"#).unwrap_err(),
            DecodeError::MissingType
        );
        assert_eq!(decode_message(b"[1,2]").unwrap_err(), DecodeError::MissingType);
    }

    #[test]
    fn test_decode_unknown_type() {
        assert_eq!(
            decode_message(br#"{"type":"firmware_update"}"#).unwrap_err(),
            DecodeError::UnknownType("firmware_update".to_string())
        );
    }

    #[test]
    fn test_decode_malformed_known_type_names_the_kind() {
        let err = decode_message(br#"{"type":"button_edge","button_id":"b1","edge":"wiggle"}"#)
            .unwrap_err();

        match err {
            DecodeError::Malformed { kind, .. } => assert_eq!(kind, "button_edge"),
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_function_list() {
        let body = br#"[{"id":"f1","label":"Desk","type":"Socket","datapoints":[
            {"id":"dp1","type":"switch","values":[{"key":"switch","value":"0"}]},
            {"id":"dp2","type":"quantity","values":[{"key":"quantity","value":"12.5"},{"key":"quantity_unit","value":"W"}]}]}]"#;

        let functions = decode_function_list(body).unwrap();

        assert_eq!(functions.len(), 1);
        assert_eq!(functions[0].function_type, "Socket");
        assert_eq!(functions[0].datapoints[1].values[1].value, "W");
    }

    #[test]
    fn test_decode_function_list_rejects_object_body() {
        let err = decode_function_list(br#"{"error":"unauthorized"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { .. }));
    }

    #[test]
    fn test_encode_command_with_target_uses_native_datapoint_frame() {
        // Arrange
        let cmd = command(Some(DatapointTarget {
            datapoint_id: "dp7".to_string(),
            datapoint_type: "brightness".to_string(),
        }));

        // Act
        let value: Value = serde_json::from_str(&encode_command(&cmd)).unwrap();

        // Assert
        assert_eq!(value["type"], "datapoint");
        assert_eq!(value["data"]["id"], "dp7");
        assert_eq!(value["data"]["values"][0]["key"], "brightness");
        assert_eq!(value["data"]["values"][0]["value"], "40");
    }

    #[test]
    fn test_encode_command_without_target_uses_logical_frame() {
        let value: Value = serde_json::from_str(&encode_command(&command(None))).unwrap();

        assert_eq!(value["type"], "command");
        assert_eq!(value["correlation_id"], 3);
        assert_eq!(value["device_id"], "dimmer1");
        assert_eq!(value["value"], 40);
    }

    #[test]
    fn test_encode_authenticate_carries_token() {
        let text = encode_message(&OutboundMessage::Authenticate {
            token: "t0k".to_string(),
        });
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["type"], "authenticate");
        assert_eq!(value["token"], "t0k");
    }
}
