//! Integration tests for the junghome-core decode → registry → gesture path.
//!
//! These tests feed raw gateway JSON through the public API exactly as the
//! session task does: decode a frame, resolve native datapoints against the
//! registry, then apply the state update or drive the gesture engine.

use std::time::{Duration, Instant};

use junghome_core::domain::gesture::{Gesture, GestureConfig, GestureEffect, GestureEngine};
use junghome_core::domain::registry::{DeviceEvent, DeviceRegistry, ResolvedDatapoint};
use junghome_core::protocol::{decode_function_list, decode_message, ParsedMessage};
use junghome_core::AttributeValue;

const FUNCTIONS: &[u8] = br#"[
  {"id":"light1","label":"Living room","type":"ColorLight","datapoints":[
    {"id":"dp-sw","type":"switch","values":[{"key":"switch","value":"0"}]},
    {"id":"dp-br","type":"brightness","values":[{"key":"brightness","value":"0"}]},
    {"id":"dp-ct","type":"color_temperature","values":[{"key":"color_temperature","value":"3000"}]}]},
  {"id":"panel1","label":"Hall panel","type":"RockerSwitch","datapoints":[
    {"id":"dp-up","type":"up_request","values":[{"key":"up_request","value":"0"}]},
    {"id":"dp-led","type":"status_led","values":[{"key":"status_led","value":"1"}]}]},
  {"id":"heat1","label":"Heating","type":"Thermostat","datapoints":[]}
]"#;

fn loaded_registry() -> DeviceRegistry {
    let functions = decode_function_list(FUNCTIONS).expect("function list must decode");
    let mut registry = DeviceRegistry::new(None);
    registry.replace_all(&functions, Instant::now());
    registry
}

fn resolve(registry: &DeviceRegistry, frame: &str) -> ResolvedDatapoint {
    match decode_message(frame.as_bytes()).expect("frame must decode") {
        ParsedMessage::Datapoint(dp) => registry
            .resolve_datapoint(&dp)
            .expect("datapoint must resolve"),
        other => panic!("expected datapoint frame, got {other:?}"),
    }
}

#[test]
fn test_snapshot_skips_unsupported_function_types() {
    let registry = loaded_registry();

    assert_eq!(registry.len(), 2);
    assert!(registry.get("heat1").is_err());
}

#[test]
fn test_brightness_push_updates_light_once() {
    // Arrange
    let mut registry = loaded_registry();
    let frame = r#"{"type":"datapoint","data":{"id":"dp-br","values":[{"key":"brightness","value":"40"}]}}"#;

    // Act
    let ResolvedDatapoint::State(update) = resolve(&registry, frame) else {
        panic!("brightness must resolve to a state update");
    };
    let first = registry.apply(&update, Instant::now());
    let second = registry.apply(&update, Instant::now());

    // Assert
    assert!(matches!(first, Some(DeviceEvent::Changed { created: false, .. })));
    assert!(second.is_none());
    assert_eq!(
        registry.get("light1").unwrap().attribute("brightness"),
        Some(&AttributeValue::Int(40))
    );
}

#[test]
fn test_rocker_pushes_drive_gesture_engine_to_single_click() {
    // Arrange
    let registry = loaded_registry();
    let mut engine = GestureEngine::new(GestureConfig::default());
    let start = Instant::now();
    let press = r#"{"type":"datapoint","data":{"id":"dp-up","values":[{"key":"up_request","value":"1"}]}}"#;
    let release = r#"{"type":"datapoint","data":{"id":"dp-up","values":[{"key":"up_request","value":"0"}]}}"#;

    // Act
    let mut armed = None;
    for (frame, ms) in [(press, 0), (release, 80)] {
        let ResolvedDatapoint::Edge(edge) = resolve(&registry, frame) else {
            panic!("request datapoint must resolve to an edge");
        };
        for effect in engine.handle_edge(&edge.button_id, edge.edge, start + Duration::from_millis(ms)) {
            if let GestureEffect::ArmTimer { token, .. } = effect {
                armed = Some(token);
            }
        }
    }
    let token = armed.expect("inter-click timer must be armed");
    let effects = engine.on_timer(&token, start + Duration::from_millis(480));

    // Assert
    assert_eq!(effects.len(), 1);
    match &effects[0] {
        GestureEffect::Emit(event) => {
            assert_eq!(event.button_id, "panel1:up");
            assert_eq!(event.gesture, Gesture::Single);
        }
        other => panic!("expected emit, got {other:?}"),
    }
}

#[test]
fn test_color_light_command_targets_native_datapoint() {
    let registry = loaded_registry();

    let cmd = registry
        .prepare_command("light1", "color", &AttributeValue::Int(2700))
        .unwrap();
    let text = junghome_core::protocol::encode_command(&cmd);

    assert!(text.contains(r#""id":"dp-ct""#));
    assert!(text.contains(r#""value":"2700""#));
}
