use super::*;
use crate::state::Position;

// =============================================================================
// CLIENT MESSAGE PARSING
// =============================================================================

#[test]
fn parses_identify_with_all_fields_defaulted() {
    let msg: ClientMessage = serde_json::from_str(r#"{"type":"identify"}"#).unwrap();
    let ClientMessage::Identify { persistent_id, is_display, suppress_presence, allow_mutations } = msg else {
        panic!("wrong variant");
    };
    assert_eq!(persistent_id, None);
    assert!(!is_display);
    assert!(!suppress_presence);
    assert!(!allow_mutations);
}

#[test]
fn parses_dotted_operation_tags() {
    let id = Uuid::new_v4();
    let json = format!(r#"{{"type":"battlemap.setActive","battlemapId":"{id}"}}"#);
    let msg: ClientMessage = serde_json::from_str(&json).unwrap();
    assert!(matches!(msg, ClientMessage::BattlemapSetActive { battlemap_id, .. } if battlemap_id == id));

    let json = format!(r#"{{"type":"battlemap.addFloor","battlemapId":"{id}","name":"Basement"}}"#);
    let msg: ClientMessage = serde_json::from_str(&json).unwrap();
    assert!(matches!(msg, ClientMessage::FloorAdd { name, .. } if name == "Basement"));
}

#[test]
fn request_id_is_optional_and_round_trips() {
    let rid = Uuid::new_v4();
    let json = format!(r#"{{"type":"battlemap.create","requestId":"{rid}","name":"Dungeon"}}"#);
    let msg: ClientMessage = serde_json::from_str(&json).unwrap();
    assert!(matches!(msg, ClientMessage::BattlemapCreate { request_id: Some(r), .. } if r == rid));

    let msg: ClientMessage = serde_json::from_str(r#"{"type":"battlemap.create","name":"Dungeon"}"#).unwrap();
    assert!(matches!(msg, ClientMessage::BattlemapCreate { request_id: None, .. }));
}

#[test]
fn unknown_type_tag_fails_to_parse() {
    let result = serde_json::from_str::<ClientMessage>(r#"{"type":"battlemap.explode"}"#);
    assert!(result.is_err());
}

#[test]
fn malformed_field_fails_instead_of_coercing() {
    let result = serde_json::from_str::<ClientMessage>(r#"{"type":"battlemap.get","battlemapId":"not-a-uuid"}"#);
    assert!(result.is_err());
}

#[test]
fn unknown_payload_fields_are_rejected() {
    let id = Uuid::new_v4();
    let json = format!(
        r#"{{"type":"battlemap.addCover","battlemapId":"{id}","cover":{{"x":1,"y":1,"width":2,"height":2,"rotation":45}}}}"#
    );
    assert!(serde_json::from_str::<ClientMessage>(&json).is_err());

    let cid = Uuid::new_v4();
    let json = format!(
        r#"{{"type":"battlemap.updateCover","battlemapId":"{id}","coverId":"{cid}","updates":{{"opacity":0.5}}}}"#
    );
    assert!(serde_json::from_str::<ClientMessage>(&json).is_err());

    let json = r#"{"type":"user.positionUpdate","position":{"x":1,"y":2,"z":3}}"#;
    assert!(serde_json::from_str::<ClientMessage>(json).is_err());
}

#[test]
fn cover_patch_accepts_partial_fields() {
    let id = Uuid::new_v4();
    let cid = Uuid::new_v4();
    let json = format!(
        r#"{{"type":"battlemap.updateCover","battlemapId":"{id}","coverId":"{cid}","updates":{{"x":12.5}}}}"#
    );
    let msg: ClientMessage = serde_json::from_str(&json).unwrap();
    let ClientMessage::CoverUpdate { updates, .. } = msg else {
        panic!("wrong variant");
    };
    assert_eq!(updates.x, Some(12.5));
    assert_eq!(updates.width, None);
    assert_eq!(updates.color, None);
}

// =============================================================================
// SERVER MESSAGE SHAPE
// =============================================================================

#[test]
fn ack_ok_omits_empty_fields_on_the_wire() {
    let rid = Uuid::new_v4();
    let json = serde_json::to_value(ServerMessage::ack_ok(Some(rid))).unwrap();
    assert_eq!(json["type"], "ack");
    assert_eq!(json["ok"], true);
    assert_eq!(json["requestId"], rid.to_string());
    assert!(json.get("error").is_none());
    assert!(json.get("id").is_none());
    assert!(json.get("battlemap").is_none());
}

#[test]
fn ack_error_carries_kebab_case_kind() {
    let json =
        serde_json::to_value(ServerMessage::ack_error(None, ErrorKind::InvalidInput, "bad")).unwrap();
    assert_eq!(json["ok"], false);
    assert_eq!(json["error"]["kind"], "invalid-input");
    assert_eq!(json["error"]["message"], "bad");
    assert!(json.get("requestId").is_none());
}

#[test]
fn error_kinds_serialize_kebab_case() {
    assert_eq!(serde_json::to_value(ErrorKind::NotFound).unwrap(), "not-found");
    assert_eq!(serde_json::to_value(ErrorKind::Forbidden).unwrap(), "forbidden");
    assert_eq!(serde_json::to_value(ErrorKind::Unsupported).unwrap(), "unsupported");
}

#[test]
fn user_moved_broadcast_uses_camel_case_fields() {
    let json = serde_json::to_value(ServerMessage::UserMoved {
        persistent_id: "alice".into(),
        position: Position { x: 30.0, y: 40.0 },
    })
    .unwrap();
    assert_eq!(json["type"], "user.moved");
    assert_eq!(json["persistentId"], "alice");
    assert_eq!(json["position"]["x"], 30.0);
}

#[test]
fn battlemap_active_reports_none_as_null() {
    let json = serde_json::to_value(ServerMessage::BattlemapActive { battlemap_id: None }).unwrap();
    assert_eq!(json["type"], "battlemap.active");
    assert!(json["battlemapId"].is_null());
}

#[test]
fn wire_kind_matches_serialized_tag() {
    let msg = ServerMessage::BattlemapList { battlemaps: Vec::new() };
    let json = serde_json::to_value(&msg).unwrap();
    assert_eq!(json["type"], msg.kind());
}
