use super::*;

#[test]
fn request_sets_fields() {
    let frame = Frame::request("scene:load", Data::new());
    assert_eq!(frame.syscall, "scene:load");
    assert_eq!(frame.status, Status::Request);
    assert!(frame.parent_id.is_none());
    assert!(frame.table_id.is_none());
    assert!(frame.ts > 0);
}

#[test]
fn reply_inherits_context() {
    let table_id = Uuid::new_v4();
    let req = Frame::request("token:place", Data::new()).with_table_id(table_id);
    let done = req.done_with(Data::new());

    assert_eq!(done.parent_id, Some(req.id));
    assert_eq!(done.table_id, Some(table_id));
    assert_eq!(done.syscall, "token:place");
    assert_eq!(done.status, Status::Done);
}

#[test]
fn prefix_and_op_extraction() {
    let frame = Frame::request("drag:move", Data::new());
    assert_eq!(frame.prefix(), "drag");
    assert_eq!(frame.op(), "move");

    let frame = Frame::request("noseparator", Data::new());
    assert_eq!(frame.prefix(), "noseparator");
    assert_eq!(frame.op(), "");
}

#[test]
fn inbound_frame_without_optional_fields_parses() {
    let id = Uuid::new_v4();
    let json = format!(r#"{{"id":"{id}","parent_id":null,"ts":1,"syscall":"presence:ping","status":"request"}}"#);
    let frame: Frame = serde_json::from_str(&json).expect("minimal frame should parse");
    assert_eq!(frame.id, id);
    assert!(frame.data.is_empty());
    assert!(frame.from.is_none());
}

#[test]
fn typed_field_accessors() {
    let token_id = Uuid::new_v4();
    let frame = Frame::request("drag:move", Data::new())
        .with_data("token_id", token_id.to_string())
        .with_data("x", 12.5)
        .with_data("amount", 7)
        .with_data("huge", i64::MAX)
        .with_data("name", "Goblin");

    assert_eq!(frame.uuid("token_id"), Some(token_id));
    assert_eq!(frame.f64("x"), Some(12.5));
    assert_eq!(frame.i32("amount"), Some(7));
    assert_eq!(frame.i32("huge"), None);
    assert_eq!(frame.str("name"), Some("Goblin"));
    assert_eq!(frame.uuid("name"), None);
}

#[test]
fn error_from_typed() {
    #[derive(Debug, thiserror::Error)]
    #[error("not found")]
    struct NotFound;

    impl ErrorCode for NotFound {
        fn error_code(&self) -> &'static str {
            "E_NOT_FOUND"
        }
    }

    let req = Frame::request("character:get", Data::new());
    let err = req.error_from(&NotFound);

    assert_eq!(err.status, Status::Error);
    assert_eq!(err.data.get("code").and_then(|v| v.as_str()), Some("E_NOT_FOUND"));
    assert_eq!(err.data.get("message").and_then(|v| v.as_str()), Some("not found"));
    assert_eq!(err.data.get("retryable").and_then(serde_json::Value::as_bool), Some(false));
}

#[test]
fn to_data_flattens_objects() {
    let data = to_data(&serde_json::json!({"a": 1, "b": "two"}));
    assert_eq!(data.get("a"), Some(&serde_json::json!(1)));
    assert_eq!(data.get("b"), Some(&serde_json::json!("two")));

    let wrapped = to_data(&vec![1, 2]);
    assert_eq!(wrapped.get("value"), Some(&serde_json::json!([1, 2])));
}
