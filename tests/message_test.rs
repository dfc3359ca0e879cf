//! Wire-codec tests for the tagged-value message encoding.

use chrono::DateTime;
use serde_json::json;

use eftl::{FIELD_NAME_DESTINATION, Field, Message};

fn round_trip(msg: &Message) -> Message {
    let value = serde_json::to_value(msg).expect("encode failed");
    serde_json::from_value(value).expect("decode failed")
}

#[test]
fn scalar_fields_round_trip() {
    let when = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
    let msg = Message::new()
        .with("text", "hello")
        .with("count", 42i64)
        .with("ratio", 1.5f64)
        .with("when", when)
        .with("blob", vec![0u8, 1, 2, 254, 255]);

    assert_eq!(round_trip(&msg), msg);
}

#[test]
fn non_finite_doubles_round_trip() {
    let msg = Message::new()
        .with("nan", f64::NAN)
        .with("inf", f64::INFINITY)
        .with("ninf", f64::NEG_INFINITY);

    let value = serde_json::to_value(&msg).unwrap();
    assert_eq!(value["nan"], json!({ "_d_": "NaN" }));
    assert_eq!(value["inf"], json!({ "_d_": "Infinity" }));
    assert_eq!(value["ninf"], json!({ "_d_": "-Infinity" }));

    assert_eq!(round_trip(&msg), msg);
}

#[test]
fn arrays_round_trip() {
    let times = vec![
        DateTime::from_timestamp_millis(1_000).unwrap(),
        DateTime::from_timestamp_millis(2_000).unwrap(),
    ];
    let msg = Message::new()
        .with("strings", vec!["a".to_string(), "b".to_string()])
        .with("longs", vec![1i64, -2, 3])
        .with("doubles", vec![0.5f64, f64::NAN])
        .with("times", times)
        .with("blobs", vec![vec![1u8, 2], vec![3u8]]);

    assert_eq!(round_trip(&msg), msg);
}

#[test]
fn nested_messages_round_trip() {
    let inner = Message::new().with("n", 1i64);
    let msg = Message::new()
        .with("child", inner.clone())
        .with("children", vec![inner.clone(), Message::new().with("n", 2i64)]);

    assert_eq!(round_trip(&msg), msg);
}

#[test]
fn tagged_wrappers_take_expected_shapes() {
    let when = DateTime::from_timestamp_millis(86_400_000).unwrap();
    let msg = Message::new()
        .with("ratio", 2.25f64)
        .with("when", when)
        .with("blob", vec![104u8, 105]);

    let value = serde_json::to_value(&msg).unwrap();
    assert_eq!(value["ratio"], json!({ "_d_": 2.25 }));
    assert_eq!(value["when"], json!({ "_m_": 86_400_000 }));
    assert_eq!(value["blob"], json!({ "_o_": "aGk=" }));
}

#[test]
fn reserved_headers_are_stripped_on_encode() {
    let msg = Message::new()
        .with("text", "hello")
        .with("_eftl:sequenceNumber", 9i64)
        .with("_eftl:subscriptionId", "1");

    let value = serde_json::to_value(&msg).unwrap();
    assert_eq!(value, json!({ "text": "hello" }));
}

#[test]
fn destination_field_is_not_reserved() {
    let msg = Message::new().with(FIELD_NAME_DESTINATION, "sample");
    let value = serde_json::to_value(&msg).unwrap();
    assert_eq!(value, json!({ "_dest": "sample" }));
}

#[test]
fn bare_numbers_decode_as_longs() {
    // servers may emit integers as JSON floats
    let msg: Message = serde_json::from_value(json!({ "a": 3, "b": 3.0 })).unwrap();
    assert_eq!(msg.long("a"), Some(3));
    assert_eq!(msg.long("b"), Some(3));
}

#[test]
fn unrepresentable_values_are_dropped_on_decode() {
    let msg: Message =
        serde_json::from_value(json!({ "flag": true, "nothing": null, "empty": [], "ok": "v" }))
            .unwrap();
    assert_eq!(msg.len(), 1);
    assert_eq!(msg.string("ok"), Some("v"));
}

#[test]
fn typed_accessors_reject_other_types() {
    let msg = Message::new().with("n", 1i64);
    assert_eq!(msg.long("n"), Some(1));
    assert_eq!(msg.string("n"), None);
    assert_eq!(msg.double("n"), None);
    assert!(matches!(msg.get("n"), Some(Field::Long(1))));
    assert!(msg.get("missing").is_none());
}

#[test]
fn metadata_accessors_default_to_zero() {
    let msg = Message::new();
    assert_eq!(msg.store_message_id(), 0);
    assert_eq!(msg.delivery_count(), 0);

    let msg = Message::new()
        .with("_eftl:storeMessageId", 7i64)
        .with("_eftl:deliveryCount", 3i64);
    assert_eq!(msg.store_message_id(), 7);
    assert_eq!(msg.delivery_count(), 3);
}

#[test]
fn display_sorts_keys_and_hides_headers() {
    let msg = Message::new()
        .with("b", 2i64)
        .with("a", "x")
        .with("_eftl:sequenceNumber", 5i64);
    assert_eq!(msg.to_string(), "{a=\"x\", b=2}");
}
