//! Application message payloads.
//!
//! A [`Message`] is an unordered mapping from field names to typed
//! [`Field`] values. Supported value types are strings, signed 64-bit
//! integers, doubles, millisecond-precision timestamps, opaque byte
//! strings, nested messages, and homogeneous arrays of each. Boolean and
//! null values are not representable.
//!
//! On the wire, typed values use tagged JSON wrappers: `{"_d_": n}` for
//! doubles (with the strings `"NaN"`, `"Infinity"`, `"-Infinity"` for
//! non-finite values), `{"_m_": millis}` for timestamps, and
//! `{"_o_": base64}` for opaque bytes. Field names beginning with the
//! reserved `_eftl:` prefix carry delivery metadata and are stripped from
//! outbound encodings.

use std::collections::HashMap;
use std::fmt;

use base64::prelude::*;
use chrono::{DateTime, Utc};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub(crate) const HEADER_PREFIX: &str = "_eftl:";

pub(crate) const DELIVERY_COUNT_HEADER: &str = "_eftl:deliveryCount";
pub(crate) const STORE_MESSAGE_ID_HEADER: &str = "_eftl:storeMessageId";
pub(crate) const SEQUENCE_NUMBER_HEADER: &str = "_eftl:sequenceNumber";
pub(crate) const SUBSCRIPTION_ID_HEADER: &str = "_eftl:subscriptionId";
pub(crate) const REPLY_TO_HEADER: &str = "_eftl:replyTo";
pub(crate) const REQUEST_ID_HEADER: &str = "_eftl:requestId";

/// Message field name identifying the destination of a message.
///
/// Include this field in a published message to address a specific
/// destination, and in a subscription matcher to receive from one:
///
/// ```
/// use eftl::{FIELD_NAME_DESTINATION, Message};
///
/// let msg = Message::new()
///     .with(FIELD_NAME_DESTINATION, "sample")
///     .with("text", "hello");
/// assert_eq!(msg.string("text"), Some("hello"));
/// ```
pub const FIELD_NAME_DESTINATION: &str = "_dest";

/// A single typed message field value.
#[derive(Debug, Clone)]
pub enum Field {
    String(String),
    Long(i64),
    Double(f64),
    /// Millisecond-precision wall-clock timestamp.
    Timestamp(DateTime<Utc>),
    /// Opaque byte string, base64-encoded on the wire.
    Opaque(Vec<u8>),
    Message(Message),
    StringArray(Vec<String>),
    LongArray(Vec<i64>),
    DoubleArray(Vec<f64>),
    TimestampArray(Vec<DateTime<Utc>>),
    OpaqueArray(Vec<Vec<u8>>),
    MessageArray(Vec<Message>),
}

// NaN compares equal to NaN so that decoded messages compare equal to
// their sources.
fn double_eq(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        use Field::*;
        match (self, other) {
            (String(a), String(b)) => a == b,
            (Long(a), Long(b)) => a == b,
            (Double(a), Double(b)) => double_eq(*a, *b),
            (Timestamp(a), Timestamp(b)) => a == b,
            (Opaque(a), Opaque(b)) => a == b,
            (Message(a), Message(b)) => a == b,
            (StringArray(a), StringArray(b)) => a == b,
            (LongArray(a), LongArray(b)) => a == b,
            (DoubleArray(a), DoubleArray(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| double_eq(*x, *y))
            }
            (TimestampArray(a), TimestampArray(b)) => a == b,
            (OpaqueArray(a), OpaqueArray(b)) => a == b,
            (MessageArray(a), MessageArray(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::String(v) => write!(f, "\"{v}\""),
            Field::Long(v) => write!(f, "{v}"),
            Field::Double(v) => write!(f, "{v}"),
            Field::Timestamp(v) => write!(f, "{v}"),
            Field::Opaque(v) => write!(f, "[{} bytes]", v.len()),
            Field::Message(v) => write!(f, "{v}"),
            Field::StringArray(v) => write!(f, "{v:?}"),
            Field::LongArray(v) => write!(f, "{v:?}"),
            Field::DoubleArray(v) => write!(f, "{v:?}"),
            Field::TimestampArray(v) => {
                let s: Vec<String> = v.iter().map(|t| t.to_string()).collect();
                write!(f, "{s:?}")
            }
            Field::OpaqueArray(v) => write!(f, "[{} byte strings]", v.len()),
            Field::MessageArray(v) => {
                let s: Vec<String> = v.iter().map(|m| m.to_string()).collect();
                write!(f, "{s:?}")
            }
        }
    }
}

impl From<&str> for Field {
    fn from(v: &str) -> Self {
        Field::String(v.to_string())
    }
}

impl From<String> for Field {
    fn from(v: String) -> Self {
        Field::String(v)
    }
}

impl From<i64> for Field {
    fn from(v: i64) -> Self {
        Field::Long(v)
    }
}

impl From<i32> for Field {
    fn from(v: i32) -> Self {
        Field::Long(i64::from(v))
    }
}

impl From<f64> for Field {
    fn from(v: f64) -> Self {
        Field::Double(v)
    }
}

impl From<DateTime<Utc>> for Field {
    fn from(v: DateTime<Utc>) -> Self {
        Field::Timestamp(v)
    }
}

impl From<Vec<u8>> for Field {
    fn from(v: Vec<u8>) -> Self {
        Field::Opaque(v)
    }
}

impl From<&[u8]> for Field {
    fn from(v: &[u8]) -> Self {
        Field::Opaque(v.to_vec())
    }
}

impl From<Message> for Field {
    fn from(v: Message) -> Self {
        Field::Message(v)
    }
}

impl From<Vec<String>> for Field {
    fn from(v: Vec<String>) -> Self {
        Field::StringArray(v)
    }
}

impl From<Vec<i64>> for Field {
    fn from(v: Vec<i64>) -> Self {
        Field::LongArray(v)
    }
}

impl From<Vec<f64>> for Field {
    fn from(v: Vec<f64>) -> Self {
        Field::DoubleArray(v)
    }
}

impl From<Vec<DateTime<Utc>>> for Field {
    fn from(v: Vec<DateTime<Utc>>) -> Self {
        Field::TimestampArray(v)
    }
}

impl From<Vec<Vec<u8>>> for Field {
    fn from(v: Vec<Vec<u8>>) -> Self {
        Field::OpaqueArray(v)
    }
}

impl From<Vec<Message>> for Field {
    fn from(v: Vec<Message>) -> Self {
        Field::MessageArray(v)
    }
}

/// An application message: an unordered map of named, typed fields.
///
/// Messages are created by callers and passed by value into the library;
/// inbound messages are owned by the receiver once delivered to its sink.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    fields: HashMap<String, Field>,
}

impl Message {
    /// Creates an empty message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field, replacing any existing value under the same name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Field>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Builder-style [`set`](Self::set).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Field>) -> Self {
        self.set(name, value);
        self
    }

    /// Returns the field stored under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    /// Removes and returns the field stored under `name`.
    pub fn remove(&mut self, name: &str) -> Option<Field> {
        self.fields.remove(name)
    }

    /// Number of fields, reserved headers included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates over all fields in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Field)> {
        self.fields.iter()
    }

    /// Returns the string value of `name`, if present and a string.
    #[must_use]
    pub fn string(&self, name: &str) -> Option<&str> {
        match self.fields.get(name) {
            Some(Field::String(v)) => Some(v),
            _ => None,
        }
    }

    /// Returns the integer value of `name`, if present and an integer.
    #[must_use]
    pub fn long(&self, name: &str) -> Option<i64> {
        match self.fields.get(name) {
            Some(Field::Long(v)) => Some(*v),
            _ => None,
        }
    }

    /// Returns the double value of `name`, if present and a double.
    #[must_use]
    pub fn double(&self, name: &str) -> Option<f64> {
        match self.fields.get(name) {
            Some(Field::Double(v)) => Some(*v),
            _ => None,
        }
    }

    /// Returns the timestamp value of `name`, if present and a timestamp.
    #[must_use]
    pub fn timestamp(&self, name: &str) -> Option<DateTime<Utc>> {
        match self.fields.get(name) {
            Some(Field::Timestamp(v)) => Some(*v),
            _ => None,
        }
    }

    /// Returns the opaque byte value of `name`, if present and opaque.
    #[must_use]
    pub fn opaque(&self, name: &str) -> Option<&[u8]> {
        match self.fields.get(name) {
            Some(Field::Opaque(v)) => Some(v),
            _ => None,
        }
    }

    /// Returns the nested message under `name`, if present and a message.
    #[must_use]
    pub fn message(&self, name: &str) -> Option<&Message> {
        match self.fields.get(name) {
            Some(Field::Message(v)) => Some(v),
            _ => None,
        }
    }

    /// Unique store identifier assigned by the persistence service, or 0.
    #[must_use]
    pub fn store_message_id(&self) -> i64 {
        self.long(STORE_MESSAGE_ID_HEADER).unwrap_or(0)
    }

    /// Delivery count assigned by the persistence service, or 0.
    #[must_use]
    pub fn delivery_count(&self) -> i64 {
        self.long(DELIVERY_COUNT_HEADER).unwrap_or(0)
    }

    /// Encodes the message as a wire JSON object. Reserved-prefix headers
    /// are stripped.
    pub(crate) fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (name, field) in &self.fields {
            if name.starts_with(HEADER_PREFIX) {
                continue;
            }
            map.insert(name.clone(), field.to_json());
        }
        Value::Object(map)
    }

    /// Decodes a wire JSON object into a message. Values that cannot be
    /// represented (booleans, nulls, empty or mixed arrays) are dropped.
    pub(crate) fn from_json(value: &Value) -> Message {
        let mut msg = Message::new();
        if let Value::Object(map) = value {
            for (name, v) in map {
                if let Some(field) = Field::from_json(v) {
                    msg.fields.insert(name.clone(), field);
                }
            }
        }
        msg
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self
            .fields
            .keys()
            .filter(|k| !k.starts_with(HEADER_PREFIX))
            .collect();
        keys.sort();
        write!(f, "{{")?;
        for (i, key) in keys.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", key, self.fields[*key])?;
        }
        write!(f, "}}")
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Message::from_json(&value))
    }
}

fn double_to_json(v: f64) -> Value {
    if v.is_finite() {
        json!({ "_d_": v })
    } else if v.is_nan() {
        json!({ "_d_": "NaN" })
    } else if v > 0.0 {
        json!({ "_d_": "Infinity" })
    } else {
        json!({ "_d_": "-Infinity" })
    }
}

fn timestamp_to_json(v: DateTime<Utc>) -> Value {
    json!({ "_m_": v.timestamp_millis() })
}

fn opaque_to_json(v: &[u8]) -> Value {
    json!({ "_o_": BASE64_STANDARD.encode(v) })
}

// JSON numbers arrive as either integers or floats; integer semantics are
// widened at the read site.
pub(crate) fn number_as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        _ => None,
    }
}

impl Field {
    fn to_json(&self) -> Value {
        match self {
            Field::String(v) => Value::String(v.clone()),
            Field::Long(v) => json!(v),
            Field::Double(v) => double_to_json(*v),
            Field::Timestamp(v) => timestamp_to_json(*v),
            Field::Opaque(v) => opaque_to_json(v),
            Field::Message(v) => v.to_json(),
            Field::StringArray(v) => json!(v),
            Field::LongArray(v) => json!(v),
            Field::DoubleArray(v) => {
                Value::Array(v.iter().map(|d| double_to_json(*d)).collect())
            }
            Field::TimestampArray(v) => {
                Value::Array(v.iter().map(|t| timestamp_to_json(*t)).collect())
            }
            Field::OpaqueArray(v) => Value::Array(v.iter().map(|o| opaque_to_json(o)).collect()),
            Field::MessageArray(v) => Value::Array(v.iter().map(Message::to_json).collect()),
        }
    }

    fn from_json(value: &Value) -> Option<Field> {
        match value {
            Value::String(v) => Some(Field::String(v.clone())),
            Value::Number(_) => number_as_i64(value).map(Field::Long),
            Value::Object(map) => Some(Self::from_json_object(map)),
            Value::Array(items) => Self::from_json_array(items),
            _ => None,
        }
    }

    fn from_json_object(map: &serde_json::Map<String, Value>) -> Field {
        if let Some(Value::String(b64)) = map.get("_o_") {
            return Field::Opaque(BASE64_STANDARD.decode(b64).unwrap_or_default());
        }
        match map.get("_d_") {
            Some(Value::Number(n)) => {
                return Field::Double(n.as_f64().unwrap_or_default());
            }
            Some(Value::String(s)) => {
                return Field::Double(s.parse().unwrap_or_default());
            }
            _ => {}
        }
        if let Some(m) = map.get("_m_").and_then(number_as_i64) {
            return Field::Timestamp(DateTime::from_timestamp_millis(m).unwrap_or_default());
        }
        Field::Message(Message::from_json(&Value::Object(map.clone())))
    }

    // The first element decides the array's type, as the wire format is
    // homogeneous.
    fn from_json_array(items: &[Value]) -> Option<Field> {
        match items.first()? {
            Value::Number(_) => Some(Field::LongArray(
                items.iter().filter_map(number_as_i64).collect(),
            )),
            Value::String(_) => Some(Field::StringArray(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect(),
            )),
            Value::Object(first) => {
                if first.contains_key("_o_") {
                    Some(Field::OpaqueArray(
                        items
                            .iter()
                            .filter_map(|v| v.get("_o_")?.as_str())
                            .map(|b64| BASE64_STANDARD.decode(b64).unwrap_or_default())
                            .collect(),
                    ))
                } else if first.contains_key("_d_") {
                    Some(Field::DoubleArray(
                        items
                            .iter()
                            .filter_map(|v| match v.get("_d_")? {
                                Value::Number(n) => n.as_f64(),
                                Value::String(s) => s.parse().ok(),
                                _ => None,
                            })
                            .collect(),
                    ))
                } else if first.contains_key("_m_") {
                    Some(Field::TimestampArray(
                        items
                            .iter()
                            .filter_map(|v| v.get("_m_").and_then(number_as_i64))
                            .filter_map(DateTime::from_timestamp_millis)
                            .collect(),
                    ))
                } else {
                    Some(Field::MessageArray(
                        items.iter().map(Message::from_json).collect(),
                    ))
                }
            }
            _ => None,
        }
    }
}
