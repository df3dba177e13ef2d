//! # Result Values
//!
//! Purpose: The higher-level result tree a session hands back, plus the
//! optional byte-decoding passes applied to it.
//!
//! ## Design Principles
//! 1. **Errors Inline**: A per-command server error is a `Value::Error`
//!    slot; the rest of the batch is still reported.
//! 2. **Opt-In Decoding**: Bulk payloads stay raw bytes unless the caller
//!    asks for text or JSON decoding.

use bytes::Bytes;
use serde_json::Value as Json;

use redwire_common::{Reply, ServerError};

/// Result of one command after its handler ran.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null bulk string, null array, or an aborted transaction.
    Nil,
    /// Status line such as "OK".
    Status(String),
    /// Server error reply for this command.
    Error(ServerError),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Raw bulk payload.
    Bytes(Bytes),
    /// Decoded text.
    Text(String),
    /// Decoded JSON document.
    Json(Json),
    List(Vec<Value>),
    /// Field/value pairs in server order.
    Map(Vec<(String, Value)>),
}

impl Value {
    /// True for `Nil`.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Falsy values: nil, false, zero, and empty strings or collections.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(value) => *value,
            Value::Int(value) => *value != 0,
            Value::Float(value) => *value != 0.0,
            Value::Bytes(data) => !data.is_empty(),
            Value::Text(text) | Value::Status(text) => !text.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(pairs) => !pairs.is_empty(),
            Value::Error(_) | Value::Json(_) => true,
        }
    }

    /// Surfaces a server error slot as `Err`.
    pub fn into_result(self) -> Result<Value, ServerError> {
        match self {
            Value::Error(err) => Err(err),
            other => Ok(other),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(data) => Some(data),
            Value::Text(text) | Value::Status(text) => Some(text.as_bytes()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Looks up a field of a `Map` value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        match self {
            Value::Map(pairs) => pairs.iter().find(|(key, _)| key == field).map(|(_, v)| v),
            _ => None,
        }
    }
}

impl From<Reply> for Value {
    fn from(reply: Reply) -> Self {
        match reply {
            Reply::Status(text) => Value::Status(text),
            Reply::Error(err) => Value::Error(err),
            Reply::Integer(value) => Value::Int(value),
            Reply::Bulk(Some(data)) => Value::Bytes(data),
            Reply::Bulk(None) | Reply::NullArray => Value::Nil,
            Reply::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
        }
    }
}

impl From<Value> for Json {
    fn from(value: Value) -> Self {
        match value {
            Value::Nil => Json::Null,
            Value::Status(text) | Value::Text(text) => Json::String(text),
            Value::Error(err) => serde_json::json!({ "error": err.message() }),
            Value::Int(value) => Json::from(value),
            Value::Float(value) => Json::from(value),
            Value::Bool(value) => Json::Bool(value),
            Value::Bytes(data) => Json::String(String::from_utf8_lossy(&data).into_owned()),
            Value::Json(doc) => doc,
            Value::List(items) => Json::Array(items.into_iter().map(Json::from).collect()),
            Value::Map(pairs) => Json::Object(
                pairs
                    .into_iter()
                    .map(|(key, value)| (key, Json::from(value)))
                    .collect(),
            ),
        }
    }
}

/// How bulk payloads are decoded before results reach the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Decoding {
    /// Keep raw bytes.
    #[default]
    Raw,
    /// Valid UTF-8 becomes `Text`; anything else stays bytes.
    Str,
    /// Like `Str`, then text that parses as JSON becomes `Json`.
    Auto,
}

impl Decoding {
    /// Applies the decoding to every byte payload in the tree.
    pub fn apply(self, value: Value) -> Value {
        match (self, value) {
            (Decoding::Raw, value) => value,
            (mode, Value::Bytes(data)) => mode.decode_bytes(data),
            (mode, Value::List(items)) => {
                Value::List(items.into_iter().map(|item| mode.apply(item)).collect())
            }
            (mode, Value::Map(pairs)) => Value::Map(
                pairs
                    .into_iter()
                    .map(|(key, value)| (key, mode.apply(value)))
                    .collect(),
            ),
            (_, value) => value,
        }
    }

    fn decode_bytes(self, data: Bytes) -> Value {
        let text = match std::str::from_utf8(&data) {
            Ok(text) => text,
            Err(_) => return Value::Bytes(data),
        };
        if self == Decoding::Auto {
            if let Ok(doc) = serde_json::from_str::<Json>(text) {
                return Value::Json(doc);
            }
        }
        Value::Text(text.to_owned())
    }
}

/// Renders a bulk key or field name as text, replacing invalid UTF-8.
pub(crate) fn key_text(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_conversion_keeps_errors_inline() {
        let reply = Reply::Array(vec![
            Reply::Integer(1),
            Reply::Error(ServerError::new("ERR no")),
            Reply::Bulk(None),
            Reply::NullArray,
        ]);
        let value = Value::from(reply);
        assert_eq!(
            value,
            Value::List(vec![
                Value::Int(1),
                Value::Error(ServerError::new("ERR no")),
                Value::Nil,
                Value::Nil,
            ])
        );
    }

    #[test]
    fn str_decoding_leaves_invalid_utf8_as_bytes() {
        let value = Value::List(vec![
            Value::Bytes(Bytes::from_static(b"hello")),
            Value::Bytes(Bytes::from_static(&[0xff, 0x00])),
        ]);
        assert_eq!(
            Decoding::Str.apply(value),
            Value::List(vec![
                Value::Text("hello".into()),
                Value::Bytes(Bytes::from_static(&[0xff, 0x00])),
            ])
        );
    }

    #[test]
    fn auto_decoding_parses_json_and_falls_back_to_text() {
        assert_eq!(
            Decoding::Auto.apply(Value::Bytes(Bytes::from_static(b"{\"a\":1}"))),
            Value::Json(serde_json::json!({"a": 1}))
        );
        assert_eq!(
            Decoding::Auto.apply(Value::Bytes(Bytes::from_static(b"42"))),
            Value::Json(serde_json::json!(42))
        );
        assert_eq!(
            Decoding::Auto.apply(Value::Bytes(Bytes::from_static(b"plain words"))),
            Value::Text("plain words".into())
        );
    }

    #[test]
    fn nil_and_empty_are_falsy() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::List(Vec::new()).is_truthy());
        assert!(Value::List(vec![Value::Int(0)]).is_truthy());
        assert!(!Value::Bool(false).is_truthy());
    }

    #[test]
    fn map_values_convert_to_json_objects() {
        let value = Value::Map(vec![("a".into(), Value::Int(1))]);
        assert_eq!(Json::from(value), serde_json::json!({"a": 1}));
    }
}
