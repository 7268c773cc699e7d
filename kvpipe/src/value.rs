//! # Reply Values
//!
//! Purpose: Represent one backend reply independent of the wire protocol that
//! produced it.
//!
//! ## Design Principles
//! 1. **Binary-Safe**: Bulk replies stay raw bytes (`Bytes`), never assumed UTF-8.
//! 2. **Errors Are Values**: A per-command error reply is data for its future,
//!    not a failure of the whole batch.
//! 3. **Cheap Clones**: Nested pipelines copy replies between futures, so bulk
//!    data is reference-counted.

use std::fmt;

use bytes::Bytes;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::error::{PipeError, PipeResult};

/// One reply from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Missing key or null bulk reply.
    Nil,
    /// Integer reply.
    Int(i64),
    /// Bulk data reply.
    Data(Bytes),
    /// Status reply such as `OK` or `PONG`.
    Status(String),
    /// Error reply for this command only.
    Error(String),
    /// Multi-bulk reply.
    Array(Vec<Value>),
}

impl Value {
    /// Short name of the variant, used in conversion errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Int(_) => "integer",
            Value::Data(_) => "data",
            Value::Status(_) => "status",
            Value::Error(_) => "error",
            Value::Array(_) => "array",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// Truthiness: nil, zero, empty data and empty arrays are false.
    ///
    /// Error replies are always false; status replies are always true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil | Value::Error(_) => false,
            Value::Int(v) => *v != 0,
            Value::Data(data) => !data.is_empty(),
            Value::Status(_) => true,
            Value::Array(items) => !items.is_empty(),
        }
    }

    /// Integer view. Bulk data holding an ASCII integer also converts.
    pub fn as_int(&self) -> PipeResult<i64> {
        match self {
            Value::Int(v) => Ok(*v),
            Value::Data(data) => std::str::from_utf8(data)
                .ok()
                .and_then(|text| text.parse().ok())
                .ok_or(PipeError::UnexpectedValue {
                    expected: "integer",
                    found: "data",
                }),
            other => Err(PipeError::UnexpectedValue {
                expected: "integer",
                found: other.kind(),
            }),
        }
    }

    /// Raw bytes of a data or status reply.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Data(data) => Some(data),
            Value::Status(text) => Some(text.as_bytes()),
            _ => None,
        }
    }

    /// Items of an array reply. Nil converts to an empty list.
    pub fn as_array(&self) -> PipeResult<&[Value]> {
        match self {
            Value::Array(items) => Ok(items),
            Value::Nil => Ok(&[]),
            other => Err(PipeError::UnexpectedValue {
                expected: "array",
                found: other.kind(),
            }),
        }
    }

    /// Length of the reply: items for arrays, bytes for data and status.
    pub fn len(&self) -> PipeResult<usize> {
        match self {
            Value::Array(items) => Ok(items.len()),
            Value::Data(data) => Ok(data.len()),
            Value::Status(text) => Ok(text.len()),
            Value::Nil => Ok(0),
            other => Err(PipeError::UnexpectedValue {
                expected: "sized value",
                found: other.kind(),
            }),
        }
    }

    pub fn is_empty(&self) -> PipeResult<bool> {
        self.len().map(|len| len == 0)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Data(data) => write!(f, "{}", String::from_utf8_lossy(data)),
            Value::Status(text) => write!(f, "{}", text),
            Value::Error(message) => write!(f, "error: {}", message),
            Value::Array(items) => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Data(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Data(Bytes::copy_from_slice(value))
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Value::Data(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Nil, Into::into)
    }
}

impl PartialEq<i64> for Value {
    fn eq(&self, other: &i64) -> bool {
        matches!(self, Value::Int(v) if v == other)
    }
}

impl PartialEq<&str> for Value {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == Some(other.as_bytes())
    }
}

// Data serializes as a string when it is valid UTF-8, otherwise as raw bytes.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Nil => serializer.serialize_none(),
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::Data(data) => match std::str::from_utf8(data) {
                Ok(text) => serializer.serialize_str(text),
                Err(_) => serializer.serialize_bytes(data),
            },
            Value::Status(text) => serializer.serialize_str(text),
            Value::Error(message) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("error", message)?;
                map.end()
            }
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_follows_contents() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Int(3).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(Value::Status("OK".into()).is_truthy());
        assert!(!Value::Error("ERR".into()).is_truthy());
        assert!(!Value::Array(Vec::new()).is_truthy());
    }

    #[test]
    fn integer_conversion_accepts_ascii_data() {
        assert_eq!(Value::from("42").as_int().unwrap(), 42);
        assert!(matches!(
            Value::from("nope").as_int(),
            Err(PipeError::UnexpectedValue { expected: "integer", .. })
        ));
        assert!(matches!(
            Value::Nil.as_int(),
            Err(PipeError::UnexpectedValue { found: "nil", .. })
        ));
    }

    #[test]
    fn displays_nested_arrays() {
        let value = Value::Array(vec![Value::from("a"), Value::Int(2), Value::Nil]);
        assert_eq!(value.to_string(), "[a, 2, nil]");
    }

    #[test]
    fn serializes_to_json() {
        let value = Value::Array(vec![
            Value::from("bar"),
            Value::Int(7),
            Value::Nil,
            Value::Error("ERR bad".into()),
        ]);
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"["bar",7,null,{"error":"ERR bad"}]"#);
    }

    #[test]
    fn compares_with_plain_values() {
        assert_eq!(Value::Int(5), 5);
        assert_eq!(Value::from("bar"), "bar");
        assert_eq!(Value::Status("OK".into()), "OK");
    }
}
