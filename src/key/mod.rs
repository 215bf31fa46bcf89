//! Indexable key values
//!
//! `IndexKey` is the closed set of values an indexed expression can yield.
//! Keys are stored in the mapping store in a canonical, type-preserving
//! binary form (see [`codec`]) and ordered only against keys of the same
//! type (see [`compare`]).

mod codec;
mod compare;
mod errors;

use chrono::{DateTime, Utc};

pub use compare::compare;
pub use errors::{KeyError, KeyResult};

/// A single indexed value.
///
/// `Null` is accepted as input but never indexed: rows with a null value
/// for an expression set no bit for it.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexKey {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    Float64(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Bytes(Vec<u8>),
    /// Heterogeneous ordered sequence of keys
    List(Vec<IndexKey>),
}

impl IndexKey {
    /// Name of the underlying type, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            IndexKey::Null => "null",
            IndexKey::Bool(_) => "bool",
            IndexKey::Int32(_) => "int32",
            IndexKey::Int64(_) => "int64",
            IndexKey::UInt32(_) => "uint32",
            IndexKey::UInt64(_) => "uint64",
            IndexKey::Float64(_) => "float64",
            IndexKey::String(_) => "string",
            IndexKey::Timestamp(_) => "timestamp",
            IndexKey::Bytes(_) => "bytes",
            IndexKey::List(_) => "list",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, IndexKey::Null)
    }

    /// Canonical binary encoding
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        codec::encode_into(self, &mut buf);
        buf
    }

    /// Decodes a key written by [`IndexKey::encode`]
    pub fn decode(bytes: &[u8]) -> KeyResult<Self> {
        codec::decode(bytes)
    }

    /// Decodes a key that must have the same type as `like`.
    ///
    /// A stored key of another type is a `TypeMismatch`, never coerced.
    pub fn decode_as(bytes: &[u8], like: &IndexKey) -> KeyResult<Self> {
        let key = codec::decode(bytes)?;
        if std::mem::discriminant(&key) != std::mem::discriminant(like) {
            return Err(KeyError::TypeMismatch {
                left: key.type_name(),
                right: like.type_name(),
            });
        }
        Ok(key)
    }

    /// Create a key from a JSON value.
    ///
    /// Integers map to `Int64` (or `UInt64` above `i64::MAX`), other numbers
    /// to `Float64`, arrays to `List`. Objects are not indexable.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(IndexKey::Null),
            serde_json::Value::Bool(b) => Some(IndexKey::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(IndexKey::Int64(i))
                } else if let Some(u) = n.as_u64() {
                    Some(IndexKey::UInt64(u))
                } else {
                    n.as_f64().map(IndexKey::Float64)
                }
            }
            serde_json::Value::String(s) => Some(IndexKey::String(s.clone())),
            serde_json::Value::Array(items) => items
                .iter()
                .map(IndexKey::from_json)
                .collect::<Option<Vec<_>>>()
                .map(IndexKey::List),
            serde_json::Value::Object(_) => None,
        }
    }
}

impl From<bool> for IndexKey {
    fn from(v: bool) -> Self {
        IndexKey::Bool(v)
    }
}

impl From<i32> for IndexKey {
    fn from(v: i32) -> Self {
        IndexKey::Int32(v)
    }
}

impl From<i64> for IndexKey {
    fn from(v: i64) -> Self {
        IndexKey::Int64(v)
    }
}

impl From<u32> for IndexKey {
    fn from(v: u32) -> Self {
        IndexKey::UInt32(v)
    }
}

impl From<u64> for IndexKey {
    fn from(v: u64) -> Self {
        IndexKey::UInt64(v)
    }
}

impl From<f64> for IndexKey {
    fn from(v: f64) -> Self {
        IndexKey::Float64(v)
    }
}

impl From<&str> for IndexKey {
    fn from(v: &str) -> Self {
        IndexKey::String(v.to_string())
    }
}

impl From<String> for IndexKey {
    fn from(v: String) -> Self {
        IndexKey::String(v)
    }
}

impl From<Vec<u8>> for IndexKey {
    fn from(v: Vec<u8>) -> Self {
        IndexKey::Bytes(v)
    }
}

impl From<DateTime<Utc>> for IndexKey {
    fn from(v: DateTime<Utc>) -> Self {
        IndexKey::Timestamp(v)
    }
}

impl From<Vec<IndexKey>> for IndexKey {
    fn from(v: Vec<IndexKey>) -> Self {
        IndexKey::List(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_decode_roundtrip_all_types() {
        let keys = vec![
            IndexKey::from("foo"),
            IndexKey::from(1i32),
            IndexKey::from(1i64),
            IndexKey::from(1u32),
            IndexKey::from(1u64),
            IndexKey::from(1.5f64),
            IndexKey::from(true),
            IndexKey::from(Utc.with_ymd_and_hms(2018, 8, 1, 1, 1, 1).unwrap()),
            IndexKey::from(b"foo".to_vec()),
            IndexKey::List(vec![
                IndexKey::Int64(1),
                IndexKey::from("three"),
                IndexKey::Float64(3.0),
                IndexKey::Bool(false),
            ]),
        ];

        for key in keys {
            let decoded = IndexKey::decode_as(&key.encode(), &key).unwrap();
            assert_eq!(decoded, key, "roundtrip of {}", key.type_name());
        }
    }

    #[test]
    fn test_decode_as_rejects_other_type() {
        let encoded = IndexKey::Int64(7).encode();
        let err = IndexKey::decode_as(&encoded, &IndexKey::Int32(0)).unwrap_err();
        assert_eq!(
            err,
            KeyError::TypeMismatch {
                left: "int64",
                right: "int32"
            }
        );
    }

    #[test]
    fn test_same_value_different_type_encodes_differently() {
        assert_ne!(IndexKey::Int32(1).encode(), IndexKey::Int64(1).encode());
        assert_ne!(IndexKey::from("1").encode(), IndexKey::Bytes(b"1".to_vec()).encode());
    }

    #[test]
    fn test_from_json() {
        assert_eq!(IndexKey::from_json(&serde_json::json!(true)), Some(IndexKey::Bool(true)));
        assert_eq!(IndexKey::from_json(&serde_json::json!(42)), Some(IndexKey::Int64(42)));
        assert_eq!(
            IndexKey::from_json(&serde_json::json!(u64::MAX)),
            Some(IndexKey::UInt64(u64::MAX))
        );
        assert_eq!(
            IndexKey::from_json(&serde_json::json!([1, "a"])),
            Some(IndexKey::List(vec![IndexKey::Int64(1), IndexKey::from("a")]))
        );
        assert_eq!(IndexKey::from_json(&serde_json::json!({"a": 1})), None);
    }
}
