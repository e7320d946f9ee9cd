use super::Value;
use std::fmt;
use std::sync::Arc;

/// Hashable form of a map key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    Nil,
    Bool(bool),
    Int(i64),
    /// Stored by bit pattern
    Float(u64),
    String(Arc<str>),
    Bytes(Arc<[u8]>),
}

impl MapKey {
    /// Converts a value into a key; containers and functions are not hashable
    pub fn from_value(value: &Value) -> Result<Self, String> {
        Ok(match value {
            Value::Nil | Value::Undefined => MapKey::Nil,
            Value::Bool(b) => MapKey::Bool(*b),
            Value::Int(i) => MapKey::Int(*i),
            Value::Float(x) => MapKey::Float(x.to_bits()),
            Value::String(s) => MapKey::String(s.clone()),
            Value::Bytes(b) => MapKey::Bytes(b.clone()),
            Value::Type(t) => MapKey::String(Arc::from(t.to_string())),
            other => return Err(format!("unhashable map key of type {}", other.type_name())),
        })
    }

    pub fn to_value(&self) -> Value {
        match self {
            MapKey::Nil => Value::Nil,
            MapKey::Bool(b) => Value::Bool(*b),
            MapKey::Int(i) => Value::Int(*i),
            MapKey::Float(bits) => Value::Float(f64::from_bits(*bits)),
            MapKey::String(s) => Value::String(s.clone()),
            MapKey::Bytes(b) => Value::Bytes(b.clone()),
        }
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.to_value().fmt(f)
    }
}

impl From<&str> for MapKey {
    fn from(s: &str) -> Self {
        MapKey::String(Arc::from(s))
    }
}
