//! Conversions between script values and host types

use super::{MapKey, Value};
use crate::error::{VmError, VmResult};
use crate::native::NativeCall;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Converts host values into script values
pub trait IntoValue {
    fn into_value(self) -> VmResult<Value>;
}

/// Converts script values into host values
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> VmResult<Self>;
}

fn mismatch(expected: &str, got: &Value) -> VmError {
    VmError::panic(format!("expected {}, got {}", expected, got.type_name()))
}

impl IntoValue for Value {
    fn into_value(self) -> VmResult<Value> {
        Ok(self)
    }
}

impl IntoValue for () {
    fn into_value(self) -> VmResult<Value> {
        Ok(Value::Undefined)
    }
}

impl IntoValue for bool {
    fn into_value(self) -> VmResult<Value> {
        Ok(Value::Bool(self))
    }
}

impl IntoValue for i32 {
    fn into_value(self) -> VmResult<Value> {
        Ok(Value::Int(self as i64))
    }
}

impl IntoValue for i64 {
    fn into_value(self) -> VmResult<Value> {
        Ok(Value::Int(self))
    }
}

impl IntoValue for usize {
    fn into_value(self) -> VmResult<Value> {
        i64::try_from(self)
            .map(Value::Int)
            .map_err(|_| VmError::panic("integer overflow"))
    }
}

impl IntoValue for f64 {
    fn into_value(self) -> VmResult<Value> {
        Ok(Value::Float(self))
    }
}

impl IntoValue for String {
    fn into_value(self) -> VmResult<Value> {
        Ok(Value::from(self))
    }
}

impl IntoValue for &str {
    fn into_value(self) -> VmResult<Value> {
        Ok(Value::string(self))
    }
}

impl IntoValue for &[u8] {
    fn into_value(self) -> VmResult<Value> {
        Ok(Value::bytes(self))
    }
}

impl<T: IntoValue> IntoValue for Vec<T> {
    fn into_value(self) -> VmResult<Value> {
        let items = self
            .into_iter()
            .map(IntoValue::into_value)
            .collect::<VmResult<Vec<_>>>()?;
        Ok(Value::slice(items))
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> VmResult<Value> {
        match self {
            Some(v) => v.into_value(),
            None => Ok(Value::Nil),
        }
    }
}

impl<V: IntoValue> IntoValue for FxHashMap<String, V> {
    fn into_value(self) -> VmResult<Value> {
        let mut entries = FxHashMap::default();
        for (k, v) in self {
            entries.insert(MapKey::String(Arc::from(k)), v.into_value()?);
        }
        Ok(Value::map(entries))
    }
}

impl<T: IntoValue, E: std::fmt::Display> IntoValue for Result<T, E> {
    fn into_value(self) -> VmResult<Value> {
        match self {
            Ok(v) => v.into_value(),
            Err(e) => Err(VmError::panic(e.to_string())),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> VmResult<Self> {
        Ok(value.clone())
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> VmResult<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Nil | Value::Undefined => Ok(false),
            other => Err(mismatch("bool", other)),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> VmResult<Self> {
        match value {
            Value::Int(i) => Ok(*i),
            Value::Float(x) => Ok(*x as i64),
            other => Err(mismatch("int", other)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> VmResult<Self> {
        let wide = i64::from_value(value)?;
        i32::try_from(wide).map_err(|_| VmError::panic(format!("{} overflows int32", wide)))
    }
}

impl FromValue for usize {
    fn from_value(value: &Value) -> VmResult<Self> {
        let wide = i64::from_value(value)?;
        usize::try_from(wide).map_err(|_| VmError::panic(format!("{} is not a valid size", wide)))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> VmResult<Self> {
        value.as_float().ok_or_else(|| mismatch("float", value))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> VmResult<Self> {
        match value {
            Value::String(s) => Ok(s.to_string()),
            Value::Bytes(b) => Ok(String::from_utf8_lossy(b).into_owned()),
            other => Err(mismatch("string", other)),
        }
    }
}

impl FromValue for Arc<[u8]> {
    fn from_value(value: &Value) -> VmResult<Self> {
        match value {
            Value::Bytes(b) => Ok(b.clone()),
            Value::String(s) => Ok(Arc::from(s.as_bytes())),
            other => Err(mismatch("bytes", other)),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> VmResult<Self> {
        match value {
            Value::Slice(items) => items.read().iter().map(T::from_value).collect(),
            other => Err(mismatch("slice", other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> VmResult<Self> {
        match value {
            Value::Nil | Value::Undefined => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// Converts a single argument
pub fn from_value<T: FromValue>(value: &Value) -> VmResult<T> {
    T::from_value(value)
}

/// A script function handed to native code so it can call back into the VM
#[derive(Debug, Clone)]
pub struct ScriptFn(Value);

impl ScriptFn {
    pub fn call(&self, ctx: &mut NativeCall<'_>, args: Vec<Value>) -> VmResult<Value> {
        ctx.call(&self.0, args)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }
}

impl FromValue for ScriptFn {
    fn from_value(value: &Value) -> VmResult<Self> {
        match value {
            Value::Function(_) | Value::Native(_) => Ok(ScriptFn(value.clone())),
            other => Err(mismatch("func", other)),
        }
    }
}

impl IntoValue for ScriptFn {
    fn into_value(self) -> VmResult<Value> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_widening() {
        assert_eq!(f64::from_value(&Value::Int(3)).unwrap(), 3.0);
        assert_eq!(i64::from_value(&Value::Float(2.9)).unwrap(), 2);
        assert!(i32::from_value(&Value::Int(i64::MAX)).is_err());
    }

    #[test]
    fn string_bytes_interchange() {
        assert_eq!(String::from_value(&Value::bytes(b"hi")).unwrap(), "hi");
        assert_eq!(&*Arc::<[u8]>::from_value(&Value::string("hi")).unwrap(), b"hi");
    }

    #[test]
    fn containers_and_options() {
        let v = vec![1i64, 2, 3].into_value().unwrap();
        assert_eq!(Vec::<i64>::from_value(&v).unwrap(), vec![1, 2, 3]);
        assert_eq!(Option::<i64>::from_value(&Value::Nil).unwrap(), None);
        assert!(matches!(None::<i64>.into_value().unwrap(), Value::Nil));
    }

    #[test]
    fn mismatch_is_a_panic() {
        let err = bool::from_value(&Value::Int(1)).unwrap_err();
        assert!(err.to_string().contains("expected bool, got int"));
        assert!(ScriptFn::from_value(&Value::Int(1)).is_err());
    }
}
