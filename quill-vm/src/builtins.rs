//! Natives every program can see

use crate::error::{VmError, VmResult};
use crate::native::{NativeCall, NativeFunction};
use crate::value::{from_value, Value};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Duration;

/// The default native table
pub fn prelude() -> FxHashMap<String, Value> {
    let natives = vec![
        NativeFunction::new("len", Some(1), len),
        NativeFunction::variadic("append", append),
        NativeFunction::new("close", Some(1), close),
        NativeFunction::new("typeof", Some(1), |_, args| {
            Ok(Value::string(args[0].type_name()))
        }),
        NativeFunction::variadic("print", |ctx, args| {
            ctx.write_output(&join(&args))?;
            Ok(Value::Undefined)
        }),
        NativeFunction::variadic("println", |ctx, args| {
            ctx.write_output(&format!("{}\n", join(&args)))?;
            Ok(Value::Undefined)
        }),
        NativeFunction::variadic("sprint", |_, args| Ok(Value::from(join(&args)))),
        NativeFunction::new("keys", Some(1), keys),
        NativeFunction::new("sleep", Some(1), sleep),
    ];
    natives
        .into_iter()
        .map(|n| (n.name().to_string(), Value::Native(Arc::new(n))))
        .collect()
}

fn join(args: &[Value]) -> String {
    args.iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn len(_: &mut NativeCall<'_>, args: Vec<Value>) -> VmResult<Value> {
    match &args[0] {
        Value::Nil | Value::Undefined => Ok(Value::Int(0)),
        v => match v.len() {
            Some(n) => Ok(Value::Int(n as i64)),
            None => Err(VmError::panic(format!(
                "invalid argument of type {} for len",
                v.type_name()
            ))),
        },
    }
}

/// Returns a new slice; the argument slice is left untouched
fn append(_: &mut NativeCall<'_>, args: Vec<Value>) -> VmResult<Value> {
    let mut args = args.into_iter();
    let mut items = match args.next() {
        Some(Value::Slice(items)) => items.read().clone(),
        Some(Value::Nil | Value::Undefined) => Vec::new(),
        Some(other) => {
            return Err(VmError::panic(format!(
                "first argument to append must be a slice, got {}",
                other.type_name()
            )))
        }
        None => return Err(VmError::panic("append expects a slice")),
    };
    items.extend(args);
    Ok(Value::slice(items))
}

fn close(_: &mut NativeCall<'_>, args: Vec<Value>) -> VmResult<Value> {
    match &args[0] {
        Value::Channel(ch) => {
            if !ch.close() {
                return Err(VmError::panic("close of closed channel"));
            }
            Ok(Value::Undefined)
        }
        Value::Nil | Value::Undefined => Err(VmError::panic("close of nil channel")),
        other => Err(VmError::panic(format!(
            "invalid argument of type {} for close",
            other.type_name()
        ))),
    }
}

fn keys(_: &mut NativeCall<'_>, args: Vec<Value>) -> VmResult<Value> {
    match args[0].sorted_entries() {
        Some(entries) => Ok(Value::slice(entries.into_iter().map(|(k, _)| k).collect())),
        None => Err(VmError::panic(format!(
            "keys expects a map, got {}",
            args[0].type_name()
        ))),
    }
}

/// `sleep(ms)`; wakes early when the VM is cancelled
fn sleep(ctx: &mut NativeCall<'_>, args: Vec<Value>) -> VmResult<Value> {
    let ms: i64 = from_value(&args[0])?;
    let ms = u64::try_from(ms).map_err(|_| VmError::panic("negative sleep duration"))?;
    if ctx.cancel_token().sleep(Duration::from_millis(ms)) {
        return Err(VmError::Cancelled);
    }
    Ok(Value::Undefined)
}
