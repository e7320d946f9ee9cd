//! Loop iterators
//!
//! `EnterFR` builds one of these over the loop subject. Each `RangeNext` or
//! `InNext` advances it and pushes the requested number of values. An
//! iterator is single-use.

use crate::channel::{Channel, RecvOutcome};
use crate::tasks::CancelToken;
use crate::value::{SliceRef, Value};
use std::sync::Arc;

#[derive(Debug)]
pub enum Iter {
    /// Reads the live slice on every step
    Slice { items: SliceRef, pos: usize },
    /// Entries snapshotted at loop entry, ordered by key rendering
    Map { entries: Vec<(Value, Value)>, pos: usize },
    Channel(Arc<Channel>),
    /// `for i = range n` counts `0..n`
    Repeat { count: i64, pos: i64 },
}

/// How the yielded values are shaped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// `range`: slices yield index then element
    Range,
    /// `in`: slices yield elements, unpacked across several variables
    In,
}

#[derive(Debug)]
pub enum Step {
    Item(Vec<Value>),
    Done,
    Cancelled,
}

impl Iter {
    pub fn over(subject: &Value) -> Result<Iter, String> {
        Ok(match subject {
            Value::Slice(items) => Iter::Slice {
                items: items.clone(),
                pos: 0,
            },
            Value::String(s) => Iter::Slice {
                items: chars_of(s),
                pos: 0,
            },
            Value::Bytes(b) => Iter::Slice {
                items: Arc::new(parking_lot::RwLock::new(
                    b.iter().map(|x| Value::Int(*x as i64)).collect(),
                )),
                pos: 0,
            },
            Value::Map(_) => Iter::Map {
                entries: subject.sorted_entries().unwrap_or_default(),
                pos: 0,
            },
            Value::Channel(ch) => Iter::Channel(ch.clone()),
            Value::Int(n) => Iter::Repeat { count: *n, pos: 0 },
            Value::Nil | Value::Undefined => Iter::Slice {
                items: Arc::default(),
                pos: 0,
            },
            other => return Err(format!("cannot range over {}", other.type_name())),
        })
    }

    /// Produces the next `n` values, or `Done` when exhausted
    pub fn next(&mut self, n: usize, mode: Advance, cancel: &CancelToken) -> Result<Step, String> {
        match self {
            Iter::Slice { items, pos } => {
                let item = match items.read().get(*pos) {
                    Some(v) => v.clone(),
                    None => return Ok(Step::Done),
                };
                let index = Value::Int(*pos as i64);
                *pos += 1;
                match (mode, n) {
                    (_, 0) => Ok(Step::Item(Vec::new())),
                    (_, 1) => Ok(Step::Item(vec![item])),
                    (Advance::Range, 2) => Ok(Step::Item(vec![index, item])),
                    (Advance::Range, _) => Err(too_many("slice", 2)),
                    (Advance::In, _) => unpack(item, n).map(Step::Item),
                }
            }
            Iter::Map { entries, pos } => {
                let (key, value) = match entries.get(*pos) {
                    Some(entry) => entry.clone(),
                    None => return Ok(Step::Done),
                };
                *pos += 1;
                match n {
                    0 => Ok(Step::Item(Vec::new())),
                    1 => Ok(Step::Item(vec![key])),
                    2 => Ok(Step::Item(vec![key, value])),
                    _ => Err(too_many("map", 2)),
                }
            }
            Iter::Repeat { count, pos } => {
                if *pos >= *count {
                    return Ok(Step::Done);
                }
                let i = *pos;
                *pos += 1;
                match n {
                    0 => Ok(Step::Item(Vec::new())),
                    1 => Ok(Step::Item(vec![Value::Int(i)])),
                    2 => Ok(Step::Item(vec![Value::Int(i), Value::Int(i)])),
                    _ => Err(too_many("int", 2)),
                }
            }
            Iter::Channel(ch) => {
                if n > 1 {
                    return Err(too_many("channel", 1));
                }
                Ok(match ch.recv(cancel) {
                    RecvOutcome::Value(v) if n == 1 => Step::Item(vec![v]),
                    RecvOutcome::Value(_) => Step::Item(Vec::new()),
                    RecvOutcome::Closed => Step::Done,
                    RecvOutcome::Cancelled => Step::Cancelled,
                })
            }
        }
    }
}

fn chars_of(s: &str) -> SliceRef {
    Arc::new(parking_lot::RwLock::new(
        s.chars().map(|c| Value::from(c.to_string())).collect(),
    ))
}

fn too_many(kind: &str, max: usize) -> String {
    format!("range over {} permits at most {} iteration variables", kind, max)
}

fn unpack(item: Value, n: usize) -> Result<Vec<Value>, String> {
    match &item {
        Value::Slice(parts) => {
            let parts = parts.read();
            if parts.len() != n {
                return Err(format!(
                    "cannot unpack {} values into {} variables",
                    parts.len(),
                    n
                ));
            }
            Ok(parts.clone())
        }
        other => Err(format!("cannot unpack {} into {} variables", other.type_name(), n)),
    }
}
