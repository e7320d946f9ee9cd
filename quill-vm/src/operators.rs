//! Operator semantics per language dialect
//!
//! Each dialect gets one [`OperatorTable`] built on first use. Frames hold a
//! `&'static` reference to the table of the dialect they run, so dialects
//! share the dispatch loop and differ only in the entries they override.

use crate::channel::Channel;
use crate::value::{MapKey, Value};
use once_cell::sync::Lazy;
use quill_bytecode::Opcode;
use quill_core::ast::TypeExpr;
use rustc_hash::FxHashMap;
use std::sync::Arc;

pub type OpResult = Result<Value, String>;

/// Largest element count `make` and string repetition will allocate
pub const MAX_ALLOC_LEN: usize = 1 << 24;
pub type BinaryFn = fn(&OperatorTable, &Value, &Value) -> OpResult;
pub type UnaryFn = fn(&OperatorTable, &Value) -> OpResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Dialect {
    #[default]
    Quill,
    /// Only `nil`, `undefined` and `false` are falsy; `/` always yields a float
    Lua,
}

pub struct OperatorTable {
    dialect: Dialect,
    truthy: fn(&Value) -> bool,
    binary: FxHashMap<Opcode, BinaryFn>,
    unary: FxHashMap<Opcode, UnaryFn>,
}

static QUILL: Lazy<OperatorTable> = Lazy::new(OperatorTable::quill);
static LUA: Lazy<OperatorTable> = Lazy::new(OperatorTable::lua);

impl OperatorTable {
    pub fn for_dialect(dialect: Dialect) -> &'static OperatorTable {
        match dialect {
            Dialect::Quill => &QUILL,
            Dialect::Lua => &LUA,
        }
    }

    fn quill() -> Self {
        let mut binary: FxHashMap<Opcode, BinaryFn> = FxHashMap::default();
        binary.insert(Opcode::Add, add);
        binary.insert(Opcode::Sub, sub);
        binary.insert(Opcode::Mul, mul);
        binary.insert(Opcode::Div, div);
        binary.insert(Opcode::Mod, rem);
        binary.insert(Opcode::And, bit_and);
        binary.insert(Opcode::Or, bit_or);
        binary.insert(Opcode::Xor, bit_xor);
        binary.insert(Opcode::AndNot, and_not);
        binary.insert(Opcode::Shl, shl);
        binary.insert(Opcode::Shr, shr);
        binary.insert(Opcode::Lt, |_, a, b| compare(a, b, "<").map(|o| Value::Bool(o.is_lt())));
        binary.insert(Opcode::LtEq, |_, a, b| compare(a, b, "<=").map(|o| Value::Bool(o.is_le())));
        binary.insert(Opcode::Gt, |_, a, b| compare(a, b, ">").map(|o| Value::Bool(o.is_gt())));
        binary.insert(Opcode::GtEq, |_, a, b| compare(a, b, ">=").map(|o| Value::Bool(o.is_ge())));
        binary.insert(Opcode::Eq, |t, a, b| Ok(Value::Bool(t.equal(a, b))));
        binary.insert(Opcode::NotEq, |t, a, b| Ok(Value::Bool(!t.equal(a, b))));
        binary.insert(Opcode::In, contains);

        let mut unary: FxHashMap<Opcode, UnaryFn> = FxHashMap::default();
        unary.insert(Opcode::Not, |t, v| Ok(Value::Bool(!t.truthy(v))));
        unary.insert(Opcode::Neg, neg);
        unary.insert(Opcode::Plus, plus);
        unary.insert(Opcode::BitNot, bit_not);

        Self {
            dialect: Dialect::Quill,
            truthy: quill_truthy,
            binary,
            unary,
        }
    }

    fn lua() -> Self {
        let mut table = Self::quill();
        table.dialect = Dialect::Lua;
        table.truthy = lua_truthy;
        table.binary.insert(Opcode::Div, float_div);
        table
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    #[inline]
    pub fn truthy(&self, value: &Value) -> bool {
        (self.truthy)(value)
    }

    pub fn binary(&self, op: Opcode, a: &Value, b: &Value) -> OpResult {
        match self.binary.get(&op) {
            Some(f) => f(self, a, b),
            None => Err(format!("{} is not a binary operator", op)),
        }
    }

    pub fn unary(&self, op: Opcode, v: &Value) -> OpResult {
        match self.unary.get(&op) {
            Some(f) => f(self, v),
            None => Err(format!("{} is not a unary operator", op)),
        }
    }

    /// Script-level `==`
    pub fn equal(&self, a: &Value, b: &Value) -> bool {
        use Value::*;
        match (a, b) {
            (Undefined, other) | (other, Undefined) => !self.truthy(other),
            (Nil, Nil) => true,
            (Nil, _) | (_, Nil) => false,
            (Int(x), Int(y)) => x == y,
            (Int(_) | Float(_), Int(_) | Float(_)) => a.as_float() == b.as_float(),
            (Bool(x), Bool(y)) => x == y,
            (String(x), String(y)) => x == y,
            (Bytes(x), Bytes(y)) => x == y,
            (String(s), Bytes(b)) | (Bytes(b), String(s)) => s.as_bytes() == &b[..],
            (Int(i), String(s)) | (String(s), Int(i)) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => c as i64 == *i,
                    _ => false,
                }
            }
            (Slice(x), Slice(y)) => {
                if Arc::ptr_eq(x, y) {
                    return true;
                }
                let (x, y) = (x.read(), y.read());
                x.len() == y.len() && x.iter().zip(y.iter()).all(|(p, q)| self.equal(p, q))
            }
            (Map(x), Map(y)) => {
                if Arc::ptr_eq(x, y) {
                    return true;
                }
                let (x, y) = (x.read(), y.read());
                x.len() == y.len()
                    && x.iter().all(|(k, v)| y.get(k).map_or(false, |w| self.equal(v, w)))
            }
            (Type(x), Type(y)) => x == y,
            _ => a.ptr_eq(b),
        }
    }
}

fn quill_truthy(value: &Value) -> bool {
    match value {
        Value::Undefined | Value::Nil => false,
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Float(x) => *x != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Bytes(b) => !b.is_empty(),
        Value::Slice(items) => !items.read().is_empty(),
        Value::Map(entries) => !entries.read().is_empty(),
        _ => true,
    }
}

fn lua_truthy(value: &Value) -> bool {
    !matches!(value, Value::Undefined | Value::Nil | Value::Bool(false))
}

fn type_error(op: &str, a: &Value, b: &Value) -> String {
    format!("cannot apply {} to {} and {}", op, a.type_name(), b.type_name())
}

fn arith(
    a: &Value,
    b: &Value,
    op: &str,
    int: fn(i64, i64) -> Option<i64>,
    float: fn(f64, f64) -> f64,
) -> OpResult {
    if let (Value::Int(x), Value::Int(y)) = (a, b) {
        return int(*x, *y)
            .map(Value::Int)
            .ok_or_else(|| format!("integer overflow in {} {} {}", x, op, y));
    }
    match (a, b) {
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let (x, y) = (a.as_float().unwrap_or(0.0), b.as_float().unwrap_or(0.0));
            Ok(Value::Float(float(x, y)))
        }
        _ => Err(type_error(op, a, b)),
    }
}

fn add(_: &OperatorTable, a: &Value, b: &Value) -> OpResult {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Ok(Value::from(format!("{}{}", x, y))),
        (Value::Bytes(x), Value::Bytes(y)) => Ok(Value::bytes([&x[..], &y[..]].concat())),
        (Value::Slice(x), Value::Slice(y)) => {
            let mut items = x.read().clone();
            items.extend(y.read().iter().cloned());
            Ok(Value::slice(items))
        }
        _ => arith(a, b, "+", |x, y| Some(x.wrapping_add(y)), |x, y| x + y),
    }
}

fn sub(_: &OperatorTable, a: &Value, b: &Value) -> OpResult {
    arith(a, b, "-", |x, y| Some(x.wrapping_sub(y)), |x, y| x - y)
}

fn mul(_: &OperatorTable, a: &Value, b: &Value) -> OpResult {
    match (a, b) {
        (Value::String(s), Value::Int(n)) | (Value::Int(n), Value::String(s)) => {
            let n = usize::try_from(*n).map_err(|_| "negative repeat count".to_string())?;
            match s.len().checked_mul(n) {
                Some(len) if len <= MAX_ALLOC_LEN => Ok(Value::from(s.repeat(n))),
                _ => Err(format!("repeat count {} too large", n)),
            }
        }
        _ => arith(a, b, "*", |x, y| Some(x.wrapping_mul(y)), |x, y| x * y),
    }
}

fn div(_: &OperatorTable, a: &Value, b: &Value) -> OpResult {
    if let (Value::Int(_), Value::Int(0)) = (a, b) {
        return Err("integer divide by zero".into());
    }
    arith(a, b, "/", |x, y| Some(x.wrapping_div(y)), |x, y| x / y)
}

fn float_div(_: &OperatorTable, a: &Value, b: &Value) -> OpResult {
    match (a.as_float(), b.as_float()) {
        (Some(x), Some(y)) => Ok(Value::Float(x / y)),
        _ => Err(type_error("/", a, b)),
    }
}

fn rem(_: &OperatorTable, a: &Value, b: &Value) -> OpResult {
    if let (Value::Int(_), Value::Int(0)) = (a, b) {
        return Err("integer divide by zero".into());
    }
    arith(a, b, "%", |x, y| Some(x.wrapping_rem(y)), |x, y| x % y)
}

fn bitwise(a: &Value, b: &Value, op: &str, int: fn(i64, i64) -> i64, boolean: fn(bool, bool) -> bool) -> OpResult {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(Value::Int(int(*x, *y))),
        (Value::Bool(x), Value::Bool(y)) => Ok(Value::Bool(boolean(*x, *y))),
        _ => Err(type_error(op, a, b)),
    }
}

fn bit_and(_: &OperatorTable, a: &Value, b: &Value) -> OpResult {
    bitwise(a, b, "&", |x, y| x & y, |x, y| x & y)
}

fn bit_or(_: &OperatorTable, a: &Value, b: &Value) -> OpResult {
    bitwise(a, b, "|", |x, y| x | y, |x, y| x | y)
}

fn bit_xor(_: &OperatorTable, a: &Value, b: &Value) -> OpResult {
    bitwise(a, b, "^", |x, y| x ^ y, |x, y| x ^ y)
}

fn and_not(_: &OperatorTable, a: &Value, b: &Value) -> OpResult {
    bitwise(a, b, "&^", |x, y| x & !y, |x, y| x & !y)
}

fn shift_count(a: &Value, b: &Value, op: &str) -> Result<(i64, u32), String> {
    match (a, b) {
        (Value::Int(_), Value::Int(y)) if *y < 0 => Err("negative shift count".into()),
        (Value::Int(x), Value::Int(y)) => Ok((*x, u32::try_from(*y).unwrap_or(u32::MAX))),
        _ => Err(type_error(op, a, b)),
    }
}

fn shl(_: &OperatorTable, a: &Value, b: &Value) -> OpResult {
    let (x, n) = shift_count(a, b, "<<")?;
    Ok(Value::Int(if n >= 64 { 0 } else { x << n }))
}

fn shr(_: &OperatorTable, a: &Value, b: &Value) -> OpResult {
    let (x, n) = shift_count(a, b, ">>")?;
    Ok(Value::Int(if n >= 64 { if x < 0 { -1 } else { 0 } } else { x >> n }))
}

fn compare(a: &Value, b: &Value, op: &str) -> Result<std::cmp::Ordering, String> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(x.cmp(y)),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let (x, y) = (a.as_float().unwrap_or(0.0), b.as_float().unwrap_or(0.0));
            x.partial_cmp(&y).ok_or_else(|| "comparison with NaN".to_string())
        }
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        (Value::Bytes(x), Value::Bytes(y)) => Ok(x.cmp(y)),
        _ => Err(type_error(op, a, b)),
    }
}

fn contains(t: &OperatorTable, needle: &Value, haystack: &Value) -> OpResult {
    let found = match haystack {
        Value::Slice(items) => items.read().iter().any(|v| t.equal(needle, v)),
        Value::Map(entries) => match MapKey::from_value(needle) {
            Ok(key) => entries.read().contains_key(&key),
            Err(_) => false,
        },
        Value::String(s) => match needle {
            Value::String(sub) => s.contains(&**sub),
            other => return Err(type_error("in", other, haystack)),
        },
        Value::Bytes(b) => match needle {
            Value::Bytes(_) | Value::String(_) if sub_bytes(needle).is_empty() => true,
            Value::Bytes(_) | Value::String(_) => {
                let sub = sub_bytes(needle);
                b.windows(sub.len()).any(|w| w == sub)
            }
            other => return Err(type_error("in", other, haystack)),
        },
        Value::Nil | Value::Undefined => false,
        other => return Err(type_error("in", needle, other)),
    };
    Ok(Value::Bool(found))
}

fn sub_bytes(v: &Value) -> &[u8] {
    match v {
        Value::Bytes(b) => b,
        Value::String(s) => s.as_bytes(),
        _ => &[],
    }
}

fn neg(_: &OperatorTable, v: &Value) -> OpResult {
    match v {
        Value::Int(i) => Ok(Value::Int(i.wrapping_neg())),
        Value::Float(x) => Ok(Value::Float(-x)),
        other => Err(format!("cannot negate {}", other.type_name())),
    }
}

fn plus(_: &OperatorTable, v: &Value) -> OpResult {
    match v {
        Value::Int(_) | Value::Float(_) => Ok(v.clone()),
        other => Err(format!("bad operand {} for unary +", other.type_name())),
    }
}

fn bit_not(_: &OperatorTable, v: &Value) -> OpResult {
    match v {
        Value::Int(i) => Ok(Value::Int(!i)),
        other => Err(format!("bad operand {} for ^", other.type_name())),
    }
}

/// Zero value of a type
pub fn zero_value(ty: &TypeExpr) -> Value {
    match ty {
        TypeExpr::Int => Value::Int(0),
        TypeExpr::Float => Value::Float(0.0),
        TypeExpr::String => Value::string(""),
        TypeExpr::Bytes => Value::bytes(b""),
        TypeExpr::Bool => Value::Bool(false),
        TypeExpr::Any | TypeExpr::Slice(_) | TypeExpr::Map(..) | TypeExpr::Chan(_) => Value::Nil,
    }
}

/// `make(ty, args...)`
pub fn make(ty: &TypeExpr, args: &[Value]) -> OpResult {
    let size = |i: usize| -> Result<usize, String> {
        match args.get(i) {
            None => Ok(0),
            Some(Value::Int(n)) => match usize::try_from(*n) {
                Ok(len) if len <= MAX_ALLOC_LEN => Ok(len),
                Ok(_) => Err(format!("size {} out of range in make", n)),
                Err(_) => Err(format!("negative size {} in make", n)),
            },
            Some(other) => Err(format!("make size must be int, got {}", other.type_name())),
        }
    };
    match ty {
        TypeExpr::Slice(elem) => {
            let len = size(0)?;
            let mut items = Vec::new();
            items
                .try_reserve_exact(len)
                .map_err(|_| format!("cannot allocate {} elements in make", len))?;
            items.resize(len, zero_value(elem));
            Ok(Value::slice(items))
        }
        TypeExpr::Map(..) => Ok(Value::empty_map()),
        TypeExpr::Chan(_) => Ok(Value::Channel(Arc::new(Channel::new(size(0)?)))),
        other => Err(format!("cannot make {}", other)),
    }
}

/// `T(x)` conversions
pub fn cast(table: &OperatorTable, ty: &TypeExpr, v: &Value) -> OpResult {
    let fail = || format!("cannot convert {} to {}", v.type_name(), ty);
    match ty {
        TypeExpr::Any => Ok(v.clone()),
        TypeExpr::Bool => Ok(Value::Bool(table.truthy(v))),
        TypeExpr::Int => match v {
            Value::Int(_) => Ok(v.clone()),
            Value::Float(x) => Ok(Value::Int(*x as i64)),
            Value::Bool(b) => Ok(Value::Int(*b as i64)),
            Value::String(s) => parse_number(s)
                .map(|n| match n {
                    Value::Float(x) => Value::Int(x as i64),
                    other => other,
                })
                .ok_or_else(|| format!("cannot convert {:?} to int", &**s)),
            _ => Err(fail()),
        },
        TypeExpr::Float => match v {
            Value::Int(i) => Ok(Value::Float(*i as f64)),
            Value::Float(_) => Ok(v.clone()),
            Value::Bool(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
            Value::String(s) => parse_number(s)
                .and_then(|n| n.as_float())
                .map(Value::Float)
                .ok_or_else(|| format!("cannot convert {:?} to float", &**s)),
            _ => Err(fail()),
        },
        TypeExpr::String => match v {
            Value::String(_) => Ok(v.clone()),
            Value::Undefined | Value::Nil => Ok(Value::string("")),
            other => Ok(Value::from(other.to_string())),
        },
        TypeExpr::Bytes => match v {
            Value::Bytes(_) => Ok(v.clone()),
            Value::String(s) => Ok(Value::bytes(s.as_bytes())),
            Value::Slice(items) => items
                .read()
                .iter()
                .map(|item| match item {
                    Value::Int(i) => u8::try_from(*i).map_err(|_| format!("byte value {} out of range", i)),
                    other => Err(format!("cannot convert {} to byte", other.type_name())),
                })
                .collect::<Result<Vec<u8>, String>>()
                .map(Value::bytes),
            _ => Err(fail()),
        },
        TypeExpr::Slice(elem) => match v {
            Value::Nil | Value::Undefined => Ok(Value::slice(Vec::new())),
            Value::Slice(items) => {
                let items = items.read().clone();
                items
                    .iter()
                    .map(|item| cast(table, elem, item))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::slice)
            }
            Value::Bytes(b) if **elem == TypeExpr::Int || **elem == TypeExpr::Any => {
                Ok(Value::slice(b.iter().map(|x| Value::Int(*x as i64)).collect()))
            }
            Value::String(s) if **elem == TypeExpr::String || **elem == TypeExpr::Any => {
                Ok(Value::slice(s.chars().map(|c| Value::from(c.to_string())).collect()))
            }
            _ => Err(fail()),
        },
        TypeExpr::Map(..) => match v {
            Value::Map(_) => Ok(v.clone()),
            Value::Nil | Value::Undefined => Ok(Value::empty_map()),
            _ => Err(fail()),
        },
        TypeExpr::Chan(_) => match v {
            Value::Channel(_) => Ok(v.clone()),
            _ => Err(fail()),
        },
    }
}

fn parse_number(s: &str) -> Option<Value> {
    let s = s.trim();
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::Int(i));
    }
    s.parse::<f64>().ok().map(Value::Float)
}
