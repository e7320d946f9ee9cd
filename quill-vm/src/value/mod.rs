//! Runtime values
//!
//! `Value` is a closed tagged union. Containers are shared by reference
//! (`Arc` + `parking_lot::RwLock`), scalars are copied. The `Ref` variant
//! marks a storage location and only ever lives on a frame's operand stack.

mod convert;
mod key;

pub use convert::{from_value, FromValue, IntoValue, ScriptFn};
pub use key::MapKey;

use crate::channel::Channel;
use crate::native::NativeFunction;
use crate::scope::Scope;
use parking_lot::RwLock;
use quill_bytecode::{Constant, Function, SymbolId};
use quill_core::ast::TypeExpr;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::{Arc, Weak};

pub type SliceRef = Arc<RwLock<Vec<Value>>>;
pub type MapRef = Arc<RwLock<FxHashMap<MapKey, Value>>>;

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Arc<str>),
    Bytes(Arc<[u8]>),
    Slice(SliceRef),
    Map(MapRef),
    Function(Closure),
    Native(Arc<NativeFunction>),
    Channel(Arc<Channel>),
    Type(TypeExpr),
    /// An assignable location; resolved by the frame before use as an r-value
    Ref(Box<Place>),
}

/// Where an assignment lands
#[derive(Debug, Clone)]
pub enum Place {
    Symbol(SymbolId),
    /// Element of a container, with the value read when the place was formed
    Element {
        container: Value,
        key: Value,
        current: Value,
    },
}

/// A compiled function paired with the scope it was created in
#[derive(Clone)]
pub struct Closure {
    pub function: Arc<Function>,
    pub(crate) scope: Captured,
}

/// The defining scope of a closure.
///
/// A closure stored into its own defining scope keeps only a weak link so
/// the scope and the closure do not own each other.
#[derive(Clone)]
pub(crate) enum Captured {
    Strong(Arc<Scope>),
    Weak(Weak<Scope>),
}

impl Closure {
    pub fn new(function: Arc<Function>, scope: Arc<Scope>) -> Self {
        Self {
            function,
            scope: Captured::Strong(scope),
        }
    }

    /// The defining scope, if it is still alive
    pub fn scope(&self) -> Option<Arc<Scope>> {
        match &self.scope {
            Captured::Strong(s) => Some(s.clone()),
            Captured::Weak(w) => w.upgrade(),
        }
    }

    pub fn name(&self) -> String {
        self.function.display_name()
    }

    pub(crate) fn captures(&self, scope: &Arc<Scope>) -> bool {
        match &self.scope {
            Captured::Strong(s) => Arc::ptr_eq(s, scope),
            Captured::Weak(w) => std::ptr::eq(w.as_ptr(), Arc::as_ptr(scope)),
        }
    }

    pub(crate) fn downgraded(&self) -> Self {
        match &self.scope {
            Captured::Strong(s) => Self {
                function: self.function.clone(),
                scope: Captured::Weak(Arc::downgrade(s)),
            },
            Captured::Weak(_) => self.clone(),
        }
    }

    pub(crate) fn upgraded(&self) -> Self {
        match &self.scope {
            Captured::Weak(w) => match w.upgrade() {
                Some(s) => Self {
                    function: self.function.clone(),
                    scope: Captured::Strong(s),
                },
                None => self.clone(),
            },
            Captured::Strong(_) => self.clone(),
        }
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("function", &self.function.display_name())
            .field("weak", &matches!(self.scope, Captured::Weak(_)))
            .finish()
    }
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Arc::from(s.as_ref()))
    }

    pub fn bytes(b: impl AsRef<[u8]>) -> Self {
        Value::Bytes(Arc::from(b.as_ref()))
    }

    pub fn slice(items: Vec<Value>) -> Self {
        Value::Slice(Arc::new(RwLock::new(items)))
    }

    pub fn map(entries: FxHashMap<MapKey, Value>) -> Self {
        Value::Map(Arc::new(RwLock::new(entries)))
    }

    pub fn empty_map() -> Self {
        Self::map(FxHashMap::default())
    }

    /// Materializes an instruction operand. Function literals capture `scope`.
    pub fn from_constant(constant: &Constant, scope: &Arc<Scope>) -> Option<Self> {
        Some(match constant {
            Constant::Undefined => Value::Undefined,
            Constant::Nil => Value::Nil,
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Int(i) => Value::Int(*i),
            Constant::Float(x) => Value::Float(*x),
            Constant::String(s) => Value::String(s.clone()),
            Constant::Bytes(b) => Value::Bytes(b.clone()),
            Constant::Function(func) => Value::Function(Closure::new(func.clone(), scope.clone())),
            Constant::Type(t) => Value::Type(t.clone()),
            Constant::Block(_) => return None,
        })
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Slice(_) => "slice",
            Value::Map(_) => "map",
            Value::Function(_) | Value::Native(_) => "func",
            Value::Channel(_) => "chan",
            Value::Type(_) => "type",
            Value::Ref(_) => "ref",
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_nil_like(&self) -> bool {
        matches!(self, Value::Undefined | Value::Nil)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Number of elements for sized values
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::String(s) => Some(s.chars().count()),
            Value::Bytes(b) => Some(b.len()),
            Value::Slice(items) => Some(items.read().len()),
            Value::Map(entries) => Some(entries.read().len()),
            Value::Channel(ch) => Some(ch.len()),
            _ => None,
        }
    }

    /// Copy of the elements of a slice value
    pub fn to_vec(&self) -> Option<Vec<Value>> {
        match self {
            Value::Slice(items) => Some(items.read().clone()),
            _ => None,
        }
    }

    /// Map entries ordered by the string rendering of their keys
    pub fn sorted_entries(&self) -> Option<Vec<(Value, Value)>> {
        match self {
            Value::Map(entries) => {
                let mut out: Vec<(String, Value, Value)> = entries
                    .read()
                    .iter()
                    .map(|(k, v)| (k.to_string(), k.to_value(), v.clone()))
                    .collect();
                out.sort_by(|a, b| a.0.cmp(&b.0));
                Some(out.into_iter().map(|(_, k, v)| (k, v)).collect())
            }
            _ => None,
        }
    }

    /// Form used when writing into `scope`: a closure defined in that very
    /// scope is stored weakly.
    pub(crate) fn for_storage_in(self, scope: &Arc<Scope>) -> Value {
        match self {
            Value::Function(c) if c.captures(scope) => Value::Function(c.downgraded()),
            other => other,
        }
    }

    /// Form handed out when reading a variable
    pub(crate) fn loaded(&self) -> Value {
        match self {
            Value::Function(c) => Value::Function(c.upgraded()),
            other => other.clone(),
        }
    }

    /// Same object identity for reference values
    pub fn ptr_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Slice(a), Value::Slice(b)) => Arc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Arc::ptr_eq(a, b),
            (Value::Channel(a), Value::Channel(b)) => Arc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(&a.function, &b.function),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Nil => write!(f, "<nil>"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Value::Slice(items) => {
                write!(f, "[")?;
                for (i, item) in items.read().iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(_) => {
                write!(f, "map[")?;
                for (i, (k, v)) in self.sorted_entries().unwrap_or_default().iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}:{}", k, v)?;
                }
                write!(f, "]")
            }
            Value::Function(c) => write!(f, "<func {}>", c.name()),
            Value::Native(n) => write!(f, "<native {}>", n.name()),
            Value::Channel(ch) => write!(f, "<chan {}>", ch.id()),
            Value::Type(t) => write!(f, "{}", t),
            Value::Ref(place) => match place.as_ref() {
                Place::Symbol(id) => write!(f, "<ref {}>", id),
                Place::Element { current, .. } => write!(f, "{}", current),
            },
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Arc::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_script_rendering() {
        let v = Value::slice(vec![Value::Int(1), Value::string("a"), Value::Nil]);
        assert_eq!(v.to_string(), "[1 a <nil>]");

        let mut entries = FxHashMap::default();
        entries.insert(MapKey::String("b".into()), Value::Int(2));
        entries.insert(MapKey::String("a".into()), Value::Int(1));
        assert_eq!(Value::map(entries).to_string(), "map[a:1 b:2]");
    }

    #[test]
    fn sorted_entries_use_string_order() {
        let mut entries = FxHashMap::default();
        for k in ["c", "a", "b"] {
            entries.insert(MapKey::String(k.into()), Value::Int(0));
        }
        let keys: Vec<String> = Value::map(entries)
            .sorted_entries()
            .unwrap()
            .into_iter()
            .map(|(k, _)| k.to_string())
            .collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn closures_stored_in_their_scope_become_weak() {
        let scope = Scope::root();
        let func = Arc::new(Function {
            id: 1,
            name: Some("f".into()),
            codes: vec![],
            table: quill_bytecode::TableId::ROOT,
            params: vec![],
            variadic: false,
            span: Default::default(),
            file: Default::default(),
        });
        let value = Value::Function(Closure::new(func, scope.clone()));
        let stored = value.for_storage_in(&scope);
        assert!(matches!(&stored, Value::Function(c) if matches!(c.scope, Captured::Weak(_))));
        let loaded = stored.loaded();
        assert!(matches!(&loaded, Value::Function(c) if matches!(c.scope, Captured::Strong(_))));
        assert_eq!(Arc::strong_count(&scope), 2);
    }
}
