//! Runtime scopes
//!
//! Each scope mirrors one symbol table node. Scopes are reference counted
//! and parent linked; closures keep their defining scope alive, so a
//! variable captured by several closures is one shared binding.

use crate::value::Value;
use parking_lot::RwLock;
use quill_bytecode::{SymbolId, SymbolTable, TableId};
use rustc_hash::FxHashMap;
use std::sync::Arc;

pub struct Scope {
    table: TableId,
    parent: Option<Arc<Scope>>,
    vars: RwLock<FxHashMap<SymbolId, Value>>,
}

/// A name/value pair captured by [`Scope::snapshot`]
#[derive(Debug, Clone)]
pub struct Binding {
    pub name: String,
    pub id: SymbolId,
    pub value: Value,
    /// 0 for the innermost scope
    pub depth: usize,
}

impl Scope {
    pub fn root() -> Arc<Self> {
        Arc::new(Self {
            table: TableId::ROOT,
            parent: None,
            vars: RwLock::new(FxHashMap::default()),
        })
    }

    pub fn child(parent: &Arc<Scope>, table: TableId) -> Arc<Self> {
        Arc::new(Self {
            table,
            parent: Some(parent.clone()),
            vars: RwLock::new(FxHashMap::default()),
        })
    }

    pub fn table(&self) -> TableId {
        self.table
    }

    pub fn parent(&self) -> Option<&Arc<Scope>> {
        self.parent.as_ref()
    }

    /// Number of ancestors
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.parent.as_ref();
        while let Some(s) = current {
            depth += 1;
            current = s.parent.as_ref();
        }
        depth
    }

    /// Reads `id` from this scope or the nearest ancestor holding it
    pub fn get(&self, id: SymbolId) -> Option<Value> {
        let mut current = Some(self);
        while let Some(scope) = current {
            if let Some(v) = scope.vars.read().get(&id) {
                return Some(v.loaded());
            }
            current = scope.parent.as_deref();
        }
        None
    }

    /// Reads a variable by name, resolving each scope's table in `symbols`
    pub fn get_by_name(&self, name: &str, symbols: &SymbolTable) -> Option<Value> {
        let mut current = Some(self);
        while let Some(scope) = current {
            if let Some(id) = symbols.lookup_local(scope.table, name) {
                if let Some(v) = scope.vars.read().get(&id) {
                    return Some(v.loaded());
                }
            }
            current = scope.parent.as_deref();
        }
        None
    }

    /// Binds `id` in this scope without searching ancestors
    pub fn define(self: &Arc<Self>, id: SymbolId, value: Value) {
        let value = value.for_storage_in(self);
        self.vars.write().insert(id, value);
    }

    /// Stores `id`: into the scope already holding it, else into the scope
    /// of the table that declared it, else here.
    pub fn assign(self: &Arc<Self>, id: SymbolId, value: Value, symbols: &SymbolTable) {
        let target = self
            .find(|s| s.vars.read().contains_key(&id))
            .or_else(|| {
                let owner = symbols.owner(id)?;
                self.find(|s| s.table == owner)
            })
            .unwrap_or_else(|| self.clone());
        target.define(id, value);
    }

    fn find(self: &Arc<Self>, pred: impl Fn(&Scope) -> bool) -> Option<Arc<Scope>> {
        let mut current = Some(self);
        while let Some(scope) = current {
            if pred(scope) {
                return Some(scope.clone());
            }
            current = scope.parent.as_ref();
        }
        None
    }

    /// Every visible binding, innermost scope first. Hidden compiler
    /// variables (names starting with `@`) are skipped.
    pub fn snapshot(&self, symbols: &SymbolTable) -> Vec<Binding> {
        let mut out = Vec::new();
        let mut current = Some(self);
        let mut depth = 0;
        while let Some(scope) = current {
            let mut local: Vec<Binding> = scope
                .vars
                .read()
                .iter()
                .filter_map(|(id, value)| {
                    let name = symbols.name_of(*id)?;
                    if name.starts_with('@') {
                        return None;
                    }
                    Some(Binding {
                        name: name.to_string(),
                        id: *id,
                        value: value.loaded(),
                        depth,
                    })
                })
                .collect();
            local.sort_by_key(|b| b.id);
            out.extend(local);
            current = scope.parent.as_deref();
            depth += 1;
        }
        out
    }

    /// Number of bindings held directly by this scope
    pub fn len(&self) -> usize {
        self.vars.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.read().is_empty()
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("table", &self.table)
            .field("vars", &self.vars.read().len())
            .field("depth", &self.depth())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_bytecode::TableKind;

    #[test]
    fn lookups_walk_the_parent_chain() {
        let mut symbols = SymbolTable::new();
        let x = symbols.declare(TableId::ROOT, "x");
        let block = symbols.new_child(TableId::ROOT, TableKind::Block);
        let y = symbols.declare(block, "y");

        let root = Scope::root();
        root.define(x, Value::Int(1));
        let inner = Scope::child(&root, block);
        inner.define(y, Value::Int(2));

        assert!(matches!(inner.get(x), Some(Value::Int(1))));
        assert!(matches!(inner.get_by_name("y", &symbols), Some(Value::Int(2))));
        assert!(root.get(y).is_none());
        assert_eq!(inner.depth(), 1);
    }

    #[test]
    fn assign_targets_owner_scope() {
        let mut symbols = SymbolTable::new();
        let block = symbols.new_child(TableId::ROOT, TableKind::Block);
        let counter = symbols.declare(TableId::ROOT, "counter");

        let root = Scope::root();
        let inner = Scope::child(&root, block);
        // first write from a nested block lands where the symbol was declared
        inner.assign(counter, Value::Int(5), &symbols);
        assert_eq!(inner.len(), 0);
        assert!(matches!(root.get(counter), Some(Value::Int(5))));

        inner.assign(counter, Value::Int(6), &symbols);
        assert!(matches!(root.get(counter), Some(Value::Int(6))));
    }

    #[test]
    fn snapshot_lists_innermost_first() {
        let mut symbols = SymbolTable::new();
        let a = symbols.declare(TableId::ROOT, "a");
        let hidden = symbols.declare(TableId::ROOT, "@switch#1");
        let block = symbols.new_child(TableId::ROOT, TableKind::Block);
        let b = symbols.declare(block, "b");

        let root = Scope::root();
        root.define(a, Value::Int(1));
        root.define(hidden, Value::Int(0));
        let inner = Scope::child(&root, block);
        inner.define(b, Value::Int(2));

        let names: Vec<(String, usize)> = inner
            .snapshot(&symbols)
            .into_iter()
            .map(|b| (b.name, b.depth))
            .collect();
        assert_eq!(names, vec![("b".to_string(), 0), ("a".to_string(), 1)]);
    }
}
