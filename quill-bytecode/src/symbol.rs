//! Compile-time name resolution
//!
//! A [`SymbolTable`] is an arena of table nodes, one per block or function
//! body, linked to their parents. Symbol ids are unique across the whole
//! arena and assigned in increasing order, so the runtime can key variable
//! storage by id alone.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A variable slot. Id 0 is never assigned, so any non-zero id is assignable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SymbolId(pub u32);

impl SymbolId {
    pub fn as_operand(self) -> i64 {
        self.0 as i64
    }

    /// Reads an id back out of an instruction operand
    pub fn from_operand(raw: i64) -> Option<Self> {
        u32::try_from(raw).ok().filter(|id| *id > 0).map(SymbolId)
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableId(pub u32);

impl TableId {
    /// The root table of every program
    pub const ROOT: TableId = TableId(0);
}

/// What introduced a table node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableKind {
    Root,
    Block,
    Function,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TableNode {
    parent: Option<TableId>,
    kind: TableKind,
    names: FxHashMap<String, SymbolId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolTable {
    nodes: Vec<TableNode>,
    /// Owner table and name per symbol id; slot 0 is unused
    symbols: Vec<(TableId, String)>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            nodes: vec![TableNode {
                parent: None,
                kind: TableKind::Root,
                names: FxHashMap::default(),
            }],
            symbols: vec![(TableId::ROOT, String::new())],
        }
    }

    /// Creates a table nested in `parent`
    pub fn new_child(&mut self, parent: TableId, kind: TableKind) -> TableId {
        let id = TableId(self.nodes.len() as u32);
        self.nodes.push(TableNode {
            parent: Some(parent),
            kind,
            names: FxHashMap::default(),
        });
        id
    }

    /// Declares `name` in `table`, returning the existing id when the name
    /// is already declared there.
    pub fn declare(&mut self, table: TableId, name: &str) -> SymbolId {
        if let Some(id) = self.lookup_local(table, name) {
            return id;
        }
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push((table, name.to_string()));
        if let Some(node) = self.nodes.get_mut(table.0 as usize) {
            node.names.insert(name.to_string(), id);
        }
        id
    }

    /// Declares a fresh symbol that shadows any earlier one with the same name
    pub fn redeclare(&mut self, table: TableId, name: &str) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push((table, name.to_string()));
        if let Some(node) = self.nodes.get_mut(table.0 as usize) {
            node.names.insert(name.to_string(), id);
        }
        id
    }

    pub fn lookup_local(&self, table: TableId, name: &str) -> Option<SymbolId> {
        self.nodes
            .get(table.0 as usize)
            .and_then(|node| node.names.get(name).copied())
    }

    /// Resolves `name` from `table` outwards through its parents
    pub fn resolve(&self, table: TableId, name: &str) -> Option<SymbolId> {
        let mut current = Some(table);
        while let Some(t) = current {
            if let Some(id) = self.lookup_local(t, name) {
                return Some(id);
            }
            current = self.parent(t);
        }
        None
    }

    pub fn parent(&self, table: TableId) -> Option<TableId> {
        self.nodes.get(table.0 as usize).and_then(|node| node.parent)
    }

    pub fn kind(&self, table: TableId) -> Option<TableKind> {
        self.nodes.get(table.0 as usize).map(|node| node.kind)
    }

    /// Table that declared `id`
    pub fn owner(&self, id: SymbolId) -> Option<TableId> {
        match id.0 {
            0 => None,
            n => self.symbols.get(n as usize).map(|(table, _)| *table),
        }
    }

    pub fn name_of(&self, id: SymbolId) -> Option<&str> {
        match id.0 {
            0 => None,
            n => self.symbols.get(n as usize).map(|(_, name)| name.as_str()),
        }
    }

    /// Names declared directly in `table`, ordered by id
    pub fn symbols_in(&self, table: TableId) -> Vec<(SymbolId, &str)> {
        let mut out: Vec<_> = self
            .nodes
            .get(table.0 as usize)
            .map(|node| {
                node.names
                    .iter()
                    .map(|(name, id)| (*id, name.as_str()))
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by_key(|(id, _)| *id);
        out
    }

    /// True when `inner` is `outer` or nested inside it
    pub fn is_within(&self, inner: TableId, outer: TableId) -> bool {
        let mut current = Some(inner);
        while let Some(t) = current {
            if t == outer {
                return true;
            }
            current = self.parent(t);
        }
        false
    }

    pub fn table_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of symbols assigned so far
    pub fn symbol_count(&self) -> usize {
        self.symbols.len() - 1
    }
}
