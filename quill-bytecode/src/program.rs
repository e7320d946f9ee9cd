//! The unit produced by one compilation

use crate::code::{Code, FileId};
use crate::function::{nested_functions, Function, LineIndex};
use crate::symbol::{SymbolTable, TableId};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    /// Kept so panic traces can quote the offending line
    pub text: Option<Arc<str>>,
}

/// Top-level code, the full symbol table arena, and the source files the
/// spans refer to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub codes: Vec<Code>,
    pub symbols: SymbolTable,
    pub root: TableId,
    pub files: Vec<SourceFile>,
}

impl Program {
    pub fn new(codes: Vec<Code>, symbols: SymbolTable) -> Self {
        Self {
            codes,
            symbols,
            root: TableId::ROOT,
            files: Vec::new(),
        }
    }

    pub fn source(&self, file: FileId) -> Option<&SourceFile> {
        self.files.get(file.0 as usize)
    }

    pub fn line_index(&self) -> LineIndex {
        LineIndex::build(&self.codes)
    }

    /// Every function literal in the program, depth first
    pub fn functions(&self) -> Vec<&Function> {
        let mut out = Vec::new();
        let mut pending: Vec<&Function> = nested_functions(&self.codes).collect();
        pending.reverse();
        while let Some(f) = pending.pop() {
            out.push(f);
            let mut inner: Vec<&Function> = f.nested().collect();
            inner.reverse();
            pending.extend(inner);
        }
        out
    }

    /// Human-readable listing of the main code followed by each function
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "== main ==");
        dump(&mut out, &self.codes);
        for f in self.functions() {
            let _ = writeln!(out, "\n== {} ==", f.display_name());
            dump(&mut out, &f.codes);
        }
        out
    }
}

fn dump(out: &mut String, codes: &[Code]) {
    for (i, code) in codes.iter().enumerate() {
        let _ = writeln!(out, "{:>9} {:4}: {}", code.span.start, i, code);
    }
}
