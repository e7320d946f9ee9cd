//! Compiled function units and the per-function line index

use crate::code::{Code, Constant, FileId};
use crate::symbol::{SymbolId, TableId};
use quill_core::Span;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An immutable compiled function.
///
/// The defining scope is not stored here: it is captured by the runtime
/// value produced when the literal is pushed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    /// Unique within one compiled program
    pub id: u32,
    pub name: Option<String>,
    pub codes: Vec<Code>,
    /// Symbol table holding the parameters and top-level locals
    pub table: TableId,
    pub params: Vec<SymbolId>,
    /// The last parameter collects surplus arguments as a slice
    pub variadic: bool,
    pub span: Span,
    pub file: FileId,
}

impl Function {
    /// Name used in traces and disassembly
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("anonymous#{}", self.id),
        }
    }

    pub fn line_index(&self) -> LineIndex {
        LineIndex::build(&self.codes)
    }

    /// Functions nested directly in this function's code
    pub fn nested(&self) -> impl Iterator<Item = &Function> {
        nested_functions(&self.codes)
    }
}

/// Function literals referenced by `Push` operands in `codes`, including
/// those inside deferred blocks.
pub fn nested_functions(codes: &[Code]) -> impl Iterator<Item = &Function> {
    let mut found = Vec::new();
    collect_nested(codes, &mut found);
    found.into_iter()
}

fn collect_nested<'a>(codes: &'a [Code], out: &mut Vec<&'a Function>) {
    for code in codes {
        for op in [&code.op1, &code.op2].into_iter().flatten() {
            match op {
                Constant::Function(f) => out.push(f),
                Constant::Block(block) => collect_nested(block, out),
                _ => {}
            }
        }
    }
}

/// Maps source lines to the first instruction emitted for them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineIndex {
    lines: BTreeMap<u32, usize>,
}

impl LineIndex {
    pub fn build(codes: &[Code]) -> Self {
        let mut lines = BTreeMap::new();
        for (index, code) in codes.iter().enumerate() {
            let line = code.span.start.line;
            if line > 0 {
                lines.entry(line).or_insert(index);
            }
        }
        Self { lines }
    }

    /// First instruction emitted for exactly `line`
    pub fn first_instruction(&self, line: u32) -> Option<usize> {
        self.lines.get(&line).copied()
    }

    /// First instruction at `line` or the nearest following line that has code.
    /// Breakpoints on blank lines resolve this way.
    pub fn resolve(&self, line: u32) -> Option<(u32, usize)> {
        self.lines
            .range(line..)
            .next()
            .map(|(line, index)| (*line, *index))
    }

    pub fn lines(&self) -> impl Iterator<Item = u32> + '_ {
        self.lines.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Opcode;

    fn code_at(op: Opcode, line: u32) -> Code {
        Code::new(op, Span::point(line, 1))
    }

    #[test]
    fn line_index_keeps_first_instruction() {
        let codes = vec![
            code_at(Opcode::Push, 1),
            code_at(Opcode::Pop, 1),
            code_at(Opcode::Push, 3),
            code_at(Opcode::Pop, 3),
        ];
        let index = LineIndex::build(&codes);
        assert_eq!(index.first_instruction(1), Some(0));
        assert_eq!(index.first_instruction(3), Some(2));
        assert_eq!(index.first_instruction(2), None);
        assert_eq!(index.resolve(2), Some((3, 2)));
        assert_eq!(index.resolve(4), None);
    }
}
