//! Function literals

use super::{Compiler, Unit};
use quill_bytecode::{Constant, Function, TableKind};
use quill_core::ast::FunctionLit;
use std::sync::Arc;

impl Compiler {
    /// Pushes a function literal. The runtime value captures whatever scope
    /// is active when the `Push` executes.
    pub(super) fn compile_function(&mut self, lit: &FunctionLit, name_hint: Option<&String>) {
        let function = self.build_function(lit, name_hint);
        self.emit_push(Constant::Function(Arc::new(function)), lit.span);
    }

    /// Compiles a function body into its own code array under a function
    /// table nested in the current one
    pub(super) fn build_function(&mut self, lit: &FunctionLit, name_hint: Option<&String>) -> Function {
        let table = self
            .session
            .symbols
            .new_child(self.unit.table, TableKind::Function);
        let id = self.session.function_id();
        let outer = std::mem::replace(&mut self.unit, Unit::new(table));

        let params = lit
            .params
            .iter()
            .map(|p| self.session.symbols.redeclare(table, &p.name))
            .collect();
        self.compile_stmts(&lit.body.stmts);
        self.check_resolved();

        let unit = std::mem::replace(&mut self.unit, outer);
        let name = lit
            .name
            .as_ref()
            .map(|n| n.name.clone())
            .or_else(|| name_hint.cloned());
        Function {
            id,
            name,
            codes: unit.codes,
            table,
            params,
            variadic: lit.variadic,
            span: lit.span,
            file: self.file,
        }
    }
}
