//! AST to bytecode lowering
//!
//! A single pass over the tree emits [`Code`] into a growable buffer per
//! function. Forward jumps are emitted with a negative placeholder target
//! and back-patched once the target index is known. `break` and `continue`
//! are claimed by the innermost enclosing loop or switch, which scans the
//! window of instructions it emitted for placeholders nobody else resolved.

mod control;
mod error;
mod expr;
mod function;
mod stmt;

pub use error::{CompileError, CompileErrors};

use quill_bytecode::{Code, Constant, FileId, Opcode, Program, SourceFile, SymbolId, SymbolTable, TableId, TableKind};
use quill_core::{Block, Expr, Span};
use rustc_hash::FxHashSet;
use std::sync::Arc;
use tracing::debug;

/// Target of an unpatched jump
pub(crate) const PLACEHOLDER: i64 = -1;

/// Compiler options
#[derive(Debug, Clone, Default)]
pub struct CompilerOptions {
    /// Report names that resolve to no declaration instead of deferring
    /// them to a runtime global lookup
    pub strict_symbols: bool,
    /// Names provided by the host at runtime; accepted in strict mode
    pub externs: FxHashSet<String>,
}

impl CompilerOptions {
    pub fn strict() -> Self {
        Self {
            strict_symbols: true,
            externs: FxHashSet::default(),
        }
    }

    pub fn with_externs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.externs.extend(names.into_iter().map(Into::into));
        self
    }
}

/// State owned by one compilation and shared by every function in it
struct CompileSession {
    symbols: SymbolTable,
    next_function_id: u32,
    next_hidden: u32,
}

impl CompileSession {
    fn function_id(&mut self) -> u32 {
        let id = self.next_function_id;
        self.next_function_id += 1;
        id
    }

    fn hidden_name(&mut self, prefix: &str) -> String {
        self.next_hidden += 1;
        format!("@{}#{}", prefix, self.next_hidden)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakableKind {
    Loop,
    Range,
    Switch,
}

/// An open loop or switch that may claim `break`/`continue`
struct Breakable {
    kind: BreakableKind,
    /// First instruction emitted for the construct
    window: usize,
    /// Scope depth at the break and continue targets
    depth: usize,
}

/// An open `try`, as seen by `break`/`continue` leaving it
struct TryCtx {
    /// `breakables.len()` when the try was entered
    breakable_level: usize,
    /// Handler still installed (the body is being compiled)
    in_body: bool,
    has_finally: bool,
}

/// Per-function emission state
struct Unit {
    codes: Vec<Code>,
    table: TableId,
    /// Table holding the function's parameters and top-level locals
    function_table: TableId,
    /// Scopes opened by this unit at the current point
    depth: usize,
    breakables: Vec<Breakable>,
    tries: Vec<TryCtx>,
}

impl Unit {
    fn new(table: TableId) -> Self {
        Self {
            codes: Vec::new(),
            table,
            function_table: table,
            depth: 0,
            breakables: Vec::new(),
            tries: Vec::new(),
        }
    }
}

pub struct Compiler {
    options: CompilerOptions,
    session: CompileSession,
    unit: Unit,
    errors: Vec<CompileError>,
    file: FileId,
    source: Option<SourceFile>,
}

impl Compiler {
    pub fn new(options: CompilerOptions) -> Self {
        Self {
            options,
            session: CompileSession {
                symbols: SymbolTable::new(),
                next_function_id: 0,
                next_hidden: 0,
            },
            unit: Unit::new(TableId::ROOT),
            errors: Vec::new(),
            file: FileId(0),
            source: None,
        }
    }

    /// Records the source so panic traces can quote it
    pub fn with_source(mut self, name: impl Into<String>, text: &str) -> Self {
        self.source = Some(SourceFile {
            name: name.into(),
            text: Some(Arc::from(text)),
        });
        self
    }

    /// Compiles a whole program
    pub fn compile(mut self, program: &Block) -> Result<Program, CompileErrors> {
        self.compile_stmts(&program.stmts);
        self.check_resolved();
        if !self.errors.is_empty() {
            debug!(errors = self.errors.len(), "compilation failed");
            return Err(CompileErrors(self.errors));
        }
        debug!(
            codes = self.unit.codes.len(),
            functions = self.session.next_function_id,
            symbols = self.session.symbols.symbol_count(),
            "compiled program"
        );
        let mut program = Program::new(self.unit.codes, self.session.symbols);
        program.files.extend(self.source);
        Ok(program)
    }

    /// Compiles one expression against an existing table, for evaluation in
    /// a live scope. The code returns the expression's value.
    pub fn compile_expression(
        symbols: SymbolTable,
        table: TableId,
        expr: &Expr,
    ) -> Result<(Vec<Code>, SymbolTable), CompileErrors> {
        let mut compiler = Self::new(CompilerOptions::default());
        compiler.session.symbols = symbols;
        compiler.unit = Unit::new(table);
        compiler.compile_expr(expr);
        compiler.emit(Code::new(Opcode::Return, expr.span).with_unary(1));
        compiler.check_resolved();
        if !compiler.errors.is_empty() {
            return Err(CompileErrors(compiler.errors));
        }
        Ok((compiler.unit.codes, compiler.session.symbols))
    }

    fn error(&mut self, err: CompileError) {
        self.errors.push(err);
    }

    fn emit(&mut self, mut code: Code) -> usize {
        code.file = self.file;
        self.unit.codes.push(code);
        self.unit.codes.len() - 1
    }

    fn emit_op(&mut self, opcode: Opcode, span: Span) -> usize {
        self.emit(Code::new(opcode, span))
    }

    fn emit_jump(&mut self, opcode: Opcode, span: Span) -> usize {
        self.emit(Code::new(opcode, span).with_unary(PLACEHOLDER))
    }

    fn emit_push(&mut self, constant: Constant, span: Span) -> usize {
        self.emit(Code::new(Opcode::Push, span).with_op1(constant))
    }

    fn here(&self) -> usize {
        self.unit.codes.len()
    }

    fn patch_jump(&mut self, index: usize, target: usize) {
        if let Some(code) = self.unit.codes.get_mut(index) {
            code.unary = target as i64;
        }
    }

    fn patch_to_here(&mut self, index: usize) {
        let target = self.here();
        self.patch_jump(index, target);
    }

    /// Opens a runtime scope for a new block table
    fn enter_scope(&mut self, span: Span) -> TableId {
        let table = self
            .session
            .symbols
            .new_child(self.unit.table, TableKind::Block);
        self.enter_table(table, span);
        table
    }

    /// Opens a runtime scope for a table created ahead of time
    fn enter_table(&mut self, table: TableId, span: Span) {
        self.emit(Code::new(Opcode::Scope, span).with_unary(table.0 as i64));
        self.unit.table = table;
        self.unit.depth += 1;
    }

    fn exit_scope(&mut self, span: Span) {
        self.emit_op(Opcode::ScopeEnd, span);
        if let Some(parent) = self.session.symbols.parent(self.unit.table) {
            self.unit.table = parent;
        }
        self.unit.depth = self.unit.depth.saturating_sub(1);
    }

    /// Resolves a name for reading
    fn resolve(&self, name: &str) -> Option<SymbolId> {
        self.session.symbols.resolve(self.unit.table, name)
    }

    /// Resolves an assignment target, declaring it in the function's
    /// top-level table when nothing visible has that name
    fn resolve_or_declare(&mut self, name: &str) -> SymbolId {
        match self.resolve(name) {
            Some(id) => id,
            None => self
                .session
                .symbols
                .declare(self.unit.function_table, name),
        }
    }

    fn declare_local(&mut self, name: &str) -> SymbolId {
        self.session.symbols.declare(self.unit.table, name)
    }

    /// Compiles code into a detached buffer, as used for deferred blocks.
    /// Loops, tries and scope depth of the enclosing code are not visible
    /// inside.
    fn detached(&mut self, f: impl FnOnce(&mut Self)) -> Arc<[Code]> {
        let table = self.unit.table;
        let function_table = self.unit.function_table;
        let saved = std::mem::replace(
            &mut self.unit,
            Unit {
                function_table,
                ..Unit::new(table)
            },
        );
        f(self);
        let unit = std::mem::replace(&mut self.unit, saved);
        Arc::from(unit.codes)
    }

    fn check_resolved(&mut self) {
        let unresolved: Vec<usize> = self
            .unit
            .codes
            .iter()
            .enumerate()
            .filter(|(_, code)| code.is_unresolved_jump())
            .map(|(index, _)| index)
            .collect();
        for index in unresolved {
            self.error(CompileError::UnresolvedJump { index });
        }
    }
}

#[cfg(test)]
#[path = "compiler_tests.rs"]
mod tests;
