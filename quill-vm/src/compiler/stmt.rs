//! Statement lowering

use super::{CompileError, Compiler};
use quill_bytecode::{Code, Constant, Opcode};
use quill_core::ast::{DeferBody, ExprKind, FunctionLit, Ident};
use quill_core::{Block, Span, Stmt, StmtKind};
use std::sync::Arc;

impl Compiler {
    /// Compiles a statement list in the current table.
    ///
    /// Named function declarations are bound before anything else so they
    /// may call each other regardless of order. Their bodies are compiled
    /// last and patched into the binding `Push`, so they resolve every name
    /// the block declares.
    pub(super) fn compile_stmts(&mut self, stmts: &[Stmt]) {
        let mut hoisted = Vec::new();
        for stmt in stmts {
            if let StmtKind::Function(lit) = &stmt.kind {
                if let Some(name) = &lit.name {
                    let id = self.declare_local(&name.name);
                    hoisted.push((id, lit, stmt.span));
                }
            }
        }
        let mut pending = Vec::with_capacity(hoisted.len());
        for (id, lit, span) in hoisted {
            let at = self.emit_push(Constant::Undefined, span);
            self.emit(Code::new(Opcode::PushLeftRef, span).with_unary(id.as_operand()));
            self.emit_assign(1, 1, span);
            pending.push((at, lit));
        }
        for stmt in stmts {
            if matches!(&stmt.kind, StmtKind::Function(lit) if lit.name.is_some()) {
                continue;
            }
            self.compile_stmt(stmt);
        }
        for (at, lit) in pending {
            let function = self.build_function(lit, None);
            if let Some(code) = self.unit.codes.get_mut(at) {
                code.op1 = Some(Constant::Function(Arc::new(function)));
            }
        }
    }

    /// A braced block in its own scope
    pub(super) fn compile_scoped_block(&mut self, block: &Block) {
        self.enter_scope(block.span);
        self.compile_stmts(&block.stmts);
        self.exit_scope(block.span);
    }

    pub(super) fn compile_stmt(&mut self, stmt: &Stmt) {
        let span = stmt.span;
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.compile_expr(expr);
                self.emit_op(Opcode::Pop, span);
            }
            StmtKind::Assign {
                targets,
                values,
                mode,
            } => self.compile_assign(targets, values, *mode, span),
            StmtKind::Declare(names) => self.compile_declare(names),
            StmtKind::CompoundAssign { target, op, value } => {
                self.compile_compound(target, *op, value, span)
            }
            StmtKind::IncDec { target, increment } => {
                self.compile_inc_dec(target, *increment, span)
            }
            StmtKind::Block(block) => self.compile_scoped_block(block),
            StmtKind::If {
                branches,
                otherwise,
            } => self.compile_if(branches, otherwise.as_ref(), span),
            StmtKind::For {
                init,
                cond,
                post,
                body,
            } => self.compile_for(init.as_deref(), cond.as_ref(), post.as_deref(), body, span),
            StmtKind::ForRange {
                targets,
                mode,
                declare,
                subject,
                body,
            } => self.compile_range(targets, *mode, *declare, subject, body, span),
            StmtKind::Switch {
                subject,
                cases,
                default,
            } => self.compile_switch(subject.as_ref(), cases, default.as_ref(), span),
            StmtKind::Break => self.compile_break(span),
            StmtKind::Continue => self.compile_continue(span),
            StmtKind::Fallthrough => self.error(CompileError::MisplacedFallthrough { span }),
            StmtKind::Return(values) => {
                for value in values {
                    self.compile_expr(value);
                }
                self.emit(Code::new(Opcode::Return, span).with_unary(values.len() as i64));
            }
            StmtKind::Defer(body) => self.compile_defer(body, span),
            StmtKind::Go(expr) => match &expr.kind {
                ExprKind::Call {
                    callee,
                    args,
                    spread,
                } => self.compile_call(callee, args, *spread, Opcode::AsyncCall, expr.span),
                _ => self.error(CompileError::NotCallable {
                    keyword: "go",
                    span,
                }),
            },
            StmtKind::Try {
                body,
                catch,
                finally,
            } => self.compile_try(body, catch.as_ref(), finally.as_ref(), span),
            StmtKind::Assert { cond, message } => {
                self.compile_expr(cond);
                if let Some(message) = message {
                    self.compile_expr(message);
                }
                let arity = if message.is_some() { 2 } else { 1 };
                self.emit(Code::new(Opcode::Assert, span).with_unary(arity));
            }
            StmtKind::Function(lit) => self.compile_function_stmt(lit, span),
            StmtKind::Send { channel, value } => {
                self.compile_expr(channel);
                self.compile_expr(value);
                self.emit_op(Opcode::SendChan, span);
            }
        }
    }

    /// `var a, b`: each name starts out undefined
    fn compile_declare(&mut self, names: &[Ident]) {
        for name in names {
            let id = self.declare_local(&name.name);
            self.emit_push(Constant::Undefined, name.span);
            self.emit(Code::new(Opcode::PushLeftRef, name.span).with_unary(id.as_operand()));
            self.emit_assign(1, 1, name.span);
        }
    }

    /// Anonymous function statements evaluate and discard the literal
    fn compile_function_stmt(&mut self, lit: &FunctionLit, span: Span) {
        match &lit.name {
            Some(name) => {
                let id = self.declare_local(&name.name);
                self.compile_function(lit, None);
                self.emit(Code::new(Opcode::PushLeftRef, span).with_unary(id.as_operand()));
                self.emit_assign(1, 1, span);
            }
            None => {
                self.compile_function(lit, None);
                self.emit_op(Opcode::Pop, span);
            }
        }
    }

    /// `defer f(x)` runs the whole call at exit, arguments included
    fn compile_defer(&mut self, body: &DeferBody, span: Span) {
        let codes = match body {
            DeferBody::Call(expr) => {
                if !matches!(expr.kind, ExprKind::Call { .. }) {
                    self.error(CompileError::NotCallable {
                        keyword: "defer",
                        span,
                    });
                    return;
                }
                self.detached(|c| {
                    c.compile_expr(expr);
                    c.emit_op(Opcode::Pop, span);
                })
            }
            DeferBody::Block(block) => self.detached(|c| c.compile_scoped_block(block)),
        };
        self.emit(Code::new(Opcode::Defer, span).with_op1(Constant::Block(codes)));
    }

    pub(super) fn emit_assign(&mut self, targets: usize, values: usize, span: Span) {
        self.emit(
            Code::new(Opcode::Assign, span)
                .with_unary(targets as i64)
                .with_op1(Constant::Int(values as i64)),
        );
    }
}
