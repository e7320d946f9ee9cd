//! Branches, loops, switch and try
//!
//! Loop and switch lowerings register a [`Breakable`] before compiling their
//! body. `break`/`continue` emit placeholder jumps carrying the scope depth
//! at the jump site in `op1`; closing the construct rewrites `op1` into the
//! number of scopes to leave.

use super::{Breakable, BreakableKind, CompileError, Compiler, TryCtx, PLACEHOLDER};
use quill_bytecode::{Code, Constant, Opcode, TableKind};
use quill_core::ast::{CatchClause, RangeMode, SwitchCase};
use quill_core::{Block, Expr, Span, Stmt, StmtKind};

impl Compiler {
    pub(super) fn compile_if(&mut self, branches: &[(Expr, Block)], otherwise: Option<&Block>, span: Span) {
        let mut to_end = Vec::with_capacity(branches.len());
        for (cond, body) in branches {
            self.compile_expr(cond);
            let next = self.emit_jump(Opcode::JmpF, cond.span);
            self.compile_scoped_block(body);
            to_end.push(self.emit_jump(Opcode::Jmp, span));
            self.patch_to_here(next);
        }
        if let Some(block) = otherwise {
            self.compile_scoped_block(block);
        }
        for jump in to_end {
            self.patch_to_here(jump);
        }
    }

    /// `for init; cond; post {}` opens a scope for the loop variables;
    /// a condition-only or bare loop does not
    pub(super) fn compile_for(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        post: Option<&Stmt>,
        body: &Block,
        span: Span,
    ) {
        let window = self.here();
        let clauses = init.is_some() || post.is_some();
        if clauses {
            self.enter_scope(span);
        }
        if let Some(init) = init {
            self.compile_stmt(init);
        }

        let head = self.here();
        let exit = cond.map(|cond| {
            self.compile_expr(cond);
            self.emit_jump(Opcode::JmpF, cond.span)
        });
        self.open_breakable(BreakableKind::Loop, window);
        self.compile_scoped_block(body);

        let next = self.here();
        if let Some(post) = post {
            self.compile_stmt(post);
        }
        self.emit(Code::new(Opcode::Jmp, span).with_unary(head as i64));
        if let Some(exit) = exit {
            self.patch_to_here(exit);
        }
        let after = self.here();
        self.close_breakable(after, next);
        if clauses {
            self.exit_scope(span);
        }
    }

    /// `for k, v = range xs {}` and `for a, b in xs {}`
    pub(super) fn compile_range(
        &mut self,
        targets: &[Expr],
        mode: RangeMode,
        declare: bool,
        subject: &Expr,
        body: &Block,
        span: Span,
    ) {
        self.compile_expr(subject);
        self.emit_op(Opcode::EnterFR, span);

        let head = self.here();
        let advance = match mode {
            RangeMode::Range => Opcode::RangeNext,
            RangeMode::In => Opcode::InNext,
        };
        let next = self.emit(
            Code::new(advance, span)
                .with_unary(targets.len() as i64)
                .with_op1(Constant::Int(PLACEHOLDER)),
        );
        self.open_breakable(BreakableKind::Range, head);

        self.enter_scope(body.span);
        if !targets.is_empty() {
            for target in targets {
                self.range_target(target, declare);
            }
            self.emit_assign(targets.len(), targets.len(), span);
        }
        self.compile_stmts(&body.stmts);
        self.exit_scope(body.span);
        self.emit(Code::new(Opcode::Jmp, span).with_unary(head as i64));

        let exit = self.here();
        if let Some(code) = self.unit.codes.get_mut(next) {
            code.op1 = Some(Constant::Int(exit as i64));
        }
        self.emit_op(Opcode::ExitFR, span);
        let after = self.here();
        self.close_breakable(after, head);
    }

    /// Case values are compared against a hidden variable holding the
    /// subject. A switch without a subject tests each case value for truth.
    pub(super) fn compile_switch(
        &mut self,
        subject: Option<&Expr>,
        cases: &[SwitchCase],
        default: Option<&Block>,
        span: Span,
    ) {
        let window = self.here();
        self.enter_scope(span);

        let hidden = subject.map(|subject| {
            let name = self.session.hidden_name("switch");
            let id = self.declare_local(&name);
            self.compile_expr(subject);
            self.emit(Code::new(Opcode::PushLeftRef, subject.span).with_unary(id.as_operand()));
            self.emit_assign(1, 1, subject.span);
            id
        });

        let mut tests: Vec<Vec<usize>> = Vec::with_capacity(cases.len());
        for case in cases {
            let mut jumps = Vec::with_capacity(case.values.len());
            for value in &case.values {
                if let Some(id) = hidden {
                    self.emit(Code::new(Opcode::PushRef, value.span).with_unary(id.as_operand()));
                    self.compile_expr(value);
                    self.emit_op(Opcode::Eq, value.span);
                } else {
                    self.compile_expr(value);
                }
                jumps.push(self.emit_jump(Opcode::JmpT, value.span));
            }
            tests.push(jumps);
        }
        let no_match = self.emit_jump(Opcode::Jmp, span);
        self.open_breakable(BreakableKind::Switch, window);

        let mut starts = Vec::with_capacity(cases.len());
        let mut to_end = Vec::with_capacity(cases.len());
        let mut fallthroughs = Vec::new();
        for (i, case) in cases.iter().enumerate() {
            starts.push(self.here());
            if let Some(jump) = self.compile_case_body(&case.body, true) {
                fallthroughs.push((jump, i));
            }
            to_end.push(self.emit_jump(Opcode::Jmp, case.span));
        }
        let default_start = default.map(|block| {
            let start = self.here();
            self.compile_case_body(block, false);
            start
        });
        let end = self.here();

        for (jumps, start) in tests.iter().zip(&starts) {
            for jump in jumps {
                self.patch_jump(*jump, *start);
            }
        }
        self.patch_jump(no_match, default_start.unwrap_or(end));
        for (jump, case) in fallthroughs {
            let target = starts
                .get(case + 1)
                .copied()
                .or(default_start)
                .unwrap_or(end);
            self.patch_jump(jump, target);
        }
        for jump in to_end {
            self.patch_jump(jump, end);
        }
        self.close_breakable(end, end);
        self.exit_scope(span);
    }

    /// Returns the fallthrough jump when the body ends with one
    fn compile_case_body(&mut self, body: &Block, allow_fallthrough: bool) -> Option<usize> {
        self.enter_scope(body.span);
        let (stmts, fallthrough) = match body.stmts.split_last() {
            Some((last, rest)) if allow_fallthrough && matches!(last.kind, StmtKind::Fallthrough) => {
                (rest, Some(last.span))
            }
            _ => (body.stmts.as_slice(), None),
        };
        self.compile_stmts(stmts);
        let jump = fallthrough.map(|span| {
            self.emit(
                Code::new(Opcode::Continue, span)
                    .with_unary(PLACEHOLDER)
                    .with_op1(Constant::Int(1)),
            )
        });
        self.exit_scope(body.span);
        jump
    }

    /// Installs a handler around `body`. The finally block is registered as
    /// a deferred block first, so it also runs if the frame is left early.
    pub(super) fn compile_try(
        &mut self,
        body: &Block,
        catch: Option<&CatchClause>,
        finally: Option<&Block>,
        span: Span,
    ) {
        if let Some(block) = finally {
            let codes = self.detached(|c| c.compile_scoped_block(block));
            self.emit(Code::new(Opcode::Finally, block.span).with_op1(Constant::Block(codes)));
        }

        let catch_table = self
            .session
            .symbols
            .new_child(self.unit.table, TableKind::Block);
        let err_id = catch
            .and_then(|c| c.binding.as_ref())
            .map(|name| self.session.symbols.declare(catch_table, &name.name));
        let handler = self.emit(
            Code::new(Opcode::CatchError, span)
                .with_op1(Constant::Int(PLACEHOLDER))
                .with_op2(Constant::Int(err_id.map_or(0, |id| id.as_operand()))),
        );

        self.unit.tries.push(TryCtx {
            breakable_level: self.unit.breakables.len(),
            in_body: true,
            has_finally: finally.is_some(),
        });
        self.compile_scoped_block(body);
        self.emit_op(Opcode::StopCatchError, span);
        let to_after = self.emit_jump(Opcode::Jmp, span);

        let catch_pc = self.here();
        if let Some(code) = self.unit.codes.get_mut(handler) {
            code.op1 = Some(Constant::Int(catch_pc as i64));
        }
        if let Some(ctx) = self.unit.tries.last_mut() {
            ctx.in_body = false;
        }
        match catch {
            Some(clause) => {
                self.enter_table(catch_table, clause.body.span);
                self.compile_stmts(&clause.body.stmts);
                self.exit_scope(clause.body.span);
            }
            None => {
                if finally.is_some() {
                    self.emit_op(Opcode::RunFinally, span);
                }
                self.emit_op(Opcode::Rethrow, span);
            }
        }
        self.unit.tries.pop();

        self.patch_to_here(to_after);
        if finally.is_some() {
            self.emit_op(Opcode::RunFinally, span);
        }
    }

    pub(super) fn compile_break(&mut self, span: Span) {
        let Some(target) = self.unit.breakables.len().checked_sub(1) else {
            self.error(CompileError::MisplacedControl {
                keyword: "break",
                span,
            });
            return;
        };
        self.leave_tries(target, span);
        self.emit_control(Opcode::Break, span);
    }

    pub(super) fn compile_continue(&mut self, span: Span) {
        let Some(target) = self
            .unit
            .breakables
            .iter()
            .rposition(|b| b.kind != BreakableKind::Switch)
        else {
            self.error(CompileError::MisplacedControl {
                keyword: "continue",
                span,
            });
            return;
        };
        self.leave_tries(target, span);
        self.emit_control(Opcode::Continue, span);
    }

    fn emit_control(&mut self, opcode: Opcode, span: Span) {
        let depth = self.unit.depth as i64;
        self.emit(
            Code::new(opcode, span)
                .with_unary(PLACEHOLDER)
                .with_op1(Constant::Int(depth)),
        );
    }

    /// Uninstalls handlers and runs finally blocks of tries a jump to
    /// breakable `target` leaves, innermost first
    fn leave_tries(&mut self, target: usize, span: Span) {
        let crossed: Vec<(bool, bool)> = self
            .unit
            .tries
            .iter()
            .rev()
            .take_while(|t| t.breakable_level > target)
            .map(|t| (t.in_body, t.has_finally))
            .collect();
        for (in_body, has_finally) in crossed {
            if in_body {
                self.emit_op(Opcode::StopCatchError, span);
            }
            if has_finally {
                self.emit_op(Opcode::RunFinally, span);
            }
        }
    }

    fn open_breakable(&mut self, kind: BreakableKind, window: usize) {
        let depth = self.unit.depth;
        self.unit.breakables.push(Breakable {
            kind,
            window,
            depth,
        });
    }

    /// Claims the unresolved `break`/`continue` jumps emitted since the
    /// construct opened. Nested constructs have already patched theirs.
    fn close_breakable(&mut self, break_target: usize, continue_target: usize) {
        let Some(b) = self.unit.breakables.pop() else {
            return;
        };
        let start = b.window.min(self.unit.codes.len());
        for code in &mut self.unit.codes[start..] {
            if code.unary >= 0 {
                continue;
            }
            let target = match code.opcode {
                Opcode::Break => break_target,
                Opcode::Continue if b.kind != BreakableKind::Switch => continue_target,
                _ => continue,
            };
            let site = code.op1_int();
            code.unary = target as i64;
            code.op1 = Some(Constant::Int(site - b.depth as i64));
            if b.kind == BreakableKind::Range && code.opcode == Opcode::Break {
                code.op2 = Some(Constant::Int(1));
            }
        }
    }
}
