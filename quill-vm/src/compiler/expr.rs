//! Expression lowering
//!
//! Every expression leaves exactly one value on the operand stack.

use super::{CompileError, Compiler};
use quill_bytecode::{Code, Constant, Opcode, SymbolId};
use quill_core::ast::{AssignMode, BinaryOp, Literal, UnaryOp};
use quill_core::{Expr, ExprKind, Span};
use std::sync::Arc;

impl Compiler {
    pub(super) fn compile_expr(&mut self, expr: &Expr) {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Literal(lit) => {
                let constant = self.literal(lit, span);
                self.emit_push(constant, span);
            }
            ExprKind::Ident(name) => self.compile_ident(name, span),
            ExprKind::Unary { op, operand } => {
                self.compile_expr(operand);
                match op {
                    UnaryOp::Recv => {
                        self.emit(Code::new(Opcode::Recv, span).with_unary(1));
                    }
                    UnaryOp::Not => {
                        self.emit_op(Opcode::Not, span);
                    }
                    UnaryOp::Neg => {
                        self.emit_op(Opcode::Neg, span);
                    }
                    UnaryOp::Plus => {
                        self.emit_op(Opcode::Plus, span);
                    }
                    UnaryOp::BitNot => {
                        self.emit_op(Opcode::BitNot, span);
                    }
                }
            }
            ExprKind::Binary { op, lhs, rhs } => self.compile_binary(*op, lhs, rhs, span),
            ExprKind::Ternary {
                cond,
                then,
                otherwise,
            } => {
                self.compile_expr(cond);
                let to_else = self.emit_jump(Opcode::JmpF, span);
                self.compile_expr(then);
                let to_end = self.emit_jump(Opcode::Jmp, span);
                self.patch_to_here(to_else);
                self.compile_expr(otherwise);
                self.patch_to_here(to_end);
            }
            ExprKind::Call {
                callee,
                args,
                spread,
            } => self.compile_call(callee, args, *spread, Opcode::Call, span),
            ExprKind::Member { object, name } => {
                self.compile_expr(object);
                self.emit(
                    Code::new(Opcode::Member, span).with_op1(Constant::String(Arc::from(name.as_str()))),
                );
            }
            ExprKind::Index { object, index } => {
                self.compile_expr(object);
                self.compile_expr(index);
                self.emit_op(Opcode::Index, span);
            }
            ExprKind::Slice {
                object,
                low,
                high,
                step,
            } => {
                self.compile_expr(object);
                for part in [low, high, step] {
                    match part {
                        Some(e) => self.compile_expr(e),
                        None => {
                            self.emit_push(Constant::Undefined, span);
                        }
                    }
                }
                self.emit_op(Opcode::SliceRange, span);
            }
            ExprKind::SliceLit(items) => {
                for item in items {
                    self.compile_expr(item);
                }
                self.emit(Code::new(Opcode::NewSlice, span).with_unary(items.len() as i64));
            }
            ExprKind::MapLit(entries) => {
                for (key, value) in entries {
                    self.compile_expr(key);
                    self.compile_expr(value);
                }
                self.emit(Code::new(Opcode::NewMap, span).with_unary(entries.len() as i64));
            }
            ExprKind::Function(lit) => self.compile_function(lit, None),
            ExprKind::Type(ty) => {
                self.emit_push(Constant::Type(ty.clone()), span);
            }
            ExprKind::Make { ty, args } => {
                self.emit_push(Constant::Type(ty.clone()), span);
                for arg in args {
                    self.compile_expr(arg);
                }
                self.emit(Code::new(Opcode::Make, span).with_unary(args.len() as i64));
            }
            ExprKind::Cast { ty, value } => {
                self.emit_push(Constant::Type(ty.clone()), span);
                self.compile_expr(value);
                self.emit_op(Opcode::TypeCast, span);
            }
            ExprKind::Recover => {
                self.emit_op(Opcode::Recover, span);
            }
            ExprKind::Panic(payload) => {
                self.compile_expr(payload);
                self.emit_op(Opcode::Panic, span);
                // never reached; keeps the one-value contract
                self.emit_push(Constant::Undefined, span);
            }
        }
    }

    fn compile_ident(&mut self, name: &str, span: Span) {
        if let Some(id) = self.resolve(name) {
            self.emit(Code::new(Opcode::PushRef, span).with_unary(id.as_operand()));
            return;
        }
        if self.options.strict_symbols && !self.options.externs.contains(name) {
            self.error(CompileError::UndefinedSymbol {
                name: name.to_string(),
                span,
            });
        }
        self.emit(Code::new(Opcode::PushId, span).with_op1(Constant::String(Arc::from(name))));
    }

    fn compile_binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr, span: Span) {
        match op {
            BinaryOp::And | BinaryOp::Or => {
                self.compile_expr(lhs);
                let jump = if op == BinaryOp::And {
                    Opcode::JmpFop
                } else {
                    Opcode::JmpTop
                };
                let short = self.emit_jump(jump, span);
                self.compile_expr(rhs);
                self.patch_to_here(short);
            }
            _ => {
                self.compile_expr(lhs);
                self.compile_expr(rhs);
                if let Some(opcode) = binary_opcode(op) {
                    self.emit_op(opcode, span);
                }
            }
        }
    }

    pub(super) fn compile_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        spread: bool,
        opcode: Opcode,
        span: Span,
    ) {
        self.compile_expr(callee);
        for arg in args {
            self.compile_expr(arg);
        }
        let mut code = Code::new(opcode, span).with_unary(args.len() as i64);
        if spread {
            code = code.with_op1(Constant::Bool(true));
        }
        self.emit(code);
    }

    /// Pushes an assignment target
    fn compile_target(&mut self, target: &Expr, mode: AssignMode) {
        let span = target.span;
        match &target.kind {
            ExprKind::Ident(name) if name == "_" => {
                self.emit(Code::new(Opcode::PushLeftRef, span).with_unary(0));
            }
            ExprKind::Ident(name) => {
                let id = match mode {
                    AssignMode::Declare => self.declare_local(name),
                    AssignMode::Assign => self.resolve_or_declare(name),
                };
                self.emit(Code::new(Opcode::PushLeftRef, span).with_unary(id.as_operand()));
            }
            ExprKind::Index { .. } | ExprKind::Member { .. } => self.compile_expr(target),
            _ => {
                self.error(CompileError::NotAssignable { span });
                self.emit(Code::new(Opcode::PushLeftRef, span).with_unary(0));
            }
        }
    }

    pub(super) fn compile_assign(
        &mut self,
        targets: &[Expr],
        values: &[Expr],
        mode: AssignMode,
        span: Span,
    ) {
        if values.len() != targets.len() && values.len() != 1 {
            self.error(CompileError::AssignMismatch {
                targets: targets.len(),
                values: values.len(),
                span,
            });
            return;
        }
        match values {
            [value] if targets.len() == 2 && is_recv(value) => {
                if let ExprKind::Unary { operand, .. } = &value.kind {
                    self.compile_expr(operand);
                }
                self.emit(Code::new(Opcode::Recv, value.span).with_unary(2));
            }
            _ => {
                for (i, value) in values.iter().enumerate() {
                    match (&value.kind, targets.get(i).map(|t| &t.kind)) {
                        (ExprKind::Function(lit), Some(ExprKind::Ident(name)))
                            if lit.name.is_none() && values.len() == targets.len() =>
                        {
                            self.compile_function(lit, Some(name));
                        }
                        _ => self.compile_expr(value),
                    }
                }
            }
        }
        for target in targets {
            self.compile_target(target, mode);
        }
        self.emit_assign(targets.len(), values.len(), span);
    }

    pub(super) fn compile_compound(&mut self, target: &Expr, op: BinaryOp, value: &Expr, span: Span) {
        let Some(opcode) = binary_opcode(op).and_then(Opcode::compound_of) else {
            self.error(CompileError::InvalidOperator {
                op: op.to_string(),
                span,
            });
            return;
        };
        self.compile_expr(value);
        self.compile_target(target, AssignMode::Assign);
        self.emit_op(opcode, span);
    }

    pub(super) fn compile_inc_dec(&mut self, target: &Expr, increment: bool, span: Span) {
        self.compile_target(target, AssignMode::Assign);
        let opcode = if increment {
            Opcode::PlusPlus
        } else {
            Opcode::MinusMinus
        };
        self.emit_op(opcode, span);
    }

    /// Pushes an assignment target for a loop variable
    pub(super) fn range_target(&mut self, target: &Expr, declare: bool) -> Option<SymbolId> {
        match &target.kind {
            ExprKind::Ident(name) if name == "_" => {
                self.emit(Code::new(Opcode::PushLeftRef, target.span).with_unary(0));
                None
            }
            ExprKind::Ident(name) => {
                let id = if declare {
                    self.declare_local(name)
                } else {
                    self.resolve_or_declare(name)
                };
                self.emit(Code::new(Opcode::PushLeftRef, target.span).with_unary(id.as_operand()));
                Some(id)
            }
            _ if declare => {
                self.error(CompileError::NotAssignable { span: target.span });
                None
            }
            _ => {
                self.compile_target(target, AssignMode::Assign);
                None
            }
        }
    }

    fn literal(&mut self, lit: &Literal, span: Span) -> Constant {
        match lit {
            Literal::Int(text) => match parse_int(text) {
                Ok(i) => Constant::Int(i),
                Err(reason) => self.malformed(text, reason, span),
            },
            Literal::Float(text) => match text.replace('_', "").parse::<f64>() {
                Ok(x) => Constant::Float(x),
                Err(e) => self.malformed(text, e.to_string(), span),
            },
            Literal::String(s) => Constant::String(Arc::from(s.as_str())),
            Literal::Bytes(b) => Constant::Bytes(Arc::from(b.as_slice())),
            Literal::Bool(b) => Constant::Bool(*b),
            Literal::Nil => Constant::Nil,
            Literal::Undefined => Constant::Undefined,
        }
    }

    fn malformed(&mut self, text: &str, reason: String, span: Span) -> Constant {
        self.error(CompileError::MalformedLiteral {
            text: text.to_string(),
            reason,
            span,
        });
        Constant::Undefined
    }
}

fn is_recv(expr: &Expr) -> bool {
    matches!(
        expr.kind,
        ExprKind::Unary {
            op: UnaryOp::Recv,
            ..
        }
    )
}

/// Integer literal text with an optional radix prefix and `_` separators
fn parse_int(text: &str) -> Result<i64, String> {
    let clean = text.replace('_', "");
    let lower = clean.to_ascii_lowercase();
    let (digits, radix) = if let Some(rest) = lower.strip_prefix("0x") {
        (rest, 16)
    } else if let Some(rest) = lower.strip_prefix("0o") {
        (rest, 8)
    } else if let Some(rest) = lower.strip_prefix("0b") {
        (rest, 2)
    } else {
        (lower.as_str(), 10)
    };
    if digits.is_empty() {
        return Err("missing digits".to_string());
    }
    i64::from_str_radix(digits, radix).map_err(|e| e.to_string())
}

pub(super) fn binary_opcode(op: BinaryOp) -> Option<Opcode> {
    Some(match op {
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Sub => Opcode::Sub,
        BinaryOp::Mul => Opcode::Mul,
        BinaryOp::Div => Opcode::Div,
        BinaryOp::Mod => Opcode::Mod,
        BinaryOp::BitAnd => Opcode::And,
        BinaryOp::BitOr => Opcode::Or,
        BinaryOp::BitXor => Opcode::Xor,
        BinaryOp::AndNot => Opcode::AndNot,
        BinaryOp::Shl => Opcode::Shl,
        BinaryOp::Shr => Opcode::Shr,
        BinaryOp::Eq => Opcode::Eq,
        BinaryOp::NotEq => Opcode::NotEq,
        BinaryOp::Lt => Opcode::Lt,
        BinaryOp::LtEq => Opcode::LtEq,
        BinaryOp::Gt => Opcode::Gt,
        BinaryOp::GtEq => Opcode::GtEq,
        BinaryOp::In => Opcode::In,
        BinaryOp::And | BinaryOp::Or => return None,
    })
}
