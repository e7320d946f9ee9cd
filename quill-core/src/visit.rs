//! The visitor contract shared by the compiler and analysis passes
//!
//! Implementors override the `visit_*` hooks they care about and call the
//! matching `walk_*` function to continue into children.

use crate::ast::*;
use crate::span::Span;

/// Nodes that know where they came from
pub trait Spanned {
    fn span(&self) -> Span;
}

impl Spanned for Stmt {
    fn span(&self) -> Span {
        self.span
    }
}

impl Spanned for Expr {
    fn span(&self) -> Span {
        self.span
    }
}

impl Spanned for Block {
    fn span(&self) -> Span {
        self.span
    }
}

impl Spanned for FunctionLit {
    fn span(&self) -> Span {
        self.span
    }
}

pub trait Visitor: Sized {
    fn visit_block(&mut self, block: &Block) {
        walk_block(self, block);
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }

    fn visit_function(&mut self, func: &FunctionLit) {
        self.visit_block(&func.body);
    }
}

pub fn walk_block<V: Visitor>(v: &mut V, block: &Block) {
    for stmt in &block.stmts {
        v.visit_stmt(stmt);
    }
}

pub fn walk_stmt<V: Visitor>(v: &mut V, stmt: &Stmt) {
    match &stmt.kind {
        StmtKind::Expr(e) | StmtKind::Go(e) => v.visit_expr(e),
        StmtKind::Assign {
            targets, values, ..
        } => {
            for e in values.iter().chain(targets) {
                v.visit_expr(e);
            }
        }
        StmtKind::Declare(_) => {}
        StmtKind::CompoundAssign { target, value, .. } => {
            v.visit_expr(value);
            v.visit_expr(target);
        }
        StmtKind::IncDec { target, .. } => v.visit_expr(target),
        StmtKind::Block(b) => v.visit_block(b),
        StmtKind::If {
            branches,
            otherwise,
        } => {
            for (cond, body) in branches {
                v.visit_expr(cond);
                v.visit_block(body);
            }
            if let Some(b) = otherwise {
                v.visit_block(b);
            }
        }
        StmtKind::For {
            init,
            cond,
            post,
            body,
        } => {
            if let Some(s) = init {
                v.visit_stmt(s);
            }
            if let Some(c) = cond {
                v.visit_expr(c);
            }
            if let Some(s) = post {
                v.visit_stmt(s);
            }
            v.visit_block(body);
        }
        StmtKind::ForRange {
            targets,
            subject,
            body,
            ..
        } => {
            v.visit_expr(subject);
            for t in targets {
                v.visit_expr(t);
            }
            v.visit_block(body);
        }
        StmtKind::Switch {
            subject,
            cases,
            default,
        } => {
            if let Some(s) = subject {
                v.visit_expr(s);
            }
            for case in cases {
                for e in &case.values {
                    v.visit_expr(e);
                }
                v.visit_block(&case.body);
            }
            if let Some(b) = default {
                v.visit_block(b);
            }
        }
        StmtKind::Break | StmtKind::Continue | StmtKind::Fallthrough => {}
        StmtKind::Return(values) => {
            for e in values {
                v.visit_expr(e);
            }
        }
        StmtKind::Defer(DeferBody::Call(e)) => v.visit_expr(e),
        StmtKind::Defer(DeferBody::Block(b)) => v.visit_block(b),
        StmtKind::Try {
            body,
            catch,
            finally,
        } => {
            v.visit_block(body);
            if let Some(c) = catch {
                v.visit_block(&c.body);
            }
            if let Some(f) = finally {
                v.visit_block(f);
            }
        }
        StmtKind::Assert { cond, message } => {
            v.visit_expr(cond);
            if let Some(m) = message {
                v.visit_expr(m);
            }
        }
        StmtKind::Function(f) => v.visit_function(f),
        StmtKind::Send { channel, value } => {
            v.visit_expr(channel);
            v.visit_expr(value);
        }
    }
}

pub fn walk_expr<V: Visitor>(v: &mut V, expr: &Expr) {
    match &expr.kind {
        ExprKind::Literal(_) | ExprKind::Ident(_) | ExprKind::Type(_) | ExprKind::Recover => {}
        ExprKind::Unary { operand, .. } => v.visit_expr(operand),
        ExprKind::Binary { lhs, rhs, .. } => {
            v.visit_expr(lhs);
            v.visit_expr(rhs);
        }
        ExprKind::Ternary {
            cond,
            then,
            otherwise,
        } => {
            v.visit_expr(cond);
            v.visit_expr(then);
            v.visit_expr(otherwise);
        }
        ExprKind::Call { callee, args, .. } => {
            v.visit_expr(callee);
            for a in args {
                v.visit_expr(a);
            }
        }
        ExprKind::Member { object, .. } => v.visit_expr(object),
        ExprKind::Index { object, index } => {
            v.visit_expr(object);
            v.visit_expr(index);
        }
        ExprKind::Slice {
            object,
            low,
            high,
            step,
        } => {
            v.visit_expr(object);
            for part in [low, high, step].into_iter().flatten() {
                v.visit_expr(part);
            }
        }
        ExprKind::SliceLit(items) => {
            for e in items {
                v.visit_expr(e);
            }
        }
        ExprKind::MapLit(pairs) => {
            for (k, val) in pairs {
                v.visit_expr(k);
                v.visit_expr(val);
            }
        }
        ExprKind::Function(f) => v.visit_function(f),
        ExprKind::Make { args, .. } => {
            for a in args {
                v.visit_expr(a);
            }
        }
        ExprKind::Cast { value, .. } | ExprKind::Panic(value) => v.visit_expr(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct IdentCounter(Vec<String>);

    impl Visitor for IdentCounter {
        fn visit_expr(&mut self, expr: &Expr) {
            if let ExprKind::Ident(name) = &expr.kind {
                self.0.push(name.clone());
            }
            walk_expr(self, expr);
        }
    }

    fn ident(name: &str) -> Expr {
        Expr::new(ExprKind::Ident(name.to_string()), Span::default())
    }

    #[test]
    fn walks_nested_expressions() {
        let call = Expr::new(
            ExprKind::Call {
                callee: Box::new(ident("f")),
                args: vec![
                    ident("a"),
                    Expr::new(
                        ExprKind::Binary {
                            op: BinaryOp::Add,
                            lhs: Box::new(ident("b")),
                            rhs: Box::new(ident("c")),
                        },
                        Span::default(),
                    ),
                ],
                spread: false,
            },
            Span::default(),
        );
        let block = Block::new(
            vec![Stmt::new(StmtKind::Expr(call), Span::default())],
            Span::default(),
        );
        let mut counter = IdentCounter(Vec::new());
        counter.visit_block(&block);
        assert_eq!(counter.0, vec!["f", "a", "b", "c"]);
    }
}
