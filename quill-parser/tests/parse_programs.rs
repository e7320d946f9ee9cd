//! Whole-program parsing tests

use anyhow::Result;
use quill_core::ast::{ExprKind, StmtKind};
use quill_core::visit::{walk_expr, Visitor};
use quill_core::Expr;
use quill_parser::{parse, parse_expression};

/// Counts call expressions anywhere in a tree
#[derive(Default)]
struct CallCounter(usize);

impl Visitor for CallCounter {
    fn visit_expr(&mut self, expr: &Expr) {
        if matches!(expr.kind, ExprKind::Call { .. }) {
            self.0 += 1;
        }
        walk_expr(self, expr);
    }
}

const WORKERS: &str = r#"
// fan out over a channel and collect results
results := make(chan int, 3)
func worker(n) {
    defer {
        r := recover()
        if r != nil {
            println("recovered", r)
        }
    }
    results <- n * n
}

for i = range 3 {
    go worker(i)
}

total := 0
for range 3 {
    total += <-results
}
assert total == 5, "unexpected total"
"#;

#[test]
fn parses_worker_program() -> Result<()> {
    let block = parse(WORKERS)?;
    let kinds: Vec<&str> = block
        .stmts
        .iter()
        .map(|s| match &s.kind {
            StmtKind::Assign { .. } => "assign",
            StmtKind::Function(_) => "func",
            StmtKind::ForRange { .. } => "range",
            StmtKind::CompoundAssign { .. } => "compound",
            StmtKind::Assert { .. } => "assert",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, vec!["assign", "func", "range", "assign", "range", "assert"]);

    let mut counter = CallCounter::default();
    counter.visit_block(&block);
    // println, worker
    assert_eq!(counter.0, 2);
    Ok(())
}

#[test]
fn spans_point_at_source_lines() -> Result<()> {
    let block = parse("a := 1\n\nb := a + 2\n")?;
    assert_eq!(block.stmts[0].span.start.line, 1);
    assert_eq!(block.stmts[1].span.start.line, 3);
    assert_eq!(block.stmts[1].span.start.column, 1);
    Ok(())
}

#[test]
fn multiline_literals_and_calls() -> Result<()> {
    let src = "m := {\n  \"a\": 1,\n  \"b\": [\n    1,\n    2,\n  ],\n}\nf(\n  m,\n  2,\n)\n";
    let block = parse(src)?;
    assert_eq!(block.stmts.len(), 2);
    Ok(())
}

#[test]
fn semicolons_separate_statements() -> Result<()> {
    let block = parse("a := 1; b := 2; c := a + b")?;
    assert_eq!(block.stmts.len(), 3);
    Ok(())
}

#[test]
fn expression_entry_point() -> Result<()> {
    let expr = parse_expression("  x * (y + 1)\n")?;
    assert!(matches!(expr.kind, ExprKind::Binary { .. }));
    assert!(parse_expression("x = 1").is_err());
    Ok(())
}

#[test]
fn block_comments_between_statements() -> Result<()> {
    let src = "/* header\n   spans lines */\na := /* inline */ 1\nb := a // trailing\n";
    let block = parse(src)?;
    assert_eq!(block.stmts.len(), 2);
    assert_eq!(block.stmts[0].span.start.line, 3);
    assert!(parse("a := 1 /* open").is_err());
    Ok(())
}
