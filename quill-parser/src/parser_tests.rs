use super::*;
use pretty_assertions::assert_eq;

fn program(src: &str) -> Block {
    Parser::new(src).unwrap().parse_program().unwrap()
}

fn stmt(src: &str) -> StmtKind {
    let mut block = program(src);
    assert_eq!(block.stmts.len(), 1, "expected one statement in {src:?}");
    block.stmts.remove(0).kind
}

fn expr(src: &str) -> ExprKind {
    Parser::new(src)
        .unwrap()
        .parse_standalone_expression()
        .unwrap()
        .kind
}

fn ident(e: &Expr) -> &str {
    match &e.kind {
        ExprKind::Ident(name) => name,
        other => panic!("expected identifier, got {other:?}"),
    }
}

#[test]
fn test_precedence() {
    let ExprKind::Binary { op, lhs, rhs } = expr("1 + 2 * 3") else {
        panic!("expected binary");
    };
    assert_eq!(op, BinaryOp::Add);
    assert!(matches!(lhs.kind, ExprKind::Literal(Literal::Int(ref t)) if t == "1"));
    assert!(matches!(rhs.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));

    let ExprKind::Binary { op, .. } = expr("a || b && c == d") else {
        panic!("expected binary");
    };
    assert_eq!(op, BinaryOp::Or);
}

#[test]
fn test_ternary_and_unary() {
    let ExprKind::Ternary { cond, .. } = expr("!ok ? -1 : 2") else {
        panic!("expected ternary");
    };
    assert!(matches!(cond.kind, ExprKind::Unary { op: UnaryOp::Not, .. }));
    assert!(matches!(expr("<-ch"), ExprKind::Unary { op: UnaryOp::Recv, .. }));
}

#[test]
fn test_postfix_chain() {
    let ExprKind::Call { callee, args, spread } = expr("obj.items[0](x, rest...)") else {
        panic!("expected call");
    };
    assert_eq!(args.len(), 2);
    assert!(spread);
    let ExprKind::Index { object, .. } = callee.kind else {
        panic!("expected index");
    };
    assert!(matches!(object.kind, ExprKind::Member { ref name, .. } if name == "items"));
}

#[test]
fn test_slice_expression() {
    let ExprKind::Slice { low, high, step, .. } = expr("a[1:]") else {
        panic!("expected slice");
    };
    assert!(low.is_some());
    assert!(high.is_none());
    assert!(step.is_none());
    assert!(matches!(expr("a[::2]"), ExprKind::Slice { low: None, high: None, step: Some(_), .. }));
}

#[test]
fn test_literals() {
    assert!(matches!(expr("[1, 2, 3]"), ExprKind::SliceLit(ref v) if v.len() == 3));
    assert!(matches!(expr("[]"), ExprKind::SliceLit(ref v) if v.is_empty()));
    assert!(matches!(expr("{\"a\": 1, \"b\": 2}"), ExprKind::MapLit(ref v) if v.len() == 2));
    assert!(matches!(expr("{}"), ExprKind::MapLit(ref v) if v.is_empty()));
    assert!(matches!(expr("b\"hi\""), ExprKind::Literal(Literal::Bytes(_))));
    assert!(matches!(expr("nil"), ExprKind::Literal(Literal::Nil)));
}

#[test]
fn test_types_make_and_casts() {
    let ExprKind::Make { ty, args } = expr("make(chan int, 4)") else {
        panic!("expected make");
    };
    assert_eq!(ty, TypeExpr::Chan(Box::new(TypeExpr::Int)));
    assert_eq!(args.len(), 1);

    let ExprKind::Make { ty, .. } = expr("make(map[string][]int)") else {
        panic!("expected make");
    };
    assert_eq!(
        ty,
        TypeExpr::Map(
            Box::new(TypeExpr::String),
            Box::new(TypeExpr::Slice(Box::new(TypeExpr::Int)))
        )
    );

    assert!(matches!(expr("string(42)"), ExprKind::Cast { ty: TypeExpr::String, .. }));
    assert!(matches!(expr("[]int"), ExprKind::Type(TypeExpr::Slice(_))));
}

#[test]
fn test_function_literal() {
    let ExprKind::Function(f) = expr("func(a, rest...) { return a }") else {
        panic!("expected function");
    };
    assert!(f.name.is_none());
    assert!(f.variadic);
    assert_eq!(f.params.len(), 2);
    assert_eq!(f.body.stmts.len(), 1);
}

#[test]
fn test_assignments() {
    let StmtKind::Assign { targets, values, mode } = stmt("a, b := 1, 2") else {
        panic!("expected assign");
    };
    assert_eq!(mode, AssignMode::Declare);
    assert_eq!(targets.len(), 2);
    assert_eq!(values.len(), 2);

    assert!(matches!(
        stmt("m[\"k\"] &^= 3"),
        StmtKind::CompoundAssign { op: BinaryOp::AndNot, .. }
    ));
    assert!(matches!(stmt("x++"), StmtKind::IncDec { increment: true, .. }));
    assert!(matches!(stmt("ch <- 1"), StmtKind::Send { .. }));
    assert!(matches!(stmt("var a, b"), StmtKind::Declare(ref v) if v.len() == 2));
    assert!(matches!(
        stmt("var a = 1"),
        StmtKind::Assign { mode: AssignMode::Declare, .. }
    ));
}

#[test]
fn test_if_chain() {
    let StmtKind::If { branches, otherwise } = stmt("if a { x }\nelif b { y }\nelse if c { z } else { w }")
    else {
        panic!("expected if");
    };
    assert_eq!(branches.len(), 3);
    assert!(otherwise.is_some());
}

#[test]
fn test_for_forms() {
    assert!(matches!(
        stmt("for { break }"),
        StmtKind::For { init: None, cond: None, post: None, .. }
    ));
    assert!(matches!(
        stmt("for i < 3 { i++ }"),
        StmtKind::For { init: None, cond: Some(_), post: None, .. }
    ));
    assert!(matches!(
        stmt("for i := 0; i < 3; i++ { }"),
        StmtKind::For { init: Some(_), cond: Some(_), post: Some(_), .. }
    ));

    let StmtKind::ForRange { targets, mode, declare, .. } = stmt("for k, v in m { }") else {
        panic!("expected range");
    };
    assert_eq!(mode, RangeMode::In);
    assert!(declare);
    assert_eq!(targets.iter().map(ident).collect::<Vec<_>>(), vec!["k", "v"]);

    let StmtKind::ForRange { targets, mode, declare, .. } = stmt("for i = range 3 { }") else {
        panic!("expected range");
    };
    assert_eq!(mode, RangeMode::Range);
    assert!(!declare);
    assert_eq!(targets.len(), 1);

    assert!(matches!(
        stmt("for range ch { }"),
        StmtKind::ForRange { ref targets, .. } if targets.is_empty()
    ));
}

#[test]
fn test_switch() {
    let src = "switch x {\ncase 1, 2:\n  a()\n  fallthrough\ncase 3:\ndefault:\n  b()\n}";
    let StmtKind::Switch { subject, cases, default } = stmt(src) else {
        panic!("expected switch");
    };
    assert!(subject.is_some());
    assert_eq!(cases.len(), 2);
    assert_eq!(cases[0].values.len(), 2);
    assert!(matches!(cases[0].body.stmts[1].kind, StmtKind::Fallthrough));
    assert!(cases[1].body.stmts.is_empty());
    assert_eq!(default.map(|b| b.stmts.len()), Some(1));
}

#[test]
fn test_try_defer_go_assert() {
    let StmtKind::Try { catch, finally, .. } = stmt("try { f() }\ncatch e { g(e) }\nfinally { h() }") else {
        panic!("expected try");
    };
    assert_eq!(catch.and_then(|c| c.binding).map(|b| b.name), Some("e".to_string()));
    assert!(finally.is_some());

    assert!(matches!(stmt("defer { x = 1 }"), StmtKind::Defer(DeferBody::Block(_))));
    assert!(matches!(stmt("defer close(ch)"), StmtKind::Defer(DeferBody::Call(_))));
    assert!(matches!(stmt("go worker(1)"), StmtKind::Go(_)));
    assert!(matches!(stmt("assert x > 0, \"positive\""), StmtKind::Assert { message: Some(_), .. }));
}

#[test]
fn test_named_function_statement() {
    let StmtKind::Function(f) = stmt("func add(a, b) {\n  return a + b\n}") else {
        panic!("expected function");
    };
    assert_eq!(f.name.map(|n| n.name), Some("add".to_string()));
}

#[test]
fn test_errors() {
    let err = Parser::new("a = ").unwrap().parse_program().unwrap_err();
    assert!(matches!(err, ParseError::UnexpectedEof { .. }));

    let err = Parser::new("go 1").unwrap().parse_program().unwrap_err();
    assert!(matches!(err, ParseError::InvalidSyntax { .. }));

    let err = Parser::new("try { }").unwrap().parse_program().unwrap_err();
    assert!(err.to_string().contains("catch"));

    let err = Parser::new("x y").unwrap().parse_program().unwrap_err();
    assert!(matches!(err, ParseError::UnexpectedToken { .. }));

    assert!(matches!(Parser::new("a @ b"), Err(ParseError::InvalidToken(_))));
}

#[test]
fn test_depth_limit() {
    let src = format!("{}1{}", "(".repeat(40), ")".repeat(40));
    let err = Parser::new(&src)
        .unwrap()
        .with_max_depth(16)
        .parse_program()
        .unwrap_err();
    assert!(matches!(err, ParseError::MaxDepthExceeded { max_depth: 16, .. }));
}
