use super::*;
use pretty_assertions::assert_eq;

fn compile_with(options: CompilerOptions, source: &str) -> Result<Program, CompileErrors> {
    let ast = quill_parser::parse(source).unwrap();
    Compiler::new(options).compile(&ast)
}

fn compile(source: &str) -> Program {
    compile_with(CompilerOptions::default(), source).unwrap()
}

fn errors(source: &str) -> Vec<CompileError> {
    compile_with(CompilerOptions::default(), source)
        .unwrap_err()
        .errors()
        .to_vec()
}

/// Every code array in the program, top level first
fn all_codes(program: &Program) -> Vec<Vec<Code>> {
    let mut out = vec![program.codes.clone()];
    out.extend(program.functions().into_iter().map(|f| f.codes.clone()));
    out
}

const SAMPLE: &str = r#"
func fib(n) {
    if n < 2 {
        return n
    }
    return fib(n - 1) + fib(n - 2)
}
total := 0
for i := 0; i < 10; i++ {
    switch i % 3 {
    case 0:
        continue
    case 1:
        fallthrough
    default:
        total += fib(i)
    }
}
for k, v := range {"a": 1} {
    try {
        if v > 0 {
            break
        }
    } catch e {
        println(e)
    } finally {
        total++
    }
}
"#;

#[test]
fn test_compilation_is_deterministic() {
    let a = compile(SAMPLE).to_bytes().unwrap();
    let b = compile(SAMPLE).to_bytes().unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_all_jumps_resolved_and_in_bounds() {
    let program = compile(SAMPLE);
    for codes in all_codes(&program) {
        for code in &codes {
            assert!(!code.is_unresolved_jump(), "unresolved: {}", code);
            if code.opcode.is_jump() && !matches!(code.opcode, Opcode::RangeNext | Opcode::InNext) {
                assert!((code.unary as usize) <= codes.len(), "out of bounds: {}", code);
            }
        }
    }
}

#[test]
fn test_break_leaves_scopes_opened_since_loop() {
    let program = compile("for i := 0; i < 3; i++ {\n    if i == 1 {\n        break\n    }\n}");
    let brk = program
        .codes
        .iter()
        .find(|c| c.opcode == Opcode::Break)
        .unwrap();
    // the if block and the loop body
    assert_eq!(brk.op1_int(), 2);
    // lands on the ScopeEnd closing the loop scope
    assert_eq!(program.codes[brk.unary as usize].opcode, Opcode::ScopeEnd);
}

#[test]
fn test_range_break_drops_iterator() {
    let program = compile("for x in [1] {\n    break\n}");
    let brk = program
        .codes
        .iter()
        .find(|c| c.opcode == Opcode::Break)
        .unwrap();
    assert_eq!(brk.op1_int(), 1);
    assert_eq!(brk.op2_int(), 1);
    assert_eq!(brk.unary as usize, program.codes.len());
}

#[test]
fn test_misplaced_break_and_continue() {
    assert!(matches!(
        errors("break").as_slice(),
        [CompileError::MisplacedControl { keyword: "break", .. }]
    ));
    // switch claims break but not continue
    let errs = errors("switch 1 {\ncase 1:\n    continue\n}");
    assert!(matches!(
        errs.as_slice(),
        [CompileError::MisplacedControl { keyword: "continue", .. }]
    ));
}

#[test]
fn test_fallthrough_only_ends_a_case() {
    let errs = errors("switch 1 {\ncase 1:\n    x := 1\ndefault:\n    fallthrough\n}");
    assert!(matches!(errs.as_slice(), [CompileError::MisplacedFallthrough { .. }]));
}

#[test]
fn test_strict_mode_reports_undefined_symbols() {
    let err = compile_with(CompilerOptions::strict(), "y := x + 1").unwrap_err();
    assert!(matches!(
        err.errors(),
        [CompileError::UndefinedSymbol { name, .. }] if name == "x"
    ));

    let options = CompilerOptions::strict().with_externs(["x"]);
    assert!(compile_with(options, "y := x + 1").is_ok());

    // without strict mode the name is looked up at runtime
    let program = compile("y := x + 1");
    assert!(program.codes.iter().any(|c| c.opcode == Opcode::PushId));
}

#[test]
fn test_malformed_literal() {
    let errs = errors("x := 99999999999999999999");
    assert!(matches!(errs.as_slice(), [CompileError::MalformedLiteral { .. }]));
}

#[test]
fn test_assignment_count_mismatch() {
    let errs = errors("a, b := 1, 2, 3");
    assert_eq!(
        errs.iter()
            .map(|e| matches!(e, CompileError::AssignMismatch { targets: 2, values: 3, .. }))
            .collect::<Vec<_>>(),
        vec![true]
    );
}

#[test]
fn test_defer_and_go_require_calls() {
    assert!(matches!(
        errors("func f() {\n    defer 1\n}").as_slice(),
        [CompileError::NotCallable { keyword: "defer", .. }]
    ));
}

#[test]
fn test_errors_are_collected() {
    let err = compile_with(CompilerOptions::default(), "break\ncontinue\na, b := 1, 2, 3").unwrap_err();
    assert_eq!(err.len(), 3);
    assert_eq!(err.to_string().lines().count(), 3);
}

#[test]
fn test_function_declarations_are_hoisted() {
    let program = compile("f()\nfunc f() {\n    return 1\n}");
    assert_eq!(program.codes[0].opcode, Opcode::Push);
    assert!(matches!(program.codes[0].op1, Some(Constant::Function(_))));
}

#[test]
fn test_hoisted_body_sees_later_declarations() {
    let program = compile("func f() {\n    count = 1\n}\ncount := 0");
    let root_count = program.symbols.lookup_local(TableId::ROOT, "count").unwrap();
    let f = program.functions()[0];
    let stored = f
        .codes
        .iter()
        .find(|c| c.opcode == Opcode::PushLeftRef)
        .unwrap();
    assert_eq!(stored.unary, root_count.as_operand());
}

#[test]
fn test_compile_expression_returns_value() {
    let program = compile("a := 1");
    let expr = quill_parser::parse_expression("a + 1").unwrap();
    let (codes, _) = Compiler::compile_expression(program.symbols, TableId::ROOT, &expr).unwrap();
    assert_eq!(
        codes.iter().map(|c| c.opcode).collect::<Vec<_>>(),
        vec![Opcode::PushRef, Opcode::Push, Opcode::Add, Opcode::Return]
    );
}
