//! Execution tests for the dispatch loop

use super::*;
use crate::compiler::CompilerOptions;
use crate::engine::{Engine, EngineError};
use crate::native::NativeFunction;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::io;

/// Collects everything the VM prints
#[derive(Clone, Default)]
struct Output(Arc<Mutex<Vec<u8>>>);

impl Output {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn engine_with(builder: VmBuilder) -> (Engine, Output) {
    let out = Output::default();
    let vm = builder
        .with_balance_check(true)
        .with_output(Box::new(out.clone()))
        .build()
        .unwrap();
    (Engine::with_vm(vm), out)
}

fn engine() -> (Engine, Output) {
    engine_with(Vm::builder())
}

fn eval(source: &str) -> String {
    let (engine, _) = engine();
    engine.run(source).unwrap().to_string()
}

fn output(source: &str) -> String {
    let (engine, out) = engine();
    engine.run(source).unwrap();
    out.text()
}

fn panic_of(source: &str) -> VmPanic {
    let (engine, _) = engine();
    let err = engine.run(source).unwrap_err();
    err.as_panic().cloned().unwrap_or_else(|| panic!("expected a panic, got {}", err))
}

#[test]
fn test_run_compiled_program() {
    let ast = quill_parser::parse("1 + 1").unwrap();
    let program = Compiler::new(CompilerOptions::default()).compile(&ast).unwrap();
    let value = Vm::new().run(&program).unwrap();
    assert_eq!(value.as_int(), Some(2));
}

#[test]
fn test_last_expression_value() {
    assert_eq!(eval("x := 2\nx * 3"), "6");
    assert_eq!(eval("1 + 2 * 3 - 4 / 2"), "5");
}

#[test]
fn test_if_elif_else() {
    let source = r#"
x := 5
r := 0
if x < 3 {
    r = 1
} elif x < 10 {
    r = 2
} else {
    r = 3
}
r
"#;
    assert_eq!(eval(source), "2");
}

#[test]
fn test_for_loop_with_break_and_continue() {
    let source = r#"
total := 0
for i := 0; i < 10; i++ {
    if i == 2 {
        continue
    }
    if i == 5 {
        break
    }
    total += i
}
total
"#;
    assert_eq!(eval(source), "8");
}

#[test]
fn test_break_leaves_inner_loop_only() {
    let source = r#"
count := 0
for i := 0; i < 3; i++ {
    for j := 0; j < 3; j++ {
        if j == 1 {
            break
        }
        count++
    }
}
count
"#;
    assert_eq!(eval(source), "3");
}

#[test]
fn test_range_over_slice_map_and_int() {
    let source = r#"
s := 0
for i, v := range [10, 20, 30] {
    s += i * v
}
s
"#;
    assert_eq!(eval(source), "80");

    let source = r#"
m := {"b": 2, "a": 1, "c": 3}
ks := []
for k, v := range m {
    ks = append(ks, k)
}
ks
"#;
    assert_eq!(eval(source), "[a b c]");

    let source = r#"
sum := 0
for i = range 4 {
    sum += i
}
sum
"#;
    assert_eq!(eval(source), "6");
}

#[test]
fn test_break_out_of_range_closes_iterator() {
    let source = r#"
n := 0
for _, v := range [1, 2, 3, 4] {
    if v == 3 {
        break
    }
    n += v
}
n
"#;
    assert_eq!(eval(source), "3");
}

#[test]
fn test_closure_counter() {
    let source = r#"
func counter() {
    n := 0
    return func() {
        n++
        return n
    }
}
c := counter()
c()
c()
c()
"#;
    assert_eq!(eval(source), "3");
}

#[test]
fn test_multiple_return_values() {
    let source = r#"
func pair() {
    return 1, 2
}
a, b := pair()
a + b * 10
"#;
    assert_eq!(eval(source), "21");
}

#[test]
fn test_variadic_and_spread() {
    let source = r#"
func sum(xs...) {
    t := 0
    for _, x := range xs {
        t += x
    }
    return t
}
args := [4, 5]
sum(1, 2, 3) * 100 + sum(args...)
"#;
    assert_eq!(eval(source), "609");
}

#[test]
fn test_call_arity() {
    let p = panic_of("func f(a) {\n return a\n}\nf(1, 2)");
    assert!(p.payload.to_string().contains("expects 1 arguments"), "{}", p);

    assert_eq!(eval("func g(a, b) {\n return b\n}\ng(1)"), "undefined");
}

#[test]
fn test_logical_operators_short_circuit() {
    let source = r#"
calls := 0
func hit() {
    calls++
    return true
}
r := false && hit()
r2 := true || hit()
calls
"#;
    assert_eq!(eval(source), "0");
}

#[test]
fn test_compound_assignment_on_elements() {
    let source = r#"
m := {"a": 1}
m["a"] += 5
xs := [1, 2, 3]
xs[1]++
sprint(m["a"], xs)
"#;
    assert_eq!(eval(source), "6 [1 3 3]");
}

#[test]
fn test_switch_with_fallthrough() {
    let source = r#"
x := 0
switch 2 {
case 1:
    x = 10
case 2:
    x = 20
    fallthrough
case 3:
    x += 1
default:
    x = -1
}
x
"#;
    assert_eq!(eval(source), "21");
}

#[test]
fn test_defer_runs_in_reverse_order() {
    let source = r#"
func f() {
    defer println("first")
    defer println("second")
    println("body")
}
f()
"#;
    assert_eq!(output(source), "body\nsecond\nfirst\n");
}

#[test]
fn test_defer_arguments_evaluated_at_exit() {
    let source = r#"
func f() {
    x := 1
    defer println("deferred", x)
    x = 2
    println("body")
}
f()
"#;
    assert_eq!(output(source), "body\ndeferred 2\n");
}

#[test]
fn test_recover_in_defer() {
    let source = r#"
result := "none"
func safe() {
    defer {
        result = recover()
    }
    panic("boom")
    println("unreachable")
}
safe()
result
"#;
    let (engine, out) = engine();
    assert_eq!(engine.run(source).unwrap().to_string(), "boom");
    assert_eq!(out.text(), "");
}

#[test]
fn test_recover_outside_panic_is_nil() {
    assert_eq!(eval("func f() {\n defer {\n println(recover())\n }\n}\nf()\nrecover()"), "<nil>");
}

#[test]
fn test_panic_in_defer_replaces_pending_panic() {
    let source = r#"
func f() {
    defer {
        panic("second")
    }
    panic("first")
}
f()
"#;
    assert_eq!(panic_of(source).payload.to_string(), "second");
}

#[test]
fn test_try_catch_binds_payload() {
    let source = r#"
msg := ""
try {
    panic("bad")
} catch e {
    msg = "caught " + e
}
msg
"#;
    assert_eq!(eval(source), "caught bad");
}

#[test]
fn test_try_catch_finally_order() {
    let source = r#"
try {
    println("body")
    panic("x")
} catch e {
    println("catch", e)
} finally {
    println("finally")
}
println("after")
"#;
    assert_eq!(output(source), "body\ncatch x\nfinally\nafter\n");
}

#[test]
fn test_finally_without_catch_rethrows() {
    let source = r#"
try {
    panic("inner")
} finally {
    println("cleanup")
}
"#;
    let (engine, out) = engine();
    let err = engine.run(source).unwrap_err();
    assert_eq!(err.as_panic().map(|p| p.payload.to_string()), Some("inner".to_string()));
    assert_eq!(out.text(), "cleanup\n");
}

#[test]
fn test_break_runs_finally() {
    let source = r#"
for i := 0; i < 3; i++ {
    try {
        if i == 1 {
            break
        }
    } finally {
        println("finally", i)
    }
}
"#;
    assert_eq!(output(source), "finally 0\nfinally 1\n");
}

#[test]
fn test_stack_overflow_is_catchable() {
    let source = r#"
func down(n) {
    return down(n + 1)
}
msg := ""
try {
    down(0)
} catch e {
    msg = e
}
msg
"#;
    let (engine, _) = engine_with(Vm::builder().with_max_call_depth(16));
    assert_eq!(engine.run(source).unwrap().to_string(), "stack overflow");
}

const RUNAWAY: &str = "f = func(n) {\n    return f(n + 1)\n}\ntry {\n    f(0)\n} catch e {\n    e\n}";

#[test]
fn test_default_depth_is_caught_on_a_small_host_stack() {
    let handle = std::thread::spawn(|| {
        let (engine, _) = engine();
        engine.run(RUNAWAY).map(|v| v.to_string())
    });
    assert_eq!(handle.join().unwrap().unwrap(), "stack overflow");

    let handle = std::thread::Builder::new()
        .stack_size(256 * 1024)
        .spawn(|| {
            let (engine, _) = engine_with(Vm::builder().with_max_call_depth(1000));
            engine.run(RUNAWAY).map(|v| v.to_string())
        })
        .unwrap();
    assert_eq!(handle.join().unwrap().unwrap(), "stack overflow");
}

#[test]
fn test_host_call_recursion_is_caught() {
    let (engine, _) = engine();
    let scope = Scope::root();
    engine
        .run_in("func down(n) {\n    return down(n + 1)\n}", &scope)
        .unwrap();
    let down = engine.eval(&scope, "down").unwrap();
    let err = engine.vm().call(&down, vec![Value::Int(0)]).unwrap_err();
    assert_eq!(err.as_panic().unwrap().payload.to_string(), "stack overflow");
}

#[test]
fn test_assignment_mismatch_panics() {
    let p = panic_of("func one() {\n return 1\n}\na, b := one()");
    assert!(p.payload.to_string().contains("assignment mismatch"), "{}", p);
}

#[test]
fn test_index_out_of_range_trace() {
    let p = panic_of("xs := [1, 2]\nxs[5]");
    assert_eq!(p.payload.to_string(), "index out of range [5] with length 2");
    let origin = p.origin().unwrap();
    assert_eq!(origin.function, "main");
    assert_eq!(origin.span.start.line, 2);
    assert!(origin.snippet.as_deref().unwrap_or("").contains("xs[5]"));
}

#[test]
fn test_trace_grows_per_frame() {
    let source = "func inner() {\n panic(\"deep\")\n}\nfunc outer() {\n inner()\n}\nouter()";
    let p = panic_of(source);
    let names: Vec<&str> = p.trace.iter().map(|t| t.function.as_str()).collect();
    assert_eq!(names, vec!["inner", "outer", "main"]);
}

#[test]
fn test_trace_marks_defer_site() {
    let source = "func f() {\n    defer {\n        panic(\"late\")\n    }\n}\nf()";
    let p = panic_of(source);
    let lines: Vec<(&str, u32)> = p
        .trace
        .iter()
        .map(|t| (t.function.as_str(), t.span.start.line))
        .collect();
    // raised inside the block, registered on line 2, called from line 6
    assert_eq!(lines, vec![("f", 3), ("f", 2), ("main", 6)]);
}

#[test]
fn test_assert_message() {
    assert_eq!(panic_of("assert 1 == 2, \"nope\"").payload.to_string(), "nope");
    assert_eq!(panic_of("assert false").payload.to_string(), "assertion failed");
}

#[test]
fn test_buffered_channel_and_closed_receive() {
    let source = r#"
ch := make(chan int, 2)
ch <- 1
ch <- 2
close(ch)
a := <-ch
b := <-ch
v, ok := <-ch
sprint(a, b, v, ok)
"#;
    assert_eq!(eval(source), "1 2 <nil> false");
}

#[test]
fn test_go_unit_sends_result() {
    let source = r#"
ch := make(chan int)
func worker(n) {
    ch <- n * 2
}
go worker(21)
<-ch
"#;
    let (engine, _) = engine();
    assert_eq!(engine.run(source).unwrap().to_string(), "42");
    assert_eq!(engine.vm().spawned_async(), 1);
    assert_eq!(engine.vm().outstanding_async(), 0);
}

#[test]
fn test_runtime_globals() {
    let (engine, _) = engine();
    engine.vm().set_global("answer", Value::Int(41));
    assert_eq!(engine.run("answer + 1").unwrap().to_string(), "42");
    assert_eq!(engine.vm().get_global("answer").and_then(|v| v.as_int()), Some(41));
}

#[test]
fn test_host_calls_script_function() {
    let (engine, _) = engine();
    let scope = Scope::root();
    engine
        .run_in("func double(x) {\n return x * 2\n}", &scope)
        .unwrap();
    let double = engine.eval(&scope, "double").unwrap();
    let result = engine.vm().call(&double, vec![Value::Int(21)]).unwrap();
    assert_eq!(result.as_int(), Some(42));
}

#[test]
fn test_native_calls_back_into_script() {
    let twice = NativeFunction::new("twice", Some(2), |ctx, args| {
        let first = ctx.call(&args[0], vec![args[1].clone()])?;
        ctx.call(&args[0], vec![first])
    });
    let (engine, _) = engine_with(Vm::builder().with_native(twice));
    assert_eq!(engine.run("twice(func(x) {\n return x + 3\n}, 1)").unwrap().to_string(), "7");
}

#[test]
fn test_eval_in_live_scope() {
    let (engine, _) = engine();
    let scope = Scope::root();
    engine.run_in("a := 20\nb := 22", &scope).unwrap();
    assert_eq!(engine.eval(&scope, "a + b").unwrap().to_string(), "42");
}

#[test]
fn test_cancelled_vm_stops() {
    let (engine, _) = engine();
    engine.vm().cancel();
    let err = engine.run("1").unwrap_err();
    assert!(matches!(err, EngineError::Runtime(VmError::Cancelled)));
}

#[test]
fn test_blank_identifier_discards() {
    assert_eq!(eval("func pair() {\n return 1, 2\n}\n_, b := pair()\nb"), "2");
}

#[test]
fn test_slice_expressions() {
    assert_eq!(eval("xs := [1, 2, 3, 4, 5]\nxs[1:4]"), "[2 3 4]");
    assert_eq!(eval("xs := [1, 2, 3, 4, 5]\nxs[::2]"), "[1 3 5]");
    assert!(panic_of("xs := [1, 2]\nxs[::0]").payload.to_string().contains("step"));
}

#[test]
fn test_oversized_make_and_repeat_panic_in_script() {
    let msg = panic_of("x = make([]int, 9223372036854775807)").payload.to_string();
    assert!(msg.contains("out of range"), "{}", msg);
    let msg = panic_of("s := \"a\" * 9223372036854775807").payload.to_string();
    assert!(msg.contains("too large"), "{}", msg);
    assert_eq!(
        eval("msg := \"\"\ntry {\n    make(chan int, 9223372036854775807)\n} catch e {\n    msg = e\n}\nmsg"),
        "size 9223372036854775807 out of range in make"
    );
}

#[test]
fn test_missing_map_key_is_undefined() {
    assert_eq!(eval("m := {\"a\": 1}\nm[\"b\"]"), "undefined");
}
