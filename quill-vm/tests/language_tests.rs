//! End-to-end language behavior

mod common;

use anyhow::Result;
use common::{engine, run, run_output};
use pretty_assertions::assert_eq;
use quill_vm::Scope;

#[test]
fn test_map_iteration_is_sorted() -> Result<()> {
    let source = r#"
m := {"c": 3, "a": 1, "b": 2}
for k, v in m {
    println(k, v)
}
"#;
    assert_eq!(run_output(source)?, "a 1\nb 2\nc 3\n");
    Ok(())
}

#[test]
fn test_break_leaves_no_scopes() -> Result<()> {
    let source = r#"
for i = 0; i < 5; i++ {
    if i == 2 {
        break
    }
}
i
"#;
    // balance checking is on, so leaked scopes would fail the run
    assert_eq!(run(source)?, "2");
    Ok(())
}

#[test]
fn test_finally_runs_once_after_catch() -> Result<()> {
    let source = r#"
try {
    panic("x")
} catch e {
    println("catch")
} finally {
    println("finally")
}
try {
    println("quiet body")
} catch e {
    println("catch")
} finally {
    println("finally")
}
"#;
    assert_eq!(
        run_output(source)?,
        "catch\nfinally\nquiet body\nfinally\n"
    );
    Ok(())
}

#[test]
fn test_closures_share_loop_variable() -> Result<()> {
    let source = r#"
var get, set
for i := 0; i < 1; i++ {
    get = func() {
        return i
    }
    set = func(v) {
        i = v
    }
}
set(41)
get() + 1
"#;
    assert_eq!(run(source)?, "42");
    Ok(())
}

#[test]
fn test_closures_share_block_variable() -> Result<()> {
    let source = r#"
fs := []
for n := 0; n < 2; n++ {
    v := n * 10
    inc := func() {
        v++
    }
    get := func() {
        return v
    }
    inc()
    inc()
    fs = append(fs, get)
}
sprint(fs[0](), fs[1]())
"#;
    assert_eq!(run(source)?, "2 12");
    Ok(())
}

#[test]
fn test_range_over_slice_binds_element() -> Result<()> {
    let source = r#"
a = [1, 2, 3]
sum = 0
for i = range a {
    sum += i
}
sum
"#;
    assert_eq!(run(source)?, "6");
    Ok(())
}

#[test]
fn test_switch_fallthrough_reaches_next_case() -> Result<()> {
    let source = r#"
x := -1
switch 2 {
case 1:
case 2:
    fallthrough
case 3:
    x = 1
default:
    x = 0
}
x
"#;
    assert_eq!(run(source)?, "1");
    Ok(())
}

#[test]
fn test_switch_without_subject() -> Result<()> {
    let source = r#"
func grade(n) {
    switch {
    case n >= 90:
        return "a"
    case n >= 80:
        return "b"
    }
    return "c"
}
sprint(grade(95), grade(85), grade(10))
"#;
    assert_eq!(run(source)?, "a b c");
    Ok(())
}

#[test]
fn test_break_inside_switch_inside_loop() -> Result<()> {
    let source = r#"
hits := 0
for i := 0; i < 4; i++ {
    switch i {
    case 1:
        break
    case 2:
        continue
    }
    hits++
}
hits
"#;
    // break leaves only the switch; continue skips to the next iteration
    assert_eq!(run(source)?, "3");
    Ok(())
}

#[test]
fn test_in_unpacks_pairs() -> Result<()> {
    let source = r#"
total := 0
for a, b in [[1, 2], [3, 4]] {
    total += a * b
}
total
"#;
    assert_eq!(run(source)?, "14");
    Ok(())
}

#[test]
fn test_mutual_recursion_of_hoisted_functions() -> Result<()> {
    let source = r#"
func even(n) {
    if n == 0 {
        return true
    }
    return odd(n - 1)
}
func odd(n) {
    if n == 0 {
        return false
    }
    return even(n - 1)
}
sprint(even(10), odd(7))
"#;
    assert_eq!(run(source)?, "true true");
    Ok(())
}

#[test]
fn test_uncaught_panic_renders_trace() -> Result<()> {
    let (engine, _) = engine()?;
    let err = engine
        .run("func boom() {\n    panic(\"kaboom\")\n}\nboom()")
        .unwrap_err();
    let text = err.to_string();
    assert!(text.starts_with("panic: kaboom"), "{}", text);
    assert!(text.contains("at boom (main:2:"), "{}", text);
    assert!(text.contains("at main (main:4:"), "{}", text);
    assert!(text.contains("panic(\"kaboom\")"), "{}", text);
    assert!(text.contains('^'), "{}", text);
    Ok(())
}

#[test]
fn test_values_survive_across_runs_in_one_scope() -> Result<()> {
    let (engine, _) = engine()?;
    let scope = Scope::root();
    engine.run_in("items := [1, 2]", &scope)?;
    assert_eq!(engine.eval(&scope, "len(items)")?.to_string(), "2");
    Ok(())
}

#[test]
fn test_string_conversions_and_builtins() -> Result<()> {
    let source = r#"
s := string(42) + "!"
n := int("7") + 1
sprint(s, n, typeof(n), len("héllo"), keys({"y": 1, "x": 2}))
"#;
    assert_eq!(run(source)?, "42! 8 int 5 [x y]");
    Ok(())
}
