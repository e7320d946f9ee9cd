//! `go` units, channels and cancellation

mod common;

use anyhow::Result;
use common::{engine, engine_with};
use pretty_assertions::assert_eq;
use quill_vm::{CancelToken, EngineError, Scope, Vm, VmError};
use std::thread;
use std::time::Duration;

#[test]
fn test_go_side_effects_observed_once() -> Result<()> {
    let (engine, out) = engine()?;
    let scope = Scope::root();
    let source = r#"
count := 0
func bump() {
    count++
    println("bumped")
}
go bump()
"#;
    engine.run_in(source, &scope)?;
    // run waits for outstanding units before returning
    assert_eq!(engine.vm().outstanding_async(), 0);
    assert_eq!(engine.eval(&scope, "count")?.to_string(), "1");
    assert_eq!(out.text(), "bumped\n");
    Ok(())
}

#[test]
fn test_fan_in_over_channel() -> Result<()> {
    let source = r#"
results := make(chan int, 3)
func worker(n) {
    results <- n * n
}
for i = range 3 {
    go worker(i)
}
total := 0
for range 3 {
    total += <-results
}
total
"#;
    let (engine, _) = engine()?;
    assert_eq!(engine.run(source)?.to_string(), "5");
    assert_eq!(engine.vm().spawned_async(), 3);
    Ok(())
}

#[test]
fn test_range_over_channel_until_closed() -> Result<()> {
    let source = r#"
ch := make(chan int)
func produce() {
    defer close(ch)
    for i := 1; i <= 3; i++ {
        ch <- i
    }
}
go produce()
sum := 0
for v = range ch {
    sum += v
}
sum
"#;
    let (engine, _) = engine()?;
    assert_eq!(engine.run(source)?.to_string(), "6");
    Ok(())
}

#[test]
fn test_failed_unit_does_not_fail_main() -> Result<()> {
    let source = r#"
done := make(chan bool)
func bad() {
    defer {
        done <- true
    }
    panic("unit failure")
}
go bad()
<-done
"#;
    let (engine, _) = engine()?;
    assert_eq!(engine.run(source)?.to_string(), "true");
    Ok(())
}

#[test]
fn test_cancel_unblocks_receive() -> Result<()> {
    let token = CancelToken::new();
    let (engine, _) = engine_with(
        Vm::builder()
            .with_cancel_token(token.clone())
            .with_wait_on_exit(false),
    )?;
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        token.cancel();
    });
    let source = r#"
ch := make(chan int)
func spin() {
    for {
        sleep(5)
    }
}
go spin()
<-ch
"#;
    let err = engine.run(source).unwrap_err();
    canceller.join().unwrap();
    assert!(matches!(err, EngineError::Runtime(VmError::Cancelled)), "{}", err);
    // the spinning unit observes the same token
    assert!(engine.vm().wait_async_timeout(Duration::from_secs(5)));
    Ok(())
}

#[test]
fn test_cancelled_frames_skip_defers() -> Result<()> {
    let (engine, out) = engine()?;
    engine.vm().cancel();
    let err = engine
        .run("defer println(\"never\")\nprintln(\"never\")")
        .unwrap_err();
    assert!(err.to_string().contains("cancelled"));
    assert_eq!(out.text(), "");
    Ok(())
}

#[test]
fn test_runtime_globals_shared_with_units() -> Result<()> {
    let (engine, _) = engine()?;
    engine.vm().set_global("limit", 3i64.into());
    let source = r#"
out := make(chan int, 1)
func read() {
    out <- limit * 2
}
go read()
<-out
"#;
    assert_eq!(engine.run(source)?.to_string(), "6");
    Ok(())
}
