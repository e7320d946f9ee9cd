//! Compiled programs written to bytes and run again

mod common;

use anyhow::Result;
use common::engine;
use pretty_assertions::assert_eq;
use quill_bytecode::Program;

const CACHED: &str = r#"
func make_adder(n) {
    return func(x) {
        return x + n
    }
}
func guarded() {
    defer {
        r := recover()
        println("recovered", r)
    }
    panic(make_adder(1)(1))
}
add5 := make_adder(5)
guarded()
try {
    panic("caught")
} catch e {
    println(e)
} finally {
    println("done")
}
add5(37)
"#;

#[test]
fn test_program_round_trips_through_bytes() -> Result<()> {
    let (engine, out) = engine()?;
    let program = engine.compile(CACHED)?;
    let bytes = program.to_bytes()?;
    let restored = Program::from_bytes(&bytes)?;

    assert_eq!(restored.to_bytes()?, bytes);
    assert_eq!(restored.disassemble(), program.disassemble());
    assert_eq!(restored.functions().len(), program.functions().len());

    let value = engine.run_program(&restored)?;
    assert_eq!(value.to_string(), "42");
    assert_eq!(out.text(), "recovered 2\ncaught\ndone\n");
    Ok(())
}

#[test]
fn test_restored_program_keeps_source_for_traces() -> Result<()> {
    let (engine, _) = engine()?;
    let program = engine.compile_named("cached.q", "x := [1]\nx[3]")?;
    let restored = Program::from_bytes(&program.to_bytes()?)?;
    let err = engine.run_program(&restored).unwrap_err();
    let origin = err.as_panic().and_then(|p| p.origin().cloned()).unwrap();
    assert_eq!(origin.file.as_deref(), Some("cached.q"));
    assert!(origin.snippet.unwrap_or_default().contains("x[3]"));
    Ok(())
}

#[test]
fn test_corrupt_bytes_are_rejected() -> Result<()> {
    let (engine, _) = engine()?;
    let mut bytes = engine.compile("1")?.to_bytes()?;
    bytes[0] = b'X';
    assert!(Program::from_bytes(&bytes).is_err());
    assert!(Program::from_bytes(&bytes[..3]).is_err());
    Ok(())
}
