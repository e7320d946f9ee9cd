//! Tests for the VM builder

use super::*;
use crate::engine::Engine;
use crate::native::NativeFunction;
use pretty_assertions::assert_eq;

fn run_on(vm: Vm, source: &str) -> String {
    Engine::with_vm(vm)
        .run(source)
        .map(|v| v.to_string())
        .unwrap_or_else(|e| format!("error: {}", e))
}

#[test]
fn test_builder_defaults() {
    let vm = VmBuilder::new().build().unwrap();
    assert_eq!(vm.config().max_call_depth, DEFAULT_MAX_CALL_DEPTH);
    assert!(vm.config().wait_on_exit);
    assert!(!vm.config().sandbox);
    assert!(vm.get_global("len").is_some());
}

#[test]
fn test_builder_rejects_zero_call_depth() {
    let err = VmBuilder::new().with_max_call_depth(0).build().unwrap_err();
    assert!(err.to_string().contains("max call depth"));
}

#[test]
fn test_builder_rejects_global_shadowing_native() {
    let err = VmBuilder::new()
        .with_global("len", Value::Int(1))
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("`len`"));
}

#[test]
fn test_builder_without_prelude() {
    let vm = VmBuilder::new()
        .without_prelude()
        .with_sandbox_mode(true)
        .build()
        .unwrap();
    assert!(vm.get_global("len").is_none());
    // unresolved names read as undefined and calling one panics
    let out = run_on(vm, "len([1, 2])");
    assert!(out.contains("call of nil function"), "{}", out);
}

#[test]
fn test_builder_native_overrides_prelude() {
    let vm = VmBuilder::new()
        .with_native(NativeFunction::fn1("len", |_: Value| 99i64))
        .build()
        .unwrap();
    assert_eq!(run_on(vm, "len([1, 2, 3])"), "99");
}

#[test]
fn test_builder_injects_globals_and_natives() {
    let vm = VmBuilder::new()
        .with_global("base", Value::Int(40))
        .with_native(NativeFunction::fn2("add", |a: i64, b: i64| a + b))
        .build()
        .unwrap();
    assert_eq!(run_on(vm.clone(), "add(base, 2)"), "42");
    let names = vm.global_names();
    assert!(names.contains(&"base".to_string()));
    assert!(names.contains(&"add".to_string()));
}

#[test]
fn test_builder_config_round_trip() {
    let config = VmConfig {
        max_call_depth: 7,
        check_balance: false,
        ..VmConfig::default()
    };
    let vm = VmBuilder::new()
        .with_config(config)
        .with_trace_mode(true)
        .build()
        .unwrap();
    assert_eq!(vm.config().max_call_depth, 7);
    assert!(vm.config().trace);
    assert!(!vm.config().check_balance);
}

#[test]
fn test_builder_shares_cancel_token() {
    let token = CancelToken::new();
    let vm = VmBuilder::new()
        .with_cancel_token(token.clone())
        .build()
        .unwrap();
    token.cancel();
    assert!(vm.cancel_token().is_cancelled());
}
