//! Quill virtual machine
//!
//! Compiler from the `quill_core` AST to bytecode, and the stack-based VM
//! that runs it: scopes and closures, try/catch/finally, defer, iterators,
//! `go` units, channels and the native function bridge.

pub mod builder;
pub mod builtins;
pub mod channel;
pub mod compiler;
pub mod debug;
pub mod engine;
pub mod error;
pub mod frame;
pub mod iterator;
pub mod native;
pub mod operators;
pub mod scope;
pub mod tasks;
pub mod value;
pub mod vm;

pub use builder::{VmBuilder, VmConfig, DEFAULT_MAX_CALL_DEPTH};
pub use channel::Channel;
pub use compiler::{CompileError, CompileErrors, Compiler, CompilerOptions};
pub use debug::{BreakpointHook, DebugContext, DebugEvent, DebugHook};
pub use engine::{Engine, EngineError};
pub use error::{TraceEntry, VmError, VmPanic, VmResult};
pub use native::{NativeCall, NativeFunction};
pub use operators::{Dialect, OperatorTable};
pub use scope::{Binding, Scope};
pub use tasks::{CancelToken, TaskId};
pub use value::{from_value, FromValue, IntoValue, MapKey, ScriptFn, Value};
pub use vm::Vm;
