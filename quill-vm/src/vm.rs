//! The dispatch loop
//!
//! A [`Vm`] is a cheap handle on shared runtime state. Every call runs in a
//! fresh [`Frame`] on the calling thread; `go` calls run on their own
//! thread with their own [`TaskState`].

use crate::builder::{VmBuilder, VmConfig};
use crate::builtins;
use crate::channel::{RecvOutcome, SendOutcome};
use crate::compiler::Compiler;
use crate::debug::{DebugContext, DebugHook};
use crate::engine::EngineError;
use crate::error::{TraceEntry, VmError, VmPanic, VmResult};
use crate::frame::{DeferKind, Deferred, Frame, Handler};
use crate::iterator::{Advance, Iter, Step};
use crate::native::NativeCall;
use crate::operators::{self, OperatorTable};
use crate::scope::Scope;
use crate::tasks::{CancelToken, TaskId, TaskTracker};
use crate::value::{Closure, MapKey, Place, Value};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use quill_bytecode::{Code, Constant, FileId, Opcode, Program, SourceFile, SymbolId, SymbolTable, TableId};
use quill_core::span::{highlight, Span};
use rustc_hash::FxHashMap;
use std::cell::Cell;
use std::io::Write;
use std::panic;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Minimum native stack for threads running script code
const UNIT_STACK_SIZE: usize = 8 * 1024 * 1024;

/// Native stack reserved per nested script call
const CALL_STACK_BUDGET: usize = 48 * 1024;

thread_local! {
    /// Set on threads whose stack was sized by [`Vm::script_stack_size`]
    static ON_SCRIPT_STACK: Cell<bool> = const { Cell::new(false) };
}

pub(crate) struct Runtime {
    config: VmConfig,
    ops: &'static OperatorTable,
    natives: FxHashMap<String, Value>,
    globals: FxHashMap<String, Value>,
    runtime_globals: DashMap<String, Value>,
    tasks: TaskTracker,
    cancel: CancelToken,
    hook: Option<Arc<dyn DebugHook>>,
    /// Symbols and sources of the program run last
    symbols: RwLock<Arc<SymbolTable>>,
    files: RwLock<Arc<[SourceFile]>>,
    output: Mutex<Box<dyn Write + Send>>,
}

#[derive(Clone)]
pub struct Vm {
    rt: Arc<Runtime>,
}

/// State of one execution unit: the main program or a `go` call
pub struct TaskState {
    pub(crate) id: TaskId,
    pub(crate) depth: usize,
    /// One slot per running deferred call holding the panic it may recover
    pub(crate) recover: Vec<Option<Box<VmPanic>>>,
    pub(crate) symbols: Arc<SymbolTable>,
    pub(crate) files: Arc<[SourceFile]>,
    pub(crate) hooks: bool,
}

impl TaskState {
    pub(crate) fn new(id: TaskId, symbols: Arc<SymbolTable>, files: Arc<[SourceFile]>) -> Self {
        Self {
            id,
            depth: 0,
            recover: Vec::new(),
            symbols,
            files,
            hooks: true,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }
}

enum Flow {
    Next,
    Jump(usize),
    Return(Value),
    Raise(Box<VmPanic>),
}

/// Marks an async unit finished even if its thread unwinds
struct UnitGuard(Vm);

impl Drop for UnitGuard {
    fn drop(&mut self) {
        self.0.rt.tasks.finish();
    }
}

impl Vm {
    pub fn builder() -> VmBuilder {
        VmBuilder::new()
    }

    /// A VM with the default configuration and the prelude natives
    pub fn new() -> Self {
        Self::from_parts(
            VmConfig::default(),
            builtins::prelude(),
            FxHashMap::default(),
            None,
            CancelToken::new(),
            Box::new(std::io::stdout()),
        )
    }

    pub(crate) fn from_parts(
        config: VmConfig,
        natives: FxHashMap<String, Value>,
        globals: FxHashMap<String, Value>,
        hook: Option<Arc<dyn DebugHook>>,
        cancel: CancelToken,
        output: Box<dyn Write + Send>,
    ) -> Self {
        let ops = OperatorTable::for_dialect(config.dialect);
        Self {
            rt: Arc::new(Runtime {
                config,
                ops,
                natives,
                globals,
                runtime_globals: DashMap::new(),
                tasks: TaskTracker::new(),
                cancel,
                hook,
                symbols: RwLock::new(Arc::new(SymbolTable::new())),
                files: RwLock::new(Arc::from(Vec::new())),
                output: Mutex::new(output),
            }),
        }
    }

    pub fn config(&self) -> &VmConfig {
        &self.rt.config
    }

    pub fn operators(&self) -> &'static OperatorTable {
        self.rt.ops
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.rt.cancel
    }

    /// Stops every frame of this VM before its next instruction
    pub fn cancel(&self) {
        self.rt.cancel.cancel();
    }

    /// Sets a runtime global visible to every unit
    pub fn set_global(&self, name: impl Into<String>, value: Value) {
        self.rt.runtime_globals.insert(name.into(), value);
    }

    pub fn get_global(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.rt.runtime_globals.get(name) {
            return Some(v.clone());
        }
        self.rt
            .globals
            .get(name)
            .or_else(|| self.rt.natives.get(name))
            .cloned()
    }

    /// Names resolvable without a script declaration
    pub fn global_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .rt
            .natives
            .keys()
            .chain(self.rt.globals.keys())
            .cloned()
            .chain(self.rt.runtime_globals.iter().map(|e| e.key().clone()))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Blocks until every `go` unit has finished
    pub fn wait_async(&self) {
        self.rt.tasks.wait();
    }

    pub fn wait_async_timeout(&self, timeout: Duration) -> bool {
        self.rt.tasks.wait_timeout(timeout)
    }

    pub fn outstanding_async(&self) -> usize {
        self.rt.tasks.outstanding()
    }

    pub fn spawned_async(&self) -> usize {
        self.rt.tasks.spawned()
    }

    pub(crate) fn write_output(&self, text: &str) -> VmResult<()> {
        let mut out = self.rt.output.lock();
        out.write_all(text.as_bytes())
            .and_then(|_| out.flush())
            .map_err(|e| VmError::panic(format!("write failed: {}", e)))
    }

    /// Runs a program in a fresh root scope
    pub fn run(&self, program: &Program) -> VmResult<Value> {
        self.run_in(program, &Scope::root())
    }

    /// Runs a program in `scope`; a host can reuse one scope across runs
    pub fn run_in(&self, program: &Program, scope: &Arc<Scope>) -> VmResult<Value> {
        self.on_script_stack(|| self.run_program_in(program, scope))
    }

    fn run_program_in(&self, program: &Program, scope: &Arc<Scope>) -> VmResult<Value> {
        let symbols = Arc::new(program.symbols.clone());
        let files: Arc<[SourceFile]> = Arc::from(program.files.clone());
        *self.rt.symbols.write() = symbols.clone();
        *self.rt.files.write() = files.clone();

        debug!(codes = program.codes.len(), "running program");
        let mut task = TaskState::new(TaskId::MAIN, symbols, files);
        let mut frame = Frame::new(scope.clone(), None);
        let result = self.run_codes(&mut task, &mut frame, &program.codes);
        let explicit = matches!(result, Ok(Some(_)));
        let result = self.finish_frame(&mut task, &mut frame, result)?;

        if self.rt.config.wait_on_exit {
            self.wait_async();
        }
        if self.rt.config.check_balance && !explicit {
            frame.check_balance(scope)?;
        }
        Ok(result.unwrap_or(frame.last))
    }

    /// Calls a function value from host code
    pub fn call(&self, callee: &Value, args: Vec<Value>) -> VmResult<Value> {
        let symbols = self.rt.symbols.read().clone();
        let files = self.rt.files.read().clone();
        self.on_script_stack(move || {
            let mut task = TaskState::new(TaskId::MAIN, symbols, files);
            self.call_value(&mut task, callee, args)
        })
    }

    /// Compiles `source` as an expression and evaluates it against a live scope
    pub fn eval_in_scope(
        &self,
        scope: &Arc<Scope>,
        symbols: &SymbolTable,
        source: &str,
    ) -> Result<Value, EngineError> {
        let expr = quill_parser::parse_expression(source)?;
        let (codes, symbols) = Compiler::compile_expression(symbols.clone(), scope.table(), &expr)?;
        let files = self.rt.files.read().clone();
        let value = self.on_script_stack(move || {
            let mut task = TaskState::new(TaskId::MAIN, Arc::new(symbols), files);
            task.hooks = false;
            let mut frame = Frame::new(scope.clone(), None);
            let result = self.run_codes(&mut task, &mut frame, &codes);
            self.finish_frame(&mut task, &mut frame, result)
        })?;
        Ok(value.unwrap_or_default())
    }

    /// Native stack large enough for `max_call_depth` nested script calls
    fn script_stack_size(&self) -> usize {
        self.rt
            .config
            .max_call_depth
            .saturating_mul(CALL_STACK_BUDGET)
            .max(UNIT_STACK_SIZE)
    }

    /// Runs `f` on a thread whose stack fits the call depth guard, unless the
    /// current thread already is one
    fn on_script_stack<T, F>(&self, f: F) -> VmResult<T>
    where
        T: Send,
        F: FnOnce() -> VmResult<T> + Send,
    {
        if ON_SCRIPT_STACK.with(Cell::get) {
            return f();
        }
        thread::scope(|s| {
            let handle = thread::Builder::new()
                .name("quill-main".into())
                .stack_size(self.script_stack_size())
                .spawn_scoped(s, || {
                    ON_SCRIPT_STACK.with(|flag| flag.set(true));
                    f()
                })
                .map_err(|e| VmError::panic(format!("cannot start script thread: {}", e)))?;
            handle.join().unwrap_or_else(|payload| panic::resume_unwind(payload))
        })
    }

    /// [`eval_in_scope`](Self::eval_in_scope) with the symbols of the last run program
    pub fn eval(&self, scope: &Arc<Scope>, source: &str) -> Result<Value, EngineError> {
        let symbols = self.rt.symbols.read().clone();
        self.eval_in_scope(scope, &symbols, source)
    }

    pub(crate) fn call_value(
        &self,
        task: &mut TaskState,
        callee: &Value,
        args: Vec<Value>,
    ) -> VmResult<Value> {
        match callee {
            Value::Function(closure) => self.call_function(task, closure, args),
            Value::Native(native) => {
                let mut ctx = NativeCall { vm: self, task };
                native.invoke(&mut ctx, args)
            }
            Value::Nil | Value::Undefined => Err(VmError::panic("call of nil function")),
            other => Err(VmError::panic(format!(
                "cannot call {} value",
                other.type_name()
            ))),
        }
    }

    fn call_function(
        &self,
        task: &mut TaskState,
        closure: &Closure,
        args: Vec<Value>,
    ) -> VmResult<Value> {
        if task.depth >= self.rt.config.max_call_depth {
            return Err(VmError::panic("stack overflow"));
        }
        let func = &closure.function;
        let parent = closure
            .scope()
            .ok_or_else(|| VmError::invariant("closure outlived its defining scope"))?;
        let scope = Scope::child(&parent, func.table);

        let fixed = if func.variadic {
            func.params.len().saturating_sub(1)
        } else {
            func.params.len()
        };
        if !func.variadic && args.len() > fixed {
            return Err(VmError::panic(format!(
                "{} expects {} arguments, got {}",
                func.display_name(),
                fixed,
                args.len()
            )));
        }
        let mut args = args.into_iter();
        for id in &func.params[..fixed] {
            scope.define(*id, args.next().unwrap_or_default());
        }
        if func.variadic {
            if let Some(id) = func.params.last() {
                scope.define(*id, Value::slice(args.collect()));
            }
        }

        task.depth += 1;
        let mut frame = Frame::new(scope, Some(func.clone()));
        let result = self.run_codes(task, &mut frame, &func.codes);
        let result = self.finish_frame(task, &mut frame, result);
        task.depth -= 1;
        Ok(result?.unwrap_or_default())
    }

    /// Executes `codes` on `frame`. `Ok(Some(v))` means an explicit return.
    pub(crate) fn run_codes(
        &self,
        task: &mut TaskState,
        frame: &mut Frame,
        codes: &[Code],
    ) -> VmResult<Option<Value>> {
        let mut pc = 0;
        while pc < codes.len() {
            if self.rt.cancel.is_cancelled() {
                return Err(VmError::Cancelled);
            }
            let code = &codes[pc];
            if let Some(hook) = &self.rt.hook {
                if task.hooks {
                    hook.on_instruction(&DebugContext {
                        vm: self,
                        task: task.id,
                        pc,
                        codes,
                        function: frame.function.as_ref(),
                        scope: &frame.scope,
                        stack_depth: frame.stack.len(),
                        symbols: &task.symbols,
                    });
                }
            }
            if self.rt.config.trace {
                trace!(task = %task.id, pc, depth = frame.stack.len(), "{}", code);
            }

            let flow = match self.step(task, frame, code) {
                Ok(flow) => flow,
                Err(VmError::Panic(mut panic)) => {
                    panic.trace.push(self.trace_entry(task, frame, code));
                    Flow::Raise(panic)
                }
                Err(e) => return Err(e),
            };
            match flow {
                Flow::Next => pc += 1,
                Flow::Jump(target) => pc = target,
                Flow::Return(value) => return Ok(Some(value)),
                Flow::Raise(panic) => pc = self.unwind(task, frame, panic)?,
            }
        }
        Ok(None)
    }

    fn trace_entry(&self, task: &TaskState, frame: &Frame, code: &Code) -> TraceEntry {
        self.trace_at(task, frame, code.span, code.file)
    }

    fn trace_at(&self, task: &TaskState, frame: &Frame, span: Span, file: FileId) -> TraceEntry {
        let source = task.files.get(file.0 as usize);
        TraceEntry {
            function: frame.function_name(),
            file: source.map(|s| s.name.clone()),
            span,
            snippet: source
                .and_then(|s| s.text.as_deref())
                .and_then(|text| highlight(text, span)),
        }
    }

    /// Hands a panic to the innermost handler installed at the current
    /// level, returning its catch address.
    fn unwind(&self, task: &mut TaskState, frame: &mut Frame, panic: Box<VmPanic>) -> VmResult<usize> {
        let catches = frame
            .handlers
            .last()
            .map_or(false, |h| h.level == frame.level);
        if !catches {
            return Err(VmError::Panic(panic));
        }
        let handler = frame
            .handlers
            .pop()
            .ok_or_else(|| VmError::invariant("handler vanished"))?;
        frame.stack.truncate(handler.stack_len);
        frame.iters.truncate(handler.iter_len);
        frame.scope = handler.scope.clone();

        // finally blocks of tries nested in the protected body
        let mut panic = panic;
        loop {
            let start = handler.defers_len.min(frame.defers.len());
            let Some(pos) = frame.defers[start..]
                .iter()
                .rposition(|d| d.kind == DeferKind::Finally)
            else {
                break;
            };
            let deferred = frame.defers.remove(start + pos);
            match self.run_deferred(task, frame, deferred) {
                Ok(()) => {}
                Err(VmError::Panic(p)) => panic = p,
                Err(e) => return Err(e),
            }
        }

        if let Some(id) = handler.err_var {
            frame.scope.assign(id, panic.payload.clone(), &task.symbols);
        }
        debug!(task = %task.id, payload = %panic.payload, "panic caught");
        frame.caught = Some(panic);
        Ok(handler.catch_pc)
    }

    /// Runs one deferred block on `frame` and restores the frame afterwards
    fn run_deferred(&self, task: &mut TaskState, frame: &mut Frame, deferred: Deferred) -> VmResult<()> {
        let saved_scope = std::mem::replace(&mut frame.scope, deferred.scope);
        let stack_len = frame.stack.len();
        let iter_len = frame.iters.len();
        let handler_len = frame.handlers.len();
        let defers_len = frame.defers.len();
        let saved_last = std::mem::take(&mut frame.last);
        let saved_caught = frame.caught.take();

        frame.level += 1;
        let mut result = match self.run_codes(task, frame, &deferred.codes) {
            Ok(_) => Ok(()),
            Err(VmError::Panic(mut panic)) => {
                panic.trace.push(self.trace_at(task, frame, deferred.span, deferred.file));
                Err(VmError::Panic(panic))
            }
            Err(e) => Err(e),
        };
        while frame.defers.len() > defers_len {
            let Some(inner) = frame.defers.pop() else {
                break;
            };
            let inner_result = self.run_deferred(task, frame, inner);
            result = match (result, inner_result) {
                (Err(e), _) if e.as_panic().is_none() => Err(e),
                (_, Err(e)) => Err(e),
                (r, Ok(())) => r,
            };
        }
        frame.level -= 1;

        frame.scope = saved_scope;
        frame.stack.truncate(stack_len);
        frame.iters.truncate(iter_len);
        frame.handlers.truncate(handler_len);
        frame.last = saved_last;
        frame.caught = saved_caught;
        result
    }

    /// Runs pending defers in reverse order. Each one may recover the
    /// pending panic or replace it with a new one.
    fn finish_frame(
        &self,
        task: &mut TaskState,
        frame: &mut Frame,
        result: VmResult<Option<Value>>,
    ) -> VmResult<Option<Value>> {
        let (mut pending, returned) = match result {
            Ok(v) => (None, v),
            Err(VmError::Panic(p)) => (Some(p), None),
            Err(e) => return Err(e),
        };
        while let Some(deferred) = frame.defers.pop() {
            task.recover.push(pending.take());
            let outcome = self.run_deferred(task, frame, deferred);
            let slot = task.recover.pop().flatten();
            pending = match outcome {
                Ok(()) => slot,
                Err(VmError::Panic(p)) => Some(p),
                Err(e) => return Err(e),
            };
        }
        match pending {
            Some(p) => Err(VmError::Panic(p)),
            None => Ok(returned),
        }
    }

    fn step(&self, task: &mut TaskState, frame: &mut Frame, code: &Code) -> VmResult<Flow> {
        let ops = self.rt.ops;
        match code.opcode {
            Opcode::Push => {
                let op = operand(code)?;
                let value = Value::from_constant(op, &frame.scope)
                    .ok_or_else(|| VmError::invariant("code block pushed as a value"))?;
                frame.push(value);
            }
            Opcode::PushRef => {
                let value = SymbolId::from_operand(code.unary)
                    .and_then(|id| frame.scope.get(id))
                    .unwrap_or_default();
                frame.push(value);
            }
            Opcode::PushLeftRef => {
                let id = SymbolId(u32::try_from(code.unary).unwrap_or(0));
                frame.push(Value::Ref(Box::new(Place::Symbol(id))));
            }
            Opcode::PushId => {
                let name = operand(code)?
                    .as_str()
                    .ok_or_else(|| VmError::invariant("PushId without a name"))?;
                let value = self.lookup(task, frame, name);
                frame.push(value);
            }
            Opcode::Pop => frame.last = frame.pop()?,
            Opcode::Assign => self.assign(task, frame, code)?,

            Opcode::Not | Opcode::Neg | Opcode::Plus | Opcode::BitNot => {
                let v = frame.pop()?;
                frame.push(ops.unary(code.opcode, &v).map_err(VmError::panic)?);
            }
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::AndNot
            | Opcode::Shl
            | Opcode::Shr
            | Opcode::Lt
            | Opcode::LtEq
            | Opcode::Gt
            | Opcode::GtEq
            | Opcode::Eq
            | Opcode::NotEq
            | Opcode::In => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                frame.push(ops.binary(code.opcode, &a, &b).map_err(VmError::panic)?);
            }
            Opcode::SendChan => {
                let value = frame.pop()?;
                let channel = frame.pop()?;
                self.send(&channel, value)?;
            }

            Opcode::PlusEq
            | Opcode::MinusEq
            | Opcode::MulEq
            | Opcode::DivEq
            | Opcode::ModEq
            | Opcode::AndEq
            | Opcode::OrEq
            | Opcode::XorEq
            | Opcode::AndNotEq
            | Opcode::ShlEq
            | Opcode::ShrEq => {
                let place = frame.pop_place()?;
                let rhs = frame.pop()?;
                let base = code
                    .opcode
                    .compound_base()
                    .ok_or_else(|| VmError::invariant("compound opcode without base"))?;
                let current = read_place(frame, &place);
                let value = ops.binary(base, &current, &rhs).map_err(VmError::panic)?;
                self.store(task, frame, place, value)?;
            }
            Opcode::PlusPlus | Opcode::MinusMinus => {
                let place = frame.pop_place()?;
                let base = if code.opcode == Opcode::PlusPlus {
                    Opcode::Add
                } else {
                    Opcode::Sub
                };
                let current = read_place(frame, &place);
                let value = ops
                    .binary(base, &current, &Value::Int(1))
                    .map_err(VmError::panic)?;
                self.store(task, frame, place, value)?;
            }

            Opcode::Jmp => return Ok(Flow::Jump(target(code.unary)?)),
            Opcode::JmpT => {
                if ops.truthy(&frame.pop()?) {
                    return Ok(Flow::Jump(target(code.unary)?));
                }
            }
            Opcode::JmpF => {
                if !ops.truthy(&frame.pop()?) {
                    return Ok(Flow::Jump(target(code.unary)?));
                }
            }
            Opcode::JmpTop => {
                if ops.truthy(&frame.peek()?) {
                    return Ok(Flow::Jump(target(code.unary)?));
                }
                frame.pop()?;
            }
            Opcode::JmpFop => {
                if !ops.truthy(&frame.peek()?) {
                    return Ok(Flow::Jump(target(code.unary)?));
                }
                frame.pop()?;
            }
            Opcode::Break => {
                frame.leave_scopes(count(code.op1_int())?)?;
                if code.op2_int() == 1 {
                    frame.iters.pop();
                }
                return Ok(Flow::Jump(target(code.unary)?));
            }
            Opcode::Continue => {
                frame.leave_scopes(count(code.op1_int())?)?;
                return Ok(Flow::Jump(target(code.unary)?));
            }

            Opcode::Scope => {
                let table = u32::try_from(code.unary)
                    .map(TableId)
                    .map_err(|_| VmError::invariant("bad table id"))?;
                frame.scope = Scope::child(&frame.scope, table);
            }
            Opcode::ScopeEnd => frame.leave_scopes(1)?,

            Opcode::EnterFR => {
                let subject = frame.pop()?;
                frame.iters.push(Iter::over(&subject).map_err(VmError::panic)?);
            }
            Opcode::RangeNext | Opcode::InNext => {
                let mode = if code.opcode == Opcode::RangeNext {
                    Advance::Range
                } else {
                    Advance::In
                };
                let n = count(code.unary)?;
                let iter = frame
                    .iters
                    .last_mut()
                    .ok_or_else(|| VmError::invariant("no active iterator"))?;
                match iter.next(n, mode, &self.rt.cancel).map_err(VmError::panic)? {
                    Step::Item(values) => frame.stack.extend(values),
                    Step::Done => return Ok(Flow::Jump(target(code.op1_int())?)),
                    Step::Cancelled => return Err(VmError::Cancelled),
                }
            }
            Opcode::ExitFR => {
                frame
                    .iters
                    .pop()
                    .ok_or_else(|| VmError::invariant("no active iterator"))?;
            }

            Opcode::NewSlice => {
                let items = frame.pop_n(count(code.unary)?)?;
                frame.push(Value::slice(items));
            }
            Opcode::NewMap => {
                let flat = frame.pop_n(count(code.unary)? * 2)?;
                let mut entries = FxHashMap::default();
                let mut flat = flat.into_iter();
                while let (Some(k), Some(v)) = (flat.next(), flat.next()) {
                    entries.insert(MapKey::from_value(&k).map_err(VmError::panic)?, v);
                }
                frame.push(Value::map(entries));
            }
            Opcode::Make => {
                let args = frame.pop_n(count(code.unary)?)?;
                let value = match frame.pop()? {
                    Value::Type(ty) => operators::make(&ty, &args).map_err(VmError::panic)?,
                    other => return Err(VmError::panic(format!("cannot make {}", other.type_name()))),
                };
                frame.push(value);
            }
            Opcode::TypeCast => {
                let value = frame.pop()?;
                let converted = match frame.pop()? {
                    Value::Type(ty) => operators::cast(ops, &ty, &value).map_err(VmError::panic)?,
                    other => {
                        return Err(VmError::panic(format!(
                            "cannot convert to {}",
                            other.type_name()
                        )))
                    }
                };
                frame.push(converted);
            }
            Opcode::Index => {
                let key = frame.pop()?;
                let container = frame.pop()?;
                let current = index(&container, &key)?;
                frame.push(Value::Ref(Box::new(Place::Element {
                    container,
                    key,
                    current,
                })));
            }
            Opcode::SliceRange => {
                let step = frame.pop()?;
                let high = frame.pop()?;
                let low = frame.pop()?;
                let object = frame.pop()?;
                frame.push(slice_range(&object, &low, &high, &step)?);
            }
            Opcode::Member => {
                let name = operand(code)?
                    .as_str()
                    .ok_or_else(|| VmError::invariant("Member without a name"))?;
                let object = frame.pop()?;
                let current = member(&object, name)?;
                frame.push(Value::Ref(Box::new(Place::Element {
                    container: object,
                    key: Value::string(name),
                    current,
                })));
            }

            Opcode::Call => {
                let (callee, args) = call_operands(frame, code)?;
                let result = self.call_value(task, &callee, args)?;
                frame.push(result);
            }
            Opcode::AsyncCall => {
                let (callee, args) = call_operands(frame, code)?;
                self.spawn(task, callee, args)?;
            }
            Opcode::Return => {
                let n = count(code.unary)?;
                let mut values = frame.pop_n(n)?;
                let value = match n {
                    0 => Value::Undefined,
                    1 => values.pop().unwrap_or_default(),
                    _ => Value::slice(values),
                };
                return Ok(Flow::Return(value));
            }

            Opcode::Defer | Opcode::Finally => {
                let codes = match &code.op1 {
                    Some(Constant::Block(codes)) => codes.clone(),
                    _ => return Err(VmError::invariant("deferred operand is not a code block")),
                };
                let kind = if code.opcode == Opcode::Defer {
                    DeferKind::Defer
                } else {
                    DeferKind::Finally
                };
                frame.defers.push(Deferred {
                    kind,
                    codes,
                    scope: frame.scope.clone(),
                    span: code.span,
                    file: code.file,
                });
            }
            Opcode::RunFinally => {
                let pos = frame
                    .defers
                    .iter()
                    .rposition(|d| d.kind == DeferKind::Finally)
                    .ok_or_else(|| VmError::invariant("no pending finally block"))?;
                let deferred = frame.defers.remove(pos);
                self.run_deferred(task, frame, deferred)?;
            }
            Opcode::Panic => {
                let payload = frame.pop()?;
                return Err(VmError::panic(payload));
            }
            Opcode::Recover => {
                let payload = task
                    .recover
                    .last_mut()
                    .and_then(Option::take)
                    .map(|p| p.payload)
                    .unwrap_or(Value::Nil);
                frame.push(payload);
            }
            Opcode::CatchError => {
                frame.handlers.push(Handler {
                    catch_pc: target(code.op1_int())?,
                    err_var: SymbolId::from_operand(code.op2_int()),
                    stack_len: frame.stack.len(),
                    iter_len: frame.iters.len(),
                    scope: frame.scope.clone(),
                    defers_len: frame.defers.len(),
                    level: frame.level,
                });
            }
            Opcode::StopCatchError => {
                frame
                    .handlers
                    .pop()
                    .ok_or_else(|| VmError::invariant("no handler to remove"))?;
            }
            Opcode::Rethrow => {
                let panic = frame
                    .caught
                    .take()
                    .ok_or_else(|| VmError::invariant("rethrow without a caught panic"))?;
                return Ok(Flow::Raise(panic));
            }

            Opcode::Recv => {
                let channel = frame.pop()?;
                let value = self.recv(&channel, code.unary == 2)?;
                frame.push(value);
            }
            Opcode::Assert => {
                let message = if code.unary >= 2 {
                    Some(frame.pop()?)
                } else {
                    None
                };
                let cond = frame.pop()?;
                if !ops.truthy(&cond) {
                    return Err(VmError::panic(
                        message.unwrap_or_else(|| Value::string("assertion failed")),
                    ));
                }
            }
        }
        Ok(Flow::Next)
    }

    /// Scope chain by name, then runtime globals, embedder globals and natives
    fn lookup(&self, task: &TaskState, frame: &Frame, name: &str) -> Value {
        if let Some(v) = frame.scope.get_by_name(name, &task.symbols) {
            return v;
        }
        if let Some(v) = self.rt.runtime_globals.get(name) {
            return v.clone();
        }
        if let Some(v) = self.rt.globals.get(name).or_else(|| self.rt.natives.get(name)) {
            return v.clone();
        }
        if !self.rt.config.sandbox {
            warn!(name, "unresolved global");
        }
        Value::Undefined
    }

    fn assign(&self, task: &TaskState, frame: &mut Frame, code: &Code) -> VmResult<()> {
        let ntargets = count(code.unary)?;
        let nvalues = count(code.op1_int())?;
        let mut places = Vec::with_capacity(ntargets);
        for _ in 0..ntargets {
            places.push(frame.pop_place()?);
        }
        places.reverse();
        let mut values = frame.pop_n(nvalues)?;

        if nvalues != ntargets {
            values = match (nvalues, values.pop()) {
                (1, Some(Value::Slice(items))) if items.read().len() == ntargets => {
                    items.read().clone()
                }
                (1, Some(Value::Slice(items))) => {
                    return Err(VmError::panic(format!(
                        "assignment mismatch: {} variables but {} values",
                        ntargets,
                        items.read().len()
                    )))
                }
                _ => {
                    return Err(VmError::panic(format!(
                        "assignment mismatch: {} variables but {} values",
                        ntargets, nvalues
                    )))
                }
            };
        }
        for (place, value) in places.into_iter().zip(values) {
            self.store(task, frame, place, value)?;
        }
        Ok(())
    }

    fn store(&self, task: &TaskState, frame: &Frame, place: Place, value: Value) -> VmResult<()> {
        match place {
            Place::Symbol(id) if id.0 == 0 => Ok(()),
            Place::Symbol(id) => {
                frame.scope.assign(id, value, &task.symbols);
                Ok(())
            }
            Place::Element { container, key, .. } => match container {
                Value::Slice(items) => {
                    let i = int_index(&key)?;
                    let mut items = items.write();
                    let len = items.len();
                    match items.get_mut(i) {
                        Some(slot) => {
                            *slot = value;
                            Ok(())
                        }
                        None => Err(out_of_range(i, len)),
                    }
                }
                Value::Map(entries) => {
                    let key = MapKey::from_value(&key).map_err(VmError::panic)?;
                    entries.write().insert(key, value);
                    Ok(())
                }
                other => Err(VmError::panic(format!(
                    "cannot assign to element of {}",
                    other.type_name()
                ))),
            },
        }
    }

    fn send(&self, channel: &Value, value: Value) -> VmResult<()> {
        match channel {
            Value::Channel(ch) => match ch.send(value, &self.rt.cancel) {
                SendOutcome::Sent => Ok(()),
                SendOutcome::Closed => Err(VmError::panic("send on closed channel")),
                SendOutcome::Cancelled => Err(VmError::Cancelled),
            },
            other => Err(VmError::panic(format!(
                "send to non-channel {}",
                other.type_name()
            ))),
        }
    }

    fn recv(&self, channel: &Value, with_flag: bool) -> VmResult<Value> {
        let ch = match channel {
            Value::Channel(ch) => ch,
            other => {
                return Err(VmError::panic(format!(
                    "receive from non-channel {}",
                    other.type_name()
                )))
            }
        };
        let (value, open) = match ch.recv(&self.rt.cancel) {
            RecvOutcome::Value(v) => (v, true),
            RecvOutcome::Closed => (Value::Nil, false),
            RecvOutcome::Cancelled => return Err(VmError::Cancelled),
        };
        Ok(if with_flag {
            Value::slice(vec![value, Value::Bool(open)])
        } else {
            value
        })
    }

    /// Starts `callee` as an independent unit
    fn spawn(&self, task: &TaskState, callee: Value, args: Vec<Value>) -> VmResult<()> {
        match &callee {
            Value::Function(_) | Value::Native(_) => {}
            Value::Nil | Value::Undefined => return Err(VmError::panic("go of nil function")),
            other => {
                return Err(VmError::panic(format!(
                    "cannot call {} value",
                    other.type_name()
                )))
            }
        }
        let id = self.rt.tasks.begin();
        let guard = UnitGuard(self.clone());
        let symbols = task.symbols.clone();
        let files = task.files.clone();
        thread::Builder::new()
            .name(format!("quill-go-{}", id.0))
            .stack_size(self.script_stack_size())
            .spawn(move || {
                ON_SCRIPT_STACK.with(|flag| flag.set(true));
                let vm = &guard.0;
                let mut unit = TaskState::new(id, symbols, files);
                debug!(task = %id, "async unit started");
                match vm.call_value(&mut unit, &callee, args) {
                    Ok(_) => debug!(task = %id, "async unit finished"),
                    Err(VmError::Cancelled) => debug!(task = %id, "async unit cancelled"),
                    Err(e) => error!(task = %id, "async unit failed: {}", e),
                }
            })
            .map(|_| ())
            .map_err(|e| VmError::panic(format!("cannot start async unit: {}", e)))
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("config", &self.rt.config)
            .field("natives", &self.rt.natives.len())
            .field("outstanding", &self.rt.tasks.outstanding())
            .finish()
    }
}

fn operand(code: &Code) -> VmResult<&Constant> {
    code.op1
        .as_ref()
        .ok_or_else(|| VmError::invariant(format!("{} without operand", code.opcode)))
}

fn target(raw: i64) -> VmResult<usize> {
    usize::try_from(raw).map_err(|_| VmError::invariant(format!("unresolved jump target {}", raw)))
}

fn count(raw: i64) -> VmResult<usize> {
    usize::try_from(raw).map_err(|_| VmError::invariant(format!("negative operand count {}", raw)))
}

fn read_place(frame: &Frame, place: &Place) -> Value {
    match place {
        Place::Symbol(id) => frame.scope.get(*id).unwrap_or_default(),
        Place::Element { current, .. } => current.clone(),
    }
}

fn call_operands(frame: &mut Frame, code: &Code) -> VmResult<(Value, Vec<Value>)> {
    let mut args = frame.pop_n(count(code.unary)?)?;
    let spread = code.op1.as_ref().and_then(Constant::as_bool).unwrap_or(false);
    if spread {
        match args.pop() {
            Some(Value::Slice(items)) => args.extend(items.read().iter().cloned()),
            Some(Value::Nil | Value::Undefined) | None => {}
            Some(other) => {
                return Err(VmError::panic(format!(
                    "cannot spread {} value",
                    other.type_name()
                )))
            }
        }
    }
    let callee = frame.pop()?;
    Ok((callee, args))
}

fn int_index(key: &Value) -> VmResult<usize> {
    match key {
        Value::Int(i) => {
            usize::try_from(*i).map_err(|_| VmError::panic(format!("index out of range [{}]", i)))
        }
        other => Err(VmError::panic(format!(
            "index must be int, got {}",
            other.type_name()
        ))),
    }
}

fn out_of_range(i: usize, len: usize) -> VmError {
    VmError::panic(format!("index out of range [{}] with length {}", i, len))
}

fn index(container: &Value, key: &Value) -> VmResult<Value> {
    match container {
        Value::Slice(items) => {
            let i = int_index(key)?;
            let items = items.read();
            items.get(i).cloned().ok_or_else(|| out_of_range(i, items.len()))
        }
        Value::Map(entries) => {
            let key = MapKey::from_value(key).map_err(VmError::panic)?;
            Ok(entries.read().get(&key).cloned().unwrap_or_default())
        }
        Value::String(s) => {
            let i = int_index(key)?;
            s.chars()
                .nth(i)
                .map(|c| Value::from(c.to_string()))
                .ok_or_else(|| out_of_range(i, s.chars().count()))
        }
        Value::Bytes(b) => {
            let i = int_index(key)?;
            b.get(i)
                .map(|x| Value::Int(*x as i64))
                .ok_or_else(|| out_of_range(i, b.len()))
        }
        Value::Nil | Value::Undefined => Err(VmError::panic("index of nil value")),
        other => Err(VmError::panic(format!("cannot index {}", other.type_name()))),
    }
}

fn member(object: &Value, name: &str) -> VmResult<Value> {
    match object {
        Value::Map(entries) => Ok(entries
            .read()
            .get(&MapKey::from(name))
            .cloned()
            .unwrap_or_default()),
        Value::Nil | Value::Undefined => Err(VmError::panic(format!(
            "member {} of nil value",
            name
        ))),
        other => Err(VmError::panic(format!(
            "{} has no member {}",
            other.type_name(),
            name
        ))),
    }
}

fn bound(v: &Value, default: usize, what: &str) -> VmResult<usize> {
    match v {
        Value::Undefined | Value::Nil => Ok(default),
        Value::Int(i) => usize::try_from(*i)
            .map_err(|_| VmError::panic(format!("negative slice {} {}", what, i))),
        other => Err(VmError::panic(format!(
            "slice {} must be int, got {}",
            what,
            other.type_name()
        ))),
    }
}

fn slice_range(object: &Value, low: &Value, high: &Value, step: &Value) -> VmResult<Value> {
    let len = match object {
        Value::Nil | Value::Undefined => return Ok(Value::Nil),
        other => other
            .len()
            .filter(|_| !matches!(other, Value::Map(_) | Value::Channel(_)))
            .ok_or_else(|| VmError::panic(format!("cannot slice {}", other.type_name())))?,
    };
    let lo = bound(low, 0, "index")?;
    let hi = bound(high, len, "index")?;
    let step = match step {
        Value::Undefined | Value::Nil => 1,
        Value::Int(s) if *s > 0 => *s as usize,
        Value::Int(s) => return Err(VmError::panic(format!("slice step must be positive, got {}", s))),
        other => {
            return Err(VmError::panic(format!(
                "slice step must be int, got {}",
                other.type_name()
            )))
        }
    };
    if lo > hi || hi > len {
        return Err(VmError::panic(format!(
            "slice bounds out of range [{}:{}] with length {}",
            lo, hi, len
        )));
    }
    Ok(match object {
        Value::Slice(items) => {
            Value::slice(items.read()[lo..hi].iter().step_by(step).cloned().collect())
        }
        Value::String(s) => Value::from(s.chars().skip(lo).take(hi - lo).step_by(step).collect::<String>()),
        Value::Bytes(b) => Value::bytes(b[lo..hi].iter().step_by(step).copied().collect::<Vec<u8>>()),
        _ => Value::Nil,
    })
}

#[cfg(test)]
#[path = "vm_tests.rs"]
mod tests;
