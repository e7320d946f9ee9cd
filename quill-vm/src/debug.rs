//! Debugger support
//!
//! A [`DebugHook`] installed on the VM is called before every instruction.
//! Without one the dispatch loop pays a single `Option` check.

use crate::scope::{Binding, Scope};
use crate::tasks::TaskId;
use crate::vm::Vm;
use parking_lot::RwLock;
use quill_bytecode::{Code, Function, SymbolTable};
use rustc_hash::FxHashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

pub trait DebugHook: Send + Sync {
    fn on_instruction(&self, ctx: &DebugContext<'_>);
}

/// What a hook can see of the instruction about to run
pub struct DebugContext<'a> {
    pub vm: &'a Vm,
    pub task: TaskId,
    pub pc: usize,
    /// The instruction sequence `pc` indexes into
    pub codes: &'a [Code],
    /// `None` for top-level code
    pub function: Option<&'a Arc<Function>>,
    pub scope: &'a Arc<Scope>,
    pub stack_depth: usize,
    pub(crate) symbols: &'a SymbolTable,
}

impl<'a> DebugContext<'a> {
    pub fn code(&self) -> &Code {
        &self.codes[self.pc]
    }

    pub fn line(&self) -> u32 {
        self.code().span.start.line
    }

    /// True for the first instruction of a run of instructions on one line
    pub fn at_line_start(&self) -> bool {
        self.pc == 0 || self.codes[self.pc - 1].span.start.line != self.line()
    }

    pub fn function_name(&self) -> String {
        self.function
            .map(|f| f.display_name())
            .unwrap_or_else(|| "main".to_string())
    }

    /// Visible variables, innermost scope first
    pub fn bindings(&self) -> Vec<Binding> {
        self.scope.snapshot(self.symbols)
    }

    pub fn symbols(&self) -> &SymbolTable {
        self.symbols
    }
}

/// Events reported by [`BreakpointHook`]
#[derive(Debug, Clone)]
pub enum DebugEvent {
    Breakpoint {
        task: TaskId,
        line: u32,
        function: String,
        bindings: Vec<Binding>,
        /// Present when the hook was given watch expressions
        watches: Vec<(String, String)>,
    },
}

/// Reports line breakpoints over an unbounded channel
pub struct BreakpointHook {
    lines: RwLock<FxHashSet<u32>>,
    watches: RwLock<Vec<String>>,
    sender: mpsc::UnboundedSender<DebugEvent>,
}

impl BreakpointHook {
    pub fn new(sender: mpsc::UnboundedSender<DebugEvent>) -> Self {
        Self {
            lines: RwLock::new(FxHashSet::default()),
            watches: RwLock::new(Vec::new()),
            sender,
        }
    }

    /// A hook and the receiving end of its event channel
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<DebugEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self::new(tx)), rx)
    }

    pub fn add_breakpoint(&self, line: u32) {
        self.lines.write().insert(line);
    }

    pub fn remove_breakpoint(&self, line: u32) {
        self.lines.write().remove(&line);
    }

    /// Expression evaluated in the paused scope at every hit
    pub fn add_watch(&self, expr: impl Into<String>) {
        self.watches.write().push(expr.into());
    }
}

impl DebugHook for BreakpointHook {
    fn on_instruction(&self, ctx: &DebugContext<'_>) {
        let line = ctx.line();
        if !ctx.at_line_start() || !self.lines.read().contains(&line) {
            return;
        }
        let watches = self
            .watches
            .read()
            .iter()
            .map(|expr| {
                let shown = match ctx.vm.eval_in_scope(ctx.scope, ctx.symbols, expr) {
                    Ok(v) => v.to_string(),
                    Err(e) => format!("<error: {}>", e),
                };
                (expr.clone(), shown)
            })
            .collect();
        let _ = self.sender.send(DebugEvent::Breakpoint {
            task: ctx.task,
            line,
            function: ctx.function_name(),
            bindings: ctx.bindings(),
            watches,
        });
    }
}
