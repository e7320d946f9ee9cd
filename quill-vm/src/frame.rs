//! Per-call execution state

use crate::error::{VmError, VmPanic, VmResult};
use crate::iterator::Iter;
use crate::scope::Scope;
use crate::value::{Place, Value};
use quill_bytecode::{Code, FileId, Function, SymbolId};
use quill_core::Span;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeferKind {
    /// `defer`: runs when the frame exits
    Defer,
    /// The finally block of a `try`; also run by `RunFinally` and while unwinding
    Finally,
}

pub(crate) struct Deferred {
    pub kind: DeferKind,
    pub codes: Arc<[Code]>,
    /// Scope active at registration
    pub scope: Arc<Scope>,
    /// Where the `defer` or `try` was registered
    pub span: Span,
    pub file: FileId,
}

/// An installed `try` handler
pub(crate) struct Handler {
    pub catch_pc: usize,
    pub err_var: Option<SymbolId>,
    pub stack_len: usize,
    pub iter_len: usize,
    pub scope: Arc<Scope>,
    pub defers_len: usize,
    /// Deferred-block nesting level the handler was installed at
    pub level: usize,
}

pub struct Frame {
    pub(crate) stack: Vec<Value>,
    pub(crate) iters: Vec<Iter>,
    pub(crate) scope: Arc<Scope>,
    pub(crate) defers: Vec<Deferred>,
    pub(crate) handlers: Vec<Handler>,
    /// Panic taken by the most recent handler, for `Rethrow`
    pub(crate) caught: Option<Box<VmPanic>>,
    /// Last value discarded by `Pop`
    pub(crate) last: Value,
    pub(crate) function: Option<Arc<Function>>,
    /// How many deferred blocks of this frame are currently running
    pub(crate) level: usize,
}

impl Frame {
    pub(crate) fn new(scope: Arc<Scope>, function: Option<Arc<Function>>) -> Self {
        Self {
            stack: Vec::with_capacity(16),
            iters: Vec::new(),
            scope,
            defers: Vec::new(),
            handlers: Vec::new(),
            caught: None,
            last: Value::Undefined,
            function,
            level: 0,
        }
    }

    pub fn scope(&self) -> &Arc<Scope> {
        &self.scope
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    pub fn function_name(&self) -> String {
        match &self.function {
            Some(f) => f.display_name(),
            None => "main".to_string(),
        }
    }

    #[inline]
    pub(crate) fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Pops an r-value, reading through references
    pub(crate) fn pop(&mut self) -> VmResult<Value> {
        match self.stack.pop() {
            Some(Value::Ref(place)) => Ok(match *place {
                Place::Element { current, .. } => current,
                Place::Symbol(id) => self.scope.get(id).unwrap_or_default(),
            }),
            Some(v) => Ok(v),
            None => Err(VmError::invariant("operand stack underflow")),
        }
    }

    /// Pops an assignment target
    pub(crate) fn pop_place(&mut self) -> VmResult<Place> {
        match self.stack.pop() {
            Some(Value::Ref(place)) => Ok(*place),
            Some(other) => Err(VmError::panic(format!(
                "cannot assign to {} value",
                other.type_name()
            ))),
            None => Err(VmError::invariant("operand stack underflow")),
        }
    }

    pub(crate) fn pop_n(&mut self, n: usize) -> VmResult<Vec<Value>> {
        let mut values = Vec::with_capacity(n);
        for _ in 0..n {
            values.push(self.pop()?);
        }
        values.reverse();
        Ok(values)
    }

    pub(crate) fn peek(&self) -> VmResult<Value> {
        match self.stack.last() {
            Some(Value::Ref(place)) => Ok(match place.as_ref() {
                Place::Element { current, .. } => current.clone(),
                Place::Symbol(id) => self.scope.get(*id).unwrap_or_default(),
            }),
            Some(v) => Ok(v.clone()),
            None => Err(VmError::invariant("operand stack underflow")),
        }
    }

    /// Leaves `n` scopes
    pub(crate) fn leave_scopes(&mut self, n: usize) -> VmResult<()> {
        for _ in 0..n {
            let parent = self
                .scope
                .parent()
                .cloned()
                .ok_or_else(|| VmError::invariant("scope exit at root"))?;
            self.scope = parent;
        }
        Ok(())
    }

    /// Stack, iterator stack and scope are back where the frame started
    pub(crate) fn check_balance(&self, base: &Arc<Scope>) -> VmResult<()> {
        if !self.stack.is_empty() {
            return Err(VmError::invariant(format!(
                "{} values left on the operand stack",
                self.stack.len()
            )));
        }
        if !self.iters.is_empty() {
            return Err(VmError::invariant(format!(
                "{} iterators left open",
                self.iters.len()
            )));
        }
        if !Arc::ptr_eq(&self.scope, base) {
            return Err(VmError::invariant(format!(
                "{} scopes not exited",
                self.scope.depth().saturating_sub(base.depth())
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_bytecode::TableId;

    #[test]
    fn pop_reads_through_element_refs() {
        let mut frame = Frame::new(Scope::root(), None);
        frame.push(Value::Ref(Box::new(Place::Element {
            container: Value::Nil,
            key: Value::Int(0),
            current: Value::Int(42),
        })));
        assert!(matches!(frame.pop(), Ok(Value::Int(42))));
        assert!(frame.pop().is_err());
    }

    #[test]
    fn pop_place_rejects_plain_values() {
        let mut frame = Frame::new(Scope::root(), None);
        frame.push(Value::Int(1));
        assert!(matches!(frame.pop_place(), Err(VmError::Panic(_))));
    }

    #[test]
    fn balance_tracks_scopes() {
        let root = Scope::root();
        let mut frame = Frame::new(root.clone(), None);
        assert!(frame.check_balance(&root).is_ok());
        frame.scope = Scope::child(&root, TableId(1));
        assert!(frame.check_balance(&root).is_err());
        frame.leave_scopes(1).unwrap();
        assert!(frame.check_balance(&root).is_ok());
        assert!(frame.leave_scopes(1).is_err());
    }
}
