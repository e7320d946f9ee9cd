//! Runtime error types
//!
//! A script panic carries its payload and a trace that grows by one entry
//! for every frame it leaves, innermost first.

use crate::value::Value;
use quill_core::Span;
use std::fmt;
use thiserror::Error;

pub type VmResult<T> = Result<T, VmError>;

#[derive(Error, Debug, Clone)]
pub enum VmError {
    /// A script-level panic; catchable by `try`/`recover`
    #[error("{0}")]
    Panic(Box<VmPanic>),

    /// Execution stopped by the cancellation token
    #[error("execution cancelled")]
    Cancelled,

    /// Internal consistency check failed
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl VmError {
    /// A panic with `payload` and an empty trace
    pub fn panic(payload: impl Into<Value>) -> Self {
        VmError::Panic(Box::new(VmPanic::new(payload.into())))
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        VmError::Invariant(message.into())
    }

    pub fn as_panic(&self) -> Option<&VmPanic> {
        match self {
            VmError::Panic(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, VmError::Cancelled)
    }
}

/// One frame of a panic trace
#[derive(Debug, Clone, PartialEq)]
pub struct TraceEntry {
    pub function: String,
    pub file: Option<String>,
    pub span: Span,
    /// Offending source line with a caret marker, when source text is known
    pub snippet: Option<String>,
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "  at {} ({}:{})", self.function, file, self.span.start)?,
            None => write!(f, "  at {} ({})", self.function, self.span.start)?,
        }
        if let Some(snippet) = &self.snippet {
            write!(f, "\n{}", snippet)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct VmPanic {
    pub payload: Value,
    pub trace: Vec<TraceEntry>,
}

impl VmPanic {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            trace: Vec::new(),
        }
    }

    /// Location where the panic was raised
    pub fn origin(&self) -> Option<&TraceEntry> {
        self.trace.first()
    }
}

impl fmt::Display for VmPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panic: {}", self.payload)?;
        for entry in &self.trace {
            write!(f, "\n{}", entry)?;
        }
        Ok(())
    }
}
