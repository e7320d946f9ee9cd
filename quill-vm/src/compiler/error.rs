//! Compile error types
//!
//! Errors are collected for the whole pass and returned together.

use quill_core::Span;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("{span}: undefined symbol `{name}`")]
    UndefinedSymbol { name: String, span: Span },

    #[error("{span}: `{keyword}` outside of a loop or switch")]
    MisplacedControl { keyword: &'static str, span: Span },

    #[error("{span}: fallthrough must be the last statement of a non-final case")]
    MisplacedFallthrough { span: Span },

    #[error("{span}: malformed literal `{text}`: {reason}")]
    MalformedLiteral {
        text: String,
        reason: String,
        span: Span,
    },

    #[error("{span}: cannot assign to this expression")]
    NotAssignable { span: Span },

    #[error("{span}: assignment mismatch: {targets} variables but {values} values")]
    AssignMismatch {
        targets: usize,
        values: usize,
        span: Span,
    },

    #[error("{span}: operator `{op}` has no compound assignment form")]
    InvalidOperator { op: String, span: Span },

    #[error("{span}: `{keyword}` requires a function call")]
    NotCallable { keyword: &'static str, span: Span },

    #[error("jump at instruction {index} was never resolved")]
    UnresolvedJump { index: usize },
}

impl CompileError {
    pub fn span(&self) -> Span {
        match self {
            CompileError::UndefinedSymbol { span, .. }
            | CompileError::MisplacedControl { span, .. }
            | CompileError::MisplacedFallthrough { span }
            | CompileError::MalformedLiteral { span, .. }
            | CompileError::NotAssignable { span }
            | CompileError::AssignMismatch { span, .. }
            | CompileError::InvalidOperator { span, .. }
            | CompileError::NotCallable { span, .. } => *span,
            CompileError::UnresolvedJump { .. } => Span::default(),
        }
    }
}

/// Every error found while compiling one unit, in source order
#[derive(Error, Debug, Clone, PartialEq)]
pub struct CompileErrors(pub Vec<CompileError>);

impl CompileErrors {
    pub fn errors(&self) -> &[CompileError] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CompileErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for err in &self.0 {
            if !first {
                writeln!(f)?;
            }
            first = false;
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl IntoIterator for CompileErrors {
    type Item = CompileError;
    type IntoIter = std::vec::IntoIter<CompileError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
