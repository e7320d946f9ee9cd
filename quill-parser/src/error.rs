//! Parser error types

use quill_core::Span;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("{span}: unexpected {found}, expected {expected}")]
    UnexpectedToken {
        span: Span,
        expected: String,
        found: String,
    },

    #[error("unexpected end of input, expected {expected}")]
    UnexpectedEof { span: Span, expected: String },

    #[error("{0}: invalid token")]
    InvalidToken(Span),

    #[error("{span}: {message}")]
    InvalidSyntax { span: Span, message: String },

    #[error("{span}: maximum nesting depth {max_depth} exceeded")]
    MaxDepthExceeded { span: Span, max_depth: usize },
}

impl ParseError {
    pub fn span(&self) -> Span {
        match self {
            ParseError::UnexpectedToken { span, .. }
            | ParseError::UnexpectedEof { span, .. }
            | ParseError::InvalidSyntax { span, .. }
            | ParseError::MaxDepthExceeded { span, .. } => *span,
            ParseError::InvalidToken(span) => *span,
        }
    }
}

pub type ParseResult<T> = Result<T, ParseError>;
