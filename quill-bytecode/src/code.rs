//! Instructions and their constant operands

use crate::function::Function;
use crate::opcode::Opcode;
use quill_core::ast::TypeExpr;
use quill_core::Span;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Index into a program's source file table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FileId(pub u16);

/// Compile-time operand values carried by instructions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Undefined,
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Arc<str>),
    Bytes(Arc<[u8]>),
    /// A compiled function literal
    Function(Arc<Function>),
    /// A detached instruction sequence run by `Defer`/`Finally`
    Block(Arc<[Code]>),
    Type(TypeExpr),
}

impl Constant {
    /// Integer payload, if any
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Constant::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// String payload, if any
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Constant::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Constant::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Undefined => write!(f, "undefined"),
            Constant::Nil => write!(f, "nil"),
            Constant::Bool(b) => write!(f, "{}", b),
            Constant::Int(i) => write!(f, "{}", i),
            Constant::Float(x) => write!(f, "{:?}", x),
            Constant::String(s) => write!(f, "{:?}", s),
            Constant::Bytes(b) => write!(f, "b{:?}", String::from_utf8_lossy(b)),
            Constant::Function(func) => write!(f, "<fn {}>", func.display_name()),
            Constant::Block(codes) => write!(f, "<block {} codes>", codes.len()),
            Constant::Type(t) => write!(f, "<type {}>", t),
        }
    }
}

/// One instruction.
///
/// Jump targets live in `unary` (in `op1` for `RangeNext`/`InNext`). They
/// hold a negative placeholder until the compiler back-patches them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Code {
    pub opcode: Opcode,
    pub unary: i64,
    pub op1: Option<Constant>,
    pub op2: Option<Constant>,
    pub span: Span,
    pub file: FileId,
}

impl Code {
    pub fn new(opcode: Opcode, span: Span) -> Self {
        Self {
            opcode,
            unary: 0,
            op1: None,
            op2: None,
            span,
            file: FileId::default(),
        }
    }

    pub fn with_unary(mut self, unary: i64) -> Self {
        self.unary = unary;
        self
    }

    pub fn with_op1(mut self, op: Constant) -> Self {
        self.op1 = Some(op);
        self
    }

    pub fn with_op2(mut self, op: Constant) -> Self {
        self.op2 = Some(op);
        self
    }

    /// `op1` as an integer, defaulting to zero
    pub fn op1_int(&self) -> i64 {
        self.op1.as_ref().and_then(Constant::as_int).unwrap_or(0)
    }

    /// `op2` as an integer, defaulting to zero
    pub fn op2_int(&self) -> i64 {
        self.op2.as_ref().and_then(Constant::as_int).unwrap_or(0)
    }

    /// True when this is a jump whose target has not been patched yet
    pub fn is_unresolved_jump(&self) -> bool {
        match self.opcode {
            Opcode::RangeNext | Opcode::InNext => self.op1.is_none() || self.op1_int() < 0,
            op if op.is_jump() => self.unary < 0,
            _ => false,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<14} {:>4}", self.opcode, self.unary)?;
        if let Some(op) = &self.op1 {
            write!(f, " {}", op)?;
        }
        if let Some(op) = &self.op2 {
            write!(f, ", {}", op)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_operands() {
        let code = Code::new(Opcode::CatchError, Span::default())
            .with_op1(Constant::Int(12))
            .with_op2(Constant::Int(3));
        assert_eq!(code.to_string(), "CatchError        0 12, 3");
    }

    #[test]
    fn unresolved_jumps() {
        let jmp = Code::new(Opcode::Jmp, Span::default()).with_unary(-1);
        assert!(jmp.is_unresolved_jump());
        assert!(!jmp.clone().with_unary(0).is_unresolved_jump());
        assert!(!jmp.clone().with_unary(4).is_unresolved_jump());
        let next = Code::new(Opcode::RangeNext, Span::default()).with_unary(1);
        assert!(next.is_unresolved_jump());
        assert!(!Code::new(Opcode::Pop, Span::default()).is_unresolved_jump());
    }
}
