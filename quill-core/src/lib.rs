//! Core syntax types for Quill
//!
//! This crate holds what every other Quill crate agrees on:
//! - source spans
//! - the AST produced by front ends
//! - the visitor contract the compiler walks

pub mod ast;
pub mod span;
pub mod visit;

pub use ast::{Block, Expr, ExprKind, Stmt, StmtKind};
pub use span::{Position, Span};
pub use visit::{Spanned, Visitor};
