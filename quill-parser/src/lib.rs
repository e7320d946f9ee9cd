//! Quill parser
//!
//! Turns source text into the `quill_core` AST. Lexing is done by a
//! logos-generated tokenizer; parsing is hand-written recursive descent.

pub mod error;
pub mod lexer;
pub mod parser;

pub use error::{ParseError, ParseResult};
pub use parser::Parser;

use quill_core::{Block, Expr};

/// Parses a complete program
pub fn parse(source: &str) -> ParseResult<Block> {
    let block = Parser::new(source)?.parse_program()?;
    tracing::trace!(stmts = block.stmts.len(), "parsed program");
    Ok(block)
}

/// Parses a single expression, as used by debugger evaluation
pub fn parse_expression(source: &str) -> ParseResult<Expr> {
    Parser::new(source)?.parse_standalone_expression()
}
