//! Bytecode representation for Quill
//!
//! This crate defines the compiled form shared by the compiler and the VM:
//! opcodes, instructions with constant operands, function units, the
//! symbol table arena and the on-disk program format.

pub mod code;
pub mod error;
pub mod function;
pub mod opcode;
pub mod program;
pub mod serialize;
pub mod symbol;

pub use code::{Code, Constant, FileId};
pub use error::SerializeError;
pub use function::{Function, LineIndex};
pub use opcode::Opcode;
pub use program::{Program, SourceFile};
pub use symbol::{SymbolId, SymbolTable, TableId, TableKind};
