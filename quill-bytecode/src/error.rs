//! Error types for the bytecode crate

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a compiled program (bad magic {0:?})")]
    BadMagic([u8; 4]),

    #[error("unsupported format version {found}, expected {expected}")]
    Version { found: u16, expected: u16 },

    #[error("encoding failed: {0}")]
    Encode(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, SerializeError>;
