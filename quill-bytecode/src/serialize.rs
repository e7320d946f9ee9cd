//! Compact binary form of a compiled [`Program`]
//!
//! Layout: the magic bytes `QUIL`, a little-endian `u16` format version,
//! then the bincode encoding of the program. Function literals and deferred
//! blocks are nested inside instruction operands and travel with them.

use crate::error::{Result, SerializeError};
use crate::program::Program;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

pub const MAGIC: [u8; 4] = *b"QUIL";
pub const FORMAT_VERSION: u16 = 1;

impl Program {
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_all(&MAGIC)?;
        writer.write_u16::<LittleEndian>(FORMAT_VERSION)?;
        bincode::serialize_into(&mut writer, self)?;
        Ok(())
    }

    pub fn read_from<R: Read>(mut reader: R) -> Result<Program> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(SerializeError::BadMagic(magic));
        }
        let version = reader.read_u16::<LittleEndian>()?;
        if version != FORMAT_VERSION {
            return Err(SerializeError::Version {
                found: version,
                expected: FORMAT_VERSION,
            });
        }
        Ok(bincode::deserialize_from(reader)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Program> {
        Program::read_from(bytes)
    }
}

#[cfg(test)]
#[path = "serialize_tests.rs"]
mod tests;
