//! Bounds-checked cursor over a code section.

use super::writer::ADDRESS_WIDTH;
use super::BinaryError;

/// Read cursor over untrusted bytes. Every read is bounds checked and
/// advances the position only on success.
#[derive(Debug, Clone)]
pub struct CodeReader<'a> {
    code: &'a [u8],
    pos: usize,
}

const MAX_VARINT_BYTES: usize = 10;

impl<'a> CodeReader<'a> {
    pub fn new(code: &'a [u8]) -> Self {
        Self { code, pos: 0 }
    }

    pub fn at(code: &'a [u8], pos: usize) -> Result<Self, BinaryError> {
        let mut reader = Self::new(code);
        reader.set_position(pos)?;
        Ok(reader)
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.code.len() - self.pos
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.code.len()
    }

    /// Move to `pos`; the end of the section is a valid position.
    pub fn set_position(&mut self, pos: usize) -> Result<(), BinaryError> {
        if pos > self.code.len() {
            return Err(BinaryError::JumpOutOfRange { target: pos, code_size: self.code.len() });
        }
        self.pos = pos;
        Ok(())
    }

    pub fn peek_byte(&self) -> Option<u8> {
        self.code.get(self.pos).copied()
    }

    pub fn read_byte(&mut self) -> Result<u8, BinaryError> {
        let byte = self
            .code
            .get(self.pos)
            .copied()
            .ok_or(BinaryError::UnexpectedEnd { offset: self.pos })?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], BinaryError> {
        if len > self.remaining() {
            return Err(BinaryError::UnexpectedEnd { offset: self.pos });
        }
        let bytes = &self.code[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Unsigned LEB128; rejects over-long and overflowing encodings.
    pub fn read_varint(&mut self) -> Result<u64, BinaryError> {
        let start = self.pos;
        let mut value: u64 = 0;
        let mut shift = 0u32;
        for i in 0..MAX_VARINT_BYTES {
            let byte = match self.code.get(start + i) {
                Some(b) => *b,
                None => return Err(BinaryError::UnexpectedEnd { offset: start + i }),
            };
            let chunk = (byte & 0x7f) as u64;
            if shift == 63 && chunk > 1 {
                return Err(BinaryError::InvalidVarint { offset: start });
            }
            value |= chunk << shift;
            if byte & 0x80 == 0 {
                self.pos = start + i + 1;
                return Ok(value);
            }
            shift += 7;
        }
        Err(BinaryError::InvalidVarint { offset: start })
    }

    /// A varint used as a length, count or index; must fit `usize`.
    pub fn read_varint_usize(&mut self) -> Result<usize, BinaryError> {
        let offset = self.pos;
        let value = self.read_varint()?;
        usize::try_from(value).map_err(|_| BinaryError::InvalidVarint { offset })
    }

    /// A 4-byte little-endian absolute address.
    pub fn read_address(&mut self) -> Result<usize, BinaryError> {
        let bytes = self.read_bytes(ADDRESS_WIDTH)?;
        let mut raw = [0u8; ADDRESS_WIDTH];
        raw.copy_from_slice(bytes);
        Ok(u32::from_le_bytes(raw) as usize)
    }

    /// A varint length followed by that many UTF-8 bytes.
    pub fn read_length_prefixed_str(&mut self) -> Result<&'a str, BinaryError> {
        let offset = self.pos;
        let len = self.read_varint_usize()?;
        let bytes = match self.read_bytes(len) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.pos = offset;
                return Err(err);
            }
        };
        std::str::from_utf8(bytes).map_err(|_| BinaryError::InvalidUtf8 { offset })
    }
}
