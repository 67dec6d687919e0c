//! The compiled binary: extension table, code section and string pool.
//!
//! Serialized layout (all varints are unsigned LEB128):
//!
//! ```text
//! magic    "SVBC"
//! version  u16 little-endian
//! ext      varint count, then per entry: varint name length, name, u16 id
//! code     varint length, bytes
//! strings  varint count, then per entry: varint length, UTF-8 bytes
//! digest   SHA-256 over everything above
//! ```

pub mod operand;
pub mod reader;
pub mod writer;

pub use operand::{opt, OperandKind, CORE_EXTENSION_INDEX, OPTIONAL_MARKER};
pub use reader::CodeReader;
pub use writer::{CodeBuffer, JumpPlaceholder, ADDRESS_WIDTH};

use sha2::{Digest, Sha256};
use thiserror::Error;

pub const MAGIC: &[u8; 4] = b"SVBC";
pub const FORMAT_VERSION: u16 = 1;
const DIGEST_LEN: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BinaryError {
    #[error("unexpected end of data at offset {offset}")]
    UnexpectedEnd { offset: usize },
    #[error("invalid varint at offset {offset}")]
    InvalidVarint { offset: usize },
    #[error("invalid UTF-8 string at offset {offset}")]
    InvalidUtf8 { offset: usize },
    #[error("not a sieve binary (bad magic)")]
    BadMagic,
    #[error("unsupported binary format version {0} (expected {FORMAT_VERSION})")]
    UnsupportedVersion(u16),
    #[error("binary checksum mismatch")]
    ChecksumMismatch,
    #[error("{count} trailing byte(s) after the string pool")]
    TrailingData { count: usize },
    #[error("invalid operand at offset {offset}: {reason}")]
    InvalidOperand { offset: usize, reason: String },
    #[error("string index {index} outside pool of {len} entries")]
    StringIndexOutOfRange { index: usize, len: usize },
    #[error("jump target {target} outside code section of {code_size} bytes")]
    JumpOutOfRange { target: usize, code_size: usize },
    #[error("jump slot at {slot} was never patched")]
    UnpatchedJump { slot: usize },
    #[error("code section of {0} bytes exceeds the address width")]
    CodeTooLarge(usize),
    #[error("extension table has {0} entries; at most 255 fit an operand header")]
    TooManyExtensions(usize),
}

/// One entry of a binary's referenced-extension table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionRef {
    pub name: String,
    /// Registry id at generation time. Informational only: loading remaps
    /// by name.
    pub id: u16,
}

/// Immutable compiled artifact. Shared read-only between runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binary {
    extensions: Vec<ExtensionRef>,
    code: Vec<u8>,
    strings: Vec<String>,
}

impl Binary {
    pub fn new(
        extensions: Vec<ExtensionRef>,
        code: Vec<u8>,
        strings: Vec<String>,
    ) -> Result<Self, BinaryError> {
        if extensions.len() > u8::MAX as usize {
            return Err(BinaryError::TooManyExtensions(extensions.len()));
        }
        if code.len() > u32::MAX as usize {
            return Err(BinaryError::CodeTooLarge(code.len()));
        }
        Ok(Self { extensions, code, strings })
    }

    pub fn extensions(&self) -> &[ExtensionRef] {
        &self.extensions
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn code_size(&self) -> usize {
        self.code.len()
    }

    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    pub fn string(&self, index: usize) -> Result<&str, BinaryError> {
        self.strings
            .get(index)
            .map(String::as_str)
            .ok_or(BinaryError::StringIndexOutOfRange { index, len: self.strings.len() })
    }

    /// Serialize to the persisted layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = CodeBuffer::new();
        out.emit_bytes(MAGIC);
        out.emit_bytes(&FORMAT_VERSION.to_le_bytes());

        out.emit_varint(self.extensions.len() as u64);
        for ext in &self.extensions {
            emit_str(&mut out, &ext.name);
            out.emit_bytes(&ext.id.to_le_bytes());
        }

        out.emit_varint(self.code.len() as u64);
        out.emit_bytes(&self.code);

        out.emit_varint(self.strings.len() as u64);
        for s in &self.strings {
            emit_str(&mut out, s);
        }

        // No placeholders were emitted, so finishing cannot fail on jumps;
        // the body size was already checked in `new`.
        let mut bytes = out.finish().unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        bytes.extend_from_slice(&digest);
        bytes
    }

    /// Parse a persisted binary. Never trusts its input.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BinaryError> {
        if bytes.len() < MAGIC.len() + 2 + DIGEST_LEN {
            return Err(BinaryError::UnexpectedEnd { offset: bytes.len() });
        }
        if &bytes[..MAGIC.len()] != MAGIC {
            return Err(BinaryError::BadMagic);
        }
        let (body, digest) = bytes.split_at(bytes.len() - DIGEST_LEN);
        if Sha256::digest(body).as_slice() != digest {
            return Err(BinaryError::ChecksumMismatch);
        }

        let mut reader = CodeReader::new(body);
        reader.read_bytes(MAGIC.len())?;
        let version = read_u16(&mut reader)?;
        if version != FORMAT_VERSION {
            return Err(BinaryError::UnsupportedVersion(version));
        }

        let ext_count = reader.read_varint_usize()?;
        let mut extensions = Vec::with_capacity(ext_count.min(reader.remaining()));
        for _ in 0..ext_count {
            let name = reader.read_length_prefixed_str()?.to_string();
            let id = read_u16(&mut reader)?;
            extensions.push(ExtensionRef { name, id });
        }

        let code_len = reader.read_varint_usize()?;
        let code = reader.read_bytes(code_len)?.to_vec();

        let string_count = reader.read_varint_usize()?;
        let mut strings = Vec::with_capacity(string_count.min(reader.remaining()));
        for _ in 0..string_count {
            strings.push(reader.read_length_prefixed_str()?.to_string());
        }

        if !reader.at_end() {
            return Err(BinaryError::TrailingData { count: reader.remaining() });
        }
        Self::new(extensions, code, strings)
    }
}

fn emit_str(out: &mut CodeBuffer, s: &str) {
    out.emit_varint(s.len() as u64);
    out.emit_bytes(s.as_bytes());
}

fn read_u16(reader: &mut CodeReader<'_>) -> Result<u16, BinaryError> {
    let bytes = reader.read_bytes(2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}
