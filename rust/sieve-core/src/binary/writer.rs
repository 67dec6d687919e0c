//! Growable code buffer with forward-patched jump slots.

use super::BinaryError;
use std::collections::BTreeSet;

/// Width in bytes of an encoded jump address.
pub const ADDRESS_WIDTH: usize = 4;

/// A reserved, not yet patched, jump address slot.
///
/// Deliberately not `Copy`: a placeholder is consumed by exactly one patch.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "an unpatched jump placeholder fails `CodeBuffer::finish`"]
pub struct JumpPlaceholder {
    slot: usize,
}

impl JumpPlaceholder {
    /// Offset of the 4-byte address slot inside the code section.
    pub fn slot(&self) -> usize {
        self.slot
    }
}

/// Byte buffer the generator emits the code section into.
#[derive(Debug, Default)]
pub struct CodeBuffer {
    code: Vec<u8>,
    open: BTreeSet<usize>,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current emission address.
    pub fn address(&self) -> usize {
        self.code.len()
    }

    pub fn emit_byte(&mut self, byte: u8) {
        self.code.push(byte);
    }

    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
    }

    /// Unsigned LEB128.
    pub fn emit_varint(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.code.push(byte);
                break;
            }
            self.code.push(byte | 0x80);
        }
    }

    /// Emit a known absolute address (backward jumps).
    pub fn emit_address(&mut self, target: usize) -> Result<(), BinaryError> {
        let encoded = encode_address(target)?;
        self.code.extend_from_slice(&encoded);
        Ok(())
    }

    /// Reserve an address slot to be patched once the target is known.
    pub fn emit_placeholder(&mut self) -> JumpPlaceholder {
        let slot = self.code.len();
        self.code.extend_from_slice(&[0; ADDRESS_WIDTH]);
        self.open.insert(slot);
        JumpPlaceholder { slot }
    }

    /// Patch `placeholder` to jump to `target`.
    ///
    /// The target may be at most the current end of the code section (a jump
    /// to the end halts the program).
    pub fn patch(&mut self, placeholder: JumpPlaceholder, target: usize) -> Result<(), BinaryError> {
        let slot = placeholder.slot;
        if !self.open.remove(&slot) || slot + ADDRESS_WIDTH > self.code.len() {
            return Err(BinaryError::JumpOutOfRange { target: slot, code_size: self.code.len() });
        }
        if target > self.code.len() {
            return Err(BinaryError::JumpOutOfRange { target, code_size: self.code.len() });
        }
        let encoded = encode_address(target)?;
        self.code[slot..slot + ADDRESS_WIDTH].copy_from_slice(&encoded);
        Ok(())
    }

    /// Patch `placeholder` to jump to the current emission address.
    pub fn patch_here(&mut self, placeholder: JumpPlaceholder) -> Result<(), BinaryError> {
        let here = self.address();
        self.patch(placeholder, here)
    }

    /// Number of placeholders that have not been patched yet.
    pub fn open_placeholders(&self) -> usize {
        self.open.len()
    }

    /// Finish emission, checking that every jump slot was patched and the
    /// section fits the address width.
    pub fn finish(self) -> Result<Vec<u8>, BinaryError> {
        if let Some(&slot) = self.open.iter().next() {
            return Err(BinaryError::UnpatchedJump { slot });
        }
        if self.code.len() > u32::MAX as usize {
            return Err(BinaryError::CodeTooLarge(self.code.len()));
        }
        Ok(self.code)
    }
}

fn encode_address(target: usize) -> Result<[u8; ADDRESS_WIDTH], BinaryError> {
    let target = u32::try_from(target).map_err(|_| BinaryError::CodeTooLarge(target))?;
    Ok(target.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_encoding() {
        let mut buf = CodeBuffer::new();
        buf.emit_varint(0);
        buf.emit_varint(127);
        buf.emit_varint(128);
        buf.emit_varint(300);
        let code = buf.finish().unwrap();
        assert_eq!(code, vec![0x00, 0x7f, 0x80, 0x01, 0xac, 0x02]);
    }

    #[test]
    fn placeholder_is_patched_in_place() {
        let mut buf = CodeBuffer::new();
        buf.emit_byte(0xaa);
        let jump = buf.emit_placeholder();
        assert_eq!(jump.slot(), 1);
        buf.emit_bytes(&[1, 2, 3]);
        buf.patch_here(jump).unwrap();
        let code = buf.finish().unwrap();
        assert_eq!(&code[1..5], &8u32.to_le_bytes());
    }

    #[test]
    fn unpatched_placeholder_fails_finish() {
        let mut buf = CodeBuffer::new();
        let _jump = buf.emit_placeholder();
        assert_eq!(buf.open_placeholders(), 1);
        assert!(matches!(buf.finish(), Err(BinaryError::UnpatchedJump { slot: 0 })));
    }

    #[test]
    fn patch_beyond_end_is_rejected() {
        let mut buf = CodeBuffer::new();
        let jump = buf.emit_placeholder();
        let err = buf.patch(jump, 100).unwrap_err();
        assert!(matches!(err, BinaryError::JumpOutOfRange { target: 100, .. }));
    }
}
