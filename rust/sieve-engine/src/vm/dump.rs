//! Human-readable code dump and structured disassembly of a loaded binary.
//!
//! ```text
//! * Extensions:
//!   1: fileinto
//! * Code (14 bytes):
//! 00000000: FILEINTO
//! 00000002:   mailbox: "Junk"
//! 00000004: STOP
//! [End of code]
//! ```

use crate::registry::Extension;
use crate::vm::loader::LoadedBinary;
use crate::vm::message::AddressPart;
use serde::Serialize;
use sieve_core::binary::{opt, CodeReader, OperandKind, OPTIONAL_MARKER};
use sieve_core::BinaryError;
use std::sync::Arc;

/// Operands nest through lists and extension operands; deeper input is
/// rejected as corrupt.
const MAX_OPERAND_DEPTH: usize = 8;

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instruction {
    pub address: usize,
    pub extension: String,
    pub mnemonic: String,
    /// `label: value` descriptions in code order.
    pub operands: Vec<String>,
}

#[derive(Debug, Clone)]
struct DumpLine {
    address: usize,
    depth: usize,
    text: String,
}

pub struct CodeDumper<'a> {
    program: &'a LoadedBinary,
    reader: CodeReader<'a>,
    lines: Vec<DumpLine>,
    instructions: Vec<Instruction>,
    depth: usize,
    mark: usize,
    operand_depth: usize,
}

impl<'a> CodeDumper<'a> {
    pub fn new(program: &'a LoadedBinary) -> Self {
        Self {
            program,
            reader: CodeReader::new(program.binary().code()),
            lines: Vec::new(),
            instructions: Vec::new(),
            depth: 0,
            mark: 0,
            operand_depth: 0,
        }
    }

    pub fn invalid(&self, offset: usize, reason: impl Into<String>) -> BinaryError {
        BinaryError::InvalidOperand { offset, reason: reason.into() }
    }

    fn decode_all(&mut self) -> Result<(), BinaryError> {
        let program = self.program;
        while !self.reader.at_end() {
            let address = self.reader.position();
            self.mark = address;
            let index = self.reader.read_byte()?;
            let code = self.reader.read_byte()?;
            let ext = program
                .extension(index)
                .ok_or_else(|| self.invalid(address, format!("unknown extension index {index}")))?;
            let op = ext.operation(code).ok_or_else(|| {
                self.invalid(address, format!("unknown opcode {code} for '{}'", ext.name()))
            })?;
            self.instructions.push(Instruction {
                address,
                extension: ext.name().to_string(),
                mnemonic: op.mnemonic().to_string(),
                operands: Vec::new(),
            });
            self.depth = 0;
            self.line(op.mnemonic());
            self.depth = 1;
            op.dump(self)?;
        }
        Ok(())
    }

    /// Write a line at the address of the item being described.
    pub fn line(&mut self, text: impl Into<String>) {
        let text = text.into();
        if self.depth > 0 {
            if let Some(instruction) = self.instructions.last_mut() {
                instruction.operands.push(text.clone());
            }
        }
        self.lines.push(DumpLine { address: self.mark, depth: self.depth, text });
    }

    pub fn position(&self) -> usize {
        self.reader.position()
    }

    /// Attribute the next line to the current position.
    pub fn mark_here(&mut self) {
        self.mark = self.reader.position();
    }

    pub fn read_byte(&mut self) -> Result<u8, BinaryError> {
        self.reader.read_byte()
    }

    pub fn read_varint(&mut self) -> Result<u64, BinaryError> {
        self.reader.read_varint()
    }

    pub fn read_pool_string(&mut self) -> Result<&'a str, BinaryError> {
        let index = self.reader.read_varint_usize()?;
        self.program.binary().string(index)
    }

    fn read_count(&mut self) -> Result<usize, BinaryError> {
        let offset = self.reader.position();
        let count = self.reader.read_varint_usize()?;
        if count > self.reader.remaining() {
            return Err(self.invalid(offset, format!("count {count} exceeds the remaining code")));
        }
        Ok(count)
    }

    fn extension_at(&self, index: u8, offset: usize) -> Result<&'a Arc<Extension>, BinaryError> {
        self.program
            .extension(index)
            .ok_or_else(|| self.invalid(offset, format!("unknown extension index {index}")))
    }

    /// Read one self-describing operand and describe it.
    pub fn describe_operand(&mut self) -> Result<String, BinaryError> {
        if self.operand_depth >= MAX_OPERAND_DEPTH {
            let offset = self.reader.position();
            return Err(self.invalid(offset, "operands are nested too deeply"));
        }
        self.operand_depth += 1;
        let described = self.describe_operand_at_depth();
        self.operand_depth -= 1;
        described
    }

    fn describe_operand_at_depth(&mut self) -> Result<String, BinaryError> {
        let offset = self.reader.position();
        let byte = self.reader.read_byte()?;
        let kind = OperandKind::from_byte(byte)
            .ok_or_else(|| self.invalid(offset, format!("invalid operand kind {byte:#04x}")))?;
        match kind {
            OperandKind::Number => Ok(self.reader.read_varint()?.to_string()),
            OperandKind::String => Ok(format!("{:?}", self.read_pool_string()?)),
            OperandKind::StringList => {
                let count = self.read_count()?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    let item = self.reader.position();
                    if self.reader.peek_byte() == Some(OperandKind::StringList as u8) {
                        return Err(self.invalid(item, "string list nested in a string list"));
                    }
                    items.push(self.describe_operand()?);
                }
                Ok(format!("[{}]", items.join(", ")))
            }
            OperandKind::Comparator | OperandKind::MatchType => {
                let index = self.reader.read_byte()?;
                let code = self.reader.read_byte()?;
                let ext = self.extension_at(index, offset)?;
                let name = if kind == OperandKind::Comparator {
                    ext.comparator(code).map(|c| c.name().to_string())
                } else {
                    ext.match_type(code).map(|m| format!(":{}", m.name()))
                };
                name.ok_or_else(|| self.invalid(offset, format!("unknown {kind} {code}")))
            }
            OperandKind::AddressPart => {
                let code = self.reader.read_byte()?;
                AddressPart::from_repr(code)
                    .map(|part| format!(":{part}"))
                    .ok_or_else(|| self.invalid(offset, format!("unknown address part {code}")))
            }
            OperandKind::Extension => {
                let index = self.reader.read_byte()?;
                let code = self.reader.read_byte()?;
                let ext = self.extension_at(index, offset)?;
                let def = ext.operand(code).ok_or_else(|| {
                    self.invalid(offset, format!("unknown operand {code} for '{}'", ext.name()))
                })?;
                def.dump(ext, self)
            }
        }
    }

    /// `label: value` for the next operand.
    pub fn operand(&mut self, label: &str) -> Result<(), BinaryError> {
        self.mark = self.reader.position();
        let text = self.describe_operand()?;
        self.line(format!("{label}: {text}"));
        Ok(())
    }

    /// `label: address` for a jump target.
    pub fn address_operand(&mut self, label: &str) -> Result<(), BinaryError> {
        self.mark = self.reader.position();
        let target = self.reader.read_address()?;
        let code_size = self.program.binary().code_size();
        if target > code_size {
            return Err(BinaryError::JumpOutOfRange { target, code_size });
        }
        self.line(format!("{label}: {target:08x}"));
        Ok(())
    }

    /// The optional-operand block, if present. Every optional operand is
    /// self-describing, so codes without a label are still dumped.
    pub fn optional_operands(
        &mut self,
        label: impl Fn(u8) -> Option<&'static str>,
    ) -> Result<(), BinaryError> {
        if self.reader.peek_byte() != Some(OPTIONAL_MARKER) {
            return Ok(());
        }
        self.reader.read_byte()?;
        let mut code = self.reader.read_byte()?;
        while code != opt::END {
            let name = match code {
                opt::COMPARATOR => Some("comparator"),
                opt::MATCH_TYPE => Some("match type"),
                opt::ADDRESS_PART => Some("address part"),
                opt::SIDE_EFFECT => Some("side effect"),
                other => label(other),
            };
            match name {
                Some(name) => self.operand(name)?,
                None => self.operand(&format!("optional {code}"))?,
            }
            code = self.reader.read_byte()?;
        }
        Ok(())
    }

    fn render(&self) -> Vec<String> {
        self.lines
            .iter()
            .map(|l| format!("{:08x}: {}{}", l.address, "  ".repeat(l.depth), l.text))
            .collect()
    }
}

/// Text dump of the whole program. A decoding failure ends the dump with
/// `Binary is corrupt.`
pub fn dump(program: &LoadedBinary) -> String {
    let mut out = vec!["* Extensions:".to_string()];
    for (i, ext) in program.binary().extensions().iter().enumerate() {
        out.push(format!("  {}: {}", i + 1, ext.name));
    }
    out.push(format!("* Code ({} bytes):", program.binary().code_size()));

    let mut dumper = CodeDumper::new(program);
    let result = dumper.decode_all();
    out.extend(dumper.render());
    match result {
        Ok(()) => out.push("[End of code]".to_string()),
        Err(err) => {
            tracing::debug!(error = %err, "code dump stopped");
            out.push("Binary is corrupt.".to_string());
        }
    }
    out.join("\n")
}

/// Decode every instruction.
pub fn disassemble(program: &LoadedBinary) -> Result<Vec<Instruction>, BinaryError> {
    let mut dumper = CodeDumper::new(program);
    dumper.decode_all()?;
    Ok(dumper.instructions)
}
