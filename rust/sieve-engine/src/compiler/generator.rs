//! Code generation from a validated AST.
//!
//! The generator trusts validation: any node that is unbound, any argument
//! that was never activated or is emitted twice, and any unbalanced control
//! construct is reported as [`GenerateError::Inconsistent`], a compiler
//! defect rather than a script error.

use crate::compiler::ast::{ActiveHandler, Argument, ArgumentState, CommandNode, Script};
use crate::compiler::commands::StringEncoder;
use crate::registry::Extension;
use sieve_core::binary::{
    opt, Binary, BinaryError, CodeBuffer, ExtensionRef, JumpPlaceholder, OperandKind,
    CORE_EXTENSION_INDEX, OPTIONAL_MARKER,
};
use sieve_core::strings::StringTable;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("internal compiler inconsistency: {0}")]
    Inconsistent(String),
    #[error("binary would reference more than 255 extensions")]
    TooManyExtensions,
    #[error(transparent)]
    Binary(#[from] BinaryError),
}

pub struct Generator {
    code: CodeBuffer,
    strings: StringTable,
    /// Binary extension table; local index `n` refers to entry `n - 1`.
    linked: Vec<Arc<Extension>>,
    if_chains: Vec<Vec<JumpPlaceholder>>,
    string_encoder: Option<Arc<dyn StringEncoder>>,
}

impl Generator {
    pub fn new(string_encoder: Option<Arc<dyn StringEncoder>>) -> Self {
        Self {
            code: CodeBuffer::new(),
            strings: StringTable::new(),
            linked: Vec::new(),
            if_chains: Vec::new(),
            string_encoder,
        }
    }

    pub fn generate(mut self, script: &Script) -> Result<Binary, GenerateError> {
        self.generate_block(&script.commands)?;
        if !self.if_chains.is_empty() {
            return Err(GenerateError::Inconsistent(format!(
                "{} conditional chain(s) left open",
                self.if_chains.len()
            )));
        }
        let code = self.code.finish()?;
        let extensions = self
            .linked
            .iter()
            .map(|ext| ExtensionRef { name: ext.name().to_string(), id: ext.id().0 })
            .collect();
        let binary = Binary::new(extensions, code, self.strings.into_strings())?;
        tracing::debug!(
            script = %script.name,
            code_size = binary.code_size(),
            strings = binary.strings().len(),
            extensions = binary.extensions().len(),
            "generated binary"
        );
        Ok(binary)
    }

    /// Current emission address.
    pub fn address(&self) -> usize {
        self.code.address()
    }

    /// Local index of `ext`, adding it to the extension table on first
    /// reference.
    pub fn link_extension(&mut self, ext: &Arc<Extension>) -> Result<u8, GenerateError> {
        if ext.is_core() {
            return Ok(CORE_EXTENSION_INDEX);
        }
        if let Some(pos) = self.linked.iter().position(|e| e.id() == ext.id()) {
            return Ok((pos + 1) as u8);
        }
        if self.linked.len() >= u8::MAX as usize {
            return Err(GenerateError::TooManyExtensions);
        }
        self.linked.push(ext.clone());
        Ok(self.linked.len() as u8)
    }

    /// Operation header: extension index, then local opcode.
    pub fn emit_operation(&mut self, ext: &Arc<Extension>, code: u8) -> Result<(), GenerateError> {
        let index = self.link_extension(ext)?;
        if ext.operation(code).is_none() {
            return Err(GenerateError::Inconsistent(format!(
                "extension '{}' has no opcode {code}",
                ext.name()
            )));
        }
        self.code.emit_byte(index);
        self.code.emit_byte(code);
        Ok(())
    }

    /// Header of a core operation.
    pub fn emit_core_operation(&mut self, code: u8) -> Result<(), GenerateError> {
        self.code.emit_byte(CORE_EXTENSION_INDEX);
        self.code.emit_byte(code);
        Ok(())
    }

    pub fn emit_byte(&mut self, byte: u8) {
        self.code.emit_byte(byte);
    }

    pub fn emit_varint(&mut self, value: u64) {
        self.code.emit_varint(value);
    }

    pub fn emit_number(&mut self, value: u64) {
        self.code.emit_byte(OperandKind::Number as u8);
        self.code.emit_varint(value);
    }

    /// A string operand, routed through the string encoder when its text is
    /// not constant.
    pub fn emit_string(&mut self, value: &str) -> Result<(), GenerateError> {
        if let Some(encoder) = self.string_encoder.clone() {
            if encoder.is_dynamic(value) {
                return encoder.encode(self, value);
            }
        }
        self.emit_literal_string(value);
        Ok(())
    }

    pub fn emit_literal_string(&mut self, value: &str) {
        self.code.emit_byte(OperandKind::String as u8);
        self.emit_string_ref(value);
    }

    /// Bare string-pool index, for operand payloads.
    pub fn emit_string_ref(&mut self, value: &str) {
        let index = self.strings.intern(value);
        self.code.emit_varint(index as u64);
    }

    pub fn emit_string_list(&mut self, items: &[String]) -> Result<(), GenerateError> {
        self.code.emit_byte(OperandKind::StringList as u8);
        self.code.emit_varint(items.len() as u64);
        for item in items {
            self.emit_string(item)?;
        }
        Ok(())
    }

    pub fn emit_comparator(&mut self, ext: &Arc<Extension>, code: u8) -> Result<(), GenerateError> {
        let index = self.link_extension(ext)?;
        self.code.emit_byte(OperandKind::Comparator as u8);
        self.code.emit_byte(index);
        self.code.emit_byte(code);
        Ok(())
    }

    pub fn emit_match_type(&mut self, ext: &Arc<Extension>, code: u8) -> Result<(), GenerateError> {
        let index = self.link_extension(ext)?;
        self.code.emit_byte(OperandKind::MatchType as u8);
        self.code.emit_byte(index);
        self.code.emit_byte(code);
        Ok(())
    }

    pub fn emit_address_part(&mut self, code: u8) {
        self.code.emit_byte(OperandKind::AddressPart as u8);
        self.code.emit_byte(code);
    }

    /// Header of an extension-defined operand; the payload follows.
    pub fn emit_extension_operand(
        &mut self,
        ext: &Arc<Extension>,
        code: u8,
    ) -> Result<(), GenerateError> {
        if ext.operand(code).is_none() {
            return Err(GenerateError::Inconsistent(format!(
                "extension '{}' has no operand {code}",
                ext.name()
            )));
        }
        let index = self.link_extension(ext)?;
        self.code.emit_byte(OperandKind::Extension as u8);
        self.code.emit_byte(index);
        self.code.emit_byte(code);
        Ok(())
    }

    pub fn emit_placeholder(&mut self) -> JumpPlaceholder {
        self.code.emit_placeholder()
    }

    /// A known (backward) jump target.
    pub fn emit_address(&mut self, target: usize) -> Result<(), GenerateError> {
        Ok(self.code.emit_address(target)?)
    }

    pub fn patch_here(&mut self, placeholder: JumpPlaceholder) -> Result<(), GenerateError> {
        Ok(self.code.patch_here(placeholder)?)
    }

    pub fn generate_block(&mut self, commands: &[CommandNode]) -> Result<(), GenerateError> {
        for cmd in commands {
            self.generate_node(cmd)?;
        }
        Ok(())
    }

    pub fn generate_test(&mut self, test: &CommandNode) -> Result<(), GenerateError> {
        self.generate_node(test)
    }

    fn generate_node(&mut self, node: &CommandNode) -> Result<(), GenerateError> {
        let binding = node.binding().ok_or_else(|| {
            GenerateError::Inconsistent(format!(
                "'{}' at line {} was not validated",
                node.identifier, node.span.line
            ))
        })?;
        let def = binding.def.clone();
        def.generate(self, node)
    }

    /// Emit every active argument of `cmd`: first the optional-operand block
    /// (arguments with an optional code, in source order), then the
    /// positional operands.
    pub fn generate_arguments(&mut self, cmd: &CommandNode) -> Result<(), GenerateError> {
        self.emit_arguments(cmd, false)
    }

    /// Like [`generate_arguments`](Self::generate_arguments), but always
    /// emits the optional block. Operations with optional operands and no
    /// positional ones need it: otherwise the next header's core index
    /// would read as the block marker.
    pub fn generate_arguments_with_optional_block(
        &mut self,
        cmd: &CommandNode,
    ) -> Result<(), GenerateError> {
        self.emit_arguments(cmd, true)
    }

    fn emit_arguments(&mut self, cmd: &CommandNode, force_optional: bool) -> Result<(), GenerateError> {
        let mut optional = Vec::new();
        let mut positional = Vec::new();
        for arg in &cmd.arguments {
            match arg.state() {
                ArgumentState::Detached => {}
                ArgumentState::Inactive => {
                    return Err(GenerateError::Inconsistent(format!(
                        "{} argument of '{}' at line {} was never activated",
                        arg.value.kind_name(),
                        cmd.identifier,
                        arg.span.line
                    )))
                }
                ArgumentState::Active(activation) => match activation.opt_code {
                    Some(code) => optional.push((code, arg)),
                    None => positional.push(arg),
                },
            }
        }

        if force_optional || !optional.is_empty() {
            self.code.emit_byte(OPTIONAL_MARKER);
            for (code, arg) in optional {
                if code == opt::END {
                    return Err(GenerateError::Inconsistent(format!(
                        "optional operand of '{}' uses the reserved end code",
                        cmd.identifier
                    )));
                }
                self.code.emit_byte(code);
                self.generate_argument(cmd, arg)?;
            }
            self.code.emit_byte(opt::END);
        }

        for arg in positional {
            self.generate_argument(cmd, arg)?;
        }
        Ok(())
    }

    pub fn generate_argument(&mut self, cmd: &CommandNode, arg: &Argument) -> Result<(), GenerateError> {
        let Some(activation) = arg.activation() else {
            return Err(GenerateError::Inconsistent(format!(
                "argument of '{}' at line {} is not active",
                cmd.identifier, arg.span.line
            )));
        };
        if !arg.mark_generated() {
            return Err(GenerateError::Inconsistent(format!(
                "argument of '{}' at line {} generated twice",
                cmd.identifier, arg.span.line
            )));
        }
        match &activation.handler {
            ActiveHandler::Value(handler) => handler.generate(self, arg),
            ActiveHandler::Tag(tag) => tag.generate(self, cmd, arg),
        }
    }

    pub fn open_if_chain(&mut self) {
        self.if_chains.push(Vec::new());
    }

    /// Record the exit jump of a branch that has a successor.
    pub fn add_if_exit(&mut self, exit: JumpPlaceholder) -> Result<(), GenerateError> {
        match self.if_chains.last_mut() {
            Some(chain) => {
                chain.push(exit);
                Ok(())
            }
            None => Err(GenerateError::Inconsistent("branch exit outside a conditional".into())),
        }
    }

    /// Patch every exit jump of the innermost chain to the current address.
    pub fn close_if_chain(&mut self) -> Result<(), GenerateError> {
        let chain = self
            .if_chains
            .pop()
            .ok_or_else(|| GenerateError::Inconsistent("conditional chain closed twice".into()))?;
        for exit in chain {
            self.patch_here(exit)?;
        }
        Ok(())
    }
}
