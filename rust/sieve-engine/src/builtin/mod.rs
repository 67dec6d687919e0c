//! The core language and the `fileinto` and `envelope` extensions.

pub mod actions;
pub mod control;
pub mod tests;

use crate::compiler::ast::CommandNode;
use crate::compiler::generator::{GenerateError, Generator};
use crate::registry::ExtensionDef;
use crate::vm::dump::CodeDumper;
use crate::vm::operation::Operation;
use crate::vm::{Interpreter, RuntimeError};
use sieve_core::match_type::{ContainsMatch, IsMatch, WildcardMatch};
use sieve_core::{AsciiCasemapComparator, BinaryError, OctetComparator};
use std::sync::Arc;
use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};

/// Opcodes of the core extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "UPPERCASE")]
#[repr(u8)]
pub enum CoreOpcode {
    // Control flow
    Jmp = 0,       // addr
    JmpTrue = 1,   // addr: jump if the test result is set
    JmpFalse = 2,  // addr: jump if the test result is clear
    Stop = 3,
    // Test result
    Not = 4,
    True = 5,
    False = 6,
    // Actions
    Keep = 7,      // [side effects]
    Discard = 8,
    Redirect = 9,  // address
    // Tests
    Header = 10,   // [cmp, match] names keys
    Address = 11,  // [cmp, match, part] names keys
    Exists = 12,   // names
    SizeOver = 13, // limit
    SizeUnder = 14,
}

impl CoreOpcode {
    pub fn mnemonic(self) -> &'static str {
        self.into()
    }
}

/// Emit a core operation header.
pub fn emit_core(generator: &mut Generator, op: CoreOpcode) -> Result<(), GenerateError> {
    generator.emit_core_operation(op as u8)
}

/// Emit the header of `cmd`'s own extension operation.
pub fn emit_own(generator: &mut Generator, cmd: &CommandNode, code: u8) -> Result<(), GenerateError> {
    let ext = cmd.ext().ok_or_else(|| {
        GenerateError::Inconsistent(format!("'{}' was not validated", cmd.identifier))
    })?;
    generator.emit_operation(ext, code)
}

struct CoreOperation(CoreOpcode);

impl Operation for CoreOperation {
    fn mnemonic(&self) -> &'static str {
        self.0.mnemonic()
    }

    fn code(&self) -> u8 {
        self.0 as u8
    }

    fn dump(&self, d: &mut CodeDumper<'_>) -> Result<(), BinaryError> {
        match self.0 {
            CoreOpcode::Jmp | CoreOpcode::JmpTrue | CoreOpcode::JmpFalse => d.address_operand("target"),
            CoreOpcode::Stop
            | CoreOpcode::Not
            | CoreOpcode::True
            | CoreOpcode::False
            | CoreOpcode::Discard => Ok(()),
            CoreOpcode::Keep => d.optional_operands(|_| None),
            CoreOpcode::Redirect => d.operand("address"),
            CoreOpcode::Header | CoreOpcode::Address => {
                d.optional_operands(|_| None)?;
                d.operand("header names")?;
                d.operand("key list")
            }
            CoreOpcode::Exists => d.operand("header names"),
            CoreOpcode::SizeOver | CoreOpcode::SizeUnder => d.operand("limit"),
        }
    }

    fn execute(&self, interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
        match self.0 {
            CoreOpcode::Jmp => {
                let target = interp.read_jump_target()?;
                interp.jump(target)
            }
            CoreOpcode::JmpTrue | CoreOpcode::JmpFalse => {
                let target = interp.read_jump_target()?;
                if interp.test_result() == (self.0 == CoreOpcode::JmpTrue) {
                    interp.jump(target)?;
                }
                Ok(())
            }
            CoreOpcode::Stop => {
                interp.halt();
                Ok(())
            }
            CoreOpcode::Not => {
                let result = !interp.test_result();
                interp.set_test_result(result);
                Ok(())
            }
            CoreOpcode::True | CoreOpcode::False => {
                interp.set_test_result(self.0 == CoreOpcode::True);
                Ok(())
            }
            CoreOpcode::Keep => actions::execute_keep(interp),
            CoreOpcode::Discard => actions::execute_discard(interp),
            CoreOpcode::Redirect => actions::execute_redirect(interp),
            CoreOpcode::Header => tests::execute_header(interp),
            CoreOpcode::Address => tests::execute_address(interp),
            CoreOpcode::Exists => tests::execute_exists(interp),
            CoreOpcode::SizeOver | CoreOpcode::SizeUnder => {
                tests::execute_size(interp, self.0 == CoreOpcode::SizeOver)
            }
        }
    }
}

/// The core language. Implicitly enabled for every script.
pub fn core_extension() -> ExtensionDef {
    let mut def = ExtensionDef::new("core");
    def.implicit = true;
    def.commands = vec![
        Arc::new(control::Require),
        Arc::new(control::If),
        Arc::new(control::Elsif),
        Arc::new(control::Else),
        Arc::new(control::Stop),
        Arc::new(actions::Keep),
        Arc::new(actions::Discard),
        Arc::new(actions::Redirect),
    ];
    def.tests = vec![
        Arc::new(control::Constant(true)),
        Arc::new(control::Constant(false)),
        Arc::new(control::Not),
        Arc::new(control::AllOf),
        Arc::new(control::AnyOf),
        Arc::new(tests::Header),
        Arc::new(tests::Address),
        Arc::new(tests::Exists),
        Arc::new(tests::Size),
    ];
    def.operations = CoreOpcode::iter()
        .map(|op| Arc::new(CoreOperation(op)) as Arc<dyn Operation>)
        .collect();
    def.comparators = vec![Arc::new(AsciiCasemapComparator), Arc::new(OctetComparator)];
    def.match_types = vec![Arc::new(IsMatch), Arc::new(ContainsMatch), Arc::new(WildcardMatch)];
    def
}

pub fn fileinto_extension() -> ExtensionDef {
    let mut def = ExtensionDef::new("fileinto");
    def.commands = vec![Arc::new(actions::FileInto)];
    def.operations = vec![Arc::new(actions::FileIntoOperation)];
    def
}

pub fn envelope_extension() -> ExtensionDef {
    let mut def = ExtensionDef::new("envelope");
    def.tests = vec![Arc::new(tests::Envelope)];
    def.operations = vec![Arc::new(tests::EnvelopeOperation)];
    def
}
