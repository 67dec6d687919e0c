//! Operation and extension-operand behavior, one trait object per entry of
//! an extension's tables.

use crate::registry::Extension;
use crate::vm::actions::Action;
use crate::vm::dump::CodeDumper;
use crate::vm::variables::VariableRef;
use crate::vm::{Interpreter, RuntimeError};
use sieve_core::BinaryError;
use std::sync::Arc;

/// One executable behavior, addressed in the binary by (extension, code).
pub trait Operation: Send + Sync {
    fn mnemonic(&self) -> &'static str;

    /// Local opcode within the owning extension.
    fn code(&self) -> u8;

    /// Print the operands that follow the header; the dumper has already
    /// written the mnemonic line and is positioned right after the header.
    fn dump(&self, dumper: &mut CodeDumper<'_>) -> Result<(), BinaryError>;

    /// Consume the operands and perform the operation. The interpreter is
    /// positioned right after the header.
    fn execute(&self, interp: &mut Interpreter<'_>) -> Result<(), RuntimeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandClass {
    /// Read through the generic string reader.
    String,
    Variable,
    SideEffect,
}

/// An operand kind contributed by an extension, emitted after an
/// `EXTENSION` kind byte, the extension index and this local code.
pub trait OperandDef: Send + Sync {
    fn name(&self) -> &'static str;

    fn code(&self) -> u8;

    fn class(&self) -> OperandClass;

    /// Read the payload and describe it for the code dump.
    fn dump(&self, ext: &Arc<Extension>, dumper: &mut CodeDumper<'_>) -> Result<String, BinaryError>;

    /// Readers are called after the operand header; `ext` is the extension
    /// the header resolved to.
    fn read_string(
        &self,
        _ext: &Arc<Extension>,
        interp: &mut Interpreter<'_>,
    ) -> Result<String, RuntimeError> {
        Err(interp.corrupt(format!("operand {} is not a string", self.name())))
    }

    fn read_variable(
        &self,
        _ext: &Arc<Extension>,
        interp: &mut Interpreter<'_>,
    ) -> Result<VariableRef, RuntimeError> {
        Err(interp.corrupt(format!("operand {} is not a variable", self.name())))
    }

    fn read_side_effect(
        &self,
        _ext: &Arc<Extension>,
        interp: &mut Interpreter<'_>,
    ) -> Result<Box<dyn SideEffect>, RuntimeError> {
        Err(interp.corrupt(format!("operand {} is not a side effect", self.name())))
    }
}

/// Adjusts an action before it is queued, e.g. attaching flags.
pub trait SideEffect: Send {
    fn apply(&self, action: &mut Action);
}
