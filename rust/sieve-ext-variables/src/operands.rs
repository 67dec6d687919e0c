//! Variable operands and their compile-time counterparts.
//!
//! `VARIABLE` names one variable (payload: pool index of the name).
//! `VAR_STRING` is a string with references (payload: part count, then per
//! part a tag byte and a pool index; tag 0 is literal text, tag 1 a
//! variable name).

use crate::expand::{self, is_identifier, Part};
use crate::operand;
use sieve_core::binary::OperandKind;
use sieve_core::BinaryError;
use sieve_engine::compiler::ast::{Argument, ArgumentValue, CommandNode};
use sieve_engine::compiler::commands::{ArgumentHandler, StringEncoder};
use sieve_engine::compiler::generator::{GenerateError, Generator};
use sieve_engine::compiler::validator::Validator;
use sieve_engine::registry::Extension;
use sieve_engine::vm::dump::CodeDumper;
use sieve_engine::vm::operation::{OperandClass, OperandDef};
use sieve_engine::vm::variables::VariableRef;
use sieve_engine::{Interpreter, RuntimeError};
use std::sync::Arc;

const PART_LITERAL: u8 = 0;
const PART_VARIABLE: u8 = 1;

pub struct VariableOperand;

impl OperandDef for VariableOperand {
    fn name(&self) -> &'static str {
        "variable"
    }

    fn code(&self) -> u8 {
        operand::VARIABLE
    }

    fn class(&self) -> OperandClass {
        OperandClass::Variable
    }

    fn dump(&self, _ext: &Arc<Extension>, dumper: &mut CodeDumper<'_>) -> Result<String, BinaryError> {
        Ok(format!("${{{}}}", dumper.read_pool_string()?))
    }

    fn read_variable(
        &self,
        ext: &Arc<Extension>,
        interp: &mut Interpreter<'_>,
    ) -> Result<VariableRef, RuntimeError> {
        let name = interp.read_pool_string()?;
        Ok(VariableRef::new(ext.id(), name))
    }

    /// Reading a variable as a string yields its value; unset is empty.
    fn read_string(&self, ext: &Arc<Extension>, interp: &mut Interpreter<'_>) -> Result<String, RuntimeError> {
        let var = self.read_variable(ext, interp)?;
        Ok(interp.variables().get(&var).unwrap_or_default().to_string())
    }
}

pub struct VarStringOperand;

impl OperandDef for VarStringOperand {
    fn name(&self) -> &'static str {
        "variable-string"
    }

    fn code(&self) -> u8 {
        operand::VAR_STRING
    }

    fn class(&self) -> OperandClass {
        OperandClass::String
    }

    fn dump(&self, _ext: &Arc<Extension>, dumper: &mut CodeDumper<'_>) -> Result<String, BinaryError> {
        let offset = dumper.position();
        let count = dumper.read_varint()?;
        let mut text = String::new();
        for _ in 0..count {
            match dumper.read_byte()? {
                PART_LITERAL => text.push_str(dumper.read_pool_string()?),
                PART_VARIABLE => {
                    let name = dumper.read_pool_string()?;
                    text.push_str(&format!("${{{name}}}"));
                }
                tag => return Err(dumper.invalid(offset, format!("unknown string part {tag}"))),
            }
        }
        Ok(format!("expand {text:?}"))
    }

    fn read_string(&self, ext: &Arc<Extension>, interp: &mut Interpreter<'_>) -> Result<String, RuntimeError> {
        let count = interp.read_count()?;
        let mut out = String::new();
        for _ in 0..count {
            match interp.read_byte()? {
                PART_LITERAL => out.push_str(interp.read_pool_string()?),
                PART_VARIABLE => {
                    let var = VariableRef::new(ext.id(), interp.read_pool_string()?);
                    if let Some(value) = interp.variables().get(&var) {
                        out.push_str(value);
                    }
                }
                tag => return Err(interp.corrupt(format!("unknown string part {tag}"))),
            }
        }
        Ok(out)
    }
}

/// Validates and emits variable-name arguments: a single name, or a list of
/// names for commands taking a variable list.
pub struct VariableArgument {
    ext: Arc<Extension>,
}

impl VariableArgument {
    pub fn new(ext: Arc<Extension>) -> Self {
        Self { ext }
    }

    fn emit_variable(&self, generator: &mut Generator, name: &str) -> Result<(), GenerateError> {
        generator.emit_extension_operand(&self.ext, operand::VARIABLE)?;
        generator.emit_string_ref(name);
        Ok(())
    }
}

impl ArgumentHandler for VariableArgument {
    fn name(&self) -> &'static str {
        crate::VARIABLE_HANDLER
    }

    fn validate(&self, validator: &mut Validator<'_>, cmd: &mut CommandNode, index: usize) -> bool {
        let arg = &cmd.arguments[index];
        let span = arg.span;
        let Some(names) = arg.value.strings() else {
            validator.error(span, format!("'{}': variable name must be a string", cmd.identifier));
            return false;
        };
        let invalid: Vec<String> = names
            .into_iter()
            .filter(|name| !is_identifier(name))
            .map(str::to_string)
            .collect();
        for name in &invalid {
            validator.error(span, format!("invalid variable name '{name}'"));
        }
        invalid.is_empty()
    }

    fn generate(&self, generator: &mut Generator, arg: &Argument) -> Result<(), GenerateError> {
        match &arg.value {
            ArgumentValue::String(name) => self.emit_variable(generator, name),
            ArgumentValue::StringList(names) => {
                generator.emit_byte(OperandKind::StringList as u8);
                generator.emit_varint(names.len() as u64);
                for name in names {
                    self.emit_variable(generator, name)?;
                }
                Ok(())
            }
            other => Err(GenerateError::Inconsistent(format!(
                "{} activated as a variable name",
                other.kind_name()
            ))),
        }
    }
}

/// Emits strings containing `${name}` references as `VAR_STRING` operands.
pub struct VariableStringEncoder {
    ext: Arc<Extension>,
}

impl VariableStringEncoder {
    pub fn new(ext: Arc<Extension>) -> Self {
        Self { ext }
    }
}

impl StringEncoder for VariableStringEncoder {
    fn is_dynamic(&self, value: &str) -> bool {
        expand::has_references(value)
    }

    fn encode(&self, generator: &mut Generator, value: &str) -> Result<(), GenerateError> {
        let parts = expand::parse(value);
        generator.emit_extension_operand(&self.ext, operand::VAR_STRING)?;
        generator.emit_varint(parts.len() as u64);
        for part in &parts {
            match part {
                Part::Literal(text) => {
                    generator.emit_byte(PART_LITERAL);
                    generator.emit_string_ref(text);
                }
                Part::Variable(name) => {
                    generator.emit_byte(PART_VARIABLE);
                    generator.emit_string_ref(name);
                }
            }
        }
        Ok(())
    }
}
