//! `set`, `string` and `foreach` with their operations.

use crate::modifiers::{apply_modifiers, order_by_precedence, CodedModifier, ModifierTable, SetModifier};
use crate::{op, VARIABLE_HANDLER};
use sieve_core::BinaryError;
use sieve_engine::builtin::{emit_core, emit_own, CoreOpcode};
use sieve_engine::compiler::ast::CommandNode;
use sieve_engine::compiler::commands::{
    ArgKind, BlockRule, CommandDef, CommandKind, Positional, PositionalSpec, TagDef,
};
use sieve_engine::compiler::generator::{GenerateError, Generator};
use sieve_engine::compiler::match_args::{link_match_tags, validate_key_list};
use sieve_engine::compiler::validator::Validator;
use sieve_engine::registry::Extension;
use sieve_engine::vm::dump::CodeDumper;
use sieve_engine::vm::operation::Operation;
use sieve_engine::vm::variables::VariableRef;
use sieve_engine::{Interpreter, RuntimeError};
use std::collections::VecDeque;
use std::sync::Arc;

/// Activate the `n`th positional argument as a variable name.
fn activate_variable(validator: &mut Validator<'_>, cmd: &mut CommandNode, n: usize) -> bool {
    let Some(index) = cmd.positional_indices().get(n).copied() else {
        return false;
    };
    let Some(handler) = validator.argument_handler(VARIABLE_HANDLER) else {
        validator.error(cmd.span, "variable names are not available");
        return false;
    };
    validator.activate_with(cmd, index, handler, None)
}

// ---------------------------------------------------------------------------
// set
// ---------------------------------------------------------------------------

/// Modifiers collected from a `set` command's tags, ordered by precedence
/// once validated.
#[derive(Debug, Default)]
struct SetModifiers(Vec<CodedModifier>);

struct ModifierTag {
    table: Arc<ModifierTable>,
}

impl TagDef for ModifierTag {
    fn name(&self) -> &'static str {
        "MODIFIER"
    }

    fn is_instance_of(&self, _validator: &Validator<'_>, identifier: &str) -> bool {
        self.table.by_name(identifier).is_some()
    }

    fn allow_multiple(&self) -> bool {
        true
    }

    fn validate(&self, _validator: &mut Validator<'_>, cmd: &mut CommandNode, index: usize) -> bool {
        let modifier = cmd.arguments[index]
            .tag_name()
            .and_then(|t| self.table.by_name(t));
        let Some(modifier) = modifier else {
            return false;
        };
        cmd.data_mut_or_default::<SetModifiers>().0.push(modifier);
        cmd.arguments[index].detach();
        true
    }
}

/// `set [MODIFIER] <name: string> <value: string>`
pub struct Set {
    table: Arc<ModifierTable>,
}

impl Set {
    pub fn new(table: Arc<ModifierTable>) -> Self {
        Self { table }
    }
}

impl CommandDef for Set {
    fn identifier(&self) -> &'static str {
        "set"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Command
    }

    fn positional(&self) -> Positional {
        const SPEC: &[PositionalSpec] = &[
            PositionalSpec::new("name", ArgKind::String),
            PositionalSpec::new("value", ArgKind::String),
        ];
        Positional::Fixed(SPEC)
    }

    fn registered(&self, validator: &mut Validator<'_>, _ext: &Arc<Extension>) {
        validator.register_tag("set", Arc::new(ModifierTag { table: self.table.clone() }), None);
    }

    fn validate(&self, validator: &mut Validator<'_>, cmd: &mut CommandNode) -> bool {
        let modifiers = &mut cmd.data_mut_or_default::<SetModifiers>().0;
        if let Err((a, b)) = order_by_precedence(modifiers) {
            validator.error(
                cmd.span,
                format!(
                    "modifiers :{} and :{} specified for the set command conflict having equal precedence",
                    a.name(),
                    b.name()
                ),
            );
            return false;
        }
        activate_variable(validator, cmd, 0)
    }

    fn generate(&self, generator: &mut Generator, cmd: &CommandNode) -> Result<(), GenerateError> {
        emit_own(generator, cmd, op::SET)?;
        generator.generate_arguments(cmd)?;
        let modifiers = cmd.data::<SetModifiers>().map(|m| m.0.as_slice()).unwrap_or_default();
        generator.emit_byte(modifiers.len() as u8);
        for modifier in modifiers {
            generator.emit_byte(modifier.code);
        }
        Ok(())
    }
}

pub(crate) struct SetOperation {
    pub(crate) table: Arc<ModifierTable>,
}

impl Operation for SetOperation {
    fn mnemonic(&self) -> &'static str {
        "SET"
    }

    fn code(&self) -> u8 {
        op::SET
    }

    fn dump(&self, dumper: &mut CodeDumper<'_>) -> Result<(), BinaryError> {
        dumper.operand("variable")?;
        dumper.operand("value")?;
        dumper.mark_here();
        let offset = dumper.position();
        let count = dumper.read_byte()?;
        let mut names = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let code = dumper.read_byte()?;
            let modifier = self
                .table
                .by_code(code)
                .ok_or_else(|| dumper.invalid(offset, format!("unknown modifier {code}")))?;
            names.push(format!(":{}", modifier.name()));
        }
        if !names.is_empty() {
            dumper.line(format!("modifiers: {}", names.join(" ")));
        }
        Ok(())
    }

    fn execute(&self, interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
        let var = interp.read_variable()?;
        let value = interp.read_string()?;
        let count = interp.read_byte()?;
        let mut modifiers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let code = interp.read_byte()?;
            let modifier = self
                .table
                .by_code(code)
                .ok_or_else(|| interp.corrupt(format!("unknown modifier {code}")))?;
            modifiers.push(modifier);
        }
        match apply_modifiers(value, &modifiers, interp.variables().max_size()) {
            Some(value) => interp.variables_mut().set(&var, value),
            None => {
                tracing::warn!(variable = %var.name, "modifier failed; variable left unchanged");
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// string
// ---------------------------------------------------------------------------

/// `string [MATCH-TYPE] [COMPARATOR] <source: string-list> <key-list: string-list>`
pub struct StringTest;

impl CommandDef for StringTest {
    fn identifier(&self) -> &'static str {
        "string"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Test
    }

    fn positional(&self) -> Positional {
        const SPEC: &[PositionalSpec] = &[
            PositionalSpec::new("source", ArgKind::StringList),
            PositionalSpec::new("key-list", ArgKind::StringList),
        ];
        Positional::Fixed(SPEC)
    }

    fn registered(&self, validator: &mut Validator<'_>, _ext: &Arc<Extension>) {
        link_match_tags(validator, "string");
    }

    fn validate(&self, validator: &mut Validator<'_>, cmd: &mut CommandNode) -> bool {
        match cmd.positional_indices().get(1).copied() {
            Some(index) => validate_key_list(validator, cmd, index),
            None => false,
        }
    }

    fn generate(&self, generator: &mut Generator, cmd: &CommandNode) -> Result<(), GenerateError> {
        emit_own(generator, cmd, op::STRING)?;
        generator.generate_arguments(cmd)
    }
}

pub(crate) struct StringOperation;

impl Operation for StringOperation {
    fn mnemonic(&self) -> &'static str {
        "STRING"
    }

    fn code(&self) -> u8 {
        op::STRING
    }

    fn dump(&self, dumper: &mut CodeDumper<'_>) -> Result<(), BinaryError> {
        dumper.optional_operands(|_| None)?;
        dumper.operand("source")?;
        dumper.operand("key list")
    }

    fn execute(&self, interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
        let operands = interp.read_match_operands(|_, _| Ok(false))?;
        let sources = interp.read_string_list()?;
        let keys = interp.read_string_list()?;
        let result = interp.match_values(&operands, keys, sources.iter().map(String::as_str));
        interp.set_test_result(result);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// foreach
// ---------------------------------------------------------------------------

/// Iteration state of the active loops, innermost last.
#[derive(Debug, Default)]
struct ForeachFrames(Vec<ForeachFrame>);

#[derive(Debug)]
struct ForeachFrame {
    var: VariableRef,
    items: VecDeque<String>,
}

/// `foreach <name: string> <list: string-list> { ... }`
///
/// Compiles to `FOREACH var list`, then a loop head `FOREACH_NEXT exit`
/// that assigns the next item or leaves the loop, the block, and a core
/// `JMP` back to the head.
pub struct Foreach;

impl CommandDef for Foreach {
    fn identifier(&self) -> &'static str {
        "foreach"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Command
    }

    fn positional(&self) -> Positional {
        const SPEC: &[PositionalSpec] = &[
            PositionalSpec::new("name", ArgKind::String),
            PositionalSpec::new("list", ArgKind::StringList),
        ];
        Positional::Fixed(SPEC)
    }

    fn block(&self) -> BlockRule {
        BlockRule::Required
    }

    fn validate(&self, validator: &mut Validator<'_>, cmd: &mut CommandNode) -> bool {
        let max = validator.limits().max_foreach_items;
        let list = cmd.positional_indices().get(1).map(|&i| &cmd.arguments[i]);
        if let Some(list) = list {
            let count = list.value.strings().map_or(0, |items| items.len());
            if count > max {
                let span = list.span;
                validator.error(span, format!("foreach list has {count} items; the limit is {max}"));
                return false;
            }
        }
        activate_variable(validator, cmd, 0)
    }

    fn generate(&self, generator: &mut Generator, cmd: &CommandNode) -> Result<(), GenerateError> {
        emit_own(generator, cmd, op::FOREACH)?;
        generator.generate_arguments(cmd)?;

        let head = generator.address();
        emit_own(generator, cmd, op::FOREACH_NEXT)?;
        let exit = generator.emit_placeholder();
        generator.generate_block(cmd.block.as_deref().unwrap_or_default())?;
        emit_core(generator, CoreOpcode::Jmp)?;
        generator.emit_address(head)?;
        generator.patch_here(exit)
    }
}

pub(crate) struct ForeachOperation;

impl Operation for ForeachOperation {
    fn mnemonic(&self) -> &'static str {
        "FOREACH"
    }

    fn code(&self) -> u8 {
        op::FOREACH
    }

    fn dump(&self, dumper: &mut CodeDumper<'_>) -> Result<(), BinaryError> {
        dumper.operand("variable")?;
        dumper.operand("list")
    }

    fn execute(&self, interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
        let var = interp.read_variable()?;
        let items = interp.read_string_list()?;
        let max = interp.limits().max_foreach_items;
        if items.len() > max {
            return Err(RuntimeError::ResourceLimit(format!(
                "foreach over {} items; the limit is {max}",
                items.len()
            )));
        }
        interp
            .context_mut::<ForeachFrames>()
            .0
            .push(ForeachFrame { var, items: items.into() });
        Ok(())
    }
}

pub(crate) struct ForeachNextOperation;

impl Operation for ForeachNextOperation {
    fn mnemonic(&self) -> &'static str {
        "FOREACH_NEXT"
    }

    fn code(&self) -> u8 {
        op::FOREACH_NEXT
    }

    fn dump(&self, dumper: &mut CodeDumper<'_>) -> Result<(), BinaryError> {
        dumper.address_operand("exit")
    }

    fn execute(&self, interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
        let exit = interp.read_jump_target()?;
        let frames = &mut interp.context_mut::<ForeachFrames>().0;
        let Some(frame) = frames.last_mut() else {
            return Err(interp.corrupt("loop head outside a foreach"));
        };
        match frame.items.pop_front() {
            Some(item) => {
                let var = frame.var.clone();
                interp.variables_mut().set(&var, item)
            }
            None => {
                frames.pop();
                interp.jump(exit)
            }
        }
    }
}
