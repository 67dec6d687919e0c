//! Action commands: `keep`, `discard`, `redirect` and `fileinto`.

use crate::builtin::{emit_core, emit_own, CoreOpcode};
use crate::compiler::ast::CommandNode;
use crate::compiler::commands::{ArgKind, CommandDef, CommandKind, Positional, PositionalSpec};
use crate::compiler::generator::{GenerateError, Generator};
use crate::compiler::validator::Validator;
use crate::vm::actions::Action;
use crate::vm::dump::CodeDumper;
use crate::vm::message::parse_address_list;
use crate::vm::operation::{Operation, SideEffect};
use crate::vm::{Interpreter, RuntimeError};
use sieve_core::binary::opt;
use sieve_core::BinaryError;

/// Side effects from an action's optional block.
pub fn read_side_effects(interp: &mut Interpreter<'_>) -> Result<Vec<Box<dyn SideEffect>>, RuntimeError> {
    let mut effects = Vec::new();
    if interp.begin_optional()? {
        while let Some(code) = interp.next_optional()? {
            if code != opt::SIDE_EFFECT {
                return Err(interp.corrupt(format!("unknown optional operand {code}")));
            }
            effects.push(interp.read_side_effect()?);
        }
    }
    Ok(effects)
}

fn queue_with_effects(interp: &mut Interpreter<'_>, mut action: Action, effects: &[Box<dyn SideEffect>]) -> Result<(), RuntimeError> {
    for effect in effects {
        effect.apply(&mut action);
    }
    interp.add_action(action)
}

pub(crate) fn execute_keep(interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
    let effects = read_side_effects(interp)?;
    queue_with_effects(interp, Action::keep(), &effects)
}

pub(crate) fn execute_discard(interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
    interp.add_action(Action::Discard)
}

pub(crate) fn execute_redirect(interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
    let raw = interp.read_string()?;
    let address = single_address(&raw)
        .ok_or_else(|| RuntimeError::Failure(format!("invalid redirect address '{raw}'")))?;
    interp.add_action(Action::Redirect { address })
}

/// The bare address of a one-address string.
fn single_address(value: &str) -> Option<String> {
    let mut addresses = parse_address_list(value);
    match addresses.as_slice() {
        [address] if address.contains('@') => addresses.pop(),
        _ => None,
    }
}

pub struct Keep;

impl CommandDef for Keep {
    fn identifier(&self) -> &'static str {
        "keep"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Command
    }

    fn generate(&self, generator: &mut Generator, cmd: &CommandNode) -> Result<(), GenerateError> {
        emit_core(generator, CoreOpcode::Keep)?;
        generator.generate_arguments_with_optional_block(cmd)
    }
}

pub struct Discard;

impl CommandDef for Discard {
    fn identifier(&self) -> &'static str {
        "discard"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Command
    }

    fn generate(&self, generator: &mut Generator, _cmd: &CommandNode) -> Result<(), GenerateError> {
        emit_core(generator, CoreOpcode::Discard)
    }
}

/// `redirect <address: string>`
pub struct Redirect;

impl CommandDef for Redirect {
    fn identifier(&self) -> &'static str {
        "redirect"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Command
    }

    fn positional(&self) -> Positional {
        const SPEC: &[PositionalSpec] = &[PositionalSpec::new("address", ArgKind::String)];
        Positional::Fixed(SPEC)
    }

    fn validate(&self, validator: &mut Validator<'_>, cmd: &mut CommandNode) -> bool {
        let Some(arg) = cmd.arguments.iter().find(|a| !a.is_tag()) else {
            return false;
        };
        let Some(address) = arg.as_str() else {
            return false;
        };
        if validator.string_is_constant(address) && single_address(address).is_none() {
            let span = arg.span;
            validator.error(span, format!("invalid redirect address '{address}'"));
            return false;
        }
        true
    }

    fn generate(&self, generator: &mut Generator, cmd: &CommandNode) -> Result<(), GenerateError> {
        emit_core(generator, CoreOpcode::Redirect)?;
        generator.generate_arguments(cmd)
    }
}

/// `fileinto <mailbox: string>`
pub struct FileInto;

impl CommandDef for FileInto {
    fn identifier(&self) -> &'static str {
        "fileinto"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Command
    }

    fn positional(&self) -> Positional {
        const SPEC: &[PositionalSpec] = &[PositionalSpec::new("mailbox", ArgKind::String)];
        Positional::Fixed(SPEC)
    }

    fn generate(&self, generator: &mut Generator, cmd: &CommandNode) -> Result<(), GenerateError> {
        emit_own(generator, cmd, FileIntoOperation::CODE)?;
        generator.generate_arguments(cmd)
    }
}

pub struct FileIntoOperation;

impl FileIntoOperation {
    pub const CODE: u8 = 0;
}

impl Operation for FileIntoOperation {
    fn mnemonic(&self) -> &'static str {
        "FILEINTO"
    }

    fn code(&self) -> u8 {
        Self::CODE
    }

    fn dump(&self, dumper: &mut CodeDumper<'_>) -> Result<(), BinaryError> {
        dumper.optional_operands(|_| None)?;
        dumper.operand("mailbox")
    }

    fn execute(&self, interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
        let effects = read_side_effects(interp)?;
        let mailbox = interp.read_string()?;
        queue_with_effects(interp, Action::FileInto { mailbox, flags: Vec::new() }, &effects)
    }
}
