//! `require`, conditionals, `stop` and the logical tests.
//!
//! Tests leave their outcome in the interpreter's test-result register.
//! Conditionals consume it with `JMPFALSE`; `allof`/`anyof` short-circuit
//! with `JMPFALSE`/`JMPTRUE` to a shared exit, which leaves the register
//! holding the deciding sub-test's result.

use crate::builtin::{emit_core, CoreOpcode};
use crate::compiler::ast::CommandNode;
use crate::compiler::commands::{
    ArgKind, BlockRule, CommandDef, CommandKind, Positional, PositionalSpec, Subtests,
};
use crate::compiler::generator::{GenerateError, Generator};
use crate::compiler::validator::{IfChain, Validator};
use crate::registry::Extension;
use std::sync::Arc;

fn single_test(cmd: &CommandNode) -> Result<&CommandNode, GenerateError> {
    cmd.tests.first().ok_or_else(|| {
        GenerateError::Inconsistent(format!("'{}' at line {} has no test", cmd.identifier, cmd.span.line))
    })
}

fn block(cmd: &CommandNode) -> &[CommandNode] {
    cmd.block.as_deref().unwrap_or_default()
}

/// Extensions enabled by one `require`, linked into the binary even when
/// none of their operations is emitted.
#[derive(Default)]
struct Required(Vec<Arc<Extension>>);

/// `require <capabilities: string-list>`
pub struct Require;

impl CommandDef for Require {
    fn identifier(&self) -> &'static str {
        "require"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Command
    }

    fn positional(&self) -> Positional {
        const SPEC: &[PositionalSpec] = &[PositionalSpec::new("capabilities", ArgKind::StringList)];
        Positional::Fixed(SPEC)
    }

    fn validate(&self, validator: &mut Validator<'_>, cmd: &mut CommandNode) -> bool {
        let Some(arg) = cmd.arguments.iter().find(|a| !a.is_tag()) else {
            return false;
        };
        let span = arg.span;
        let names: Vec<String> =
            arg.value.strings().unwrap_or_default().into_iter().map(str::to_string).collect();

        let mut ok = true;
        let mut required = Vec::new();
        for name in names {
            if !validator.string_is_constant(&name) {
                validator.error(span, format!("extension name '{name}' must be constant"));
                ok = false;
                continue;
            }
            match validator.require_extension(&name, span) {
                Some(ext) => required.push(ext),
                None => ok = false,
            }
        }
        cmd.set_data(Required(required));
        ok
    }

    fn generate(&self, generator: &mut Generator, cmd: &CommandNode) -> Result<(), GenerateError> {
        if let Some(Required(exts)) = cmd.data::<Required>() {
            for ext in exts {
                generator.link_extension(ext)?;
            }
        }
        Ok(())
    }
}

/// Conditional branch shared by `if` and `elsif`.
fn generate_branch(generator: &mut Generator, cmd: &CommandNode, opens_chain: bool) -> Result<(), GenerateError> {
    if opens_chain {
        generator.open_if_chain();
    }
    generator.generate_test(single_test(cmd)?)?;
    emit_core(generator, CoreOpcode::JmpFalse)?;
    let skip = generator.emit_placeholder();
    generator.generate_block(block(cmd))?;

    let has_successor = cmd.data::<IfChain>().is_some_and(|c| c.has_successor);
    if has_successor {
        emit_core(generator, CoreOpcode::Jmp)?;
        let exit = generator.emit_placeholder();
        generator.add_if_exit(exit)?;
    }
    generator.patch_here(skip)?;
    if !has_successor {
        generator.close_if_chain()?;
    }
    Ok(())
}

pub struct If;

impl CommandDef for If {
    fn identifier(&self) -> &'static str {
        "if"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Command
    }

    fn subtests(&self) -> Subtests {
        Subtests::One
    }

    fn block(&self) -> BlockRule {
        BlockRule::Required
    }

    fn generate(&self, generator: &mut Generator, cmd: &CommandNode) -> Result<(), GenerateError> {
        generate_branch(generator, cmd, true)
    }
}

pub struct Elsif;

impl CommandDef for Elsif {
    fn identifier(&self) -> &'static str {
        "elsif"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Command
    }

    fn subtests(&self) -> Subtests {
        Subtests::One
    }

    fn block(&self) -> BlockRule {
        BlockRule::Required
    }

    fn generate(&self, generator: &mut Generator, cmd: &CommandNode) -> Result<(), GenerateError> {
        generate_branch(generator, cmd, false)
    }
}

pub struct Else;

impl CommandDef for Else {
    fn identifier(&self) -> &'static str {
        "else"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Command
    }

    fn block(&self) -> BlockRule {
        BlockRule::Required
    }

    fn generate(&self, generator: &mut Generator, cmd: &CommandNode) -> Result<(), GenerateError> {
        generator.generate_block(block(cmd))?;
        generator.close_if_chain()
    }
}

pub struct Stop;

impl CommandDef for Stop {
    fn identifier(&self) -> &'static str {
        "stop"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Command
    }

    fn generate(&self, generator: &mut Generator, _cmd: &CommandNode) -> Result<(), GenerateError> {
        emit_core(generator, CoreOpcode::Stop)
    }
}

/// `true` and `false`.
pub struct Constant(pub bool);

impl CommandDef for Constant {
    fn identifier(&self) -> &'static str {
        if self.0 {
            "true"
        } else {
            "false"
        }
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Test
    }

    fn generate(&self, generator: &mut Generator, _cmd: &CommandNode) -> Result<(), GenerateError> {
        emit_core(generator, if self.0 { CoreOpcode::True } else { CoreOpcode::False })
    }
}

pub struct Not;

impl CommandDef for Not {
    fn identifier(&self) -> &'static str {
        "not"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Test
    }

    fn subtests(&self) -> Subtests {
        Subtests::One
    }

    fn generate(&self, generator: &mut Generator, cmd: &CommandNode) -> Result<(), GenerateError> {
        generator.generate_test(single_test(cmd)?)?;
        emit_core(generator, CoreOpcode::Not)
    }
}

/// Evaluate the sub-tests in order, leaving early through `exit_op`.
fn generate_short_circuit(
    generator: &mut Generator,
    cmd: &CommandNode,
    exit_op: CoreOpcode,
) -> Result<(), GenerateError> {
    let mut exits = Vec::new();
    if let Some((last, rest)) = cmd.tests.split_last() {
        for test in rest {
            generator.generate_test(test)?;
            emit_core(generator, exit_op)?;
            exits.push(generator.emit_placeholder());
        }
        generator.generate_test(last)?;
    }
    for exit in exits {
        generator.patch_here(exit)?;
    }
    Ok(())
}

pub struct AllOf;

impl CommandDef for AllOf {
    fn identifier(&self) -> &'static str {
        "allof"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Test
    }

    fn subtests(&self) -> Subtests {
        Subtests::List
    }

    fn generate(&self, generator: &mut Generator, cmd: &CommandNode) -> Result<(), GenerateError> {
        generate_short_circuit(generator, cmd, CoreOpcode::JmpFalse)
    }
}

pub struct AnyOf;

impl CommandDef for AnyOf {
    fn identifier(&self) -> &'static str {
        "anyof"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Test
    }

    fn subtests(&self) -> Subtests {
        Subtests::List
    }

    fn generate(&self, generator: &mut Generator, cmd: &CommandNode) -> Result<(), GenerateError> {
        generate_short_circuit(generator, cmd, CoreOpcode::JmpTrue)
    }
}
