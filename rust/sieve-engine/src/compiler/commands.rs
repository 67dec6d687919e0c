//! Command, test, tag and argument-handler definitions.
//!
//! Core and extensions describe their grammar through these traits; the
//! validator drives them in a fixed order (tag registration, pre-validation,
//! tag validation, positional checks, validation) and the generator calls
//! `generate` on validated nodes.

use crate::compiler::ast::{Argument, ArgumentValue, CommandNode};
use crate::compiler::generator::{GenerateError, Generator};
use crate::compiler::validator::Validator;
use crate::registry::Extension;
use std::sync::Arc;
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum CommandKind {
    #[strum(serialize = "command")]
    Command,
    #[strum(serialize = "test")]
    Test,
}

/// Expected kind of a positional argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    String,
    /// A string list; a single string is accepted as a one-item list.
    StringList,
    Number,
}

impl ArgKind {
    pub fn accepts(self, value: &ArgumentValue) -> bool {
        matches!(
            (self, value),
            (ArgKind::String, ArgumentValue::String(_))
                | (ArgKind::StringList, ArgumentValue::String(_) | ArgumentValue::StringList(_))
                | (ArgKind::Number, ArgumentValue::Number(_))
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            ArgKind::String => "string",
            ArgKind::StringList => "string list",
            ArgKind::Number => "number",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PositionalSpec {
    pub name: &'static str,
    pub kind: ArgKind,
}

impl PositionalSpec {
    pub const fn new(name: &'static str, kind: ArgKind) -> Self {
        Self { name, kind }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Positional {
    /// Exactly these positional arguments, checked by the validator.
    Fixed(&'static [PositionalSpec]),
    /// The command checks its own positional arguments.
    SelfChecked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subtests {
    None,
    One,
    List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRule {
    Forbidden,
    Required,
}

pub trait CommandDef: Send + Sync {
    fn identifier(&self) -> &'static str;

    fn kind(&self) -> CommandKind;

    fn positional(&self) -> Positional {
        Positional::Fixed(&[])
    }

    fn subtests(&self) -> Subtests {
        Subtests::None
    }

    fn block(&self) -> BlockRule {
        BlockRule::Forbidden
    }

    /// Called when the owning extension is enabled; registers tags.
    fn registered(&self, _validator: &mut Validator<'_>, _ext: &Arc<Extension>) {}

    /// Runs before tags are validated.
    fn pre_validate(&self, _validator: &mut Validator<'_>, _cmd: &mut CommandNode) -> bool {
        true
    }

    /// Runs after tags and (for `Fixed` commands) positional arguments were
    /// checked. Positionals left inactive are activated with the default
    /// handler afterwards.
    fn validate(&self, _validator: &mut Validator<'_>, _cmd: &mut CommandNode) -> bool {
        true
    }

    fn generate(&self, generator: &mut Generator, cmd: &CommandNode) -> Result<(), GenerateError>;
}

/// A tag (`:name`) accepted by a command.
pub trait TagDef: Send + Sync {
    /// Tag class, e.g. `COMPARATOR`; two tags of one class on a command are
    /// rejected unless `allow_multiple`.
    fn name(&self) -> &'static str;

    /// Whether `identifier` names this tag.
    fn is_instance_of(&self, validator: &Validator<'_>, identifier: &str) -> bool;

    fn allow_multiple(&self) -> bool {
        false
    }

    /// Validate the tag at `cmd.arguments[index]`. May consume following
    /// arguments as parameters or detach the tag. A tag still inactive
    /// afterwards is activated with its registered optional code.
    fn validate(&self, _validator: &mut Validator<'_>, _cmd: &mut CommandNode, _index: usize) -> bool {
        true
    }

    fn generate(
        &self,
        _generator: &mut Generator,
        cmd: &CommandNode,
        arg: &Argument,
    ) -> Result<(), GenerateError> {
        Err(GenerateError::Inconsistent(format!(
            "tag :{} of '{}' has no code generation",
            arg.tag_name().unwrap_or("?"),
            cmd.identifier
        )))
    }
}

/// Generates an activated non-tag argument.
pub trait ArgumentHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, _validator: &mut Validator<'_>, _cmd: &mut CommandNode, _index: usize) -> bool {
        true
    }

    fn generate(&self, generator: &mut Generator, arg: &Argument) -> Result<(), GenerateError>;
}

/// Replaces the encoding of string operands whose text is not constant
/// (for example strings containing variable references).
pub trait StringEncoder: Send + Sync {
    fn is_dynamic(&self, value: &str) -> bool;

    fn encode(&self, generator: &mut Generator, value: &str) -> Result<(), GenerateError>;
}

/// Emits strings, string lists and numbers as plain operands.
#[derive(Debug, Default, Clone, Copy)]
pub struct ValueArgument;

impl ArgumentHandler for ValueArgument {
    fn name(&self) -> &'static str {
        "value"
    }

    fn generate(&self, generator: &mut Generator, arg: &Argument) -> Result<(), GenerateError> {
        match &arg.value {
            ArgumentValue::String(s) => generator.emit_string(s),
            ArgumentValue::StringList(items) => generator.emit_string_list(items),
            ArgumentValue::Number(n) => {
                generator.emit_number(*n);
                Ok(())
            }
            ArgumentValue::Tag(name) => Err(GenerateError::Inconsistent(format!(
                "tag :{name} activated as a value argument"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_list_slot_accepts_single_string() {
        assert!(ArgKind::StringList.accepts(&ArgumentValue::String("a".into())));
        assert!(ArgKind::StringList.accepts(&ArgumentValue::StringList(vec![])));
        assert!(!ArgKind::String.accepts(&ArgumentValue::StringList(vec!["a".into()])));
        assert!(!ArgKind::Number.accepts(&ArgumentValue::String("1".into())));
    }
}
