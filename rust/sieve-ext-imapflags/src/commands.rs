//! Flag commands, `hasflag`, the `:flags` tag and their operations.

use crate::flags::FlagSet;
use crate::{op, operand, OPT_VARIABLES};
use sieve_core::BinaryError;
use sieve_engine::builtin::emit_own;
use sieve_engine::compiler::ast::{Argument, ArgumentValue, CommandNode};
use sieve_engine::compiler::commands::{ArgKind, CommandDef, CommandKind, Positional, TagDef};
use sieve_engine::compiler::generator::{GenerateError, Generator};
use sieve_engine::compiler::match_args::{link_match_tags, validate_key_list};
use sieve_engine::compiler::validator::Validator;
use sieve_engine::registry::Extension;
use sieve_engine::vm::actions::{merge_flags, Action};
use sieve_engine::vm::dump::CodeDumper;
use sieve_engine::vm::operation::{OperandClass, OperandDef, Operation, SideEffect};
use sieve_engine::vm::variables::VariableRef;
use sieve_engine::{Interpreter, RuntimeError};
use std::sync::Arc;
use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};

/// The run's internal flag set, used when no variable is named.
#[derive(Debug, Default)]
struct InternalFlags(FlagSet);

/// Validate the positional arguments shared by the flag commands and
/// `hasflag`: a flag list, optionally preceded by a variable (list). The
/// variable argument goes into the optional block; returns the index of
/// the flag list.
fn validate_flag_arguments(
    validator: &mut Validator<'_>,
    cmd: &mut CommandNode,
    variable_kind: ArgKind,
) -> Option<usize> {
    let positions = cmd.positional_indices();
    let (variables, flags) = match positions.as_slice() {
        [flags] => (None, *flags),
        [variables, flags] => (Some(*variables), *flags),
        [] => {
            validator.error(
                cmd.span,
                format!("the {} command expects at least one argument, but none was found", cmd.identifier),
            );
            return None;
        }
        _ => {
            validator.error(
                cmd.span,
                format!("the {} command expects at most two arguments", cmd.identifier),
            );
            return None;
        }
    };

    if let Some(index) = variables {
        if !validator.extension_enabled("variables") {
            validator.error(
                cmd.span,
                format!(
                    "the {} command only allows a variable argument when the variables extension is active",
                    cmd.identifier
                ),
            );
            return None;
        }
        let arg = &cmd.arguments[index];
        if !variable_kind.accepts(&arg.value) {
            let span = arg.span;
            let found = arg.value.kind_name();
            validator.error(
                span,
                format!(
                    "the {} command expects variable names as its first argument, found a {found}",
                    cmd.identifier
                ),
            );
            return None;
        }
        let Some(handler) = validator.argument_handler("variable") else {
            validator.error(cmd.span, "variable names are not available");
            return None;
        };
        if !validator.activate_with(cmd, index, handler, Some(OPT_VARIABLES)) {
            return None;
        }
    }

    let arg = &cmd.arguments[flags];
    if !ArgKind::StringList.accepts(&arg.value) {
        let span = arg.span;
        let found = arg.value.kind_name();
        validator.error(
            span,
            format!("the {} command expects a string list of flags, found {found}", cmd.identifier),
        );
        return None;
    }
    Some(flags)
}

// ---------------------------------------------------------------------------
// setflag / addflag / removeflag
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, IntoStaticStr)]
pub enum FlagAction {
    #[strum(serialize = "setflag")]
    Set,
    #[strum(serialize = "addflag")]
    Add,
    #[strum(serialize = "removeflag")]
    Remove,
}

impl FlagAction {
    pub fn all() -> impl Iterator<Item = Self> {
        Self::iter()
    }

    pub fn identifier(self) -> &'static str {
        self.into()
    }

    fn code(self) -> u8 {
        match self {
            FlagAction::Set => op::SETFLAG,
            FlagAction::Add => op::ADDFLAG,
            FlagAction::Remove => op::REMOVEFLAG,
        }
    }

    fn mnemonic(self) -> &'static str {
        match self {
            FlagAction::Set => "SETFLAG",
            FlagAction::Add => "ADDFLAG",
            FlagAction::Remove => "REMOVEFLAG",
        }
    }

    pub fn apply(self, current: &mut FlagSet, flags: &FlagSet) {
        match self {
            FlagAction::Set => current.replace(flags),
            FlagAction::Add => current.add(flags),
            FlagAction::Remove => current.remove(flags),
        }
    }
}

/// `setflag` / `addflag` / `removeflag [<variablename: string>] <list-of-flags: string-list>`
pub struct FlagCommand(pub FlagAction);

impl CommandDef for FlagCommand {
    fn identifier(&self) -> &'static str {
        self.0.identifier()
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Command
    }

    fn positional(&self) -> Positional {
        Positional::SelfChecked
    }

    fn validate(&self, validator: &mut Validator<'_>, cmd: &mut CommandNode) -> bool {
        validate_flag_arguments(validator, cmd, ArgKind::String).is_some()
    }

    fn generate(&self, generator: &mut Generator, cmd: &CommandNode) -> Result<(), GenerateError> {
        emit_own(generator, cmd, self.0.code())?;
        generator.generate_arguments(cmd)
    }
}

/// The variables named in the optional block, if any.
fn read_variables(interp: &mut Interpreter<'_>) -> Result<Option<Vec<VariableRef>>, RuntimeError> {
    let mut vars = None;
    if interp.begin_optional()? {
        while let Some(code) = interp.next_optional()? {
            if code != OPT_VARIABLES {
                return Err(interp.corrupt(format!("unknown optional operand {code}")));
            }
            vars = Some(interp.read_variable_list()?);
        }
    }
    Ok(vars)
}

/// Flags stored in `vars`, each value split on whitespace.
fn variable_flags(interp: &Interpreter<'_>, vars: &[VariableRef]) -> FlagSet {
    let values = vars.iter().filter_map(|var| interp.variables().get(var));
    FlagSet::parse(values)
}

fn variable_label(code: u8) -> Option<&'static str> {
    (code == OPT_VARIABLES).then_some("variables")
}

struct FlagOperation(FlagAction);

impl Operation for FlagOperation {
    fn mnemonic(&self) -> &'static str {
        self.0.mnemonic()
    }

    fn code(&self) -> u8 {
        self.0.code()
    }

    fn dump(&self, dumper: &mut CodeDumper<'_>) -> Result<(), BinaryError> {
        dumper.optional_operands(variable_label)?;
        dumper.operand("flags")
    }

    fn execute(&self, interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
        let vars = read_variables(interp)?;
        let flags = FlagSet::parse(interp.read_string_list()?);
        match vars.as_deref() {
            Some([var]) => {
                let mut current = variable_flags(interp, std::slice::from_ref(var));
                self.0.apply(&mut current, &flags);
                interp.variables_mut().set(var, current.to_string())
            }
            Some(_) => Err(interp.corrupt(format!("{} takes a single variable", self.0.mnemonic()))),
            None => {
                let internal = &mut interp.context_mut::<InternalFlags>().0;
                self.0.apply(internal, &flags);
                tracing::trace!(flags = %internal, "internal flags changed");
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// hasflag
// ---------------------------------------------------------------------------

/// `hasflag [MATCH-TYPE] [COMPARATOR] [<variable-list: string-list>] <list-of-flags: string-list>`
///
/// The flag list is the key-list; the values are the flags held by the
/// named variables, or the internal flags.
pub struct HasFlag;

impl CommandDef for HasFlag {
    fn identifier(&self) -> &'static str {
        "hasflag"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Test
    }

    fn positional(&self) -> Positional {
        Positional::SelfChecked
    }

    fn registered(&self, validator: &mut Validator<'_>, _ext: &Arc<Extension>) {
        link_match_tags(validator, "hasflag");
    }

    fn validate(&self, validator: &mut Validator<'_>, cmd: &mut CommandNode) -> bool {
        match validate_flag_arguments(validator, cmd, ArgKind::StringList) {
            Some(keys) => validate_key_list(validator, cmd, keys),
            None => false,
        }
    }

    fn generate(&self, generator: &mut Generator, cmd: &CommandNode) -> Result<(), GenerateError> {
        emit_own(generator, cmd, op::HASFLAG)?;
        generator.generate_arguments(cmd)
    }
}

struct HasFlagOperation;

impl Operation for HasFlagOperation {
    fn mnemonic(&self) -> &'static str {
        "HASFLAG"
    }

    fn code(&self) -> u8 {
        op::HASFLAG
    }

    fn dump(&self, dumper: &mut CodeDumper<'_>) -> Result<(), BinaryError> {
        dumper.optional_operands(variable_label)?;
        dumper.operand("flags")
    }

    fn execute(&self, interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
        let mut vars = None;
        let operands = interp.read_match_operands(|interp, code| {
            if code != OPT_VARIABLES {
                return Ok(false);
            }
            vars = Some(interp.read_variable_list()?);
            Ok(true)
        })?;
        let keys = interp.read_string_list()?;
        let flags = match &vars {
            Some(vars) => variable_flags(interp, vars),
            None => interp.context::<InternalFlags>().map(|f| f.0.clone()).unwrap_or_default(),
        };
        let result = interp.match_values(&operands, keys, flags.iter());
        interp.set_test_result(result);
        Ok(())
    }
}

pub(crate) fn operations() -> Vec<Arc<dyn Operation>> {
    let mut ops: Vec<Arc<dyn Operation>> = FlagAction::all()
        .map(|action| Arc::new(FlagOperation(action)) as Arc<dyn Operation>)
        .collect();
    ops.push(Arc::new(HasFlagOperation));
    ops
}

// ---------------------------------------------------------------------------
// :flags
// ---------------------------------------------------------------------------

/// `:flags <list-of-flags: string-list>` on `keep` and `fileinto`.
pub struct FlagsTag {
    ext: Arc<Extension>,
}

impl FlagsTag {
    pub fn new(ext: Arc<Extension>) -> Self {
        Self { ext }
    }
}

impl TagDef for FlagsTag {
    fn name(&self) -> &'static str {
        "FLAGS"
    }

    fn is_instance_of(&self, _validator: &Validator<'_>, identifier: &str) -> bool {
        identifier == "flags"
    }

    fn validate(&self, validator: &mut Validator<'_>, cmd: &mut CommandNode, index: usize) -> bool {
        let tag_span = cmd.arguments[index].span;
        let param = cmd.consume_parameter(index).map(|p| (p.value.strings().is_some(), p.span));
        match param {
            Some((true, _)) => true,
            Some((false, span)) => {
                validator.error(span, ":flags requires a string list argument");
                false
            }
            None => {
                validator.error(tag_span, ":flags requires a string list argument");
                false
            }
        }
    }

    fn generate(
        &self,
        generator: &mut Generator,
        cmd: &CommandNode,
        arg: &Argument,
    ) -> Result<(), GenerateError> {
        let flags = match arg.parameters.first().map(|p| &p.value) {
            Some(ArgumentValue::String(flag)) => std::slice::from_ref(flag),
            Some(ArgumentValue::StringList(flags)) => flags.as_slice(),
            _ => {
                return Err(GenerateError::Inconsistent(format!(
                    ":flags of '{}' has no flag list",
                    cmd.identifier
                )))
            }
        };
        generator.emit_extension_operand(&self.ext, operand::FLAGS)?;
        generator.emit_string_list(flags)
    }
}

/// Side-effect operand: a string list of flags attached to the action.
pub(crate) struct FlagsOperand;

impl OperandDef for FlagsOperand {
    fn name(&self) -> &'static str {
        "flags"
    }

    fn code(&self) -> u8 {
        operand::FLAGS
    }

    fn class(&self) -> OperandClass {
        OperandClass::SideEffect
    }

    fn dump(&self, _ext: &Arc<Extension>, dumper: &mut CodeDumper<'_>) -> Result<String, BinaryError> {
        Ok(format!(":flags {}", dumper.describe_operand()?))
    }

    fn read_side_effect(
        &self,
        _ext: &Arc<Extension>,
        interp: &mut Interpreter<'_>,
    ) -> Result<Box<dyn SideEffect>, RuntimeError> {
        let flags = FlagSet::parse(interp.read_string_list()?);
        Ok(Box::new(AttachFlags(flags)))
    }
}

struct AttachFlags(FlagSet);

impl SideEffect for AttachFlags {
    fn apply(&self, action: &mut Action) {
        if let Some(flags) = action.flags_mut() {
            merge_flags(flags, &self.0.to_vec());
        }
    }
}
