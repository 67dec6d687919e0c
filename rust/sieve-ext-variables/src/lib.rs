//! The `variables` extension.
//!
//! Adds to a script that requires it:
//! - `set [MODIFIER] <name> <value>`: assign a variable
//! - `string [MATCH-TYPE] [COMPARATOR] <source> <key-list>`: match expanded strings
//! - `foreach <name> <list> { ... }`: bounded iteration over a string list
//! - `${name}` references inside any string argument
//!
//! It also registers the `variable` argument handler, which other
//! extensions (e.g. `imapflags`) use for their optional variable-name
//! arguments.
//!
//! Applications may add their own `set` modifiers through
//! [`variables_extension_with`].

mod commands;
pub mod expand;
pub mod modifiers;
mod operands;

use sieve_engine::compiler::validator::Validator;
use sieve_engine::registry::{Extension, ExtensionDef, ExtensionHooks};
use std::sync::Arc;

pub use commands::{Foreach, Set, StringTest};
pub use modifiers::{apply_modifiers, Modifier, ModifierError, ModifierTable, SetModifier};
pub use operands::{VariableArgument, VariableStringEncoder};

pub const EXTENSION_NAME: &str = "variables";

/// Name of the argument handler registered for variable names.
pub const VARIABLE_HANDLER: &str = "variable";

/// Local opcodes.
pub mod op {
    pub const SET: u8 = 0;
    pub const STRING: u8 = 1;
    pub const FOREACH: u8 = 2;
    pub const FOREACH_NEXT: u8 = 3;
}

/// Local operand codes.
pub mod operand {
    pub const VARIABLE: u8 = 0;
    pub const VAR_STRING: u8 = 1;
}

struct VariablesHooks;

impl ExtensionHooks for VariablesHooks {
    fn validator_load(&self, ext: &Arc<Extension>, validator: &mut Validator<'_>) -> bool {
        validator.register_argument_handler(
            VARIABLE_HANDLER,
            Arc::new(VariableArgument::new(ext.clone())),
        );
        validator.set_string_encoder(Arc::new(VariableStringEncoder::new(ext.clone())));
        true
    }
}

pub fn variables_extension() -> ExtensionDef {
    variables_extension_with(ModifierTable::builtin())
}

/// The extension with `modifiers` available to `set`.
pub fn variables_extension_with(modifiers: ModifierTable) -> ExtensionDef {
    let table = Arc::new(modifiers);
    ExtensionDef {
        commands: vec![Arc::new(Set::new(table.clone())), Arc::new(Foreach)],
        tests: vec![Arc::new(StringTest)],
        operations: vec![
            Arc::new(commands::SetOperation { table }),
            Arc::new(commands::StringOperation),
            Arc::new(commands::ForeachOperation),
            Arc::new(commands::ForeachNextOperation),
        ],
        operands: vec![
            Arc::new(operands::VariableOperand),
            Arc::new(operands::VarStringOperand),
        ],
        hooks: Some(Arc::new(VariablesHooks)),
        ..ExtensionDef::new(EXTENSION_NAME)
    }
}
