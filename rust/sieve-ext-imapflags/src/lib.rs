//! The `imapflags` extension.
//!
//! Adds to a script that requires it:
//! - `setflag` / `addflag` / `removeflag [<variablename>] <list-of-flags>`
//! - `hasflag [MATCH-TYPE] [COMPARATOR] [<variable-list>] <list-of-flags>`
//! - a `:flags <list-of-flags>` tag on `keep` and `fileinto`
//!
//! Without a variable argument the commands work on an internal flag set
//! that lives for one run. The variable forms need the `variables`
//! extension, which provides the argument handler for variable names.

mod commands;
pub mod flags;

use sieve_core::binary::opt;
use sieve_engine::compiler::commands::CommandDef;
use sieve_engine::compiler::validator::Validator;
use sieve_engine::registry::{Extension, ExtensionDef, ExtensionHooks};
use std::sync::Arc;

pub use commands::{FlagAction, FlagCommand, FlagsTag, HasFlag};
pub use flags::FlagSet;

pub const EXTENSION_NAME: &str = "imapflags";

/// Local opcodes.
pub mod op {
    pub const SETFLAG: u8 = 0;
    pub const ADDFLAG: u8 = 1;
    pub const REMOVEFLAG: u8 = 2;
    pub const HASFLAG: u8 = 3;
}

/// Local operand codes.
pub mod operand {
    pub const FLAGS: u8 = 0;
}

/// Optional-operand code of the variable (list) argument.
pub const OPT_VARIABLES: u8 = opt::FIRST_EXTENSION;

struct ImapFlagsHooks;

impl ExtensionHooks for ImapFlagsHooks {
    fn validator_load(&self, ext: &Arc<Extension>, validator: &mut Validator<'_>) -> bool {
        let tag = Arc::new(FlagsTag::new(ext.clone()));
        validator.register_tag("keep", tag.clone(), Some(opt::SIDE_EFFECT));
        validator.register_tag("fileinto", tag, Some(opt::SIDE_EFFECT));
        true
    }
}

pub fn imapflags_extension() -> ExtensionDef {
    ExtensionDef {
        commands: commands::FlagAction::all()
            .map(|action| Arc::new(FlagCommand(action)) as Arc<dyn CommandDef>)
            .collect(),
        tests: vec![Arc::new(HasFlag)],
        operations: commands::operations(),
        operands: vec![Arc::new(commands::FlagsOperand)],
        hooks: Some(Arc::new(ImapFlagsHooks)),
        ..ExtensionDef::new(EXTENSION_NAME)
    }
}
