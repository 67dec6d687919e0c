//! Extension registry: stable extension names mapped to numeric ids and
//! their capability tables.
//!
//! Entries are immutable once registered. Compilation resolves identifiers
//! against the registered tables; loading a binary remaps its recorded
//! extension table onto the registered ids by name.

use crate::compiler::commands::{CommandDef, CommandKind};
use crate::compiler::validator::Validator;
use crate::vm::operation::{OperandDef, Operation};
use sieve_core::{Comparator, MatchType};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Numeric extension id. Id 0 is the core language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtensionId(pub u16);

impl ExtensionId {
    pub const CORE: ExtensionId = ExtensionId(0);
}

impl fmt::Display for ExtensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("extension id {0} is already registered")]
    DuplicateId(ExtensionId),
    #[error("extension '{0}' is already registered")]
    DuplicateName(String),
    #[error("extension '{ext}' declares opcode {code} twice")]
    DuplicateOpcode { ext: String, code: u8 },
    #[error("extension '{ext}' declares operand code {code} twice")]
    DuplicateOperand { ext: String, code: u8 },
    #[error("extension '{ext}' declares {kind} '{identifier}' twice")]
    DuplicateCommand { ext: String, kind: CommandKind, identifier: String },
    #[error("extension '{ext}' lists '{identifier}' in the wrong table (it is a {kind})")]
    MisplacedCommand { ext: String, kind: CommandKind, identifier: String },
    #[error("extension '{ext}' declares more than 255 {what}")]
    TableTooLarge { ext: String, what: &'static str },
    #[error("extension name must not be empty")]
    EmptyName,
}

/// Hooks an extension runs when a script enables it.
pub trait ExtensionHooks: Send + Sync {
    /// Called once per compile when the extension is enabled (implicitly or
    /// by `require`). May register external tags, argument handlers or a
    /// string encoder. Returning false fails validation.
    fn validator_load(&self, _ext: &Arc<Extension>, _validator: &mut Validator<'_>) -> bool {
        true
    }
}

/// Everything an extension contributes, handed to the registry by value.
#[derive(Clone, Default)]
pub struct ExtensionDef {
    pub name: String,
    /// Enabled for every script without `require`.
    pub implicit: bool,
    pub commands: Vec<Arc<dyn CommandDef>>,
    pub tests: Vec<Arc<dyn CommandDef>>,
    pub operations: Vec<Arc<dyn Operation>>,
    pub operands: Vec<Arc<dyn OperandDef>>,
    pub comparators: Vec<Arc<dyn Comparator>>,
    pub match_types: Vec<Arc<dyn MatchType>>,
    pub hooks: Option<Arc<dyn ExtensionHooks>>,
}

impl ExtensionDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }
}

impl fmt::Debug for ExtensionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionDef")
            .field("name", &self.name)
            .field("implicit", &self.implicit)
            .field("commands", &self.commands.len())
            .field("tests", &self.tests.len())
            .field("operations", &self.operations.len())
            .field("operands", &self.operands.len())
            .finish_non_exhaustive()
    }
}

/// A registered extension with its lookup tables built.
pub struct Extension {
    id: ExtensionId,
    def: ExtensionDef,
    op_table: Vec<Option<Arc<dyn Operation>>>,
    operand_table: Vec<Option<Arc<dyn OperandDef>>>,
}

impl fmt::Debug for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extension")
            .field("id", &self.id)
            .field("name", &self.def.name)
            .finish_non_exhaustive()
    }
}

impl Extension {
    fn build(id: ExtensionId, def: ExtensionDef) -> Result<Self, RegistryError> {
        if def.name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        check_commands(&def.name, &def.commands, CommandKind::Command)?;
        check_commands(&def.name, &def.tests, CommandKind::Test)?;
        for (what, len) in [
            ("comparators", def.comparators.len()),
            ("match types", def.match_types.len()),
        ] {
            if len > u8::MAX as usize {
                return Err(RegistryError::TableTooLarge { ext: def.name.clone(), what });
            }
        }

        let mut op_table: Vec<Option<Arc<dyn Operation>>> = Vec::new();
        for op in &def.operations {
            let code = op.code() as usize;
            if op_table.len() <= code {
                op_table.resize(code + 1, None);
            }
            if op_table[code].is_some() {
                return Err(RegistryError::DuplicateOpcode { ext: def.name.clone(), code: op.code() });
            }
            op_table[code] = Some(op.clone());
        }

        let mut operand_table: Vec<Option<Arc<dyn OperandDef>>> = Vec::new();
        for operand in &def.operands {
            let code = operand.code() as usize;
            if operand_table.len() <= code {
                operand_table.resize(code + 1, None);
            }
            if operand_table[code].is_some() {
                return Err(RegistryError::DuplicateOperand {
                    ext: def.name.clone(),
                    code: operand.code(),
                });
            }
            operand_table[code] = Some(operand.clone());
        }

        Ok(Self { id, def, op_table, operand_table })
    }

    pub fn id(&self) -> ExtensionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn is_core(&self) -> bool {
        self.id == ExtensionId::CORE
    }

    pub fn implicit(&self) -> bool {
        self.def.implicit
    }

    pub fn hooks(&self) -> Option<&Arc<dyn ExtensionHooks>> {
        self.def.hooks.as_ref()
    }

    pub fn commands(&self) -> &[Arc<dyn CommandDef>] {
        &self.def.commands
    }

    pub fn tests(&self) -> &[Arc<dyn CommandDef>] {
        &self.def.tests
    }

    pub fn command(&self, identifier: &str) -> Option<&Arc<dyn CommandDef>> {
        self.def.commands.iter().find(|c| c.identifier() == identifier)
    }

    pub fn test(&self, identifier: &str) -> Option<&Arc<dyn CommandDef>> {
        self.def.tests.iter().find(|c| c.identifier() == identifier)
    }

    /// O(1) opcode resolution.
    pub fn operation(&self, code: u8) -> Option<&Arc<dyn Operation>> {
        self.op_table.get(code as usize).and_then(Option::as_ref)
    }

    pub fn operand(&self, code: u8) -> Option<&Arc<dyn OperandDef>> {
        self.operand_table.get(code as usize).and_then(Option::as_ref)
    }

    pub fn comparator(&self, code: u8) -> Option<&Arc<dyn Comparator>> {
        self.def.comparators.get(code as usize)
    }

    pub fn match_type(&self, code: u8) -> Option<&Arc<dyn MatchType>> {
        self.def.match_types.get(code as usize)
    }

    /// Position (operand code) and object of a comparator by name.
    pub fn find_comparator(&self, name: &str) -> Option<(u8, &Arc<dyn Comparator>)> {
        self.def
            .comparators
            .iter()
            .position(|c| c.name() == name)
            .map(|i| (i as u8, &self.def.comparators[i]))
    }

    pub fn find_match_type(&self, name: &str) -> Option<(u8, &Arc<dyn MatchType>)> {
        self.def
            .match_types
            .iter()
            .position(|m| m.name() == name)
            .map(|i| (i as u8, &self.def.match_types[i]))
    }
}

fn check_commands(
    ext: &str,
    table: &[Arc<dyn CommandDef>],
    expected: CommandKind,
) -> Result<(), RegistryError> {
    let mut seen = std::collections::HashSet::new();
    for def in table {
        if def.kind() != expected {
            return Err(RegistryError::MisplacedCommand {
                ext: ext.to_string(),
                kind: def.kind(),
                identifier: def.identifier().to_string(),
            });
        }
        if !seen.insert(def.identifier()) {
            return Err(RegistryError::DuplicateCommand {
                ext: ext.to_string(),
                kind: expected,
                identifier: def.identifier().to_string(),
            });
        }
    }
    Ok(())
}

/// Id-ordered table of registered extensions.
#[derive(Debug, Default)]
pub struct ExtensionRegistry {
    by_id: BTreeMap<ExtensionId, Arc<Extension>>,
    by_name: HashMap<String, ExtensionId>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `def` under `id`. Existing entries are never replaced.
    pub fn register(
        &mut self,
        id: ExtensionId,
        def: ExtensionDef,
    ) -> Result<Arc<Extension>, RegistryError> {
        if self.by_id.contains_key(&id) {
            return Err(RegistryError::DuplicateId(id));
        }
        if self.by_name.contains_key(&def.name) {
            return Err(RegistryError::DuplicateName(def.name));
        }
        let ext = Arc::new(Extension::build(id, def)?);
        self.by_name.insert(ext.name().to_string(), id);
        self.by_id.insert(id, ext.clone());
        tracing::debug!(extension = ext.name(), id = id.0, "registered extension");
        Ok(ext)
    }

    /// Lowest id above every registered one.
    pub fn next_id(&self) -> ExtensionId {
        self.by_id
            .keys()
            .next_back()
            .map(|id| ExtensionId(id.0.saturating_add(1)))
            .unwrap_or(ExtensionId::CORE)
    }

    pub fn get(&self, id: ExtensionId) -> Option<&Arc<Extension>> {
        self.by_id.get(&id)
    }

    pub fn by_name(&self, name: &str) -> Option<&Arc<Extension>> {
        self.by_name.get(name).and_then(|id| self.by_id.get(id))
    }

    pub fn core(&self) -> Option<&Arc<Extension>> {
        self.get(ExtensionId::CORE)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Extension>> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin;

    #[test]
    fn duplicate_name_and_id_are_rejected() {
        let mut registry = ExtensionRegistry::new();
        registry.register(ExtensionId::CORE, builtin::core_extension()).unwrap();
        let err = registry.register(ExtensionId(5), builtin::core_extension()).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateName("core".into()));
        let err = registry.register(ExtensionId::CORE, builtin::fileinto_extension()).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateId(ExtensionId::CORE));
    }

    #[test]
    fn operations_resolve_by_code() {
        let mut registry = ExtensionRegistry::new();
        let core = registry.register(ExtensionId::CORE, builtin::core_extension()).unwrap();
        let stop = core.operation(builtin::CoreOpcode::Stop as u8).unwrap();
        assert_eq!(stop.mnemonic(), "STOP");
        assert!(core.operation(200).is_none());
    }

    #[test]
    fn duplicate_opcode_is_rejected() {
        let mut def = builtin::fileinto_extension();
        def.operations.push(def.operations[0].clone());
        let mut registry = ExtensionRegistry::new();
        let err = registry.register(ExtensionId(1), def).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateOpcode { code: 0, .. }));
    }

    #[test]
    fn next_id_follows_highest() {
        let mut registry = ExtensionRegistry::new();
        assert_eq!(registry.next_id(), ExtensionId::CORE);
        registry.register(ExtensionId::CORE, builtin::core_extension()).unwrap();
        registry.register(ExtensionId(7), builtin::fileinto_extension()).unwrap();
        assert_eq!(registry.next_id(), ExtensionId(8));
    }
}
