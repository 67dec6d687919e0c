//! Per-run variable storage, scoped by the extension that owns the names.

use crate::registry::ExtensionId;
use crate::vm::RuntimeError;
use sieve_core::strings::truncate_to_boundary;
use std::collections::HashMap;

/// A variable read from the binary: owning scope plus name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariableRef {
    pub scope: ExtensionId,
    pub name: String,
}

impl VariableRef {
    pub fn new(scope: ExtensionId, name: impl Into<String>) -> Self {
        Self { scope, name: name.into() }
    }
}

#[derive(Debug, Clone)]
pub struct VariableStore {
    scopes: HashMap<ExtensionId, HashMap<String, String>>,
    max_size: usize,
    max_variables: usize,
}

impl VariableStore {
    pub fn new(max_size: usize, max_variables: usize) -> Self {
        Self { scopes: HashMap::new(), max_size, max_variables }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Names are case-insensitive.
    pub fn get(&self, var: &VariableRef) -> Option<&str> {
        self.scopes
            .get(&var.scope)?
            .get(&var.name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Assign `value`, truncated to the size limit at a character boundary.
    ///
    /// The cut falls on the last UTF-8 boundary at or below the limit, so a
    /// value ending in a multi-byte character may be stored up to three
    /// bytes shorter than the limit. ASCII values are cut to exactly the
    /// limit.
    pub fn set(&mut self, var: &VariableRef, mut value: String) -> Result<(), RuntimeError> {
        if truncate_to_boundary(&mut value, self.max_size) {
            tracing::trace!(variable = %var.name, max = self.max_size, "truncated variable value");
        }
        let scope = self.scopes.entry(var.scope).or_default();
        let key = var.name.to_ascii_lowercase();
        if !scope.contains_key(&key) && scope.len() >= self.max_variables {
            return Err(RuntimeError::ResourceLimit(format!(
                "more than {} variables in scope {}",
                self.max_variables, var.scope
            )));
        }
        scope.insert(key, value);
        Ok(())
    }

    pub fn count(&self, scope: ExtensionId) -> usize {
        self.scopes.get(&scope).map_or(0, HashMap::len)
    }
}
