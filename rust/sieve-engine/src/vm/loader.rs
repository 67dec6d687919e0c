//! Binary loading: remap the recorded extension table onto the registry.

use crate::registry::{Extension, ExtensionId, ExtensionRegistry};
use crate::vm::operation::Operation;
use sieve_core::{Binary, BinaryError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("binary requires extension '{0}', which is not registered")]
    MissingExtension(String),
    #[error("no core extension is registered")]
    NoCore,
    #[error(transparent)]
    Binary(#[from] BinaryError),
}

/// A binary bound to the current registry. Immutable and shareable across
/// concurrent runs.
#[derive(Debug, Clone)]
pub struct LoadedBinary {
    binary: Arc<Binary>,
    /// Local extension index → registered extension; index 0 is core.
    extensions: Vec<Arc<Extension>>,
}

impl LoadedBinary {
    /// Fails before anything runs if any recorded extension is missing.
    pub fn load(registry: &ExtensionRegistry, binary: Arc<Binary>) -> Result<Self, LoadError> {
        let core = registry.core().cloned().ok_or(LoadError::NoCore)?;
        let mut extensions = Vec::with_capacity(binary.extensions().len() + 1);
        extensions.push(core);
        for recorded in binary.extensions() {
            let ext = registry
                .by_name(&recorded.name)
                .ok_or_else(|| LoadError::MissingExtension(recorded.name.clone()))?;
            if ext.id().0 != recorded.id {
                tracing::debug!(
                    extension = %recorded.name,
                    recorded = recorded.id,
                    registered = ext.id().0,
                    "remapped extension id"
                );
            }
            extensions.push(ext.clone());
        }
        tracing::debug!(
            code_size = binary.code_size(),
            extensions = extensions.len() - 1,
            "loaded binary"
        );
        Ok(Self { binary, extensions })
    }

    pub fn binary(&self) -> &Binary {
        &self.binary
    }

    pub fn shared_binary(&self) -> Arc<Binary> {
        self.binary.clone()
    }

    pub fn extensions(&self) -> &[Arc<Extension>] {
        &self.extensions
    }

    pub fn extension(&self, index: u8) -> Option<&Arc<Extension>> {
        self.extensions.get(index as usize)
    }

    pub fn operation(&self, index: u8, code: u8) -> Option<&Arc<dyn Operation>> {
        self.extension(index)?.operation(code)
    }

    /// Local index of the extension registered as `id`, if the binary
    /// references it.
    pub fn local_index(&self, id: ExtensionId) -> Option<u8> {
        self.extensions.iter().position(|e| e.id() == id).map(|i| i as u8)
    }
}
