//! Engine configuration parsed from `sieve.toml`.
//!
//! ```toml
//! [limits]
//! max_variable_size = 4096
//! max_actions = 32
//!
//! [extensions]
//! allow = ["fileinto", "imap4flags", "variables"]
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid toml: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid limit '{name}': {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Resource bounds applied at compile and run time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum length of a variable value in bytes; longer values are
    /// truncated at a character boundary.
    pub max_variable_size: usize,
    pub max_variables: usize,
    pub max_actions: usize,
    pub max_redirects: usize,
    /// Dispatch budget per run.
    pub max_instructions: u64,
    pub max_foreach_items: usize,
    pub max_nesting: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_variable_size: 4096,
            max_variables: 255,
            max_actions: 32,
            max_redirects: 4,
            max_instructions: 100_000,
            max_foreach_items: 256,
            max_nesting: 32,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionPolicy {
    /// Extensions a script may `require`. `None` allows every registered one.
    #[serde(default)]
    pub allow: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SieveConfig {
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub extensions: ExtensionPolicy,
}

impl SieveConfig {
    /// Parse a TOML string directly.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.check()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&content)
    }

    /// Whether a script may require `name`. Implicit extensions bypass this.
    pub fn allows(&self, name: &str) -> bool {
        match &self.extensions.allow {
            Some(list) => list.iter().any(|n| n == name),
            None => true,
        }
    }

    fn check(&self) -> Result<(), ConfigError> {
        let limits = &self.limits;
        let nonzero = [
            ("max_variable_size", limits.max_variable_size as u64),
            ("max_actions", limits.max_actions as u64),
            ("max_instructions", limits.max_instructions),
            ("max_nesting", limits.max_nesting as u64),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::Invalid { name, reason: "must be greater than zero".into() });
            }
        }
        Ok(())
    }
}
