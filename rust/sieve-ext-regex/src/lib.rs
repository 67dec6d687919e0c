//! The `regex` extension: a `:regex` match type for every matching test.
//!
//! Keys are regular expressions, unanchored, matched against each value.
//! `i;ascii-casemap` selects case-insensitive matching and `i;octet`
//! case-sensitive matching; other comparators are rejected. Constant keys
//! are compiled during validation so bad patterns fail the compile; keys
//! built from variables are compiled once per test at run time, and a bad
//! one makes the test false.

use regex::{Regex, RegexBuilder};
use sieve_core::match_type::{MatchError, MatchState, MatchType};
use sieve_core::Comparator;
use sieve_engine::registry::ExtensionDef;
use std::sync::Arc;

pub const EXTENSION_NAME: &str = "regex";

/// Upper bound on the compiled size of one pattern.
const SIZE_LIMIT: usize = 1 << 20;

#[derive(Debug, Default, Clone, Copy)]
pub struct RegexMatch;

fn compile(key: &str, case_insensitive: bool) -> Result<Regex, MatchError> {
    RegexBuilder::new(key)
        .case_insensitive(case_insensitive)
        .size_limit(SIZE_LIMIT)
        .build()
        .map_err(|err| MatchError::InvalidKey {
            match_type: "regex".into(),
            key: key.to_string(),
            reason: err.to_string(),
        })
}

struct RegexState {
    patterns: Vec<Regex>,
}

impl MatchState for RegexState {
    fn matches(&mut self, value: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(value))
    }
}

impl MatchType for RegexMatch {
    fn name(&self) -> &'static str {
        "regex"
    }

    fn validate_key(&self, key: &str) -> Result<(), MatchError> {
        compile(key, false).map(|_| ())
    }

    fn supports(&self, comparator: &dyn Comparator) -> bool {
        matches!(comparator.name(), "i;octet" | "i;ascii-casemap")
    }

    fn begin(
        &self,
        comparator: Arc<dyn Comparator>,
        keys: Vec<String>,
    ) -> Result<Box<dyn MatchState>, MatchError> {
        let case_insensitive = comparator.case_insensitive();
        let patterns = keys
            .iter()
            .map(|key| compile(key, case_insensitive))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::trace!(keys = patterns.len(), case_insensitive, "compiled regex keys");
        Ok(Box::new(RegexState { patterns }))
    }
}

pub fn regex_extension() -> ExtensionDef {
    ExtensionDef {
        match_types: vec![Arc::new(RegexMatch)],
        ..ExtensionDef::new(EXTENSION_NAME)
    }
}
