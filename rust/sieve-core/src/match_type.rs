//! Match types: strategies evaluating candidate values against a fixed
//! key-list under a comparator.
//!
//! A test opens one [`MatchContext`] per evaluation, feeds it every
//! candidate value (each header occurrence, each flag, ...) and closes it.
//! The key-list is pre-processed once in `begin`, so repeated candidates do
//! not rescan or recompile it.

use crate::comparator::Comparator;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error("invalid key '{key}' for match type :{match_type}: {reason}")]
    InvalidKey { match_type: String, key: String, reason: String },
    #[error("match type :{match_type} cannot be used with comparator '{comparator}'")]
    UnsupportedComparator { match_type: String, comparator: String },
}

pub trait MatchType: Send + Sync + fmt::Debug {
    /// Tag name without the leading colon, e.g. `contains`.
    fn name(&self) -> &'static str;

    /// Compile-time check of one constant key.
    fn validate_key(&self, _key: &str) -> Result<(), MatchError> {
        Ok(())
    }

    fn supports(&self, _comparator: &dyn Comparator) -> bool {
        true
    }

    /// Pre-process the key-list for a run of evaluations.
    fn begin(
        &self,
        comparator: Arc<dyn Comparator>,
        keys: Vec<String>,
    ) -> Result<Box<dyn MatchState>, MatchError>;
}

/// Per-evaluation state produced by [`MatchType::begin`].
pub trait MatchState: Send {
    /// Whether `value` matches any key.
    fn matches(&mut self, value: &str) -> bool;
}

/// Accumulates the OR of all evaluations against one key-list.
pub struct MatchContext {
    state: Box<dyn MatchState>,
    matched: bool,
    evaluated: usize,
}

impl fmt::Debug for MatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchContext")
            .field("matched", &self.matched)
            .field("evaluated", &self.evaluated)
            .finish()
    }
}

impl MatchContext {
    pub fn begin(
        match_type: &dyn MatchType,
        comparator: Arc<dyn Comparator>,
        keys: Vec<String>,
    ) -> Result<Self, MatchError> {
        if !match_type.supports(comparator.as_ref()) {
            return Err(MatchError::UnsupportedComparator {
                match_type: match_type.name().to_string(),
                comparator: comparator.name().to_string(),
            });
        }
        Ok(Self { state: match_type.begin(comparator, keys)?, matched: false, evaluated: 0 })
    }

    /// Evaluate one candidate; returns whether this candidate matched.
    pub fn evaluate(&mut self, value: &str) -> bool {
        self.evaluated += 1;
        let hit = self.state.matches(value);
        self.matched |= hit;
        hit
    }

    pub fn matched(&self) -> bool {
        self.matched
    }

    pub fn evaluated(&self) -> usize {
        self.evaluated
    }

    /// Final result: true iff any evaluation matched.
    pub fn end(self) -> bool {
        self.matched
    }
}

/// `:is`: whole-value equality against any key.
#[derive(Debug, Default, Clone, Copy)]
pub struct IsMatch;

struct IsState {
    comparator: Arc<dyn Comparator>,
    keys: Vec<String>,
}

impl MatchState for IsState {
    fn matches(&mut self, value: &str) -> bool {
        self.keys.iter().any(|key| self.comparator.equals(value, key))
    }
}

impl MatchType for IsMatch {
    fn name(&self) -> &'static str {
        "is"
    }

    fn begin(
        &self,
        comparator: Arc<dyn Comparator>,
        keys: Vec<String>,
    ) -> Result<Box<dyn MatchState>, MatchError> {
        Ok(Box::new(IsState { comparator, keys }))
    }
}

/// `:contains`: substring match against any key.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContainsMatch;

struct ContainsState {
    comparator: Arc<dyn Comparator>,
    keys: Vec<Vec<char>>,
}

impl MatchState for ContainsState {
    fn matches(&mut self, value: &str) -> bool {
        let value: Vec<char> = value.chars().collect();
        self.keys.iter().any(|key| contains(&value, key, self.comparator.as_ref()))
    }
}

fn contains(value: &[char], key: &[char], cmp: &dyn Comparator) -> bool {
    if key.is_empty() {
        return true;
    }
    if key.len() > value.len() {
        return false;
    }
    value
        .windows(key.len())
        .any(|window| window.iter().zip(key).all(|(a, b)| cmp.char_eq(*a, *b)))
}

impl MatchType for ContainsMatch {
    fn name(&self) -> &'static str {
        "contains"
    }

    fn begin(
        &self,
        comparator: Arc<dyn Comparator>,
        keys: Vec<String>,
    ) -> Result<Box<dyn MatchState>, MatchError> {
        let keys = keys.iter().map(|k| k.chars().collect()).collect();
        Ok(Box::new(ContainsState { comparator, keys }))
    }
}

/// `:matches`: wildcard match: `*` is any run of characters, `?` any single
/// character, `\` escapes the next character.
#[derive(Debug, Default, Clone, Copy)]
pub struct WildcardMatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Glob {
    Char(char),
    One,
    Any,
}

fn compile_glob(key: &str) -> Result<Vec<Glob>, MatchError> {
    let mut out = Vec::with_capacity(key.len());
    let mut chars = key.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => out.push(Glob::Char(escaped)),
                None => {
                    return Err(MatchError::InvalidKey {
                        match_type: "matches".into(),
                        key: key.to_string(),
                        reason: "pattern ends with an unescaped backslash".into(),
                    })
                }
            },
            '*' => {
                if out.last() != Some(&Glob::Any) {
                    out.push(Glob::Any);
                }
            }
            '?' => out.push(Glob::One),
            other => out.push(Glob::Char(other)),
        }
    }
    Ok(out)
}

fn glob_match(pattern: &[Glob], value: &[char], cmp: &dyn Comparator) -> bool {
    let (mut p, mut v) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;
    while v < value.len() {
        match pattern.get(p) {
            Some(Glob::Any) => {
                backtrack = Some((p, v));
                p += 1;
                continue;
            }
            Some(Glob::One) => {
                p += 1;
                v += 1;
                continue;
            }
            Some(Glob::Char(c)) if cmp.char_eq(*c, value[v]) => {
                p += 1;
                v += 1;
                continue;
            }
            _ => {}
        }
        match backtrack {
            Some((star, consumed)) => {
                p = star + 1;
                v = consumed + 1;
                backtrack = Some((star, consumed + 1));
            }
            None => return false,
        }
    }
    pattern[p..].iter().all(|g| *g == Glob::Any)
}

struct WildcardState {
    comparator: Arc<dyn Comparator>,
    patterns: Vec<Vec<Glob>>,
}

impl MatchState for WildcardState {
    fn matches(&mut self, value: &str) -> bool {
        let value: Vec<char> = value.chars().collect();
        self.patterns
            .iter()
            .any(|pattern| glob_match(pattern, &value, self.comparator.as_ref()))
    }
}

impl MatchType for WildcardMatch {
    fn name(&self) -> &'static str {
        "matches"
    }

    fn validate_key(&self, key: &str) -> Result<(), MatchError> {
        compile_glob(key).map(|_| ())
    }

    fn begin(
        &self,
        comparator: Arc<dyn Comparator>,
        keys: Vec<String>,
    ) -> Result<Box<dyn MatchState>, MatchError> {
        let patterns = keys.iter().map(|k| compile_glob(k)).collect::<Result<_, _>>()?;
        Ok(Box::new(WildcardState { comparator, patterns }))
    }
}
