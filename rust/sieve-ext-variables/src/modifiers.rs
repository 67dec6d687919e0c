//! `set` modifiers, their precedence and the table that assigns their
//! binary codes.
//!
//! The built-in modifiers are total. Modifiers supplied by an embedding
//! application may refuse a value, which leaves the target variable
//! unchanged.

use sieve_core::strings::truncate_to_boundary;
use std::fmt;
use std::sync::Arc;
use strum::{EnumIter, FromRepr, IntoEnumIterator, IntoStaticStr};
use thiserror::Error;

/// A value transformation attached to `set` as a tag.
pub trait SetModifier: Send + Sync + fmt::Debug {
    /// Tag name without the colon.
    fn name(&self) -> &'static str;

    /// Higher precedence applies first; two modifiers of equal precedence
    /// cannot be combined.
    fn precedence(&self) -> u8;

    /// The modified value, or `None` when the modifier cannot produce one.
    fn modify(&self, value: &str) -> Option<String>;
}

impl<M: SetModifier + ?Sized> SetModifier for Arc<M> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn precedence(&self) -> u8 {
        (**self).precedence()
    }

    fn modify(&self, value: &str) -> Option<String> {
        (**self).modify(value)
    }
}

/// The modifiers of RFC 5229. The discriminant is the code emitted in the
/// binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum Modifier {
    Lower = 0,
    Upper = 1,
    LowerFirst = 2,
    UpperFirst = 3,
    QuoteWildcard = 4,
    Length = 5,
}

impl Modifier {
    pub fn name(self) -> &'static str {
        self.into()
    }

    pub fn from_tag(identifier: &str) -> Option<Self> {
        Self::iter().find(|m| m.name() == identifier)
    }

    pub fn precedence(self) -> u8 {
        match self {
            Modifier::Lower | Modifier::Upper => 40,
            Modifier::LowerFirst | Modifier::UpperFirst => 30,
            Modifier::QuoteWildcard => 20,
            Modifier::Length => 10,
        }
    }

    pub fn transform(self, value: &str) -> String {
        match self {
            Modifier::Lower => value.to_ascii_lowercase(),
            Modifier::Upper => value.to_ascii_uppercase(),
            Modifier::LowerFirst => map_first(value, |c| c.to_ascii_lowercase()),
            Modifier::UpperFirst => map_first(value, |c| c.to_ascii_uppercase()),
            Modifier::QuoteWildcard => {
                let mut out = String::with_capacity(value.len());
                for c in value.chars() {
                    if matches!(c, '*' | '?' | '\\') {
                        out.push('\\');
                    }
                    out.push(c);
                }
                out
            }
            Modifier::Length => value.chars().count().to_string(),
        }
    }
}

impl SetModifier for Modifier {
    fn name(&self) -> &'static str {
        Modifier::name(*self)
    }

    fn precedence(&self) -> u8 {
        Modifier::precedence(*self)
    }

    fn modify(&self, value: &str) -> Option<String> {
        Some(self.transform(value))
    }
}

fn map_first(value: &str, f: impl Fn(char) -> char) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => {
            let mut out = String::with_capacity(value.len());
            out.push(f(first));
            out.push_str(chars.as_str());
            out
        }
        None => String::new(),
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModifierError {
    #[error("modifier :{0} is already registered")]
    Duplicate(String),
    #[error("no modifier code left for :{0}")]
    Exhausted(String),
}

/// A modifier together with its binary code.
#[derive(Debug, Clone)]
pub struct CodedModifier {
    pub code: u8,
    pub modifier: Arc<dyn SetModifier>,
}

impl SetModifier for CodedModifier {
    fn name(&self) -> &'static str {
        self.modifier.name()
    }

    fn precedence(&self) -> u8 {
        self.modifier.precedence()
    }

    fn modify(&self, value: &str) -> Option<String> {
        self.modifier.modify(value)
    }
}

/// Modifiers known to one `variables` extension instance. Built-ins keep
/// their discriminants as codes; added modifiers take the following codes
/// in registration order.
#[derive(Debug, Clone)]
pub struct ModifierTable {
    entries: Vec<Arc<dyn SetModifier>>,
}

impl Default for ModifierTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ModifierTable {
    pub fn builtin() -> Self {
        Self { entries: Modifier::iter().map(|m| Arc::new(m) as Arc<dyn SetModifier>).collect() }
    }

    /// Register `modifier` under the next free code.
    pub fn add(&mut self, modifier: Arc<dyn SetModifier>) -> Result<u8, ModifierError> {
        let name = modifier.name();
        if self.entries.iter().any(|m| m.name().eq_ignore_ascii_case(name)) {
            return Err(ModifierError::Duplicate(name.to_string()));
        }
        let code = u8::try_from(self.entries.len())
            .map_err(|_| ModifierError::Exhausted(name.to_string()))?;
        self.entries.push(modifier);
        Ok(code)
    }

    pub fn with(mut self, modifier: Arc<dyn SetModifier>) -> Result<Self, ModifierError> {
        self.add(modifier)?;
        Ok(self)
    }

    pub fn by_name(&self, identifier: &str) -> Option<CodedModifier> {
        self.entries
            .iter()
            .position(|m| m.name().eq_ignore_ascii_case(identifier))
            .map(|i| CodedModifier { code: i as u8, modifier: self.entries[i].clone() })
    }

    pub fn by_code(&self, code: u8) -> Option<CodedModifier> {
        self.entries
            .get(code as usize)
            .map(|m| CodedModifier { code, modifier: m.clone() })
    }
}

/// Sort `modifiers` by descending precedence. Returns the first pair that
/// shares a precedence level, in source order.
pub fn order_by_precedence<M: SetModifier + Clone>(modifiers: &mut [M]) -> Result<(), (M, M)> {
    modifiers.sort_by(|a, b| b.precedence().cmp(&a.precedence()));
    match modifiers.windows(2).find(|w| w[0].precedence() == w[1].precedence()) {
        Some(pair) => Err((pair[0].clone(), pair[1].clone())),
        None => Ok(()),
    }
}

/// The value `set` assigns: `value` truncated to `max` bytes, then each
/// modifier in order with truncation after every step. Empty values are
/// assigned unmodified. `None` means a modifier failed and nothing is
/// assigned.
pub fn apply_modifiers<M: SetModifier>(mut value: String, modifiers: &[M], max: usize) -> Option<String> {
    truncate_to_boundary(&mut value, max);
    if value.is_empty() {
        return Some(value);
    }
    for modifier in modifiers {
        value = modifier.modify(&value)?;
        truncate_to_boundary(&mut value, max);
    }
    Some(value)
}
