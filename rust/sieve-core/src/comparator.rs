//! Comparators: the byte/character equality and ordering rules match types
//! are built on (RFC 4790 naming).

use std::cmp::Ordering;
use std::fmt;

pub trait Comparator: Send + Sync + fmt::Debug {
    /// Registered name, e.g. `i;octet`.
    fn name(&self) -> &'static str;

    /// Character equality used by substring and wildcard matching.
    fn char_eq(&self, a: char, b: char) -> bool;

    fn equals(&self, a: &str, b: &str) -> bool {
        let mut left = a.chars();
        let mut right = b.chars();
        loop {
            match (left.next(), right.next()) {
                (None, None) => return true,
                (Some(x), Some(y)) if self.char_eq(x, y) => continue,
                _ => return false,
            }
        }
    }

    fn compare(&self, a: &str, b: &str) -> Ordering;

    /// Whether the comparator folds ASCII case. Match types that delegate to
    /// an external engine (regular expressions) use this to pick a mode.
    fn case_insensitive(&self) -> bool {
        false
    }
}

/// `i;octet`: exact octet comparison.
#[derive(Debug, Default, Clone, Copy)]
pub struct OctetComparator;

impl Comparator for OctetComparator {
    fn name(&self) -> &'static str {
        "i;octet"
    }

    fn char_eq(&self, a: char, b: char) -> bool {
        a == b
    }

    fn equals(&self, a: &str, b: &str) -> bool {
        a.as_bytes() == b.as_bytes()
    }

    fn compare(&self, a: &str, b: &str) -> Ordering {
        a.as_bytes().cmp(b.as_bytes())
    }
}

/// `i;ascii-casemap`: ASCII letters compare case-insensitively. The default
/// comparator when a test names none.
#[derive(Debug, Default, Clone, Copy)]
pub struct AsciiCasemapComparator;

impl Comparator for AsciiCasemapComparator {
    fn name(&self) -> &'static str {
        "i;ascii-casemap"
    }

    fn char_eq(&self, a: char, b: char) -> bool {
        a.eq_ignore_ascii_case(&b)
    }

    fn equals(&self, a: &str, b: &str) -> bool {
        a.eq_ignore_ascii_case(b)
    }

    fn compare(&self, a: &str, b: &str) -> Ordering {
        let left = a.bytes().map(|b| b.to_ascii_lowercase());
        let right = b.bytes().map(|b| b.to_ascii_lowercase());
        left.cmp(right)
    }

    fn case_insensitive(&self) -> bool {
        true
    }
}
