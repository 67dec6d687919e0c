//! IMAP flag sets.

use std::fmt;

/// An ordered set of flags. Comparison is ASCII case-insensitive; the first
/// spelling added is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagSet {
    flags: Vec<String>,
}

impl FlagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect flags from `items`, each split on whitespace.
    pub fn parse<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for item in items {
            for flag in item.as_ref().split_whitespace() {
                set.insert(flag);
            }
        }
        set
    }

    pub fn contains(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f.eq_ignore_ascii_case(flag))
    }

    /// Returns false if the flag was already present.
    pub fn insert(&mut self, flag: &str) -> bool {
        if self.contains(flag) {
            return false;
        }
        self.flags.push(flag.to_string());
        true
    }

    /// Union.
    pub fn add(&mut self, other: &FlagSet) {
        for flag in &other.flags {
            self.insert(flag);
        }
    }

    /// Difference.
    pub fn remove(&mut self, other: &FlagSet) {
        self.flags.retain(|f| !other.contains(f));
    }

    pub fn replace(&mut self, other: &FlagSet) {
        self.flags.clone_from(&other.flags);
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.flags.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.flags.clone()
    }
}

/// Space-separated, the form stored in variables.
impl fmt::Display for FlagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.flags.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn flags(set: &FlagSet) -> Vec<&str> {
        set.iter().collect()
    }

    #[test]
    fn parse_splits_and_dedupes() {
        let set = FlagSet::parse(["\\Seen  \\Flagged", "\\seen", "$Junk"]);
        assert_eq!(flags(&set), vec!["\\Seen", "\\Flagged", "$Junk"]);
        assert_eq!(set.to_string(), "\\Seen \\Flagged $Junk");
        assert!(FlagSet::parse(["", "   "]).is_empty());
    }

    #[test]
    fn add_remove_replace() {
        let mut set = FlagSet::parse(["a b"]);
        set.add(&FlagSet::parse(["B c"]));
        assert_eq!(flags(&set), vec!["a", "b", "c"]);
        set.remove(&FlagSet::parse(["A"]));
        assert_eq!(flags(&set), vec!["b", "c"]);
        set.replace(&FlagSet::parse(["x"]));
        assert_eq!(flags(&set), vec!["x"]);
    }

    fn flag_set() -> impl Strategy<Value = FlagSet> {
        proptest::collection::vec("[a-cA-C]{1,2}", 0..6).prop_map(FlagSet::parse)
    }

    proptest! {
        #[test]
        fn add_is_a_case_insensitive_union(a in flag_set(), b in flag_set()) {
            let mut set = a.clone();
            set.add(&b);
            for flag in a.iter().chain(b.iter()) {
                prop_assert!(set.contains(flag));
            }
            for flag in set.iter() {
                prop_assert!(a.contains(flag) || b.contains(flag));
            }
            let lower: std::collections::HashSet<_> =
                set.iter().map(str::to_ascii_lowercase).collect();
            prop_assert_eq!(lower.len(), set.len());
        }

        #[test]
        fn remove_is_a_difference(a in flag_set(), b in flag_set()) {
            let mut set = a.clone();
            set.remove(&b);
            for flag in a.iter() {
                prop_assert_eq!(set.contains(flag), !b.contains(flag));
            }
        }

        #[test]
        fn set_replaces(a in flag_set(), b in flag_set()) {
            let mut set = a;
            set.replace(&b);
            prop_assert_eq!(set, b);
        }
    }
}
