//! String pool interning and value-length helpers.

use std::collections::HashMap;

/// Intern table mapping strings to pool indices.
///
/// The generator interns every string operand here; the resulting vector
/// becomes the binary's string pool.
#[derive(Debug, Default)]
pub struct StringTable {
    strings: Vec<String>,
    lookup: HashMap<String, u32>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.lookup.get(s) {
            return id;
        }
        let id = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.lookup.insert(s.to_string(), id);
        id
    }

    pub fn resolve(&self, id: u32) -> Option<&str> {
        self.strings.get(id as usize).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Consume the table, yielding the pool in index order.
    pub fn into_strings(self) -> Vec<String> {
        self.strings
    }
}

/// Truncate `value` to at most `max` bytes, backing off to the previous
/// character boundary so the result stays valid UTF-8.
///
/// Returns `true` when the value was shortened.
pub fn truncate_to_boundary(value: &mut String, max: usize) -> bool {
    if value.len() <= max {
        return false;
    }
    let mut cut = max;
    while cut > 0 && !value.is_char_boundary(cut) {
        cut -= 1;
    }
    value.truncate(cut);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern() {
        let mut table = StringTable::new();
        let id1 = table.intern("INBOX");
        let id2 = table.intern("Junk");
        let id3 = table.intern("INBOX");
        assert_eq!(id1, id3); // same string = same index
        assert_ne!(id1, id2);
        assert_eq!(table.resolve(id2), Some("Junk"));
        assert_eq!(table.into_strings(), vec!["INBOX".to_string(), "Junk".to_string()]);
    }

    #[test]
    fn truncate_ascii_is_exact() {
        let mut s = "abcdef".to_string();
        assert!(truncate_to_boundary(&mut s, 4));
        assert_eq!(s, "abcd");
        assert!(!truncate_to_boundary(&mut s, 10));
    }

    #[test]
    fn truncate_backs_off_to_char_boundary() {
        // 'é' is two bytes; cutting at 2 would split it
        let mut s = "aé".to_string();
        assert!(truncate_to_boundary(&mut s, 2));
        assert_eq!(s, "a");
    }
}
