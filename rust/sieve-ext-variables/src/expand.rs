//! Splitting string arguments into literal text and `${name}` references.

/// One piece of a string argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Literal(String),
    Variable(String),
}

/// Whether `name` is a valid variable identifier:
/// `(ALPHA / "_") *(ALPHA / DIGIT / "_")`.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split `value` into parts. A `${...}` whose content is not an identifier
/// stays literal text.
pub fn parse(value: &str) -> Vec<Part> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if is_identifier(&after[..end]) => {
                literal.push_str(&rest[..start]);
                if !literal.is_empty() {
                    parts.push(Part::Literal(std::mem::take(&mut literal)));
                }
                parts.push(Part::Variable(after[..end].to_string()));
                rest = &after[end + 1..];
            }
            _ => {
                literal.push_str(&rest[..start + 2]);
                rest = after;
            }
        }
    }
    literal.push_str(rest);
    if !literal.is_empty() {
        parts.push(Part::Literal(literal));
    }
    parts
}

/// Whether `value` references at least one variable.
pub fn has_references(value: &str) -> bool {
    parse(value).iter().any(|p| matches!(p, Part::Variable(_)))
}
