//! Read-only view of the message a script runs against.

use strum::{Display, EnumString, FromRepr};

/// Data source for test operations. Implemented by the embedding
/// application; the interpreter never mutates the message.
pub trait MessageContext: Send + Sync {
    /// Envelope sender (`MAIL FROM`).
    fn sender(&self) -> Option<&str>;
    /// Envelope recipient (`RCPT TO`).
    fn recipient(&self) -> Option<&str>;
    /// Every value of header `name` (case-insensitive), in message order.
    fn headers(&self, name: &str) -> Vec<&str>;
    /// Message size in octets.
    fn size(&self) -> u64;
}

/// In-memory message, mostly for tests and embedding examples.
#[derive(Debug, Clone, Default)]
pub struct SimpleMessage {
    sender: Option<String>,
    recipient: Option<String>,
    headers: Vec<(String, String)>,
    size: Option<u64>,
}

impl SimpleMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Override the size; by default it is the length of the header block.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

impl MessageContext for SimpleMessage {
    fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    fn recipient(&self) -> Option<&str> {
        self.recipient.as_deref()
    }

    fn headers(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    fn size(&self) -> u64 {
        self.size.unwrap_or_else(|| {
            self.headers.iter().map(|(n, v)| (n.len() + v.len() + 4) as u64).sum()
        })
    }
}

/// Which part of an address a test compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, FromRepr)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum AddressPart {
    #[default]
    All = 0,
    LocalPart = 1,
    Domain = 2,
}

impl AddressPart {
    /// The selected part of a bare `local@domain` address. Addresses
    /// without `@` only have an `all` part.
    pub fn extract(self, address: &str) -> Option<&str> {
        match self {
            AddressPart::All => Some(address),
            AddressPart::LocalPart => address.rsplit_once('@').map(|(local, _)| local),
            AddressPart::Domain => address.rsplit_once('@').map(|(_, domain)| domain),
        }
    }
}

/// Split an address header into bare addresses.
///
/// Handles display names, angle brackets, quoted strings, comments and
/// group syntax well enough for matching; it is not a full RFC 5322 parser.
pub fn parse_address_list(value: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut plain = String::new();
    let mut bracketed: Option<String> = None;
    let mut in_angle = false;
    let mut in_quotes = false;
    let mut comment_depth = 0usize;
    let mut chars = value.chars();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '\\' => {
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => {}
            }
            continue;
        }
        if comment_depth > 0 {
            match c {
                '(' => comment_depth += 1,
                ')' => comment_depth -= 1,
                _ => {}
            }
            continue;
        }
        if in_angle {
            match (c, bracketed.as_mut()) {
                ('>', _) => in_angle = false,
                (_, Some(inner)) => inner.push(c),
                (_, None) => {}
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            '(' => comment_depth = 1,
            '<' => {
                in_angle = true;
                bracketed = Some(String::new());
            }
            ',' | ';' => push_address(&mut out, &mut plain, &mut bracketed),
            // group display name
            ':' => plain.clear(),
            _ => plain.push(c),
        }
    }
    push_address(&mut out, &mut plain, &mut bracketed);
    out
}

fn push_address(out: &mut Vec<String>, plain: &mut String, bracketed: &mut Option<String>) {
    let addr = bracketed.take().unwrap_or_else(|| plain.clone());
    plain.clear();
    let addr = addr.trim();
    if !addr.is_empty() {
        out.push(addr.to_string());
    }
}
