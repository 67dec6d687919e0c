//! Operand kind bytes and optional-operand codes shared by the generator,
//! the interpreter and the dumper.

use strum::{Display, FromRepr};

/// Marker byte introducing a block of optional operands.
///
/// The block is a sequence of `(opt code, operand)` pairs terminated by
/// [`opt::END`].
pub const OPTIONAL_MARKER: u8 = 0x00;

/// Extension index used in opcode and operand headers for the core language.
pub const CORE_EXTENSION_INDEX: u8 = 0;

/// Kind byte that starts every non-optional operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr)]
#[repr(u8)]
pub enum OperandKind {
    #[strum(serialize = "number")]
    Number = 0x01,
    #[strum(serialize = "string")]
    String = 0x02,
    #[strum(serialize = "string-list")]
    StringList = 0x03,
    #[strum(serialize = "comparator")]
    Comparator = 0x04,
    #[strum(serialize = "match-type")]
    MatchType = 0x05,
    #[strum(serialize = "address-part")]
    AddressPart = 0x06,
    /// Followed by `(extension index, local operand code)` and an
    /// extension-defined payload.
    #[strum(serialize = "extension")]
    Extension = 0x07,
}

impl OperandKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::from_repr(byte)
    }
}

/// Optional operand codes. Values below [`opt::FIRST_EXTENSION`] are shared by
/// all operations; extensions allocate their own codes from there up.
pub mod opt {
    pub const END: u8 = 0;
    pub const COMPARATOR: u8 = 1;
    pub const MATCH_TYPE: u8 = 2;
    pub const ADDRESS_PART: u8 = 3;
    pub const SIDE_EFFECT: u8 = 4;
    pub const FIRST_EXTENSION: u8 = 16;
}
