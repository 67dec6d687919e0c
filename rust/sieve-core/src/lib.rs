//! Sieve Core
//!
//! Shared leaf types used by the compiler, the interpreter and extension crates:
//! the binary container and its operand codec, the string pool, comparators,
//! match types, and the limits configuration.

pub mod binary;
pub mod comparator;
pub mod config;
pub mod match_type;
pub mod strings;

pub use binary::{Binary, BinaryError, ExtensionRef};
pub use comparator::{AsciiCasemapComparator, Comparator, OctetComparator};
pub use config::{ConfigError, Limits, SieveConfig};
pub use match_type::{MatchContext, MatchError, MatchState, MatchType};
