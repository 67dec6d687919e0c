//! Shared `COMPARATOR`, `MATCH-TYPE` and `ADDRESS-PART` tags and the
//! key-list check every matching test reuses.

use crate::compiler::ast::{Argument, CommandNode};
use crate::compiler::commands::TagDef;
use crate::compiler::generator::{GenerateError, Generator};
use crate::compiler::validator::Validator;
use crate::registry::Extension;
use crate::vm::message::AddressPart;
use sieve_core::binary::opt;
use sieve_core::match_type::MatchError;
use sieve_core::{Comparator, MatchType};
use std::str::FromStr;
use std::sync::Arc;

pub const DEFAULT_COMPARATOR: &str = "i;ascii-casemap";
pub const DEFAULT_MATCH_TYPE: &str = "is";

/// An object resolved from an enabled extension's table.
pub struct Resolved<T: ?Sized> {
    pub ext: Arc<Extension>,
    pub code: u8,
    pub item: Arc<T>,
}

/// Comparator and match type chosen by a test's tags.
#[derive(Default)]
pub struct MatchSetup {
    pub comparator: Option<Resolved<dyn Comparator>>,
    pub match_type: Option<Resolved<dyn MatchType>>,
}

/// Register the comparator and match-type tags on `command`.
pub fn link_match_tags(validator: &mut Validator<'_>, command: &str) {
    validator.register_tag(command, Arc::new(ComparatorTag), Some(opt::COMPARATOR));
    validator.register_tag(command, Arc::new(MatchTypeTag), Some(opt::MATCH_TYPE));
}

pub fn link_address_part_tags(validator: &mut Validator<'_>, command: &str) {
    validator.register_tag(command, Arc::new(AddressPartTag), Some(opt::ADDRESS_PART));
}

/// Check the key-list at `cmd.arguments[index]` against the selected match
/// type: comparator compatibility, then every constant key.
pub fn validate_key_list(validator: &mut Validator<'_>, cmd: &CommandNode, index: usize) -> bool {
    let setup = cmd.data::<MatchSetup>();
    let match_type = setup
        .and_then(|s| s.match_type.as_ref())
        .map(|r| r.item.clone())
        .or_else(|| validator.find_match_type(DEFAULT_MATCH_TYPE).map(|(_, _, m)| m));
    let comparator = setup
        .and_then(|s| s.comparator.as_ref())
        .map(|r| r.item.clone())
        .or_else(|| validator.find_comparator(DEFAULT_COMPARATOR).map(|(_, _, c)| c));
    let (Some(match_type), Some(comparator)) = (match_type, comparator) else {
        validator.error(cmd.span, "core comparator or match type is not registered");
        return false;
    };

    if !match_type.supports(comparator.as_ref()) {
        let err = MatchError::UnsupportedComparator {
            match_type: match_type.name().to_string(),
            comparator: comparator.name().to_string(),
        };
        validator.error(cmd.span, err.to_string());
        return false;
    }

    let Some(arg) = cmd.arguments.get(index) else {
        validator.error(cmd.span, format!("'{}' is missing its key-list", cmd.identifier));
        return false;
    };
    let span = arg.span;
    let mut ok = true;
    for key in arg.value.strings().unwrap_or_default() {
        if !validator.string_is_constant(key) {
            continue;
        }
        if let Err(err) = match_type.validate_key(key) {
            validator.error(span, err.to_string());
            ok = false;
        }
    }
    ok
}

fn setup(cmd: &CommandNode) -> Result<&MatchSetup, GenerateError> {
    cmd.data::<MatchSetup>().ok_or_else(|| {
        GenerateError::Inconsistent(format!("'{}' has no resolved match setup", cmd.identifier))
    })
}

/// `:comparator <name: string>`
#[derive(Debug, Default)]
pub struct ComparatorTag;

impl TagDef for ComparatorTag {
    fn name(&self) -> &'static str {
        "COMPARATOR"
    }

    fn is_instance_of(&self, _validator: &Validator<'_>, identifier: &str) -> bool {
        identifier == "comparator"
    }

    fn validate(&self, validator: &mut Validator<'_>, cmd: &mut CommandNode, index: usize) -> bool {
        let tag_span = cmd.arguments[index].span;
        let param = cmd
            .consume_parameter(index)
            .map(|p| (p.as_str().map(str::to_string), p.span));
        let (name, span) = match param {
            Some((Some(name), span)) => (name, span),
            Some((None, span)) => {
                validator.error(span, ":comparator requires a string argument");
                return false;
            }
            None => {
                validator.error(tag_span, ":comparator requires a string argument");
                return false;
            }
        };
        let Some((ext, code, item)) = validator.find_comparator(&name) else {
            validator.error(span, format!("unknown comparator '{name}'"));
            return false;
        };
        cmd.data_mut_or_default::<MatchSetup>().comparator = Some(Resolved { ext, code, item });
        true
    }

    fn generate(
        &self,
        generator: &mut Generator,
        cmd: &CommandNode,
        _arg: &Argument,
    ) -> Result<(), GenerateError> {
        let resolved = setup(cmd)?.comparator.as_ref().ok_or_else(|| {
            GenerateError::Inconsistent(format!("'{}' has no resolved comparator", cmd.identifier))
        })?;
        generator.emit_comparator(&resolved.ext, resolved.code)
    }
}

/// `:is`, `:contains`, `:matches` and any match type an enabled extension
/// adds.
#[derive(Debug, Default)]
pub struct MatchTypeTag;

impl TagDef for MatchTypeTag {
    fn name(&self) -> &'static str {
        "MATCH-TYPE"
    }

    fn is_instance_of(&self, validator: &Validator<'_>, identifier: &str) -> bool {
        validator.find_match_type(identifier).is_some()
    }

    fn validate(&self, validator: &mut Validator<'_>, cmd: &mut CommandNode, index: usize) -> bool {
        let name = cmd.arguments[index].tag_name().map(str::to_ascii_lowercase).unwrap_or_default();
        match validator.find_match_type(&name) {
            Some((ext, code, item)) => {
                cmd.data_mut_or_default::<MatchSetup>().match_type = Some(Resolved { ext, code, item });
                true
            }
            None => {
                let span = cmd.arguments[index].span;
                validator.error(span, format!("unknown match type :{name}"));
                false
            }
        }
    }

    fn generate(
        &self,
        generator: &mut Generator,
        cmd: &CommandNode,
        _arg: &Argument,
    ) -> Result<(), GenerateError> {
        let resolved = setup(cmd)?.match_type.as_ref().ok_or_else(|| {
            GenerateError::Inconsistent(format!("'{}' has no resolved match type", cmd.identifier))
        })?;
        generator.emit_match_type(&resolved.ext, resolved.code)
    }
}

/// `:all`, `:localpart`, `:domain`
#[derive(Debug, Default)]
pub struct AddressPartTag;

impl TagDef for AddressPartTag {
    fn name(&self) -> &'static str {
        "ADDRESS-PART"
    }

    fn is_instance_of(&self, _validator: &Validator<'_>, identifier: &str) -> bool {
        AddressPart::from_str(identifier).is_ok()
    }

    fn generate(
        &self,
        generator: &mut Generator,
        _cmd: &CommandNode,
        arg: &Argument,
    ) -> Result<(), GenerateError> {
        let part = arg
            .tag_name()
            .and_then(|name| AddressPart::from_str(&name.to_ascii_lowercase()).ok())
            .ok_or_else(|| GenerateError::Inconsistent("address part tag lost its name".into()))?;
        generator.emit_address_part(part as u8);
        Ok(())
    }
}
