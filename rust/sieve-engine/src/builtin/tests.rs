//! Message tests: `header`, `address`, `exists`, `size` and `envelope`.

use crate::builtin::{emit_core, emit_own, CoreOpcode};
use crate::compiler::ast::CommandNode;
use crate::compiler::commands::{
    ArgKind, CommandDef, CommandKind, Positional, PositionalSpec, TagDef,
};
use crate::compiler::generator::{GenerateError, Generator};
use crate::compiler::match_args::{link_address_part_tags, link_match_tags, validate_key_list};
use crate::compiler::validator::Validator;
use crate::registry::Extension;
use crate::vm::dump::CodeDumper;
use crate::vm::message::{parse_address_list, AddressPart};
use crate::vm::operation::Operation;
use crate::vm::{Interpreter, MatchOperands, RuntimeError};
use sieve_core::BinaryError;
use std::sync::Arc;

/// Headers the `address` test may inspect.
const ADDRESS_HEADERS: &[&str] = &[
    "from",
    "to",
    "cc",
    "bcc",
    "sender",
    "reply-to",
    "resent-from",
    "resent-to",
    "resent-cc",
    "resent-bcc",
    "resent-sender",
    "resent-reply-to",
    "delivered-to",
    "return-path",
    "errors-to",
    "disposition-notification-to",
    "x-original-to",
];

const ENVELOPE_PARTS: &[&str] = &["from", "to"];

const NAMES_AND_KEYS: &[PositionalSpec] = &[
    PositionalSpec::new("header-names", ArgKind::StringList),
    PositionalSpec::new("key-list", ArgKind::StringList),
];

/// Index of the `n`th positional argument.
fn positional(cmd: &CommandNode, n: usize) -> Option<usize> {
    cmd.positional_indices().get(n).copied()
}

/// Report constant items of the `n`th positional list that `allowed`
/// rejects.
fn check_constant_items(
    validator: &mut Validator<'_>,
    cmd: &CommandNode,
    n: usize,
    allowed: impl Fn(&str) -> bool,
    message: impl Fn(&str) -> String,
) -> bool {
    let Some(arg) = positional(cmd, n).map(|i| &cmd.arguments[i]) else {
        return false;
    };
    let span = arg.span;
    let mut ok = true;
    for item in arg.value.strings().unwrap_or_default() {
        if validator.string_is_constant(item) && !allowed(&item.to_ascii_lowercase()) {
            validator.error(span, message(item));
            ok = false;
        }
    }
    ok
}

fn validate_keys(validator: &mut Validator<'_>, cmd: &CommandNode) -> bool {
    match positional(cmd, 1) {
        Some(index) => validate_key_list(validator, cmd, index),
        None => false,
    }
}

/// `header [COMPARATOR] [MATCH-TYPE] <header-names: string-list> <key-list: string-list>`
pub struct Header;

impl CommandDef for Header {
    fn identifier(&self) -> &'static str {
        "header"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Test
    }

    fn positional(&self) -> Positional {
        Positional::Fixed(NAMES_AND_KEYS)
    }

    fn registered(&self, validator: &mut Validator<'_>, _ext: &Arc<Extension>) {
        link_match_tags(validator, "header");
    }

    fn validate(&self, validator: &mut Validator<'_>, cmd: &mut CommandNode) -> bool {
        validate_keys(validator, cmd)
    }

    fn generate(&self, generator: &mut Generator, cmd: &CommandNode) -> Result<(), GenerateError> {
        emit_core(generator, CoreOpcode::Header)?;
        generator.generate_arguments(cmd)
    }
}

/// `address [COMPARATOR] [ADDRESS-PART] [MATCH-TYPE] <header-list: string-list> <key-list: string-list>`
pub struct Address;

impl CommandDef for Address {
    fn identifier(&self) -> &'static str {
        "address"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Test
    }

    fn positional(&self) -> Positional {
        Positional::Fixed(NAMES_AND_KEYS)
    }

    fn registered(&self, validator: &mut Validator<'_>, _ext: &Arc<Extension>) {
        link_match_tags(validator, "address");
        link_address_part_tags(validator, "address");
    }

    fn validate(&self, validator: &mut Validator<'_>, cmd: &mut CommandNode) -> bool {
        let headers_ok = check_constant_items(
            validator,
            cmd,
            0,
            |name| ADDRESS_HEADERS.contains(&name),
            |name| format!("'address' test: header '{name}' does not contain addresses"),
        );
        validate_keys(validator, cmd) && headers_ok
    }

    fn generate(&self, generator: &mut Generator, cmd: &CommandNode) -> Result<(), GenerateError> {
        emit_core(generator, CoreOpcode::Address)?;
        generator.generate_arguments(cmd)
    }
}

/// `exists <header-names: string-list>`
pub struct Exists;

impl CommandDef for Exists {
    fn identifier(&self) -> &'static str {
        "exists"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Test
    }

    fn positional(&self) -> Positional {
        const SPEC: &[PositionalSpec] = &[PositionalSpec::new("header-names", ArgKind::StringList)];
        Positional::Fixed(SPEC)
    }

    fn generate(&self, generator: &mut Generator, cmd: &CommandNode) -> Result<(), GenerateError> {
        emit_core(generator, CoreOpcode::Exists)?;
        generator.generate_arguments(cmd)
    }
}

/// Direction chosen by `:over` / `:under`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SizeDirection {
    over: bool,
}

/// `:over` and `:under`; they select the opcode instead of being emitted.
struct SizeTag;

impl TagDef for SizeTag {
    fn name(&self) -> &'static str {
        "SIZE"
    }

    fn is_instance_of(&self, _validator: &Validator<'_>, identifier: &str) -> bool {
        identifier == "over" || identifier == "under"
    }

    fn validate(&self, _validator: &mut Validator<'_>, cmd: &mut CommandNode, index: usize) -> bool {
        let over = cmd.arguments[index].tag_name().is_some_and(|t| t.eq_ignore_ascii_case("over"));
        cmd.set_data(SizeDirection { over });
        cmd.arguments[index].detach();
        true
    }
}

/// `size <":over" / ":under"> <limit: number>`
pub struct Size;

impl CommandDef for Size {
    fn identifier(&self) -> &'static str {
        "size"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Test
    }

    fn positional(&self) -> Positional {
        const SPEC: &[PositionalSpec] = &[PositionalSpec::new("limit", ArgKind::Number)];
        Positional::Fixed(SPEC)
    }

    fn registered(&self, validator: &mut Validator<'_>, _ext: &Arc<Extension>) {
        validator.register_tag("size", Arc::new(SizeTag), None);
    }

    fn validate(&self, validator: &mut Validator<'_>, cmd: &mut CommandNode) -> bool {
        if cmd.data::<SizeDirection>().is_none() {
            validator.error(cmd.span, "'size' requires either :over or :under");
            return false;
        }
        true
    }

    fn generate(&self, generator: &mut Generator, cmd: &CommandNode) -> Result<(), GenerateError> {
        let direction = cmd
            .data::<SizeDirection>()
            .ok_or_else(|| GenerateError::Inconsistent("'size' has no direction".into()))?;
        let op = if direction.over { CoreOpcode::SizeOver } else { CoreOpcode::SizeUnder };
        emit_core(generator, op)?;
        generator.generate_arguments(cmd)
    }
}

/// `envelope [COMPARATOR] [ADDRESS-PART] [MATCH-TYPE] <envelope-part: string-list> <key-list: string-list>`
pub struct Envelope;

impl CommandDef for Envelope {
    fn identifier(&self) -> &'static str {
        "envelope"
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Test
    }

    fn positional(&self) -> Positional {
        const SPEC: &[PositionalSpec] = &[
            PositionalSpec::new("envelope-part", ArgKind::StringList),
            PositionalSpec::new("key-list", ArgKind::StringList),
        ];
        Positional::Fixed(SPEC)
    }

    fn registered(&self, validator: &mut Validator<'_>, _ext: &Arc<Extension>) {
        link_match_tags(validator, "envelope");
        link_address_part_tags(validator, "envelope");
    }

    fn validate(&self, validator: &mut Validator<'_>, cmd: &mut CommandNode) -> bool {
        let parts_ok = check_constant_items(
            validator,
            cmd,
            0,
            |part| ENVELOPE_PARTS.contains(&part),
            |part| format!("unsupported envelope part '{part}'"),
        );
        validate_keys(validator, cmd) && parts_ok
    }

    fn generate(&self, generator: &mut Generator, cmd: &CommandNode) -> Result<(), GenerateError> {
        emit_own(generator, cmd, EnvelopeOperation::CODE)?;
        generator.generate_arguments(cmd)
    }
}

fn read_match_operands(interp: &mut Interpreter<'_>) -> Result<MatchOperands, RuntimeError> {
    interp.read_match_operands(|_, _| Ok(false))
}

/// Selected address parts of every address in `addresses`.
fn address_values<'v>(operands: &MatchOperands, addresses: impl IntoIterator<Item = &'v str>) -> Vec<String> {
    addresses
        .into_iter()
        .flat_map(parse_address_list)
        .filter_map(|addr| operands.address_part.extract(&addr).map(str::to_string))
        .collect()
}

pub(crate) fn execute_header(interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
    let operands = read_match_operands(interp)?;
    let names = interp.read_string_list()?;
    let keys = interp.read_string_list()?;
    let message = interp.message();
    let values = names.iter().flat_map(|name| message.headers(name));
    let result = interp.match_values(&operands, keys, values);
    interp.set_test_result(result);
    Ok(())
}

pub(crate) fn execute_address(interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
    let operands = read_match_operands(interp)?;
    let names = interp.read_string_list()?;
    let keys = interp.read_string_list()?;
    let message = interp.message();
    let values = address_values(&operands, names.iter().flat_map(|name| message.headers(name)));
    let result = interp.match_values(&operands, keys, values.iter().map(String::as_str));
    interp.set_test_result(result);
    Ok(())
}

pub(crate) fn execute_exists(interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
    let names = interp.read_string_list()?;
    let message = interp.message();
    let result = names.iter().all(|name| !message.headers(name).is_empty());
    interp.set_test_result(result);
    Ok(())
}

pub(crate) fn execute_size(interp: &mut Interpreter<'_>, over: bool) -> Result<(), RuntimeError> {
    let limit = interp.read_number()?;
    let size = interp.message().size();
    interp.set_test_result(if over { size > limit } else { size < limit });
    Ok(())
}

pub struct EnvelopeOperation;

impl EnvelopeOperation {
    pub const CODE: u8 = 0;
}

impl Operation for EnvelopeOperation {
    fn mnemonic(&self) -> &'static str {
        "ENVELOPE"
    }

    fn code(&self) -> u8 {
        Self::CODE
    }

    fn dump(&self, dumper: &mut CodeDumper<'_>) -> Result<(), BinaryError> {
        dumper.optional_operands(|_| None)?;
        dumper.operand("envelope parts")?;
        dumper.operand("key list")
    }

    fn execute(&self, interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
        let operands = read_match_operands(interp)?;
        let parts = interp.read_string_list()?;
        let keys = interp.read_string_list()?;
        let message = interp.message();

        let mut values = Vec::new();
        for part in &parts {
            let address = match part.to_ascii_lowercase().as_str() {
                "from" => message.sender(),
                "to" => message.recipient(),
                _ => None,
            };
            match address {
                // The null reverse path only has an empty `:all` part.
                Some(addr) if addr.is_empty() || addr == "<>" => {
                    if operands.address_part == AddressPart::All {
                        values.push(String::new());
                    }
                }
                Some(addr) => values.extend(address_values(&operands, [addr])),
                None => {}
            }
        }
        let result = interp.match_values(&operands, keys, values.iter().map(String::as_str));
        interp.set_test_result(result);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::compile_for_test;

    #[test]
    fn address_test_needs_address_headers() {
        let err = compile_for_test(r#"if address :domain "Subject" "example.org" { keep; }"#)
            .unwrap_err();
        assert_eq!(err, vec!["'address' test: header 'Subject' does not contain addresses".to_string()]);
        assert!(compile_for_test(r#"if address :domain ["From", "Reply-To"] "example.org" { keep; }"#).is_ok());
    }

    #[test]
    fn size_needs_direction() {
        let err = compile_for_test("if size 100 { discard; }").unwrap_err();
        assert_eq!(err, vec!["'size' requires either :over or :under".to_string()]);
        let err = compile_for_test("if size :over :under 100 { discard; }").unwrap_err();
        assert!(err[0].contains("already has a SIZE tag"), "{err:?}");
    }

    #[test]
    fn size_tag_is_detached() {
        let script = compile_for_test("if size :over 100K { discard; }").unwrap();
        let test = &script.commands[0].tests[0];
        assert!(test.arguments[0].is_detached());
        assert!(test.arguments[1].activation().is_some());
    }

    #[test]
    fn envelope_parts_are_checked() {
        let err = compile_for_test(
            "require \"envelope\"; if envelope :all \"bcc\" \"a@b.c\" { keep; }",
        )
        .unwrap_err();
        assert_eq!(err, vec!["unsupported envelope part 'bcc'".to_string()]);
    }
}
