//! `:regex` in compiled scripts.

use pretty_assertions::assert_eq;
use sieve_engine::vm::dump::disassemble;
use sieve_engine::{Action, Engine, RunReport, SieveConfig, SimpleMessage};
use sieve_ext_regex::regex_extension;
use sieve_ext_variables::variables_extension;
use std::sync::Arc;

fn engine() -> Engine {
    let mut engine = Engine::new(SieveConfig::default()).expect("builtin extensions register");
    engine.register_extension(regex_extension()).expect("regex registers");
    engine.register_extension(variables_extension()).expect("variables registers");
    engine
}

fn run(src: &str, message: &SimpleMessage) -> RunReport {
    let engine = engine();
    let binary = engine.compile(src, "regex").expect("script should compile");
    let program = engine.load(Arc::new(binary)).expect("binary should load");
    engine.run(&program, message)
}

fn errors(src: &str) -> Vec<String> {
    let err = engine().compile(src, "regex").expect_err("script should not compile");
    err.diagnostics().iter().map(|d| d.message.clone()).collect()
}

#[test]
fn header_regex() {
    let message = SimpleMessage::new().with_header("Subject", "[List-Rust] weekly digest");
    let src = r#"require "regex"; if header :regex "Subject" "^\\[list-[a-z]+\\]" { discard; }"#;
    assert_eq!(run(src, &message).actions, vec![Action::Discard]);

    let src = r#"require "regex";
        if header :regex :comparator "i;octet" "Subject" "^\\[list-" { discard; }"#;
    assert_eq!(run(src, &message).actions, vec![Action::keep()]);
}

#[test]
fn bad_patterns_fail_validation() {
    let messages = errors(r#"require "regex"; if header :regex "Subject" "a(b" { discard; }"#);
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("invalid key 'a(b' for match type :regex"), "{messages:?}");
}

#[test]
fn regex_needs_require() {
    let messages = errors(r#"if header :regex "Subject" "x" { discard; }"#);
    assert!(messages[0].contains("unknown tag :regex"), "{messages:?}");
}

#[test]
fn bad_dynamic_pattern_makes_the_test_false() {
    let message = SimpleMessage::new().with_header("Subject", "a(b");
    let src = r#"require ["regex", "variables"];
        set "p" "a(";
        if header :regex "Subject" "${p}" { discard; }"#;
    let report = run(src, &message);
    assert!(report.is_ok(), "{:?}", report.error);
    assert_eq!(report.actions, vec![Action::keep()]);
}

#[test]
fn regex_is_named_in_the_disassembly() {
    let engine = engine();
    let binary = engine
        .compile(r#"require "regex"; if header :regex "X-Spam" "^yes" { discard; }"#, "t")
        .unwrap();
    let program = engine.load(Arc::new(binary)).unwrap();
    let first = disassemble(&program).unwrap().remove(0);
    assert_eq!(first.mnemonic, "HEADER");
    assert_eq!(first.operands[0], "match type: :regex");
}
