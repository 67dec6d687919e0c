//! Compiling and running scripts that use `variables`.

use pretty_assertions::assert_eq;
use sieve_engine::vm::dump::disassemble;
use sieve_engine::{Action, Engine, ExecStatus, RunReport, RuntimeError, SieveConfig, SimpleMessage};
use sieve_ext_variables::{variables_extension, variables_extension_with, ModifierTable, SetModifier};
use std::sync::Arc;

fn engine_with(config: SieveConfig) -> Engine {
    let mut engine = Engine::new(config).expect("builtin extensions register");
    engine.register_extension(variables_extension()).expect("variables registers");
    engine
}

fn engine() -> Engine {
    engine_with(SieveConfig::default())
}

fn run_on(engine: &Engine, src: &str, message: &SimpleMessage) -> RunReport {
    let binary = engine.compile(src, "variables").expect("script should compile");
    let program = engine.load(Arc::new(binary)).expect("binary should load");
    engine.run(&program, message)
}

fn actions(src: &str) -> Vec<Action> {
    let report = run_on(&engine(), src, &SimpleMessage::new());
    assert!(report.is_ok(), "{:?}", report.error);
    report.actions
}

fn errors(engine: &Engine, src: &str) -> Vec<String> {
    let err = engine.compile(src, "variables").expect_err("script should not compile");
    err.diagnostics().iter().map(|d| d.message.clone()).collect()
}

fn fileinto(mailbox: &str) -> Action {
    Action::FileInto { mailbox: mailbox.into(), flags: vec![] }
}

#[test]
fn references_expand_in_string_arguments() {
    let src = r#"require ["variables", "fileinto"];
        set "folder" "Lists";
        fileinto "INBOX.${folder}";"#;
    assert_eq!(actions(src), vec![fileinto("INBOX.Lists")]);
}

#[test]
fn unset_variables_expand_to_nothing() {
    let src = r#"require "variables"; if string :is "${nothing}" "" { discard; }"#;
    assert_eq!(actions(src), vec![Action::Discard]);
}

#[test]
fn names_are_case_insensitive() {
    let src = r#"require "variables"; set "Name" "x"; if string "${NAME}" "x" { discard; }"#;
    assert_eq!(actions(src), vec![Action::Discard]);
}

#[test]
fn modifiers_apply_by_precedence() {
    let src = r#"require "variables";
        set :upperfirst :lower "name" "jOHN";
        if string :comparator "i;octet" :is "${name}" "John" { discard; }"#;
    assert_eq!(actions(src), vec![Action::Discard]);

    let src = r#"require "variables";
        set :length "n" "hello";
        if string :is "${n}" "5" { discard; }"#;
    assert_eq!(actions(src), vec![Action::Discard]);
}

#[test]
fn dynamic_keys_match_at_run_time() {
    let src = r#"require "variables";
        set "pattern" "a*";
        if string :matches "abc" "${pattern}" { discard; }"#;
    assert_eq!(actions(src), vec![Action::Discard]);
}

#[test]
fn values_truncate_to_the_configured_size() {
    let config = SieveConfig::from_toml_str("[limits]\nmax_variable_size = 4").unwrap();
    let engine = engine_with(config);
    let src = r#"require "variables";
        set "v" "abcdefgh";
        if string :comparator "i;octet" :is "${v}" "abcd" { discard; }"#;
    let report = run_on(&engine, src, &SimpleMessage::new());
    assert_eq!(report.actions, vec![Action::Discard]);
}

#[test]
fn equal_precedence_is_rejected() {
    let messages = errors(&engine(), r#"require "variables"; set :lower :upper "a" "b";"#);
    assert_eq!(
        messages,
        vec!["modifiers :lower and :upper specified for the set command conflict having equal precedence"
            .to_string()]
    );
}

#[test]
fn variable_names_are_checked() {
    let messages = errors(&engine(), r#"require "variables"; set "1abc" "x";"#);
    assert_eq!(messages, vec!["invalid variable name '1abc'".to_string()]);
    let messages = errors(&engine(), r#"set "a" "x";"#);
    assert!(messages[0].contains("requires extension 'variables'"), "{messages:?}");
}

#[test]
fn foreach_visits_every_item() {
    let src = r#"require ["variables", "fileinto"];
        foreach "f" ["a", "b", "c"] { fileinto "${f}"; }"#;
    assert_eq!(actions(src), vec![fileinto("a"), fileinto("b"), fileinto("c")]);
}

#[test]
fn nested_foreach() {
    let src = r#"require ["variables", "fileinto"];
        foreach "x" ["1", "2"] { foreach "y" ["a", "b"] { fileinto "${x}${y}"; } }"#;
    assert_eq!(
        actions(src),
        vec![fileinto("1a"), fileinto("1b"), fileinto("2a"), fileinto("2b")]
    );
}

#[test]
fn foreach_is_bounded_when_compiled() {
    let config = SieveConfig::from_toml_str("[limits]\nmax_foreach_items = 2").unwrap();
    let messages = errors(
        &engine_with(config),
        r#"require "variables"; foreach "f" ["a", "b", "c"] { keep; }"#,
    );
    assert_eq!(messages, vec!["foreach list has 3 items; the limit is 2".to_string()]);
}

#[test]
fn foreach_is_bounded_when_run() {
    let binary = engine()
        .compile(r#"require "variables"; foreach "f" ["a", "b", "c"] { keep; }"#, "t")
        .unwrap();
    let config = SieveConfig::from_toml_str("[limits]\nmax_foreach_items = 2").unwrap();
    let strict = engine_with(config);
    let program = strict.load(Arc::new(binary)).unwrap();
    let report = strict.run(&program, &SimpleMessage::new());
    assert_eq!(report.status, ExecStatus::FailSafe);
    assert!(matches!(report.error, Some(RuntimeError::ResourceLimit(_))));
    assert_eq!(report.actions, vec![Action::keep()]);
}

#[test]
fn foreach_loop_layout() {
    let engine = engine();
    let binary = engine
        .compile(r#"require "variables"; foreach "f" ["a", "b"] { discard; }"#, "t")
        .unwrap();
    let program = engine.load(Arc::new(binary)).unwrap();
    let model: Vec<_> = disassemble(&program)
        .unwrap()
        .into_iter()
        .map(|i| (i.extension, i.mnemonic, i.operands))
        .collect();
    // FOREACH@0 FOREACH_NEXT@12 DISCARD@18 JMP@20 end@26
    let s = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    assert_eq!(
        model,
        vec![
            (
                "variables".to_string(),
                "FOREACH".to_string(),
                s(&["variable: ${f}", r#"list: ["a", "b"]"#])
            ),
            ("variables".into(), "FOREACH_NEXT".into(), s(&["exit: 0000001a"])),
            ("core".into(), "DISCARD".into(), vec![]),
            ("core".into(), "JMP".into(), s(&["target: 0000000c"])),
        ]
    );
}

#[test]
fn set_disassembles_with_modifiers() {
    let engine = engine();
    let binary = engine
        .compile(r#"require "variables"; set :length :lower "n" "Hi ${who}";"#, "t")
        .unwrap();
    let program = engine.load(Arc::new(binary)).unwrap();
    let instructions = disassemble(&program).unwrap();
    assert_eq!(instructions.len(), 1);
    assert_eq!(
        instructions[0].operands,
        vec![
            "variable: ${n}".to_string(),
            r#"value: expand "Hi ${who}""#.to_string(),
            "modifiers: :lower :length".to_string(),
        ]
    );
}

/// Rejects values containing a digit.
#[derive(Debug)]
struct NoDigits;

impl SetModifier for NoDigits {
    fn name(&self) -> &'static str {
        "nodigits"
    }

    fn precedence(&self) -> u8 {
        15
    }

    fn modify(&self, value: &str) -> Option<String> {
        (!value.chars().any(|c| c.is_ascii_digit())).then(|| value.to_string())
    }
}

#[derive(Debug)]
struct Reverse;

impl SetModifier for Reverse {
    fn name(&self) -> &'static str {
        "reverse"
    }

    fn precedence(&self) -> u8 {
        40
    }

    fn modify(&self, value: &str) -> Option<String> {
        Some(value.chars().rev().collect())
    }
}

fn engine_with_custom_modifiers() -> Engine {
    let table = ModifierTable::builtin()
        .with(Arc::new(NoDigits))
        .and_then(|t| t.with(Arc::new(Reverse)))
        .expect("names are unique");
    let mut engine = Engine::new(SieveConfig::default()).expect("builtin extensions register");
    engine.register_extension(variables_extension_with(table)).expect("variables registers");
    engine
}

#[test]
fn failing_modifier_leaves_the_variable_unchanged() {
    let engine = engine_with_custom_modifiers();
    let src = r#"require ["variables", "fileinto"];
        set "v" "before";
        set :nodigits "v" "${input}";
        fileinto "${v}";"#;

    let report = run_on(&engine, &src.replace("${input}", "after"), &SimpleMessage::new());
    assert!(report.is_ok(), "{:?}", report.error);
    assert_eq!(report.actions, vec![fileinto("after")]);

    let report = run_on(&engine, &src.replace("${input}", "after2"), &SimpleMessage::new());
    assert!(report.is_ok(), "{:?}", report.error);
    assert_eq!(report.actions, vec![fileinto("before")]);
}

#[test]
fn custom_modifiers_combine_with_builtins() {
    let engine = engine_with_custom_modifiers();
    let src = r#"require ["variables", "fileinto"];
        set :reverse :length "v" "abc";
        set :reverse "w" "abc";
        fileinto "${w}${v}";"#;
    let report = run_on(&engine, src, &SimpleMessage::new());
    assert_eq!(report.actions, vec![fileinto("cba3")]);

    let messages = errors(&engine, r#"require "variables"; set :reverse :upper "a" "b";"#);
    assert_eq!(
        messages,
        vec!["modifiers :reverse and :upper specified for the set command conflict having equal precedence"
            .to_string()]
    );
}

#[test]
fn custom_modifiers_need_registration() {
    let messages = errors(&engine(), r#"require "variables"; set :reverse "a" "b";"#);
    assert!(messages[0].contains(":reverse"), "{messages:?}");
}

#[test]
fn custom_modifiers_are_named_in_the_disassembly() {
    let engine = engine_with_custom_modifiers();
    let binary = engine.compile(r#"require "variables"; set :nodigits :lower "n" "x";"#, "t").unwrap();
    let program = engine.load(Arc::new(binary)).unwrap();
    let instructions = disassemble(&program).unwrap();
    assert_eq!(instructions[0].operands[2], "modifiers: :lower :nodigits");
}
