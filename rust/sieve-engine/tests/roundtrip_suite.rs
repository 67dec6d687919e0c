//! Generated code decodes back to the structure of the script it came from.

use pretty_assertions::assert_eq;
use sieve_engine::vm::dump::{disassemble, dump};
use sieve_engine::{Engine, SieveConfig};
use std::sync::Arc;

/// (extension, mnemonic, operands) per instruction.
type Model = Vec<(&'static str, &'static str, Vec<&'static str>)>;

fn engine() -> Engine {
    Engine::new(SieveConfig::default()).expect("builtin extensions register")
}

fn decode(engine: &Engine, src: &str) -> Model {
    let binary = engine.compile(src, "roundtrip").expect("script should compile");
    let program = engine.load(Arc::new(binary)).expect("binary should load");
    to_model(&program)
}

fn to_model(program: &sieve_engine::LoadedBinary) -> Model {
    disassemble(program)
        .expect("generated code decodes")
        .into_iter()
        .map(|i| {
            (
                leak(i.extension),
                leak(i.mnemonic),
                i.operands.into_iter().map(leak).collect(),
            )
        })
        .collect()
}

fn leak(s: String) -> &'static str {
    Box::leak(s.into_boxed_str())
}

#[test]
fn conditional_with_fileinto() {
    let engine = engine();
    let model = decode(
        &engine,
        r#"
require ["fileinto"];
if header :contains "Subject" "offer" {
    fileinto "Junk";
    stop;
}
keep;
"#,
    );
    assert_eq!(
        model,
        vec![
            (
                "core",
                "HEADER",
                vec!["match type: :contains", r#"header names: "Subject""#, r#"key list: "offer""#],
            ),
            ("core", "JMPFALSE", vec!["target: 00000018"]),
            ("fileinto", "FILEINTO", vec![r#"mailbox: "Junk""#]),
            ("core", "STOP", vec![]),
            ("core", "KEEP", vec![]),
        ]
    );
}

#[test]
fn tag_order_follows_source() {
    let engine = engine();
    let model = decode(
        &engine,
        r#"if address :comparator "i;octet" :localpart :is ["From", "Sender"] ["joe", "ann"] { discard; }"#,
    );
    assert_eq!(
        model[0],
        (
            "core",
            "ADDRESS",
            vec![
                "comparator: i;octet",
                "address part: :localpart",
                "match type: :is",
                r#"header names: ["From", "Sender"]"#,
                r#"key list: ["joe", "ann"]"#,
            ],
        )
    );
}

#[test]
fn elsif_chain_exits_to_the_end() {
    let engine = engine();
    let model = decode(
        &engine,
        "if true { keep; } elsif false { discard; } else { stop; }",
    );
    // TRUE@0 JMPFALSE@2 KEEP@8 JMP@12 FALSE@18 JMPFALSE@20 DISCARD@26 JMP@28 STOP@34 end@36
    assert_eq!(
        model,
        vec![
            ("core", "TRUE", vec![]),
            ("core", "JMPFALSE", vec!["target: 00000012"]),
            ("core", "KEEP", vec![]),
            ("core", "JMP", vec!["target: 00000024"]),
            ("core", "FALSE", vec![]),
            ("core", "JMPFALSE", vec!["target: 00000022"]),
            ("core", "DISCARD", vec![]),
            ("core", "JMP", vec!["target: 00000024"]),
            ("core", "STOP", vec![]),
        ]
    );
}

#[test]
fn size_tag_selects_opcode() {
    let engine = engine();
    let model = decode(&engine, "if size :under 10K { discard; }");
    assert_eq!(model[0], ("core", "SIZEUNDER", vec!["limit: 10240"]));
}

#[test]
fn unused_require_is_still_recorded() {
    let engine = engine();
    let binary = engine.compile("require [\"fileinto\", \"envelope\"]; keep;", "t").unwrap();
    let names: Vec<_> = binary.extensions().iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["fileinto", "envelope"]);
}

#[test]
fn serialized_binary_decodes_the_same() {
    let engine = engine();
    let src = r#"require "envelope"; if envelope :domain "from" "example.org" { discard; }"#;
    let binary = engine.compile(src, "t").unwrap();
    let direct = engine.load(Arc::new(binary.clone())).unwrap();
    let reloaded = engine.load_bytes(&binary.to_bytes()).unwrap();
    assert_eq!(to_model(&reloaded), to_model(&direct));
    assert_eq!(reloaded.binary(), direct.binary());
}

#[test]
fn dump_text() {
    let engine = engine();
    let binary = engine.compile("require \"fileinto\"; fileinto \"Junk\"; stop;", "t").unwrap();
    let program = engine.load(Arc::new(binary)).unwrap();
    assert_eq!(
        dump(&program),
        [
            "* Extensions:",
            "  1: fileinto",
            "* Code (6 bytes):",
            "00000000: FILEINTO",
            "00000002:   mailbox: \"Junk\"",
            "00000004: STOP",
            "[End of code]",
        ]
        .join("\n")
    );
}

/// Scripts drawn from a small grammar. Each knows how to print itself as
/// source and which instructions it must compile to.
mod generated {
    use proptest::prelude::*;
    use sieve_engine::vm::dump::disassemble;
    use sieve_engine::LoadedBinary;

    /// (extension, mnemonic, operands); jump targets are instruction indices.
    pub type Listing = Vec<(String, String, Vec<String>)>;

    #[derive(Debug, Clone)]
    pub enum Strings {
        One(String),
        List(Vec<String>),
    }

    impl Strings {
        /// Source text, which is also how the dump quotes it.
        fn quoted(&self) -> String {
            match self {
                Strings::One(s) => format!("{s:?}"),
                Strings::List(items) => {
                    let items: Vec<_> = items.iter().map(|s| format!("{s:?}")).collect();
                    format!("[{}]", items.join(", "))
                }
            }
        }
    }

    #[derive(Debug, Clone)]
    pub enum Test {
        Constant(bool),
        Not(Box<Test>),
        AllOf(Vec<Test>),
        AnyOf(Vec<Test>),
        Header {
            comparator: Option<&'static str>,
            match_type: Option<&'static str>,
            names: Strings,
            keys: Strings,
        },
        Exists(Strings),
        Size { over: bool, limit: u64 },
    }

    #[derive(Debug, Clone)]
    pub enum Command {
        Keep,
        Discard,
        Stop,
        FileInto(String),
        If { branches: Vec<(Test, Vec<Command>)>, otherwise: Option<Vec<Command>> },
    }

    fn render_test(test: &Test) -> String {
        match test {
            Test::Constant(value) => value.to_string(),
            Test::Not(inner) => format!("not {}", render_test(inner)),
            Test::AllOf(tests) | Test::AnyOf(tests) => {
                let name = if matches!(test, Test::AllOf(_)) { "allof" } else { "anyof" };
                let tests: Vec<_> = tests.iter().map(render_test).collect();
                format!("{name} ({})", tests.join(", "))
            }
            Test::Header { comparator, match_type, names, keys } => {
                let mut out = "header".to_string();
                if let Some(c) = comparator {
                    out += &format!(" :comparator \"{c}\"");
                }
                if let Some(m) = match_type {
                    out += &format!(" :{m}");
                }
                format!("{out} {} {}", names.quoted(), keys.quoted())
            }
            Test::Exists(names) => format!("exists {}", names.quoted()),
            Test::Size { over, limit } => {
                format!("size :{} {limit}", if *over { "over" } else { "under" })
            }
        }
    }

    fn render_block(commands: &[Command]) -> String {
        let body: Vec<_> = commands.iter().map(render_command).collect();
        format!("{{ {} }}", body.join(" "))
    }

    fn render_command(command: &Command) -> String {
        match command {
            Command::Keep => "keep;".into(),
            Command::Discard => "discard;".into(),
            Command::Stop => "stop;".into(),
            Command::FileInto(mailbox) => format!("fileinto {mailbox:?};"),
            Command::If { branches, otherwise } => {
                let mut out = Vec::new();
                for (i, (test, block)) in branches.iter().enumerate() {
                    let keyword = if i == 0 { "if" } else { "elsif" };
                    out.push(format!("{keyword} {} {}", render_test(test), render_block(block)));
                }
                if let Some(block) = otherwise {
                    out.push(format!("else {}", render_block(block)));
                }
                out.join(" ")
            }
        }
    }

    pub fn render(script: &[Command]) -> String {
        let body: Vec<_> = script.iter().map(render_command).collect();
        format!("require \"fileinto\";\n{}", body.join("\n"))
    }

    #[derive(Default)]
    struct ListingBuilder {
        instructions: Listing,
        labels: Vec<Option<usize>>,
    }

    impl ListingBuilder {
        fn emit(&mut self, ext: &str, mnemonic: &str, operands: Vec<String>) {
            self.instructions.push((ext.into(), mnemonic.into(), operands));
        }

        fn core(&mut self, mnemonic: &str) {
            self.emit("core", mnemonic, Vec::new());
        }

        fn label(&mut self) -> usize {
            self.labels.push(None);
            self.labels.len() - 1
        }

        fn jump(&mut self, mnemonic: &str, label: usize) {
            self.emit("core", mnemonic, vec![format!("target: L{label}")]);
        }

        fn place(&mut self, label: usize) {
            self.labels[label] = Some(self.instructions.len());
        }

        fn test(&mut self, test: &Test) {
            match test {
                Test::Constant(value) => self.core(if *value { "TRUE" } else { "FALSE" }),
                Test::Not(inner) => {
                    self.test(inner);
                    self.core("NOT");
                }
                Test::AllOf(tests) | Test::AnyOf(tests) => {
                    let exit_jump = if matches!(test, Test::AllOf(_)) { "JMPFALSE" } else { "JMPTRUE" };
                    let exit = self.label();
                    if let Some((last, rest)) = tests.split_last() {
                        for test in rest {
                            self.test(test);
                            self.jump(exit_jump, exit);
                        }
                        self.test(last);
                    }
                    self.place(exit);
                }
                Test::Header { comparator, match_type, names, keys } => {
                    let mut operands = Vec::new();
                    if let Some(c) = comparator {
                        operands.push(format!("comparator: {c}"));
                    }
                    if let Some(m) = match_type {
                        operands.push(format!("match type: :{m}"));
                    }
                    operands.push(format!("header names: {}", names.quoted()));
                    operands.push(format!("key list: {}", keys.quoted()));
                    self.emit("core", "HEADER", operands);
                }
                Test::Exists(names) => {
                    self.emit("core", "EXISTS", vec![format!("header names: {}", names.quoted())]);
                }
                Test::Size { over, limit } => {
                    let mnemonic = if *over { "SIZEOVER" } else { "SIZEUNDER" };
                    self.emit("core", mnemonic, vec![format!("limit: {limit}")]);
                }
            }
        }

        fn block(&mut self, commands: &[Command]) {
            for command in commands {
                self.command(command);
            }
        }

        fn command(&mut self, command: &Command) {
            match command {
                Command::Keep => self.core("KEEP"),
                Command::Discard => self.core("DISCARD"),
                Command::Stop => self.core("STOP"),
                Command::FileInto(mailbox) => {
                    self.emit("fileinto", "FILEINTO", vec![format!("mailbox: {mailbox:?}")]);
                }
                Command::If { branches, otherwise } => {
                    let chain_exit = self.label();
                    for (i, (test, block)) in branches.iter().enumerate() {
                        self.test(test);
                        let skip = self.label();
                        self.jump("JMPFALSE", skip);
                        self.block(block);
                        if i + 1 < branches.len() || otherwise.is_some() {
                            self.jump("JMP", chain_exit);
                        }
                        self.place(skip);
                    }
                    if let Some(block) = otherwise {
                        self.block(block);
                    }
                    self.place(chain_exit);
                }
            }
        }

        fn finish(self) -> Listing {
            let labels = self.labels;
            self.instructions
                .into_iter()
                .map(|(ext, mnemonic, operands)| {
                    let operands = operands
                        .into_iter()
                        .map(|op| match op.strip_prefix("target: L") {
                            Some(label) => {
                                let label: usize = label.parse().expect("label number");
                                let index = labels[label].expect("label placed");
                                format!("target: #{index}")
                            }
                            None => op,
                        })
                        .collect();
                    (ext, mnemonic, operands)
                })
                .collect()
        }
    }

    /// The instructions `script` must compile to, derived from its structure.
    pub fn expected(script: &[Command]) -> Listing {
        let mut builder = ListingBuilder::default();
        builder.block(script);
        builder.finish()
    }

    /// Disassembly with jump addresses replaced by instruction indices.
    pub fn decoded(program: &LoadedBinary) -> Listing {
        let instructions = disassemble(program).expect("generated code decodes");
        let code_size = program.binary().code_size();
        let index_of = |address: usize| {
            if address == code_size {
                return instructions.len();
            }
            instructions
                .iter()
                .position(|i| i.address == address)
                .expect("jump lands on an instruction")
        };
        instructions
            .iter()
            .map(|i| {
                let operands = i
                    .operands
                    .iter()
                    .map(|op| match op.strip_prefix("target: ") {
                        Some(hex) => {
                            let address = usize::from_str_radix(hex, 16).expect("hex address");
                            format!("target: #{}", index_of(address))
                        }
                        None => op.clone(),
                    })
                    .collect();
                (i.extension.clone(), i.mnemonic.clone(), operands)
            })
            .collect()
    }

    fn word() -> impl Strategy<Value = String> {
        "[a-z]{1,6}"
    }

    fn strings() -> impl Strategy<Value = Strings> {
        prop_oneof![
            word().prop_map(Strings::One),
            prop::collection::vec(word(), 1..4).prop_map(Strings::List),
        ]
    }

    fn test_tree() -> impl Strategy<Value = Test> {
        let header = (
            prop::option::of(prop::sample::select(vec!["i;octet", "i;ascii-casemap"])),
            prop::option::of(prop::sample::select(vec!["is", "contains", "matches"])),
            strings(),
            strings(),
        )
            .prop_map(|(comparator, match_type, names, keys)| Test::Header {
                comparator,
                match_type,
                names,
                keys,
            });
        let leaf = prop_oneof![
            any::<bool>().prop_map(Test::Constant),
            header,
            strings().prop_map(Test::Exists),
            (any::<bool>(), 0u64..100_000).prop_map(|(over, limit)| Test::Size { over, limit }),
        ];
        leaf.prop_recursive(3, 16, 3, |inner| {
            prop_oneof![
                inner.clone().prop_map(|t| Test::Not(Box::new(t))),
                prop::collection::vec(inner.clone(), 1..4).prop_map(Test::AllOf),
                prop::collection::vec(inner, 1..4).prop_map(Test::AnyOf),
            ]
        })
    }

    pub fn script() -> impl Strategy<Value = Vec<Command>> {
        let leaf = prop_oneof![
            Just(Command::Keep),
            Just(Command::Discard),
            Just(Command::Stop),
            word().prop_map(Command::FileInto),
        ];
        let command = leaf.prop_recursive(2, 12, 3, |inner| {
            let block = prop::collection::vec(inner, 0..3);
            (prop::collection::vec((test_tree(), block.clone()), 1..3), prop::option::of(block))
                .prop_map(|(branches, otherwise)| Command::If { branches, otherwise })
        });
        prop::collection::vec(command, 1..5)
    }
}

#[test]
fn listing_follows_nested_structure() {
    use generated::{Command, Strings, Test};
    let script = vec![
        Command::If {
            branches: vec![(
                Test::AnyOf(vec![
                    Test::Not(Box::new(Test::Exists(Strings::One("x".into())))),
                    Test::AllOf(vec![Test::Constant(true), Test::Size { over: true, limit: 5 }]),
                ]),
                vec![Command::FileInto("junk".into())],
            )],
            otherwise: Some(vec![Command::Stop]),
        },
        Command::Keep,
    ];
    let engine = engine();
    let binary = engine.compile(&generated::render(&script), "generated").unwrap();
    let program = engine.load(Arc::new(binary)).unwrap();
    assert_eq!(generated::decoded(&program), generated::expected(&script));
    assert_eq!(generated::expected(&script)[4].2, vec!["target: #6".to_string()]);
}

proptest::proptest! {
    #![proptest_config(proptest::prelude::ProptestConfig::with_cases(64))]

    #[test]
    fn generated_scripts_decode_to_their_structure(script in generated::script()) {
        let engine = engine();
        let source = generated::render(&script);
        let binary = engine.compile(&source, "generated").expect("generated script compiles");
        let program = engine.load(Arc::new(binary)).expect("binary should load");
        proptest::prop_assert_eq!(generated::decoded(&program), generated::expected(&script));
    }
}
