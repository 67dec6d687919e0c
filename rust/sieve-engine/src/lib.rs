//! Sieve Engine
//!
//! Compiles Sieve mail-filter scripts into extension-tagged bytecode and
//! runs that bytecode against messages. Extensions plug in commands, tests,
//! operations, operands, comparators and match types through the
//! [`ExtensionRegistry`]; the core language, `fileinto` and `envelope` are
//! registered by [`Engine::new`].

pub mod builtin;
pub mod compiler;
pub mod diagnostics;
pub mod registry;
pub mod vm;

pub use compiler::ast::Script;
pub use compiler::CompileError;
pub use diagnostics::{CollectingSink, Diagnostic, DiagnosticSink, Severity, TracingSink};
pub use registry::{Extension, ExtensionDef, ExtensionId, ExtensionRegistry, RegistryError};
pub use sieve_core::{Binary, BinaryError, Limits, SieveConfig};
pub use vm::actions::{Action, ActionError, ActionExecutor};
pub use vm::loader::{LoadError, LoadedBinary};
pub use vm::message::{MessageContext, SimpleMessage};
pub use vm::trace::{TraceEvent, TraceSink};
pub use vm::{ExecStatus, Interpreter, RunReport, RuntimeError};

use std::sync::Arc;

/// Ids of the extensions every engine registers.
pub const FILEINTO_ID: ExtensionId = ExtensionId(1);
pub const ENVELOPE_ID: ExtensionId = ExtensionId(2);

/// A registry plus configuration: the entry point for compiling and running
/// scripts. Share it behind an `Arc` once all extensions are registered.
#[derive(Debug)]
pub struct Engine {
    registry: ExtensionRegistry,
    config: SieveConfig,
}

impl Engine {
    pub fn new(config: SieveConfig) -> Result<Self, RegistryError> {
        let mut registry = ExtensionRegistry::new();
        registry.register(ExtensionId::CORE, builtin::core_extension())?;
        registry.register(FILEINTO_ID, builtin::fileinto_extension())?;
        registry.register(ENVELOPE_ID, builtin::envelope_extension())?;
        Ok(Self { registry, config })
    }

    /// Register `def` under the next free id.
    pub fn register_extension(&mut self, def: ExtensionDef) -> Result<Arc<Extension>, RegistryError> {
        let id = self.registry.next_id();
        self.registry.register(id, def)
    }

    pub fn register_extension_with_id(
        &mut self,
        id: ExtensionId,
        def: ExtensionDef,
    ) -> Result<Arc<Extension>, RegistryError> {
        self.registry.register(id, def)
    }

    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &SieveConfig {
        &self.config
    }

    /// Compile `source`, logging diagnostics through `tracing`.
    pub fn compile(&self, source: &str, name: &str) -> Result<Binary, CompileError> {
        self.compile_with_sink(source, name, &mut TracingSink)
    }

    pub fn compile_with_sink(
        &self,
        source: &str,
        name: &str,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<Binary, CompileError> {
        compiler::compile(&self.registry, &self.config, source, name, sink)
    }

    /// Validate and generate an AST built by the caller.
    pub fn compile_ast(
        &self,
        script: &mut Script,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<Binary, CompileError> {
        compiler::compile_ast(&self.registry, &self.config, script, sink)
    }

    /// Bind `binary` to this engine's registry. Fails if the binary needs an
    /// extension that is not registered.
    pub fn load(&self, binary: Arc<Binary>) -> Result<LoadedBinary, LoadError> {
        LoadedBinary::load(&self.registry, binary)
    }

    /// Decode a serialized binary and load it.
    pub fn load_bytes(&self, bytes: &[u8]) -> Result<LoadedBinary, LoadError> {
        let binary = Binary::from_bytes(bytes)?;
        self.load(Arc::new(binary))
    }

    pub fn run(&self, program: &LoadedBinary, message: &dyn MessageContext) -> RunReport {
        Interpreter::new(program, message, &self.config.limits).run()
    }

    pub fn run_with_trace(
        &self,
        program: &LoadedBinary,
        message: &dyn MessageContext,
        trace: &mut dyn TraceSink,
    ) -> RunReport {
        Interpreter::new(program, message, &self.config.limits).with_trace(trace).run()
    }

    /// Run, then hand the final actions to `executor` in order. The first
    /// executor failure stops execution and decides the status.
    pub fn execute(
        &self,
        program: &LoadedBinary,
        message: &dyn MessageContext,
        executor: &mut dyn ActionExecutor,
    ) -> RunReport {
        let mut report = self.run(program, message);
        for action in &report.actions {
            if let Err(err) = executor.execute(action) {
                tracing::warn!(action = action.name(), error = %err, "action failed");
                report.status = match err {
                    ActionError::Temporary(_) => ExecStatus::TemporaryFailure,
                    ActionError::Permanent(_) => ExecStatus::PermanentFailure,
                };
                report.action_error = Some(err);
                break;
            }
        }
        report
    }
}

/// Parse and validate `src` against a default engine; the validated AST or
/// every diagnostic message.
#[cfg(test)]
pub(crate) fn compile_for_test(src: &str) -> Result<Script, Vec<String>> {
    use compiler::validator::Validator;

    let engine = Engine::new(SieveConfig::default()).map_err(|e| vec![e.to_string()])?;
    let mut script = compiler::parse(src, "test").map_err(|e| vec![e.to_string()])?;
    let mut sink = CollectingSink::new();
    let ok = Validator::new(engine.registry(), engine.config(), "test", &mut sink).validate(&mut script);
    if ok {
        Ok(script)
    } else {
        Err(sink.diagnostics.into_iter().map(|d| d.message).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn run(src: &str, message: &SimpleMessage) -> RunReport {
        let engine = Engine::new(SieveConfig::default()).unwrap();
        let binary = engine.compile(src, "test").unwrap();
        let program = engine.load(Arc::new(binary)).unwrap();
        engine.run(&program, message)
    }

    #[test]
    fn empty_script_keeps() {
        let report = run("", &SimpleMessage::new());
        assert!(report.is_ok());
        assert_eq!(report.actions, vec![Action::keep()]);
    }

    #[test]
    fn elsif_chain_takes_first_match() {
        let src = r#"require "fileinto";
            if header :is "X-Prio" "1" { fileinto "urgent"; }
            elsif header :is "X-Prio" "2" { fileinto "normal"; }
            else { fileinto "later"; }"#;
        let mailbox = |prio: &str| {
            let report = run(src, &SimpleMessage::new().with_header("X-Prio", prio));
            match &report.actions[..] {
                [Action::FileInto { mailbox, .. }] => mailbox.clone(),
                other => panic!("unexpected actions {other:?}"),
            }
        };
        assert_eq!(mailbox("1"), "urgent");
        assert_eq!(mailbox("2"), "normal");
        assert_eq!(mailbox("3"), "later");
    }

    #[test]
    fn allof_and_anyof_short_circuit() {
        let msg = SimpleMessage::new().with_header("From", "a@example.org");
        let report = run("if allof (exists \"From\", exists \"To\") { discard; }", &msg);
        assert_eq!(report.actions, vec![Action::keep()]);
        let report = run("if anyof (exists \"To\", exists \"From\") { discard; }", &msg);
        assert_eq!(report.actions, vec![Action::Discard]);
        let report = run("if not anyof (false, exists \"To\") { discard; }", &msg);
        assert_eq!(report.actions, vec![Action::Discard]);
    }

    #[test]
    fn stop_ends_the_run() {
        let report = run("discard; stop; keep;", &SimpleMessage::new());
        assert_eq!(report.actions, vec![Action::Discard]);
    }

    #[test]
    fn address_and_size_tests() {
        let msg = SimpleMessage::new()
            .with_header("From", "\"Jane\" <jane@Example.ORG>")
            .with_size(2048);
        let report = run(
            r#"if allof (address :domain :is "From" "example.org", size :over 1K) { discard; }"#,
            &msg,
        );
        assert_eq!(report.actions, vec![Action::Discard]);
        let report = run("if size :under 2K { discard; }", &msg);
        assert_eq!(report.actions, vec![Action::keep()]);
    }

    #[test]
    fn envelope_from_and_to() {
        let msg = SimpleMessage::new()
            .with_sender("bounce@lists.example.org")
            .with_recipient("me@example.com");
        let report = run(
            r#"require "envelope";
               if envelope :localpart :is "from" "bounce" { discard; }"#,
            &msg,
        );
        assert_eq!(report.actions, vec![Action::Discard]);
        let report = run(
            r#"require "envelope";
               if envelope :domain :contains "to" "example.net" { discard; }"#,
            &msg,
        );
        assert_eq!(report.actions, vec![Action::keep()]);
    }

    #[test]
    fn redirect_and_duplicates() {
        let report = run(
            r#"redirect "a@example.org"; redirect "A@example.org"; keep; keep;"#,
            &SimpleMessage::new(),
        );
        assert_eq!(
            report.actions,
            vec![Action::Redirect { address: "a@example.org".into() }, Action::keep()]
        );
    }

    #[test]
    fn executor_failure_sets_status() {
        struct Failing;
        impl ActionExecutor for Failing {
            fn execute(&mut self, _action: &Action) -> Result<(), ActionError> {
                Err(ActionError::Temporary("mailbox locked".into()))
            }
        }
        let engine = Engine::new(SieveConfig::default()).unwrap();
        let program = engine.load(Arc::new(engine.compile("keep;", "t").unwrap())).unwrap();
        let report = engine.execute(&program, &SimpleMessage::new(), &mut Failing);
        assert_eq!(report.status, ExecStatus::TemporaryFailure);
        assert!(report.action_error.is_some());
    }

    #[test]
    fn extensions_register_after_builtins() {
        let mut engine = Engine::new(SieveConfig::default()).unwrap();
        let ext = engine.register_extension(ExtensionDef::new("x-test")).unwrap();
        assert_eq!(ext.id(), ExtensionId(3));
        assert!(engine.register_extension(ExtensionDef::new("fileinto")).is_err());
    }
}
