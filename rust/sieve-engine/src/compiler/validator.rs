//! Validation: resolves identifiers against the enabled extensions, checks
//! argument shapes and annotates the AST for generation.
//!
//! Errors are accumulated; the pass keeps going so one compile reports as
//! many script defects as it can. Generation only runs when no error was
//! reported.

use crate::compiler::ast::{ActiveHandler, Binding, CommandNode, Script};
use crate::compiler::commands::{
    ArgumentHandler, BlockRule, CommandDef, CommandKind, Positional, StringEncoder, Subtests,
    TagDef, ValueArgument,
};
use crate::compiler::parser::MAX_NESTING_DEPTH;
use crate::compiler::tokens::Span;
use crate::diagnostics::{Diagnostic, DiagnosticSink, Severity};
use crate::registry::{Extension, ExtensionRegistry};
use sieve_core::config::{Limits, SieveConfig};
use sieve_core::{Comparator, MatchType};
use std::collections::HashMap;
use std::sync::Arc;

/// A tag accepted by one command, with the optional-operand code it is
/// emitted under (`None` for tags generated positionally or detached).
#[derive(Clone)]
pub struct TagRegistration {
    pub tag: Arc<dyn TagDef>,
    pub opt_code: Option<u8>,
}

/// Set on an `if`/`elsif` node that is followed by `elsif`/`else`.
#[derive(Debug, Default, Clone, Copy)]
pub struct IfChain {
    pub has_successor: bool,
}

pub struct Validator<'e> {
    registry: &'e ExtensionRegistry,
    config: &'e SieveConfig,
    script_name: String,
    sink: &'e mut dyn DiagnosticSink,
    errors: usize,
    enabled: Vec<Arc<Extension>>,
    tags: HashMap<String, Vec<TagRegistration>>,
    handlers: HashMap<String, Arc<dyn ArgumentHandler>>,
    string_encoder: Option<Arc<dyn StringEncoder>>,
}

impl<'e> Validator<'e> {
    pub fn new(
        registry: &'e ExtensionRegistry,
        config: &'e SieveConfig,
        script_name: impl Into<String>,
        sink: &'e mut dyn DiagnosticSink,
    ) -> Self {
        Self {
            registry,
            config,
            script_name: script_name.into(),
            sink,
            errors: 0,
            enabled: Vec::new(),
            tags: HashMap::new(),
            handlers: HashMap::new(),
            string_encoder: None,
        }
    }

    /// Validate `script` in place. Returns true when no error was reported.
    pub fn validate(&mut self, script: &mut Script) -> bool {
        let implicit: Vec<_> = self.registry.iter().filter(|e| e.implicit()).cloned().collect();
        for ext in implicit {
            self.enable(&ext, Span::dummy());
        }
        self.validate_block(&mut script.commands, 0, true);
        tracing::debug!(
            script = %self.script_name,
            errors = self.errors,
            extensions = self.enabled.len(),
            "validated script"
        );
        self.errors == 0
    }

    pub fn error_count(&self) -> usize {
        self.errors
    }

    pub fn error(&mut self, span: Span, message: impl Into<String>) {
        self.errors += 1;
        self.report(Severity::Error, span, message.into());
    }

    pub fn warning(&mut self, span: Span, message: impl Into<String>) {
        self.report(Severity::Warning, span, message.into());
    }

    fn report(&mut self, severity: Severity, span: Span, message: String) {
        self.sink.report(Diagnostic {
            severity,
            message,
            script: self.script_name.clone(),
            line: span.line,
            col: span.col,
        });
    }

    pub fn config(&self) -> &SieveConfig {
        self.config
    }

    pub fn limits(&self) -> &Limits {
        &self.config.limits
    }

    pub fn registry(&self) -> &ExtensionRegistry {
        self.registry
    }

    pub fn extension_enabled(&self, name: &str) -> bool {
        self.enabled.iter().any(|e| e.name() == name)
    }

    pub fn enabled_extension(&self, name: &str) -> Option<&Arc<Extension>> {
        self.enabled.iter().find(|e| e.name() == name)
    }

    pub fn enabled_extensions(&self) -> &[Arc<Extension>] {
        &self.enabled
    }

    /// Enable the extension `name` for the rest of this compile.
    pub fn require_extension(&mut self, name: &str, span: Span) -> Option<Arc<Extension>> {
        let Some(ext) = self.registry.by_name(name).cloned() else {
            self.error(span, format!("unsupported extension '{name}'"));
            return None;
        };
        if !ext.implicit() && !self.config.allows(name) {
            self.error(span, format!("extension '{name}' is not allowed by configuration"));
            return None;
        }
        if self.enable(&ext, span) {
            Some(ext)
        } else {
            None
        }
    }

    fn enable(&mut self, ext: &Arc<Extension>, span: Span) -> bool {
        if self.enabled.iter().any(|e| e.id() == ext.id()) {
            return true;
        }
        self.enabled.push(ext.clone());
        for def in ext.commands().iter().chain(ext.tests()) {
            def.registered(self, ext);
        }
        if let Some(hooks) = ext.hooks().cloned() {
            if !hooks.validator_load(ext, self) {
                self.error(span, format!("failed to load extension '{}'", ext.name()));
                return false;
            }
        }
        tracing::trace!(extension = ext.name(), "enabled extension");
        true
    }

    /// Accept `tag` on every command or test named `command`.
    pub fn register_tag(&mut self, command: &str, tag: Arc<dyn TagDef>, opt_code: Option<u8>) {
        self.tags.entry(command.to_string()).or_default().push(TagRegistration { tag, opt_code });
    }

    fn find_tag(&self, command: &str, identifier: &str) -> Option<TagRegistration> {
        self.tags
            .get(command)?
            .iter()
            .find(|reg| reg.tag.is_instance_of(self, identifier))
            .cloned()
    }

    pub fn register_argument_handler(&mut self, name: &str, handler: Arc<dyn ArgumentHandler>) {
        self.handlers.insert(name.to_string(), handler);
    }

    pub fn argument_handler(&self, name: &str) -> Option<Arc<dyn ArgumentHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn set_string_encoder(&mut self, encoder: Arc<dyn StringEncoder>) {
        self.string_encoder = Some(encoder);
    }

    pub fn string_encoder(&self) -> Option<Arc<dyn StringEncoder>> {
        self.string_encoder.clone()
    }

    /// Whether `value` is emitted as a literal rather than through the
    /// string encoder.
    pub fn string_is_constant(&self, value: &str) -> bool {
        match &self.string_encoder {
            Some(encoder) => !encoder.is_dynamic(value),
            None => true,
        }
    }

    pub fn find_comparator(&self, name: &str) -> Option<(Arc<Extension>, u8, Arc<dyn Comparator>)> {
        self.enabled.iter().find_map(|ext| {
            ext.find_comparator(name).map(|(code, cmp)| (ext.clone(), code, cmp.clone()))
        })
    }

    pub fn find_match_type(&self, name: &str) -> Option<(Arc<Extension>, u8, Arc<dyn MatchType>)> {
        self.enabled.iter().find_map(|ext| {
            ext.find_match_type(name).map(|(code, mt)| (ext.clone(), code, mt.clone()))
        })
    }

    /// Activate `cmd.arguments[index]` with the plain value handler.
    pub fn activate(&mut self, cmd: &mut CommandNode, index: usize, opt_code: Option<u8>) -> bool {
        self.activate_with(cmd, index, Arc::new(ValueArgument), opt_code)
    }

    pub fn activate_with(
        &mut self,
        cmd: &mut CommandNode,
        index: usize,
        handler: Arc<dyn ArgumentHandler>,
        opt_code: Option<u8>,
    ) -> bool {
        if index >= cmd.arguments.len() {
            self.error(cmd.span, format!("'{}' is missing an argument", cmd.identifier));
            return false;
        }
        if !handler.validate(self, cmd, index) {
            return false;
        }
        let arg = &mut cmd.arguments[index];
        if !arg.activate(ActiveHandler::Value(handler), opt_code) {
            let span = arg.span;
            self.error(span, format!("argument of '{}' is used twice", cmd.identifier));
            return false;
        }
        true
    }

    /// Check arity and kinds of the non-tag arguments against `Fixed`
    /// specs.
    pub fn validate_positional(&mut self, cmd: &CommandNode, def: &dyn CommandDef) -> bool {
        let Positional::Fixed(specs) = def.positional() else {
            return true;
        };
        let positions = cmd.positional_indices();
        if positions.len() != specs.len() {
            let names: Vec<_> = specs.iter().map(|s| format!("<{}>", s.name)).collect();
            self.error(
                cmd.span,
                format!(
                    "'{}' expects {} positional argument(s) {}, found {}",
                    cmd.identifier,
                    specs.len(),
                    names.join(" "),
                    positions.len()
                ),
            );
            return false;
        }
        let mut ok = true;
        for (index, spec) in positions.into_iter().zip(specs) {
            let arg = &cmd.arguments[index];
            if !spec.kind.accepts(&arg.value) {
                let span = arg.span;
                let found = arg.value.kind_name();
                self.error(
                    span,
                    format!(
                        "'{}': <{}> must be a {}, found {}",
                        cmd.identifier,
                        spec.name,
                        spec.kind.name(),
                        found
                    ),
                );
                ok = false;
            }
        }
        ok
    }

    fn validate_block(&mut self, commands: &mut [CommandNode], depth: usize, top_level: bool) {
        let mut require_allowed = top_level;
        for i in 0..commands.len() {
            let (before, rest) = commands.split_at_mut(i);
            let cmd = &mut rest[0];
            let identifier = cmd.identifier.to_ascii_lowercase();

            if identifier == "require" {
                if !require_allowed {
                    self.error(cmd.span, "require commands must precede all other commands");
                }
            } else {
                require_allowed = false;
            }

            if identifier == "elsif" || identifier == "else" {
                let previous = before.last_mut().filter(|prev| {
                    let prev = prev.identifier.to_ascii_lowercase();
                    prev == "if" || prev == "elsif"
                });
                match previous {
                    Some(prev) => prev.data_mut_or_default::<IfChain>().has_successor = true,
                    None => self.error(
                        cmd.span,
                        format!("'{identifier}' must follow an 'if' or 'elsif' command"),
                    ),
                }
            }

            self.validate_node(cmd, CommandKind::Command, depth, 0);
        }
    }

    fn resolve(&mut self, node: &CommandNode, kind: CommandKind) -> Option<Binding> {
        let identifier = node.identifier.to_ascii_lowercase();
        let lookup = |ext: &Arc<Extension>, kind: CommandKind| match kind {
            CommandKind::Command => ext.command(&identifier).cloned(),
            CommandKind::Test => ext.test(&identifier).cloned(),
        };
        for ext in &self.enabled {
            if let Some(def) = lookup(ext, kind) {
                return Some(Binding { ext: ext.clone(), def });
            }
        }

        let other = match kind {
            CommandKind::Command => CommandKind::Test,
            CommandKind::Test => CommandKind::Command,
        };
        if self.enabled.iter().any(|ext| lookup(ext, other).is_some()) {
            self.error(
                node.span,
                format!("'{}' is a {other}, but a {kind} was expected here", node.identifier),
            );
        } else if let Some(ext) = self.registry.iter().find(|ext| lookup(ext, kind).is_some()) {
            let name = ext.name().to_string();
            self.error(
                node.span,
                format!(
                    "unknown {kind} '{}' (it requires extension '{name}')",
                    node.identifier
                ),
            );
        } else {
            self.error(node.span, format!("unknown {kind} '{}'", node.identifier));
        }
        None
    }

    fn validate_node(
        &mut self,
        node: &mut CommandNode,
        kind: CommandKind,
        depth: usize,
        test_depth: usize,
    ) {
        if depth + test_depth > MAX_NESTING_DEPTH {
            self.error(
                node.span,
                format!("tests are nested deeper than {MAX_NESTING_DEPTH} levels"),
            );
            return;
        }
        let Some(binding) = self.resolve(node, kind) else {
            return;
        };
        let def = binding.def.clone();
        node.bind(binding);

        let descend = self.check_structure(node, def.as_ref(), depth);

        if def.pre_validate(self, node) && self.validate_tags(node) {
            let positional_ok = self.validate_positional(node, def.as_ref());
            if positional_ok && def.validate(self, node) {
                self.activate_remaining(node);
            }
        }

        for test in &mut node.tests {
            self.validate_node(test, CommandKind::Test, depth, test_depth + 1);
        }
        if let Some(block) = node.block.as_mut().filter(|_| descend) {
            self.validate_block(block, depth + 1, false);
        }
    }

    /// Returns false when the node's block is too deep to be visited.
    fn check_structure(&mut self, node: &CommandNode, def: &dyn CommandDef, depth: usize) -> bool {
        let id = &node.identifier;
        match def.subtests() {
            Subtests::None if !node.tests.is_empty() => {
                self.error(node.span, format!("'{id}' does not take a test"));
            }
            Subtests::One if node.tests.len() != 1 => {
                self.error(node.span, format!("'{id}' requires exactly one test"));
            }
            Subtests::List if node.tests.is_empty() => {
                self.error(node.span, format!("'{id}' requires a test list"));
            }
            _ => {}
        }
        let max_depth = self.config.limits.max_nesting.min(MAX_NESTING_DEPTH);
        match (def.block(), &node.block) {
            (BlockRule::Required, None) => {
                self.error(node.span, format!("'{id}' requires a block"));
            }
            (BlockRule::Forbidden, Some(_)) => {
                self.error(node.span, format!("'{id}' does not take a block"));
            }
            (_, Some(_)) if depth + 1 > max_depth => {
                self.error(node.span, format!("blocks are nested deeper than {max_depth} levels"));
                return false;
            }
            _ => {}
        }
        true
    }

    fn validate_tags(&mut self, cmd: &mut CommandNode) -> bool {
        let command = cmd.identifier.to_ascii_lowercase();
        let mut ok = true;
        let mut seen_positional = false;
        let mut classes: Vec<&'static str> = Vec::new();

        let mut i = 0;
        while i < cmd.arguments.len() {
            let arg = &cmd.arguments[i];
            let Some(name) = arg.tag_name().map(str::to_ascii_lowercase) else {
                seen_positional = true;
                i += 1;
                continue;
            };
            let span = arg.span;
            if !arg.is_inactive() {
                i += 1;
                continue;
            }
            if seen_positional {
                self.error(span, format!("tag :{name} of '{}' follows a positional argument", cmd.identifier));
                ok = false;
                i += 1;
                continue;
            }
            let Some(reg) = self.find_tag(&command, &name) else {
                self.error(span, format!("unknown tag :{name} for '{}'", cmd.identifier));
                ok = false;
                i += 1;
                continue;
            };
            let class = reg.tag.name();
            if !reg.tag.allow_multiple() && classes.contains(&class) {
                self.error(
                    span,
                    format!("'{}' already has a {class} tag; :{name} conflicts with it", cmd.identifier),
                );
                ok = false;
                i += 1;
                continue;
            }
            classes.push(class);

            if !reg.tag.validate(self, cmd, i) {
                ok = false;
            }
            if let Some(arg) = cmd.arguments.get_mut(i) {
                if arg.is_tag() && arg.is_inactive() {
                    arg.activate(ActiveHandler::Tag(reg.tag.clone()), reg.opt_code);
                }
            }
            i += 1;
        }
        ok
    }

    fn activate_remaining(&mut self, cmd: &mut CommandNode) {
        for index in 0..cmd.arguments.len() {
            let arg = &cmd.arguments[index];
            if !arg.is_tag() && arg.is_inactive() {
                self.activate(cmd, index, None);
            }
        }
    }
}
