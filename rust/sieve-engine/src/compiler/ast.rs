//! Script AST. Produced by the parser (or built directly by an embedding
//! application), annotated in place by the validator and consumed by the
//! generator.

use crate::compiler::commands::{ArgumentHandler, CommandDef, TagDef};
use crate::compiler::tokens::Span;
use crate::registry::Extension;
use std::any::{Any, TypeId};
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct Script {
    pub name: String,
    pub commands: Vec<CommandNode>,
}

impl Script {
    pub fn new(name: impl Into<String>, commands: Vec<CommandNode>) -> Self {
        Self { name: name.into(), commands }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentValue {
    String(String),
    StringList(Vec<String>),
    Number(u64),
    /// Tag identifier without the leading colon.
    Tag(String),
}

impl ArgumentValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ArgumentValue::String(_) => "string",
            ArgumentValue::StringList(_) => "string list",
            ArgumentValue::Number(_) => "number",
            ArgumentValue::Tag(_) => "tag",
        }
    }

    /// The items of a string or string-list value.
    pub fn strings(&self) -> Option<Vec<&str>> {
        match self {
            ArgumentValue::String(s) => Some(vec![s.as_str()]),
            ArgumentValue::StringList(items) => Some(items.iter().map(String::as_str).collect()),
            _ => None,
        }
    }
}

/// Which handler generates an activated argument.
#[derive(Clone)]
pub enum ActiveHandler {
    Value(Arc<dyn ArgumentHandler>),
    Tag(Arc<dyn TagDef>),
}

impl fmt::Debug for ActiveHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActiveHandler::Value(h) => write!(f, "Value({})", h.name()),
            ActiveHandler::Tag(t) => write!(f, "Tag({})", t.name()),
        }
    }
}

#[derive(Debug)]
pub struct Activation {
    pub handler: ActiveHandler,
    /// Set for arguments emitted in the optional-operand block.
    pub opt_code: Option<u8>,
    generated: Cell<bool>,
}

#[derive(Debug, Default)]
pub enum ArgumentState {
    #[default]
    Inactive,
    Active(Activation),
    /// Removed from the generation stream by the tag that consumed it.
    Detached,
}

#[derive(Debug)]
pub struct Argument {
    pub value: ArgumentValue,
    pub span: Span,
    /// Arguments consumed by a tag, in source order.
    pub parameters: Vec<Argument>,
    state: ArgumentState,
}

impl Argument {
    pub fn new(value: ArgumentValue, span: Span) -> Self {
        Self { value, span, parameters: Vec::new(), state: ArgumentState::Inactive }
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self::new(ArgumentValue::String(s.into()), Span::dummy())
    }

    pub fn string_list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            ArgumentValue::StringList(items.into_iter().map(Into::into).collect()),
            Span::dummy(),
        )
    }

    pub fn number(n: u64) -> Self {
        Self::new(ArgumentValue::Number(n), Span::dummy())
    }

    pub fn tag(name: impl Into<String>) -> Self {
        Self::new(ArgumentValue::Tag(name.into()), Span::dummy())
    }

    pub fn tag_name(&self) -> Option<&str> {
        match &self.value {
            ArgumentValue::Tag(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_tag(&self) -> bool {
        matches!(self.value, ArgumentValue::Tag(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            ArgumentValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn state(&self) -> &ArgumentState {
        &self.state
    }

    pub fn is_inactive(&self) -> bool {
        matches!(self.state, ArgumentState::Inactive)
    }

    pub fn is_detached(&self) -> bool {
        matches!(self.state, ArgumentState::Detached)
    }

    pub fn activation(&self) -> Option<&Activation> {
        match &self.state {
            ArgumentState::Active(a) => Some(a),
            _ => None,
        }
    }

    /// Bind to a handler. Fails if the argument was already activated or
    /// detached.
    pub(crate) fn activate(&mut self, handler: ActiveHandler, opt_code: Option<u8>) -> bool {
        if !self.is_inactive() {
            return false;
        }
        self.state =
            ArgumentState::Active(Activation { handler, opt_code, generated: Cell::new(false) });
        true
    }

    /// Remove from the generation stream.
    pub fn detach(&mut self) {
        self.state = ArgumentState::Detached;
    }

    /// Record that the argument was emitted; false if it already was.
    pub(crate) fn mark_generated(&self) -> bool {
        match &self.state {
            ArgumentState::Active(a) => !a.generated.replace(true),
            _ => false,
        }
    }
}

/// Resolved definition of a validated node.
#[derive(Clone)]
pub struct Binding {
    pub ext: Arc<Extension>,
    pub def: Arc<dyn CommandDef>,
}

/// A command or test with its arguments, sub-tests and block.
pub struct CommandNode {
    pub identifier: String,
    pub span: Span,
    pub arguments: Vec<Argument>,
    pub tests: Vec<CommandNode>,
    pub block: Option<Vec<CommandNode>>,
    binding: Option<Binding>,
    data: HashMap<TypeId, Box<dyn Any>>,
}

impl fmt::Debug for CommandNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandNode")
            .field("identifier", &self.identifier)
            .field("span", &self.span)
            .field("arguments", &self.arguments)
            .field("tests", &self.tests)
            .field("block", &self.block)
            .field("ext", &self.binding.as_ref().map(|b| b.ext.name().to_string()))
            .finish()
    }
}

impl CommandNode {
    pub fn new(identifier: impl Into<String>, span: Span) -> Self {
        Self {
            identifier: identifier.into(),
            span,
            arguments: Vec::new(),
            tests: Vec::new(),
            block: None,
            binding: None,
            data: HashMap::new(),
        }
    }

    pub fn with_argument(mut self, argument: Argument) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn with_test(mut self, test: CommandNode) -> Self {
        self.tests.push(test);
        self
    }

    pub fn with_block(mut self, block: Vec<CommandNode>) -> Self {
        self.block = Some(block);
        self
    }

    pub fn binding(&self) -> Option<&Binding> {
        self.binding.as_ref()
    }

    pub fn ext(&self) -> Option<&Arc<Extension>> {
        self.binding.as_ref().map(|b| &b.ext)
    }

    pub(crate) fn bind(&mut self, binding: Binding) {
        self.binding = Some(binding);
    }

    pub fn data<T: 'static>(&self) -> Option<&T> {
        self.data.get(&TypeId::of::<T>()).and_then(|b| b.downcast_ref::<T>())
    }

    /// Typed per-node compiler data, created on first access.
    pub fn data_mut_or_default<T: Default + 'static>(&mut self) -> &mut T {
        self.data
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(T::default()))
            .downcast_mut::<T>()
            .expect("node data is keyed by its own TypeId")
    }

    pub fn set_data<T: 'static>(&mut self, value: T) {
        self.data.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Indices of non-tag arguments, in order.
    pub fn positional_indices(&self) -> Vec<usize> {
        self.arguments
            .iter()
            .enumerate()
            .filter(|(_, a)| !a.is_tag())
            .map(|(i, _)| i)
            .collect()
    }

    /// Move the argument following the tag at `tag_index` into the tag's
    /// parameters. Returns the consumed parameter.
    pub fn consume_parameter(&mut self, tag_index: usize) -> Option<&Argument> {
        if tag_index + 1 >= self.arguments.len() || self.arguments[tag_index + 1].is_tag() {
            return None;
        }
        let param = self.arguments.remove(tag_index + 1);
        let tag = &mut self.arguments[tag_index];
        tag.parameters.push(param);
        tag.parameters.last()
    }
}
