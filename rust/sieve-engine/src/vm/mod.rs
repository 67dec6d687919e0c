//! Bytecode interpreter.
//!
//! One [`Interpreter`] executes one loaded binary against one message. The
//! dispatch loop reads an `(extension index, opcode)` header, resolves it
//! through the loaded extension table and hands control to the operation,
//! which consumes its own operands. Any malformed input halts the run
//! fail-safe: the partial action list is dropped and only the implicit
//! `keep` is reported.

pub mod actions;
pub mod dump;
pub mod loader;
pub mod message;
pub mod operation;
pub mod trace;
pub mod variables;

use crate::registry::Extension;
use actions::{Action, ActionError, ActionList};
use loader::LoadedBinary;
use message::{AddressPart, MessageContext};
use operation::{OperandDef, SideEffect};
use serde::Serialize;
use sieve_core::binary::{opt, CodeReader, OperandKind, OPTIONAL_MARKER};
use sieve_core::config::Limits;
use sieve_core::{BinaryError, Comparator, MatchContext, MatchType};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use trace::{TraceEvent, TraceSink};
use variables::{VariableRef, VariableStore};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("binary corrupt at {address:#010x}: {reason}")]
    BinaryCorrupt { address: usize, reason: String },
    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),
    #[error("run failed: {0}")]
    Failure(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Loaded,
    Running,
    HaltedOk,
    HaltedFault,
}

/// Outcome of a run, and of handing its actions to an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStatus {
    Ok,
    /// The run faulted; only the implicit keep was reported.
    FailSafe,
    TemporaryFailure,
    PermanentFailure,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: ExecStatus,
    pub actions: Vec<Action>,
    pub instructions: u64,
    pub error: Option<RuntimeError>,
    pub action_error: Option<ActionError>,
}

impl RunReport {
    pub fn is_ok(&self) -> bool {
        self.status == ExecStatus::Ok
    }
}

/// Comparator, match type and address part selected by a test's optional
/// operands.
#[derive(Debug, Clone)]
pub struct MatchOperands {
    pub comparator: Arc<dyn Comparator>,
    pub match_type: Arc<dyn MatchType>,
    pub address_part: AddressPart,
}

pub struct Interpreter<'a> {
    program: &'a LoadedBinary,
    message: &'a dyn MessageContext,
    limits: &'a Limits,
    reader: CodeReader<'a>,
    /// Address of the operation being executed.
    op_address: usize,
    state: RunState,
    test_result: bool,
    actions: ActionList,
    variables: VariableStore,
    contexts: HashMap<TypeId, Box<dyn Any + Send>>,
    instructions: u64,
    trace: Option<&'a mut dyn TraceSink>,
}

impl<'a> Interpreter<'a> {
    pub fn new(program: &'a LoadedBinary, message: &'a dyn MessageContext, limits: &'a Limits) -> Self {
        Self {
            program,
            message,
            limits,
            reader: CodeReader::new(program.binary().code()),
            op_address: 0,
            state: RunState::Loaded,
            test_result: false,
            actions: ActionList::new(limits.max_actions, limits.max_redirects),
            variables: VariableStore::new(limits.max_variable_size, limits.max_variables),
            contexts: HashMap::new(),
            instructions: 0,
            trace: None,
        }
    }

    pub fn with_trace(mut self, sink: &'a mut dyn TraceSink) -> Self {
        self.trace = Some(sink);
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn program(&self) -> &'a LoadedBinary {
        self.program
    }

    pub fn message(&self) -> &'a dyn MessageContext {
        self.message
    }

    pub fn limits(&self) -> &'a Limits {
        self.limits
    }

    /// Current read position.
    pub fn pc(&self) -> usize {
        self.reader.position()
    }

    pub fn op_address(&self) -> usize {
        self.op_address
    }

    /// Execute until the end of code, an explicit stop or a fault.
    pub fn run(mut self) -> RunReport {
        self.state = RunState::Running;
        tracing::trace!(code_size = self.program.binary().code_size(), "run started");
        let result = self.dispatch();
        let instructions = self.instructions;
        match result {
            Ok(()) => {
                self.state = RunState::HaltedOk;
                let actions = self.actions.finalize();
                tracing::debug!(instructions, actions = actions.len(), "run finished");
                RunReport {
                    status: ExecStatus::Ok,
                    actions,
                    instructions,
                    error: None,
                    action_error: None,
                }
            }
            Err(err) => {
                self.state = RunState::HaltedFault;
                let address = self.op_address;
                let message = err.to_string();
                self.emit(|| TraceEvent::Fault { address, error: message });
                tracing::warn!(error = %err, address, "run halted fail-safe");
                RunReport {
                    status: ExecStatus::FailSafe,
                    actions: vec![Action::keep()],
                    instructions,
                    error: Some(err),
                    action_error: None,
                }
            }
        }
    }

    fn dispatch(&mut self) -> Result<(), RuntimeError> {
        let program = self.program;
        while self.state == RunState::Running && !self.reader.at_end() {
            if self.instructions >= self.limits.max_instructions {
                return Err(RuntimeError::ResourceLimit(format!(
                    "instruction budget of {} exhausted",
                    self.limits.max_instructions
                )));
            }
            self.instructions += 1;
            self.op_address = self.reader.position();

            let index = self.read_byte()?;
            let code = self.read_byte()?;
            let ext = program
                .extension(index)
                .ok_or_else(|| self.corrupt(format!("unknown extension index {index}")))?;
            let op = ext.operation(code).ok_or_else(|| {
                self.corrupt(format!("unknown opcode {code} for extension '{}'", ext.name()))
            })?;
            let address = self.op_address;
            self.emit(|| TraceEvent::Step {
                address,
                extension: ext.name().to_string(),
                mnemonic: op.mnemonic().to_string(),
            });
            op.execute(self)?;
        }
        if self.state == RunState::Running {
            let address = self.reader.position();
            let instructions = self.instructions;
            self.emit(|| TraceEvent::Halt { address, instructions });
        }
        Ok(())
    }

    fn emit(&mut self, event: impl FnOnce() -> TraceEvent) {
        if let Some(sink) = self.trace.as_deref_mut() {
            sink.event(event());
        }
    }

    /// A corrupt-binary error at the current operation.
    pub fn corrupt(&self, reason: impl Into<String>) -> RuntimeError {
        RuntimeError::BinaryCorrupt { address: self.op_address, reason: reason.into() }
    }

    fn check<T>(&self, result: Result<T, BinaryError>) -> Result<T, RuntimeError> {
        result.map_err(|err| self.corrupt(err.to_string()))
    }

    pub fn read_byte(&mut self) -> Result<u8, RuntimeError> {
        let result = self.reader.read_byte();
        self.check(result)
    }

    pub fn read_varint(&mut self) -> Result<u64, RuntimeError> {
        let result = self.reader.read_varint();
        self.check(result)
    }

    /// A count prefix; bounded by the remaining code so corrupt counts
    /// cannot drive allocation.
    pub fn read_count(&mut self) -> Result<usize, RuntimeError> {
        let result = self.reader.read_varint_usize();
        let count = self.check(result)?;
        if count > self.reader.remaining() {
            return Err(self.corrupt(format!("count {count} exceeds the remaining code")));
        }
        Ok(count)
    }

    fn read_kind(&mut self) -> Result<OperandKind, RuntimeError> {
        let byte = self.read_byte()?;
        OperandKind::from_byte(byte)
            .ok_or_else(|| self.corrupt(format!("invalid operand kind {byte:#04x}")))
    }

    fn expect_kind(&mut self, expected: OperandKind) -> Result<(), RuntimeError> {
        let kind = self.read_kind()?;
        if kind != expected {
            return Err(self.corrupt(format!("expected {expected} operand, found {kind}")));
        }
        Ok(())
    }

    fn extension_at(&self, index: u8) -> Result<&'a Arc<Extension>, RuntimeError> {
        self.program
            .extension(index)
            .ok_or_else(|| self.corrupt(format!("unknown extension index {index}")))
    }

    /// `(extension index, code)` of an `EXTENSION` operand whose kind byte
    /// was already read.
    fn read_extension_operand(
        &mut self,
    ) -> Result<(&'a Arc<Extension>, &'a Arc<dyn OperandDef>), RuntimeError> {
        let index = self.read_byte()?;
        let code = self.read_byte()?;
        let ext = self.extension_at(index)?;
        let def = ext.operand(code).ok_or_else(|| {
            self.corrupt(format!("unknown operand {code} for extension '{}'", ext.name()))
        })?;
        Ok((ext, def))
    }

    pub fn read_number(&mut self) -> Result<u64, RuntimeError> {
        self.expect_kind(OperandKind::Number)?;
        self.read_varint()
    }

    /// A literal string, or an extension operand producing one.
    pub fn read_string(&mut self) -> Result<String, RuntimeError> {
        match self.read_kind()? {
            OperandKind::String => self.read_pool_string().map(str::to_string),
            OperandKind::Extension => {
                let (ext, def) = self.read_extension_operand()?;
                def.read_string(ext, self)
            }
            kind => Err(self.corrupt(format!("expected string operand, found {kind}"))),
        }
    }

    /// A bare string-pool index.
    pub fn read_pool_string(&mut self) -> Result<&'a str, RuntimeError> {
        let index = self.reader.read_varint_usize();
        let index = self.check(index)?;
        let result = self.program.binary().string(index);
        self.check(result)
    }

    /// A string list; a single string operand reads as a one-item list.
    pub fn read_string_list(&mut self) -> Result<Vec<String>, RuntimeError> {
        if self.reader.peek_byte() != Some(OperandKind::StringList as u8) {
            return Ok(vec![self.read_string()?]);
        }
        self.read_kind()?;
        let count = self.read_count()?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(self.read_string()?);
        }
        Ok(items)
    }

    pub fn read_variable(&mut self) -> Result<VariableRef, RuntimeError> {
        self.expect_kind(OperandKind::Extension)?;
        let (ext, def) = self.read_extension_operand()?;
        def.read_variable(ext, self)
    }

    /// A list of variables; a single variable reads as a one-item list.
    pub fn read_variable_list(&mut self) -> Result<Vec<VariableRef>, RuntimeError> {
        if self.reader.peek_byte() != Some(OperandKind::StringList as u8) {
            return Ok(vec![self.read_variable()?]);
        }
        self.read_kind()?;
        let count = self.read_count()?;
        let mut vars = Vec::with_capacity(count);
        for _ in 0..count {
            vars.push(self.read_variable()?);
        }
        Ok(vars)
    }

    pub fn read_side_effect(&mut self) -> Result<Box<dyn SideEffect>, RuntimeError> {
        self.expect_kind(OperandKind::Extension)?;
        let (ext, def) = self.read_extension_operand()?;
        def.read_side_effect(ext, self)
    }

    pub fn read_comparator(&mut self) -> Result<Arc<dyn Comparator>, RuntimeError> {
        self.expect_kind(OperandKind::Comparator)?;
        let index = self.read_byte()?;
        let code = self.read_byte()?;
        let ext = self.extension_at(index)?;
        ext.comparator(code)
            .cloned()
            .ok_or_else(|| self.corrupt(format!("unknown comparator {code} in '{}'", ext.name())))
    }

    pub fn read_match_type(&mut self) -> Result<Arc<dyn MatchType>, RuntimeError> {
        self.expect_kind(OperandKind::MatchType)?;
        let index = self.read_byte()?;
        let code = self.read_byte()?;
        let ext = self.extension_at(index)?;
        ext.match_type(code)
            .cloned()
            .ok_or_else(|| self.corrupt(format!("unknown match type {code} in '{}'", ext.name())))
    }

    pub fn read_address_part(&mut self) -> Result<AddressPart, RuntimeError> {
        self.expect_kind(OperandKind::AddressPart)?;
        let code = self.read_byte()?;
        AddressPart::from_repr(code)
            .ok_or_else(|| self.corrupt(format!("unknown address part {code}")))
    }

    /// A 4-byte absolute address inside the code section.
    pub fn read_jump_target(&mut self) -> Result<usize, RuntimeError> {
        let result = self.reader.read_address();
        let target = self.check(result)?;
        let code_size = self.program.binary().code_size();
        if target > code_size {
            return Err(self.corrupt(BinaryError::JumpOutOfRange { target, code_size }.to_string()));
        }
        Ok(target)
    }

    /// Consume the optional-operand marker if present.
    pub fn begin_optional(&mut self) -> Result<bool, RuntimeError> {
        if self.reader.peek_byte() == Some(OPTIONAL_MARKER) {
            self.read_byte()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Next optional-operand code, or `None` at the end of the block.
    pub fn next_optional(&mut self) -> Result<Option<u8>, RuntimeError> {
        match self.read_byte()? {
            opt::END => Ok(None),
            code => Ok(Some(code)),
        }
    }

    /// Read a test's optional block. `extra` handles codes other than
    /// comparator, match type and address part and returns false for codes
    /// it does not know.
    pub fn read_match_operands(
        &mut self,
        mut extra: impl FnMut(&mut Self, u8) -> Result<bool, RuntimeError>,
    ) -> Result<MatchOperands, RuntimeError> {
        let mut comparator = None;
        let mut match_type = None;
        let mut address_part = AddressPart::All;
        if self.begin_optional()? {
            while let Some(code) = self.next_optional()? {
                match code {
                    opt::COMPARATOR => comparator = Some(self.read_comparator()?),
                    opt::MATCH_TYPE => match_type = Some(self.read_match_type()?),
                    opt::ADDRESS_PART => address_part = self.read_address_part()?,
                    code => {
                        if !extra(self, code)? {
                            return Err(self.corrupt(format!("unknown optional operand {code}")));
                        }
                    }
                }
            }
        }
        let core = self.extension_at(0)?;
        let comparator = match comparator {
            Some(c) => c,
            None => core
                .find_comparator("i;ascii-casemap")
                .map(|(_, c)| c.clone())
                .ok_or_else(|| RuntimeError::Failure("default comparator missing".into()))?,
        };
        let match_type = match match_type {
            Some(m) => m,
            None => core
                .find_match_type("is")
                .map(|(_, m)| m.clone())
                .ok_or_else(|| RuntimeError::Failure("default match type missing".into()))?,
        };
        Ok(MatchOperands { comparator, match_type, address_part })
    }

    /// Evaluate `values` against `keys`; true if any value matches. A key
    /// the match type rejects at run time makes the test false.
    pub fn match_values<'v>(
        &self,
        operands: &MatchOperands,
        keys: Vec<String>,
        values: impl IntoIterator<Item = &'v str>,
    ) -> bool {
        let mut ctx = match MatchContext::begin(
            operands.match_type.as_ref(),
            operands.comparator.clone(),
            keys,
        ) {
            Ok(ctx) => ctx,
            Err(err) => {
                tracing::warn!(error = %err, address = self.op_address, "match failed");
                return false;
            }
        };
        for value in values {
            if ctx.evaluate(value) {
                break;
            }
        }
        ctx.end()
    }

    pub fn test_result(&self) -> bool {
        self.test_result
    }

    pub fn set_test_result(&mut self, result: bool) {
        self.test_result = result;
        let address = self.op_address;
        self.emit(|| TraceEvent::Test { address, result });
    }

    /// Explicit stop.
    pub fn halt(&mut self) {
        let address = self.op_address;
        let instructions = self.instructions;
        self.emit(|| TraceEvent::Halt { address, instructions });
        self.state = RunState::HaltedOk;
    }

    pub fn jump(&mut self, target: usize) -> Result<(), RuntimeError> {
        let from = self.op_address;
        let result = self.reader.set_position(target);
        self.check(result)?;
        self.emit(|| TraceEvent::Jump { from, to: target });
        Ok(())
    }

    pub fn add_action(&mut self, action: Action) -> Result<(), RuntimeError> {
        let address = self.op_address;
        if self.trace.is_some() {
            let traced = action.clone();
            self.emit(|| TraceEvent::Action { address, action: traced });
        }
        self.actions.add(action)
    }

    pub fn actions(&self) -> &ActionList {
        &self.actions
    }

    pub fn variables(&self) -> &VariableStore {
        &self.variables
    }

    pub fn variables_mut(&mut self) -> &mut VariableStore {
        &mut self.variables
    }

    /// Per-run state of an extension, created on first use.
    pub fn context_mut<T: Default + Send + 'static>(&mut self) -> &mut T {
        self.contexts
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(T::default()))
            .downcast_mut::<T>()
            .expect("run context is keyed by its own TypeId")
    }

    pub fn context<T: Send + 'static>(&self) -> Option<&T> {
        self.contexts.get(&TypeId::of::<T>()).and_then(|b| b.downcast_ref::<T>())
    }
}
