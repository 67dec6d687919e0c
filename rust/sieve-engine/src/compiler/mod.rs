//! Script compiler: lexer → parser → validator → generator.

pub mod ast;
pub mod commands;
pub mod generator;
pub mod lexer;
pub mod match_args;
pub mod parser;
pub mod tokens;
pub mod validator;

use crate::diagnostics::{Diagnostic, DiagnosticSink, Severity};
use crate::registry::ExtensionRegistry;
use ast::Script;
use generator::{GenerateError, Generator};
use lexer::{LexError, Lexer};
use parser::{ParseError, Parser};
use sieve_core::{Binary, SieveConfig};
use thiserror::Error;
use validator::Validator;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("lex error: {0}")]
    Lex(#[from] LexError),
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("validation failed with {} error(s)", .0.len())]
    Validation(Vec<Diagnostic>),
    #[error(transparent)]
    Internal(#[from] GenerateError),
}

impl CompileError {
    /// Error diagnostics of a failed validation; empty for other failures.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            CompileError::Validation(diagnostics) => diagnostics,
            _ => &[],
        }
    }
}

/// Forwards to the caller's sink and keeps the errors for the result.
struct TeeSink<'a> {
    inner: &'a mut dyn DiagnosticSink,
    errors: Vec<Diagnostic>,
}

impl DiagnosticSink for TeeSink<'_> {
    fn report(&mut self, diagnostic: Diagnostic) {
        if diagnostic.is_error() {
            self.errors.push(diagnostic.clone());
        }
        self.inner.report(diagnostic);
    }
}

pub fn parse(source: &str, name: &str) -> Result<Script, CompileError> {
    let tokens = Lexer::new(source).tokenize()?;
    Ok(Parser::new(tokens).parse_script(name)?)
}

pub fn compile(
    registry: &ExtensionRegistry,
    config: &SieveConfig,
    source: &str,
    name: &str,
    sink: &mut dyn DiagnosticSink,
) -> Result<Binary, CompileError> {
    let mut script = match parse(source, name) {
        Ok(script) => script,
        Err(err) => {
            let (line, col) = match &err {
                CompileError::Lex(e) => e.location(),
                CompileError::Parse(e) => e.location(),
                _ => (0, 0),
            };
            sink.report(Diagnostic {
                severity: Severity::Error,
                message: err.to_string(),
                script: name.to_string(),
                line,
                col,
            });
            return Err(err);
        }
    };
    compile_ast(registry, config, &mut script, sink)
}

/// Validate and generate an already built AST.
pub fn compile_ast(
    registry: &ExtensionRegistry,
    config: &SieveConfig,
    script: &mut Script,
    sink: &mut dyn DiagnosticSink,
) -> Result<Binary, CompileError> {
    let mut tee = TeeSink { inner: sink, errors: Vec::new() };
    let name = script.name.clone();
    let mut validator = Validator::new(registry, config, name, &mut tee);
    let valid = validator.validate(script);
    let encoder = validator.string_encoder();
    drop(validator);
    if !valid {
        return Err(CompileError::Validation(tee.errors));
    }
    Ok(Generator::new(encoder).generate(script)?)
}
