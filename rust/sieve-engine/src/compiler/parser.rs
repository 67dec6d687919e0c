//! Recursive-descent parser producing the script AST.
//!
//! ```text
//! commands  = *command
//! command   = identifier arguments ( ";" / "{" commands "}" )
//! arguments = *argument [ test / "(" test *("," test) ")" ]
//! argument  = string-list / number / tag
//! test      = identifier arguments
//! ```

use crate::compiler::ast::{Argument, ArgumentValue, CommandNode, Script};
use crate::compiler::tokens::{Token, TokenKind};
use thiserror::Error;

/// Combined depth of blocks and nested tests the parser accepts. The
/// validator applies the same bound to trees built without the parser.
pub const MAX_NESTING_DEPTH: usize = 256;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unexpected {found} at line {line}, col {col}; expected {expected}")]
    Unexpected { found: String, expected: String, line: usize, col: usize },
    #[error("script is nested deeper than {max} levels at line {line}, col {col}")]
    TooDeep { max: usize, line: usize, col: usize },
}

impl ParseError {
    pub fn location(&self) -> (usize, usize) {
        match self {
            ParseError::Unexpected { line, col, .. } | ParseError::TooDeep { line, col, .. } => {
                (*line, *col)
            }
        }
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if !matches!(tokens.last(), Some(Token { kind: TokenKind::Eof, .. })) {
            let span = tokens.last().map(|t| t.span).unwrap_or_default();
            tokens.push(Token::new(TokenKind::Eof, span));
        }
        Self { tokens, pos: 0, depth: 0 }
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let tok = self.current().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let tok = self.current();
        ParseError::Unexpected {
            found: tok.kind.to_string(),
            expected: expected.to_string(),
            line: tok.span.line,
            col: tok.span.col,
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        if self.depth >= MAX_NESTING_DEPTH {
            let span = self.current().span;
            return Err(ParseError::TooDeep {
                max: MAX_NESTING_DEPTH,
                line: span.line,
                col: span.col,
            });
        }
        self.depth += 1;
        Ok(())
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> Result<Token, ParseError> {
        if self.current().kind == kind {
            Ok(self.advance())
        } else {
            Err(self.unexpected(expected))
        }
    }

    pub fn parse_script(&mut self, name: &str) -> Result<Script, ParseError> {
        let commands = self.commands(false)?;
        Ok(Script::new(name, commands))
    }

    fn commands(&mut self, in_block: bool) -> Result<Vec<CommandNode>, ParseError> {
        let mut commands = Vec::new();
        loop {
            match &self.current().kind {
                TokenKind::Identifier(_) => commands.push(self.command()?),
                TokenKind::RBrace if in_block => return Ok(commands),
                TokenKind::Eof if !in_block => return Ok(commands),
                _ if in_block => return Err(self.unexpected("command or '}'")),
                _ => return Err(self.unexpected("command")),
            }
        }
    }

    fn command(&mut self) -> Result<CommandNode, ParseError> {
        let mut node = self.node()?;
        self.arguments(&mut node)?;
        match self.current().kind {
            TokenKind::Semicolon => {
                self.advance();
            }
            TokenKind::LBrace => {
                self.enter()?;
                self.advance();
                let block = self.commands(true)?;
                self.expect(TokenKind::RBrace, "'}'")?;
                self.depth -= 1;
                node.block = Some(block);
            }
            _ => return Err(self.unexpected("';' or '{'")),
        }
        Ok(node)
    }

    fn node(&mut self) -> Result<CommandNode, ParseError> {
        let tok = self.advance();
        match tok.kind {
            TokenKind::Identifier(name) => Ok(CommandNode::new(name, tok.span)),
            kind => Err(ParseError::Unexpected {
                found: kind.to_string(),
                expected: "identifier".into(),
                line: tok.span.line,
                col: tok.span.col,
            }),
        }
    }

    fn arguments(&mut self, node: &mut CommandNode) -> Result<(), ParseError> {
        loop {
            let span = self.current().span;
            let value = match &self.current().kind {
                TokenKind::String(s) => {
                    let s = s.clone();
                    self.advance();
                    ArgumentValue::String(s)
                }
                TokenKind::Number(n) => {
                    let n = *n;
                    self.advance();
                    ArgumentValue::Number(n)
                }
                TokenKind::Tag(t) => {
                    let t = t.clone();
                    self.advance();
                    ArgumentValue::Tag(t)
                }
                TokenKind::LBracket => ArgumentValue::StringList(self.string_list()?),
                _ => break,
            };
            node.arguments.push(Argument::new(value, span));
        }

        match self.current().kind {
            TokenKind::Identifier(_) => {
                let test = self.test()?;
                node.tests.push(test);
            }
            TokenKind::LParen => node.tests = self.test_list()?,
            _ => {}
        }
        Ok(())
    }

    fn test(&mut self) -> Result<CommandNode, ParseError> {
        self.enter()?;
        let mut node = self.node()?;
        self.arguments(&mut node)?;
        self.depth -= 1;
        Ok(node)
    }

    fn test_list(&mut self) -> Result<Vec<CommandNode>, ParseError> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut tests = Vec::new();
        loop {
            if !matches!(self.current().kind, TokenKind::Identifier(_)) {
                return Err(self.unexpected("test"));
            }
            tests.push(self.test()?);
            match self.current().kind {
                TokenKind::Comma => {
                    self.advance();
                }
                TokenKind::RParen => {
                    self.advance();
                    return Ok(tests);
                }
                _ => return Err(self.unexpected("',' or ')'")),
            }
        }
    }

    fn string_list(&mut self) -> Result<Vec<String>, ParseError> {
        self.expect(TokenKind::LBracket, "'['")?;
        let mut items = Vec::new();
        loop {
            match &self.current().kind {
                TokenKind::String(s) => {
                    items.push(s.clone());
                    self.advance();
                }
                _ => return Err(self.unexpected("string")),
            }
            match self.current().kind {
                TokenKind::Comma => {
                    self.advance();
                }
                TokenKind::RBracket => {
                    self.advance();
                    return Ok(items);
                }
                _ => return Err(self.unexpected("',' or ']'")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lexer::Lexer;
    use pretty_assertions::assert_eq;

    fn parse(src: &str) -> Result<Script, ParseError> {
        let tokens = Lexer::new(src).tokenize().unwrap();
        Parser::new(tokens).parse_script("test")
    }

    #[test]
    fn parses_if_with_test_list_and_block() {
        let script = parse(
            r#"if anyof (header :is "X-Spam" "yes", size :over 1M) { discard; stop; }"#,
        )
        .unwrap();
        assert_eq!(script.commands.len(), 1);
        let node = &script.commands[0];
        assert_eq!(node.identifier, "if");
        let anyof = &node.tests[0];
        assert_eq!(anyof.identifier, "anyof");
        assert_eq!(anyof.tests.len(), 2);
        assert_eq!(anyof.tests[0].arguments[0].value, ArgumentValue::Tag("is".into()));
        assert_eq!(anyof.tests[1].arguments[1].value, ArgumentValue::Number(1 << 20));
        let block = node.block.as_ref().unwrap();
        let names: Vec<_> = block.iter().map(|c| c.identifier.as_str()).collect();
        assert_eq!(names, vec!["discard", "stop"]);
    }

    #[test]
    fn nested_single_test() {
        let script = parse("if not exists \"From\" { keep; }").unwrap();
        let not = &script.commands[0].tests[0];
        assert_eq!(not.identifier, "not");
        assert_eq!(not.tests[0].identifier, "exists");
    }

    #[test]
    fn string_list_argument() {
        let script = parse(r#"require ["fileinto", "variables"];"#).unwrap();
        assert_eq!(
            script.commands[0].arguments[0].value,
            ArgumentValue::StringList(vec!["fileinto".into(), "variables".into()])
        );
    }

    #[test]
    fn missing_semicolon_is_reported_with_location() {
        let err = parse("keep \"a\"\n}").unwrap_err();
        assert_eq!(err.location(), (2, 1));
        assert!(err.to_string().contains("expected ';' or '{'"));
    }

    #[test]
    fn unclosed_block() {
        let err = parse("if true { keep;").unwrap_err();
        assert!(err.to_string().contains("command or '}'"));
    }

    #[test]
    fn deep_blocks_are_rejected() {
        let depth = MAX_NESTING_DEPTH + 1;
        let src = format!("{}keep;{}", "if true { ".repeat(depth), "}".repeat(depth));
        let err = parse(&src).unwrap_err();
        assert!(matches!(err, ParseError::TooDeep { max: MAX_NESTING_DEPTH, .. }), "{err}");

        let src = "if true { ".repeat(3000) + "keep;" + &"}".repeat(3000);
        assert!(parse(&src).is_err());
    }

    #[test]
    fn deep_tests_are_rejected() {
        let src = format!("if {}true {{ keep; }}", "not ".repeat(20_000));
        let err = parse(&src).unwrap_err();
        assert!(err.to_string().contains("nested deeper than 256"), "{err}");

        let src = format!("if {}true{} {{ keep; }}", "anyof (".repeat(300), ")".repeat(300));
        assert!(matches!(parse(&src), Err(ParseError::TooDeep { .. })));
    }

    #[test]
    fn nesting_below_the_bound_parses() {
        let depth = MAX_NESTING_DEPTH / 2;
        let src = format!("if {}true {{ keep; }}", "not ".repeat(depth));
        assert!(parse(&src).is_ok());
    }

    #[test]
    fn empty_test_list_is_rejected() {
        assert!(parse("if allof () { keep; }").is_err());
    }
}
