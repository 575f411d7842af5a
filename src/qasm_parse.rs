//! Hand-rolled recursive-descent parser for the OpenQASM 3 snippets the
//! pipeline ingests.
//!
//! The tokenizer and parser shape (`peek`/`advance`/`expect`/`check`/`consume`
//! over a flat token vector) follows the small, self-contained parsers this
//! crate's neighbours use for domain-specific languages rather than pulling in
//! a parser-combinator dependency for a grammar this constrained.

use std::fmt;

use crate::ast::{Annotation, BinOp, ClassicalType, Expr, IndexSet, Program, Statement};

/// Failure while tokenizing or parsing a snippet.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("line {line}: unexpected character {found:?}")]
    UnexpectedChar { line: usize, found: char },
    #[error("unexpected end of input, expected {expected}")]
    UnexpectedEof { expected: String },
    #[error("line {line}: expected {expected}, found {found}")]
    UnexpectedToken {
        line: usize,
        expected: String,
        found: String,
    },
    #[error("line {line}: invalid OPENQASM version {found:?}")]
    InvalidVersion { line: usize, found: String },
    /// A `@leqo.*` annotation shares its source line with a trailing `//`
    /// comment — a distinct, externally-observable grammar violation (the
    /// annotation grammar requires the annotation to consume the entire
    /// line), not an ordinary parse failure. Kept distinct from
    /// `UnexpectedToken` so callers can map it to its own error kind instead
    /// of a generic snippet-parse failure.
    #[error("line {line}: trailing comment on the same line as a @leqo annotation")]
    TrailingAnnotationComment { line: usize },
}

pub type ParseResult<T> = Result<T, ParseError>;

#[derive(Clone, Debug, PartialEq)]
enum Token {
    OpenQasm,
    Include,
    Qubit,
    Bit,
    Int,
    Uint,
    Float,
    Bool,
    Let,
    If,
    Else,
    Measure,
    Gate,
    Arrow,
    Ident(String),
    IntLit(i64),
    FloatLit(f64),
    StringLit(String),
    Annotation(String),
    LineComment(String),
    Plus,
    Minus,
    Star,
    Slash,
    PlusPlus,
    Comma,
    Semicolon,
    Colon,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Eq,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Clone, Debug)]
struct SpannedToken {
    token: Token,
    line: usize,
}

fn tokenize(source: &str) -> ParseResult<Vec<SpannedToken>> {
    let mut out = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0usize;
    let mut line = 1usize;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\r' => i += 1,
            '\n' => {
                line += 1;
                i += 1;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                let start = i + 2;
                let mut j = start;
                while j < chars.len() && chars[j] != '\n' {
                    j += 1;
                }
                let text: String = chars[start..j].iter().collect();
                out.push(SpannedToken {
                    token: Token::LineComment(text.trim().to_string()),
                    line,
                });
                i = j;
            }
            '@' => {
                let start = i + 1;
                let mut j = start;
                while j < chars.len() && !chars[j].is_whitespace() {
                    j += 1;
                }
                let mut text: String = chars[start..j].iter().collect();
                // Capture a single trailing integer argument (e.g. `@leqo.input 0`)
                // onto the same annotation token so the parser can split it below;
                // the rest of the line (if non-whitespace remains before the
                // newline) is treated as a grammar violation by the caller.
                let mut k = j;
                while k < chars.len() && (chars[k] == ' ' || chars[k] == '\t') {
                    k += 1;
                }
                let arg_start = k;
                while k < chars.len() && (chars[k].is_ascii_digit()) {
                    k += 1;
                }
                if k > arg_start {
                    text.push(' ');
                    text.push_str(&chars[arg_start..k].iter().collect::<String>());
                    j = k;
                }
                out.push(SpannedToken {
                    token: Token::Annotation(text),
                    line,
                });
                i = j;
            }
            '"' => {
                let start = i + 1;
                let mut j = start;
                while j < chars.len() && chars[j] != '"' {
                    j += 1;
                }
                let text: String = chars[start..j].iter().collect();
                out.push(SpannedToken {
                    token: Token::StringLit(text),
                    line,
                });
                i = j + 1;
            }
            '+' if chars.get(i + 1) == Some(&'+') => {
                out.push(SpannedToken {
                    token: Token::PlusPlus,
                    line,
                });
                i += 2;
            }
            '+' => {
                out.push(SpannedToken {
                    token: Token::Plus,
                    line,
                });
                i += 1;
            }
            '-' if chars.get(i + 1) == Some(&'>') => {
                out.push(SpannedToken {
                    token: Token::Arrow,
                    line,
                });
                i += 2;
            }
            '-' => {
                out.push(SpannedToken {
                    token: Token::Minus,
                    line,
                });
                i += 1;
            }
            '*' => {
                out.push(SpannedToken {
                    token: Token::Star,
                    line,
                });
                i += 1;
            }
            '/' => {
                out.push(SpannedToken {
                    token: Token::Slash,
                    line,
                });
                i += 1;
            }
            ',' => {
                out.push(SpannedToken {
                    token: Token::Comma,
                    line,
                });
                i += 1;
            }
            ';' => {
                out.push(SpannedToken {
                    token: Token::Semicolon,
                    line,
                });
                i += 1;
            }
            ':' => {
                out.push(SpannedToken {
                    token: Token::Colon,
                    line,
                });
                i += 1;
            }
            '(' => {
                out.push(SpannedToken {
                    token: Token::LParen,
                    line,
                });
                i += 1;
            }
            ')' => {
                out.push(SpannedToken {
                    token: Token::RParen,
                    line,
                });
                i += 1;
            }
            '[' => {
                out.push(SpannedToken {
                    token: Token::LBracket,
                    line,
                });
                i += 1;
            }
            ']' => {
                out.push(SpannedToken {
                    token: Token::RBracket,
                    line,
                });
                i += 1;
            }
            '{' => {
                out.push(SpannedToken {
                    token: Token::LBrace,
                    line,
                });
                i += 1;
            }
            '}' => {
                out.push(SpannedToken {
                    token: Token::RBrace,
                    line,
                });
                i += 1;
            }
            '=' => {
                out.push(SpannedToken {
                    token: Token::Eq,
                    line,
                });
                i += 1;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                let mut j = i;
                let mut is_float = false;
                while j < chars.len() && (chars[j].is_ascii_digit() || chars[j] == '.') {
                    if chars[j] == '.' {
                        is_float = true;
                    }
                    j += 1;
                }
                let text: String = chars[start..j].iter().collect();
                if is_float {
                    let v: f64 = text
                        .parse()
                        .map_err(|_| ParseError::UnexpectedChar { line, found: c })?;
                    out.push(SpannedToken {
                        token: Token::FloatLit(v),
                        line,
                    });
                } else {
                    let v: i64 = text
                        .parse()
                        .map_err(|_| ParseError::UnexpectedChar { line, found: c })?;
                    out.push(SpannedToken {
                        token: Token::IntLit(v),
                        line,
                    });
                }
                i = j;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                let mut j = i;
                while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                    j += 1;
                }
                let text: String = chars[start..j].iter().collect();
                let tok = match text.as_str() {
                    "OPENQASM" => Token::OpenQasm,
                    "include" => Token::Include,
                    "qubit" => Token::Qubit,
                    "bit" => Token::Bit,
                    "int" => Token::Int,
                    "uint" => Token::Uint,
                    "float" => Token::Float,
                    "bool" => Token::Bool,
                    "let" => Token::Let,
                    "if" => Token::If,
                    "else" => Token::Else,
                    "measure" => Token::Measure,
                    "gate" => Token::Gate,
                    _ => Token::Ident(text),
                };
                out.push(SpannedToken { token: tok, line });
                i = j;
            }
            other => return Err(ParseError::UnexpectedChar { line, found: other }),
        }
    }
    Ok(out)
}

struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
}

impl Parser {
    fn new(source: &str) -> ParseResult<Self> {
        Ok(Self {
            tokens: tokenize(source)?,
            pos: 0,
        })
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(0)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos)?.token.clone();
        self.pos += 1;
        Some(t)
    }

    fn check(&self, token: &Token) -> bool {
        self.peek()
            .is_some_and(|t| std::mem::discriminant(t) == std::mem::discriminant(token))
    }

    fn consume(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> ParseResult<Token> {
        let line = self.line();
        let found = self
            .advance()
            .ok_or_else(|| ParseError::UnexpectedEof {
                expected: expected.to_string(),
            })?;
        if std::mem::discriminant(&found) != std::mem::discriminant(&expected) {
            return Err(ParseError::UnexpectedToken {
                line,
                expected: expected.to_string(),
                found: found.to_string(),
            });
        }
        Ok(found)
    }

    fn expect_ident(&mut self) -> ParseResult<String> {
        let line = self.line();
        match self.advance() {
            Some(Token::Ident(s)) => Ok(s),
            Some(other) => Err(ParseError::UnexpectedToken {
                line,
                expected: "identifier".into(),
                found: other.to_string(),
            }),
            None => Err(ParseError::UnexpectedEof {
                expected: "identifier".into(),
            }),
        }
    }

    fn parse_program(&mut self) -> ParseResult<Program> {
        let mut statements = Vec::new();

        if self.check(&Token::OpenQasm) {
            self.advance();
            let line = self.line();
            let version = match self.advance() {
                Some(Token::FloatLit(v)) => format!("{v}"),
                Some(Token::IntLit(v)) => format!("{v}"),
                other => {
                    return Err(ParseError::InvalidVersion {
                        line,
                        found: format!("{other:?}"),
                    })
                }
            };
            self.expect(Token::Semicolon)?;
            statements.push(Statement::Version(version));
        }

        while !self.is_eof() {
            statements.push(self.parse_statement()?);
        }

        Ok(Program { statements })
    }

    /// Collect leading `@leqo.*` annotations and any comments preceding the
    /// next real statement. A trailing line comment sharing a line with an
    /// annotation is a grammar violation the caller must reject; since our
    /// tokenizer keeps line comments as distinct tokens we cannot tell here
    /// whether they shared a source line, so `parse_statement` re-checks via
    /// line numbers before accepting the annotations.
    fn parse_annotations(&mut self) -> ParseResult<Vec<(Annotation, usize)>> {
        let mut anns = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Annotation(text)) => {
                    let line = self.line();
                    let text = text.clone();
                    self.advance();
                    if matches!(self.peek(), Some(Token::LineComment(_))) && self.line() == line {
                        return Err(ParseError::TrailingAnnotationComment { line });
                    }
                    anns.push((parse_annotation_text(&text), line));
                }
                Some(Token::LineComment(_)) => {
                    self.advance();
                }
                _ => break,
            }
        }
        Ok(anns)
    }

    fn parse_statement(&mut self) -> ParseResult<Statement> {
        if let Some(Token::LineComment(text)) = self.peek() {
            let text = text.clone();
            self.advance();
            return Ok(Statement::Comment(text));
        }

        let anns = self.parse_annotations()?;

        let stmt = match self.peek() {
            Some(Token::Include) => {
                self.advance();
                let path = match self.advance() {
                    Some(Token::StringLit(s)) => s,
                    other => {
                        return Err(ParseError::UnexpectedToken {
                            line: self.line(),
                            expected: "string literal".into(),
                            found: format!("{other:?}"),
                        })
                    }
                };
                self.expect(Token::Semicolon)?;
                Statement::Include(path)
            }
            Some(Token::Qubit) => self.parse_qubit_decl()?,
            Some(Token::Bit) | Some(Token::Int) | Some(Token::Uint) | Some(Token::Float)
            | Some(Token::Bool) => self.parse_classical_decl()?,
            Some(Token::Let) => self.parse_alias_decl()?,
            Some(Token::Measure) => self.parse_measure()?,
            Some(Token::If) => self.parse_if()?,
            Some(Token::Gate) => self.parse_gate_def()?,
            Some(Token::Ident(_)) => self.parse_gate_call()?,
            other => {
                return Err(ParseError::UnexpectedToken {
                    line: self.line(),
                    expected: "statement".into(),
                    found: format!("{other:?}"),
                })
            }
        };

        let stmt = attach_annotations(stmt, anns.into_iter().map(|(a, _)| a).collect());
        Ok(stmt)
    }

    fn parse_qubit_decl(&mut self) -> ParseResult<Statement> {
        self.expect(Token::Qubit)?;
        let size = if self.consume(&Token::LBracket) {
            let e = self.parse_expr()?;
            self.expect(Token::RBracket)?;
            Some(e)
        } else {
            None
        };
        let name = self.expect_ident()?;
        self.expect(Token::Semicolon)?;
        Ok(Statement::QubitDecl {
            name,
            size,
            annotations: Vec::new(),
        })
    }

    fn parse_classical_decl(&mut self) -> ParseResult<Statement> {
        let kind = self.advance().unwrap();
        let size = if self.consume(&Token::LBracket) {
            let e = self.parse_expr()?;
            self.expect(Token::RBracket)?;
            match e {
                Expr::Int(n) => Some(n as u32),
                _ => None,
            }
        } else {
            None
        };
        let ty = match kind {
            Token::Bit => ClassicalType::Bit(size),
            Token::Int => ClassicalType::Int(size),
            Token::Uint => ClassicalType::Uint(size),
            Token::Float => ClassicalType::Float(size),
            Token::Bool => ClassicalType::Bool,
            _ => unreachable!(),
        };
        let name = self.expect_ident()?;
        let init = if self.consume(&Token::Eq) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.expect(Token::Semicolon)?;
        Ok(Statement::ClassicalDecl {
            ty,
            name,
            init,
            annotations: Vec::new(),
        })
    }

    fn parse_alias_decl(&mut self) -> ParseResult<Statement> {
        self.expect(Token::Let)?;
        let name = self.expect_ident()?;
        self.expect(Token::Eq)?;
        let value = self.parse_expr()?;
        self.expect(Token::Semicolon)?;
        Ok(Statement::AliasDecl {
            name,
            value,
            annotations: Vec::new(),
        })
    }

    fn parse_measure(&mut self) -> ParseResult<Statement> {
        self.expect(Token::Measure)?;
        let qubit = self.parse_expr()?;
        let target = if self.consume(&Token::Arrow) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.expect(Token::Semicolon)?;
        Ok(Statement::Measure { qubit, target })
    }

    fn parse_if(&mut self) -> ParseResult<Statement> {
        self.expect(Token::If)?;
        self.expect(Token::LParen)?;
        let condition = self.parse_expr()?;
        self.expect(Token::RParen)?;
        let then_body = self.parse_block()?;
        let else_body = if self.consume(&Token::Else) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Statement::If {
            condition,
            then_body,
            else_body,
        })
    }

    fn parse_block(&mut self) -> ParseResult<Vec<Statement>> {
        self.expect(Token::LBrace)?;
        let mut stmts = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.is_eof() {
                return Err(ParseError::UnexpectedEof {
                    expected: "}".into(),
                });
            }
            stmts.push(self.parse_statement()?);
        }
        self.expect(Token::RBrace)?;
        Ok(stmts)
    }

    /// `gate name(param, ...)? qubit, ... { stmt* }` — a local gate macro
    /// declared inline by a node's own snippet. Parameter and qubit lists are
    /// bare identifiers here, unlike a call's argument expressions.
    fn parse_gate_def(&mut self) -> ParseResult<Statement> {
        self.expect(Token::Gate)?;
        let name = self.expect_ident()?;
        let params = if self.consume(&Token::LParen) {
            let mut ps = Vec::new();
            if !self.check(&Token::RParen) {
                loop {
                    ps.push(self.expect_ident()?);
                    if !self.consume(&Token::Comma) {
                        break;
                    }
                }
            }
            self.expect(Token::RParen)?;
            ps
        } else {
            Vec::new()
        };
        let mut qubits = vec![self.expect_ident()?];
        while self.consume(&Token::Comma) {
            qubits.push(self.expect_ident()?);
        }
        let body = self.parse_block()?;
        Ok(Statement::GateDef {
            name,
            params,
            qubits,
            body,
        })
    }

    fn parse_gate_call(&mut self) -> ParseResult<Statement> {
        let name = self.expect_ident()?;
        let params = if self.consume(&Token::LParen) {
            let mut ps = Vec::new();
            if !self.check(&Token::RParen) {
                loop {
                    ps.push(self.parse_expr()?);
                    if !self.consume(&Token::Comma) {
                        break;
                    }
                }
            }
            self.expect(Token::RParen)?;
            ps
        } else {
            Vec::new()
        };
        let mut qubits = vec![self.parse_expr()?];
        while self.consume(&Token::Comma) {
            qubits.push(self.parse_expr()?);
        }
        self.expect(Token::Semicolon)?;
        Ok(Statement::GateCall {
            name,
            params,
            qubits,
        })
    }

    // expr := term (('+'|'-') term)*
    fn parse_expr(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_concat()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_concat()?;
            lhs = Expr::BinOp(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_concat(&mut self) -> ParseResult<Expr> {
        let mut parts = vec![self.parse_term()?];
        let mut is_concat = false;
        while self.consume(&Token::PlusPlus) {
            is_concat = true;
            parts.push(self.parse_term()?);
        }
        if is_concat {
            Ok(Expr::Concat(parts))
        } else {
            Ok(parts.remove(0))
        }
    }

    fn parse_term(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::BinOp(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        if self.consume(&Token::Minus) {
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let mut base = self.parse_primary()?;
        while self.consume(&Token::LBracket) {
            let idx = self.parse_index_set()?;
            self.expect(Token::RBracket)?;
            base = Expr::Index(Box::new(base), idx);
        }
        Ok(base)
    }

    fn parse_index_set(&mut self) -> ParseResult<IndexSet> {
        if self.consume(&Token::LBrace) {
            let mut items = Vec::new();
            if !self.check(&Token::RBrace) {
                loop {
                    items.push(self.parse_int_literal()?);
                    if !self.consume(&Token::Comma) {
                        break;
                    }
                }
            }
            self.expect(Token::RBrace)?;
            return Ok(IndexSet::from_sorted_indices(items));
        }
        let first = self.parse_int_literal()?;
        if self.consume(&Token::Colon) {
            let last = self.parse_int_literal()?;
            Ok(IndexSet::Range(first, last))
        } else {
            Ok(IndexSet::Single(first))
        }
    }

    fn parse_int_literal(&mut self) -> ParseResult<u32> {
        let line = self.line();
        match self.advance() {
            Some(Token::IntLit(v)) if v >= 0 => Ok(v as u32),
            other => Err(ParseError::UnexpectedToken {
                line,
                expected: "non-negative integer".into(),
                found: format!("{other:?}"),
            }),
        }
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let line = self.line();
        match self.advance() {
            Some(Token::IntLit(v)) => Ok(Expr::Int(v)),
            Some(Token::FloatLit(v)) => Ok(Expr::Float(v)),
            Some(Token::Ident(s)) if s == "pi" || s == "tau" || s == "euler" => {
                Ok(Expr::Const(s))
            }
            Some(Token::Ident(s)) => {
                if self.check(&Token::LParen) {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.check(&Token::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if !self.consume(&Token::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(Token::RParen)?;
                    Ok(Expr::Call(s, args))
                } else {
                    Ok(Expr::Ident(s))
                }
            }
            Some(Token::LParen) => {
                let e = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(e)
            }
            other => Err(ParseError::UnexpectedToken {
                line,
                expected: "expression".into(),
                found: format!("{other:?}"),
            }),
        }
    }
}

fn parse_annotation_text(text: &str) -> Annotation {
    let text = text.trim();
    if let Some(rest) = text.strip_prefix("leqo.input") {
        if let Ok(n) = rest.trim().parse::<u32>() {
            return Annotation::Input(n);
        }
    }
    if let Some(rest) = text.strip_prefix("leqo.output") {
        if let Ok(n) = rest.trim().parse::<u32>() {
            return Annotation::Output(n);
        }
    }
    if text == "leqo.reusable" {
        return Annotation::Reusable;
    }
    Annotation::Other(text.to_string())
}

fn attach_annotations(stmt: Statement, anns: Vec<Annotation>) -> Statement {
    match stmt {
        Statement::QubitDecl { name, size, .. } => Statement::QubitDecl {
            name,
            size,
            annotations: anns,
        },
        Statement::ClassicalDecl { ty, name, init, .. } => Statement::ClassicalDecl {
            ty,
            name,
            init,
            annotations: anns,
        },
        Statement::AliasDecl { name, value, .. } => Statement::AliasDecl {
            name,
            value,
            annotations: anns,
        },
        other => other,
    }
}

/// Parse a snippet body (no leading `OPENQASM` version line required).
pub fn parse_snippet(source: &str) -> ParseResult<Program> {
    let mut parser = Parser::new(source)?;
    parser.parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Annotation;

    #[test]
    fn parses_bare_h_gate() {
        let prog = parse_snippet("qubit[1] q;\nh q;\n").unwrap();
        assert_eq!(prog.statements.len(), 2);
        assert!(matches!(prog.statements[0], Statement::QubitDecl { .. }));
        assert!(matches!(prog.statements[1], Statement::GateCall { .. }));
    }

    #[test]
    fn parses_local_gate_definition_with_params() {
        let src = "gate rzz(theta) a, b {\n  cx a, b;\n  rz(theta) b;\n  cx a, b;\n}\n";
        let prog = parse_snippet(src).unwrap();
        match &prog.statements[0] {
            Statement::GateDef {
                name,
                params,
                qubits,
                body,
            } => {
                assert_eq!(name, "rzz");
                assert_eq!(params, &vec!["theta".to_string()]);
                assert_eq!(qubits, &vec!["a".to_string(), "b".to_string()]);
                assert_eq!(body.len(), 3);
            }
            other => panic!("expected gate def, got {other:?}"),
        }
    }

    #[test]
    fn parses_input_annotation() {
        let prog = parse_snippet("@leqo.input 0\nqubit[2] q;\n").unwrap();
        match &prog.statements[0] {
            Statement::QubitDecl { annotations, .. } => {
                assert_eq!(annotations, &vec![Annotation::Input(0)]);
            }
            other => panic!("expected qubit decl, got {other:?}"),
        }
    }

    #[test]
    fn parses_output_alias_with_concat() {
        let prog = parse_snippet("@leqo.output 0\nlet out = q1 ++ q2;\n").unwrap();
        match &prog.statements[0] {
            Statement::AliasDecl {
                value, annotations, ..
            } => {
                assert_eq!(annotations, &vec![Annotation::Output(0)]);
                assert!(matches!(value, Expr::Concat(_)));
            }
            other => panic!("expected alias decl, got {other:?}"),
        }
    }

    #[test]
    fn parses_reusable_alias() {
        let prog = parse_snippet("@leqo.reusable\nlet scratch = anc[0:1];\n").unwrap();
        match &prog.statements[0] {
            Statement::AliasDecl { annotations, .. } => {
                assert_eq!(annotations, &vec![Annotation::Reusable]);
            }
            other => panic!("expected alias decl, got {other:?}"),
        }
    }

    #[test]
    fn parses_if_else_with_measure() {
        let src = "bit c;\nmeasure q -> c;\nif (c) {\n  x q;\n} else {\n  z q;\n}\n";
        let prog = parse_snippet(src).unwrap();
        assert!(matches!(prog.statements[2], Statement::If { .. }));
    }

    #[test]
    fn rejects_trailing_comment_on_annotated_line() {
        let err = parse_snippet("@leqo.input 0 // not allowed here\nqubit[1] q;\n").unwrap_err();
        assert!(matches!(err, ParseError::TrailingAnnotationComment { .. }));
    }

    #[test]
    fn trailing_comment_surfaces_as_annotation_error_not_parse_error() {
        use crate::error::{AnnotationErrorKind, CompileError};
        use crate::graph::NodeId;
        use crate::prepare::{prepare_node, InputEdgeInfo, PrepareError};

        let snippet = "@leqo.input 0 // not allowed here\nqubit[1] q;\n";
        let node = NodeId("n1".into());
        let edges = vec![InputEdgeInfo { size: 1, exact: false }];
        let err = prepare_node(&node, snippet, &edges).unwrap_err();
        assert_eq!(
            err,
            PrepareError::Annotation {
                node: node.clone(),
                kind: AnnotationErrorKind::MultipleOnStatement,
            }
        );
        assert_eq!(
            CompileError::from(err),
            CompileError::AnnotationError {
                node,
                kind: AnnotationErrorKind::MultipleOnStatement,
            }
        );
    }

    #[test]
    fn accepts_comment_on_its_own_line_before_annotation() {
        let prog = parse_snippet("// ok, different line\n@leqo.input 0\nqubit[1] q;\n");
        assert!(prog.is_ok());
    }

    #[test]
    fn parses_rz_with_pi_param() {
        let prog = parse_snippet("qubit[1] q;\nrz(pi/2) q;\n").unwrap();
        match &prog.statements[1] {
            Statement::GateCall { params, .. } => {
                assert!(matches!(&params[0], Expr::BinOp(_, BinOp::Div, _)));
            }
            other => panic!("expected gate call, got {other:?}"),
        }
    }
}
