//! Tiny expression language evaluated by [`VirtualHost`](super::VirtualHost).
//!
//! ```text
//! program   := statement (';' statement)* ';'?
//! statement := 'throw' expr | IDENT '=' expr | expr
//! expr      := term (('+' | '-') term)*
//! term      := unary (('*' | '/' | '%') unary)*
//! unary     := '-' unary | primary
//! primary   := NUMBER | STRING | IDENT | 'true' | 'false' | 'null'
//!            | 'undefined' | '(' expr ')'
//! ```
//!
//! Identifiers resolve against the global table only; an unknown name is a
//! `ReferenceError`, malformed input a `SyntaxError`.

use std::cell::RefCell;
use std::collections::HashMap;

use super::value::{format_number, HostValue};
use crate::domain::{HostError, HostErrorKind};

pub type Globals = RefCell<HashMap<String, HostValue>>;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Op(char),
}

fn syntax_error(message: impl Into<String>) -> HostError {
    HostError::new(HostErrorKind::SyntaxError, message)
}

fn tokenize(code: &str) -> Result<Vec<Token>, HostError> {
    let mut tokens = Vec::new();
    let mut chars = code.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut end = start;
            while let Some(&(i, d)) = chars.peek() {
                if !(d.is_ascii_digit() || d == '.') {
                    break;
                }
                end = i + d.len_utf8();
                chars.next();
            }
            let literal = &code[start..end];
            let value =
                literal.parse().map_err(|_| syntax_error(format!("Invalid number '{literal}'")))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' || c == '$' {
            let mut end = start;
            while let Some(&(i, d)) = chars.peek() {
                if !(d.is_alphanumeric() || d == '_' || d == '$') {
                    break;
                }
                end = i + d.len_utf8();
                chars.next();
            }
            tokens.push(Token::Ident(code[start..end].to_owned()));
        } else if c == '\'' || c == '"' {
            chars.next();
            let mut text = String::new();
            loop {
                match chars.next() {
                    Some((_, q)) if q == c => break,
                    Some((_, ch)) => text.push(ch),
                    None => return Err(syntax_error("Invalid or unexpected token")),
                }
            }
            tokens.push(Token::Str(text));
        } else if "+-*/%()=;".contains(c) {
            tokens.push(Token::Op(c));
            chars.next();
        } else {
            return Err(syntax_error(format!("Unexpected token '{c}'")));
        }
    }
    Ok(tokens)
}

fn to_number(value: &HostValue) -> f64 {
    match value {
        HostValue::Number(n) => *n,
        HostValue::Bool(b) => f64::from(u8::from(*b)),
        HostValue::Null => 0.0,
        HostValue::String(s) if s.trim().is_empty() => 0.0,
        HostValue::String(s) => s.trim().parse().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    globals: &'a Globals,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, op: char) -> bool {
        if self.peek() == Some(&Token::Op(op)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn program(&mut self) -> Result<HostValue, HostError> {
        let mut last = HostValue::Undefined;
        while self.peek().is_some() {
            if self.eat(';') {
                continue;
            }
            last = self.statement()?;
            if self.peek().is_some() && !self.eat(';') {
                return Err(syntax_error("Unexpected token after expression"));
            }
        }
        Ok(last)
    }

    fn statement(&mut self) -> Result<HostValue, HostError> {
        match (self.tokens.get(self.pos), self.tokens.get(self.pos + 1)) {
            (Some(Token::Ident(word)), _) if word == "throw" => {
                self.pos += 1;
                let value = self.expr()?;
                Err(HostError::new(HostErrorKind::Other, value.to_display_string()))
            }
            (Some(Token::Ident(name)), Some(Token::Op('='))) => {
                let name = name.clone();
                self.pos += 2;
                let value = self.expr()?;
                self.globals.borrow_mut().insert(name, value.clone());
                Ok(value)
            }
            _ => self.expr(),
        }
    }

    fn expr(&mut self) -> Result<HostValue, HostError> {
        let mut left = self.term()?;
        loop {
            if self.eat('+') {
                let right = self.term()?;
                left = match (&left, &right) {
                    (HostValue::String(_), _) | (_, HostValue::String(_)) => HostValue::String(
                        format!("{}{}", left.to_display_string(), right.to_display_string()),
                    ),
                    _ => HostValue::Number(to_number(&left) + to_number(&right)),
                };
            } else if self.eat('-') {
                let right = self.term()?;
                left = HostValue::Number(to_number(&left) - to_number(&right));
            } else {
                return Ok(left);
            }
        }
    }

    fn term(&mut self) -> Result<HostValue, HostError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op(op @ ('*' | '/' | '%'))) => *op,
                _ => return Ok(left),
            };
            self.pos += 1;
            let (a, b) = (to_number(&left), to_number(&self.unary()?));
            left = HostValue::Number(match op {
                '*' => a * b,
                '/' => a / b,
                _ => a % b,
            });
        }
    }

    fn unary(&mut self) -> Result<HostValue, HostError> {
        if self.eat('-') {
            return Ok(HostValue::Number(-to_number(&self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<HostValue, HostError> {
        let token = self.peek().cloned().ok_or_else(|| syntax_error("Unexpected end of input"))?;
        self.pos += 1;
        match token {
            Token::Number(n) => Ok(HostValue::Number(n)),
            Token::Str(s) => Ok(HostValue::String(s)),
            Token::Op('(') => {
                let value = self.expr()?;
                if !self.eat(')') {
                    return Err(syntax_error("missing ) after expression"));
                }
                Ok(value)
            }
            Token::Op(op) => Err(syntax_error(format!("Unexpected token '{op}'"))),
            Token::Ident(word) => match word.as_str() {
                "true" => Ok(HostValue::Bool(true)),
                "false" => Ok(HostValue::Bool(false)),
                "null" => Ok(HostValue::Null),
                "undefined" => Ok(HostValue::Undefined),
                "NaN" => Ok(HostValue::Number(f64::NAN)),
                "Infinity" => Ok(HostValue::Number(f64::INFINITY)),
                name => self.globals.borrow().get(name).cloned().ok_or_else(|| {
                    HostError::new(HostErrorKind::ReferenceError, format!("{name} is not defined"))
                }),
            },
        }
    }
}

/// Evaluate `code` against `globals`.
///
/// # Errors
/// `SyntaxError` for malformed code, `ReferenceError` for unknown names, and
/// `Other` for an explicit `throw`.
pub fn evaluate(code: &str, globals: &Globals) -> Result<HostValue, HostError> {
    let tokens = tokenize(code)?;
    Parser { tokens, pos: 0, globals }.program()
}

/// Render a script result the way a console would.
#[must_use]
pub fn render(value: &HostValue) -> String {
    match value {
        HostValue::Number(n) => format_number(*n),
        HostValue::String(s) => format!("{s:?}"),
        other => other.to_display_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(code: &str) -> Result<HostValue, HostError> {
        evaluate(code, &RefCell::new(HashMap::new()))
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(run("1 + 2 * 3").unwrap().as_number(), Some(7.0));
        assert_eq!(run("(1 + 2) * 3").unwrap().as_number(), Some(9.0));
        assert_eq!(run("-4 % 3").unwrap().as_number(), Some(-1.0));
    }

    #[test]
    fn test_string_concatenation() {
        let value = run("'a' + 1 + 2").unwrap();
        assert_eq!(value.to_display_string(), "a12");
    }

    #[test]
    fn test_assignment_persists_in_globals() {
        let globals = RefCell::new(HashMap::new());
        evaluate("counter = 2; counter = counter + 1", &globals).unwrap();
        let value = evaluate("counter", &globals).unwrap();
        assert_eq!(value.as_number(), Some(3.0));
    }

    #[test]
    fn test_unknown_identifier_is_reference_error() {
        let err = run("localOnly + 1").unwrap_err();
        assert_eq!(err.kind, HostErrorKind::ReferenceError);
        assert_eq!(err.message, "localOnly is not defined");
    }

    #[test]
    fn test_malformed_code_is_syntax_error() {
        assert_eq!(run("1 +").unwrap_err().kind, HostErrorKind::SyntaxError);
        assert_eq!(run("(1").unwrap_err().kind, HostErrorKind::SyntaxError);
        assert_eq!(run("1 2").unwrap_err().kind, HostErrorKind::SyntaxError);
        assert_eq!(run("'open").unwrap_err().kind, HostErrorKind::SyntaxError);
    }

    #[test]
    fn test_throw() {
        let err = run("throw 'boom'").unwrap_err();
        assert_eq!(err.kind, HostErrorKind::Other);
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn test_empty_program_is_undefined() {
        assert!(run("").unwrap().is_undefined());
        assert!(run(" ; ").unwrap().is_undefined());
    }
}
