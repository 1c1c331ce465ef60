//! Condition expressions for conditional steps.
//!
//! Conditions are parsed into a small AST and evaluated against the
//! [`EventState`] table only. Grammar (keywords are case-insensitive):
//!
//! ```text
//! expr    := and (("OR" | "||") and)*
//! and     := unary (("AND" | "&&") unary)*
//! unary   := ("NOT" | "!") unary | primary
//! primary := "(" expr ")"
//!          | "event" "(" STRING "," STRING ")"
//!          | "emailEventStates" "[" STRING "]" "." IDENT
//!          | "true" | "false"
//! ```
//!
//! The `emailEventStates[...]` form accepts conditions written for the
//! legacy JavaScript backend.
//!
//! Evaluation is three-valued. A flag that has not been observed yet is
//! undecided rather than false, so the owning instance can park until the
//! event arrives. This holds for recipients with no record at all: an event
//! may be reported for them later.

use std::fmt;

use super::events::{EventKind, EventState};
use crate::{Error, Result};

const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Literal(bool),
    Event { recipient: String, kind: EventKind },
    Not(Box<Condition>),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

/// Outcome of evaluating a condition against a snapshot of events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Decided(bool),
    /// Cannot be decided until this event is observed.
    Pending { recipient: String, kind: EventKind },
}

/// Parse and evaluate in one go.
pub fn evaluate(expr: &str, events: &EventState) -> Result<Decision> {
    Condition::parse(expr)?.evaluate(events)
}

impl Condition {
    pub fn parse(expr: &str) -> Result<Self> {
        let tokens = tokenize(expr)?;
        let mut parser = Parser { tokens, pos: 0 };
        let condition = parser.parse_or(0)?;
        if let Some(token) = parser.peek() {
            return Err(Error::ConditionEval(format!(
                "unexpected {} in '{}'",
                token, expr
            )));
        }
        Ok(condition)
    }

    pub fn evaluate(&self, events: &EventState) -> Result<Decision> {
        Ok(match self.eval(events)? {
            Tri::True => Decision::Decided(true),
            Tri::False => Decision::Decided(false),
            Tri::Unknown(recipient, kind) => Decision::Pending { recipient, kind },
        })
    }

    /// Every recipient this condition reads, normalized.
    pub fn recipients(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_recipients(&mut out);
        out
    }

    fn collect_recipients(&self, out: &mut Vec<String>) {
        match self {
            Condition::Literal(_) => {}
            Condition::Event { recipient, .. } => {
                if !out.contains(recipient) {
                    out.push(recipient.clone());
                }
            }
            Condition::Not(inner) => inner.collect_recipients(out),
            Condition::And(a, b) | Condition::Or(a, b) => {
                a.collect_recipients(out);
                b.collect_recipients(out);
            }
        }
    }

    fn eval(&self, events: &EventState) -> Result<Tri> {
        match self {
            Condition::Literal(b) => Ok(Tri::from(*b)),
            Condition::Event { recipient, kind } => match events.get(recipient, *kind) {
                Some(true) => Ok(Tri::True),
                Some(false) | None => Ok(Tri::Unknown(recipient.clone(), *kind)),
            },
            Condition::Not(inner) => Ok(match inner.eval(events)? {
                Tri::True => Tri::False,
                Tri::False => Tri::True,
                unknown => unknown,
            }),
            Condition::And(a, b) => {
                let (a, b) = (a.eval(events)?, b.eval(events)?);
                Ok(match (a, b) {
                    (Tri::False, _) | (_, Tri::False) => Tri::False,
                    (Tri::True, Tri::True) => Tri::True,
                    (unknown @ Tri::Unknown(..), _) | (_, unknown) => unknown,
                })
            }
            Condition::Or(a, b) => {
                let (a, b) = (a.eval(events)?, b.eval(events)?);
                Ok(match (a, b) {
                    (Tri::True, _) | (_, Tri::True) => Tri::True,
                    (Tri::False, Tri::False) => Tri::False,
                    (unknown @ Tri::Unknown(..), _) | (_, unknown) => unknown,
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tri {
    True,
    False,
    Unknown(String, EventKind),
}

impl From<bool> for Tri {
    fn from(b: bool) -> Self {
        if b {
            Tri::True
        } else {
            Tri::False
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    And,
    Or,
    Not,
    Str(String),
    Ident(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
            Token::LBracket => write!(f, "'['"),
            Token::RBracket => write!(f, "']'"),
            Token::Comma => write!(f, "','"),
            Token::Dot => write!(f, "'.'"),
            Token::And => write!(f, "AND"),
            Token::Or => write!(f, "OR"),
            Token::Not => write!(f, "NOT"),
            Token::Str(s) => write!(f, "string \"{}\"", s),
            Token::Ident(s) => write!(f, "'{}'", s),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '[' => {
                chars.next();
                tokens.push(Token::LBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::RBracket);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '!' => {
                chars.next();
                tokens.push(Token::Not);
            }
            '&' | '|' => {
                chars.next();
                if chars.next() != Some(c) {
                    return Err(Error::ConditionEval(format!("expected '{}{}'", c, c)));
                }
                tokens.push(if c == '&' { Token::And } else { Token::Or });
            }
            '"' | '\'' => {
                let quote = c;
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == quote => break,
                        Some('\\') => match chars.next() {
                            Some(escaped) => value.push(escaped),
                            None => break,
                        },
                        Some(ch) => value.push(ch),
                        None => {
                            return Err(Error::ConditionEval(
                                "unterminated string literal".to_string(),
                            ))
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(match ident.to_ascii_uppercase().as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    _ => Token::Ident(ident),
                });
            }
            other => {
                return Err(Error::ConditionEval(format!(
                    "unexpected character '{}'",
                    other
                )))
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(Error::ConditionEval(format!(
                "expected {}, found {}",
                expected, token
            ))),
            None => Err(Error::ConditionEval(format!(
                "expected {}, found end of input",
                expected
            ))),
        }
    }

    fn expect_string(&mut self) -> Result<String> {
        match self.next() {
            Some(Token::Str(s)) => Ok(s),
            Some(token) => Err(Error::ConditionEval(format!(
                "expected string, found {}",
                token
            ))),
            None => Err(Error::ConditionEval(
                "expected string, found end of input".to_string(),
            )),
        }
    }

    fn parse_or(&mut self, depth: usize) -> Result<Condition> {
        let mut left = self.parse_and(depth)?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let right = self.parse_and(depth)?;
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self, depth: usize) -> Result<Condition> {
        let mut left = self.parse_unary(depth)?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let right = self.parse_unary(depth)?;
            left = Condition::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self, depth: usize) -> Result<Condition> {
        if depth > MAX_DEPTH {
            return Err(Error::ConditionEval("condition is nested too deeply".to_string()));
        }
        if self.peek() == Some(&Token::Not) {
            self.next();
            let inner = self.parse_unary(depth + 1)?;
            return Ok(Condition::Not(Box::new(inner)));
        }
        self.parse_primary(depth)
    }

    fn parse_primary(&mut self, depth: usize) -> Result<Condition> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.parse_or(depth + 1)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Condition::Literal(true)),
                "false" => Ok(Condition::Literal(false)),
                "event" => {
                    self.expect(Token::LParen)?;
                    let recipient = self.expect_string()?;
                    self.expect(Token::Comma)?;
                    let kind = self.expect_string()?.parse()?;
                    self.expect(Token::RParen)?;
                    event(&recipient, kind)
                }
                "emailEventStates" => {
                    self.expect(Token::LBracket)?;
                    let recipient = self.expect_string()?;
                    self.expect(Token::RBracket)?;
                    self.expect(Token::Dot)?;
                    let kind = match self.next() {
                        Some(Token::Ident(kind)) => kind.parse()?,
                        other => {
                            return Err(Error::ConditionEval(format!(
                                "expected event kind, found {}",
                                other.map(|t| t.to_string()).unwrap_or_else(|| "end of input".into())
                            )))
                        }
                    };
                    event(&recipient, kind)
                }
                other => Err(Error::ConditionEval(format!("unknown identifier '{}'", other))),
            },
            Some(token) => Err(Error::ConditionEval(format!("unexpected {}", token))),
            None => Err(Error::ConditionEval("empty condition".to_string())),
        }
    }
}

fn event(recipient: &str, kind: EventKind) -> Result<Condition> {
    let recipient = EventState::normalize(recipient);
    if recipient.is_empty() || recipient.contains(char::is_whitespace) {
        return Err(Error::ConditionEval(format!(
            "invalid recipient identifier '{}'",
            recipient
        )));
    }
    Ok(Condition::Event { recipient, kind })
}
