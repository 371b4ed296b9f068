//! Content filters.
//!
//! A filter is a disjunction of equality clauses over record fields:
//!
//! ```text
//! toUser = %0 OR toGroup = %1
//! group = 'teamA'
//! ```
//!
//! `%N` refers to the N-th filter parameter. Parameters can be replaced at
//! runtime without re-parsing the expression. Parameter values may be given
//! quoted (`'alice'`) or bare (`alice`).

use crate::error::BusError;
use huddle_protocol::Record;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operand {
    Param(usize),
    Literal(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Clause {
    field: String,
    operand: Operand,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Eq,
    Param(usize),
    Literal(String),
    Or,
}

fn tokenize(expression: &str) -> Result<Vec<Token>, BusError> {
    let mut tokens = Vec::new();
    let mut chars = expression.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '=' => {
                chars.next();
                tokens.push(Token::Eq);
            }
            '%' => {
                chars.next();
                let mut digits = String::new();
                while let Some(&d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                    digits.push(d);
                    chars.next();
                }
                let index = digits
                    .parse()
                    .map_err(|_| BusError::InvalidFilter("expected digits after '%'".into()))?;
                tokens.push(Token::Param(index));
            }
            '\'' => {
                chars.next();
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => literal.push(ch),
                        None => {
                            return Err(BusError::InvalidFilter("unterminated literal".into()))
                        }
                    }
                }
                tokens.push(Token::Literal(literal));
            }
            c if c.is_alphanumeric() || c == '_' => {
                let mut ident = String::new();
                while let Some(&ch) = chars.peek().filter(|ch| ch.is_alphanumeric() || **ch == '_') {
                    ident.push(ch);
                    chars.next();
                }
                if ident.eq_ignore_ascii_case("or") {
                    tokens.push(Token::Or);
                } else {
                    tokens.push(Token::Ident(ident));
                }
            }
            other => {
                return Err(BusError::InvalidFilter(format!(
                    "unexpected character '{other}'"
                )))
            }
        }
    }

    Ok(tokens)
}

fn parse(expression: &str) -> Result<Vec<Clause>, BusError> {
    let mut tokens = tokenize(expression)?.into_iter();
    let mut clauses = Vec::new();

    loop {
        let field = match tokens.next() {
            Some(Token::Ident(field)) => field,
            _ => return Err(BusError::InvalidFilter("expected field name".into())),
        };
        if tokens.next() != Some(Token::Eq) {
            return Err(BusError::InvalidFilter(format!("expected '=' after {field}")));
        }
        let operand = match tokens.next() {
            Some(Token::Param(index)) => Operand::Param(index),
            Some(Token::Literal(value)) => Operand::Literal(value),
            _ => {
                return Err(BusError::InvalidFilter(format!(
                    "expected parameter or literal for {field}"
                )))
            }
        };
        clauses.push(Clause { field, operand });

        match tokens.next() {
            None => return Ok(clauses),
            Some(Token::Or) => continue,
            Some(_) => return Err(BusError::InvalidFilter("expected OR".into())),
        }
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .unwrap_or(value)
}

/// A parsed content filter with its current parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentFilter {
    expression: String,
    clauses: Vec<Clause>,
    parameters: Vec<String>,
}

impl ContentFilter {
    /// Parse a filter expression and bind its parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the expression is malformed or refers to a
    /// parameter that is not supplied.
    pub fn new(expression: &str, parameters: Vec<String>) -> Result<Self, BusError> {
        let mut filter = Self {
            expression: expression.to_string(),
            clauses: parse(expression)?,
            parameters: Vec::new(),
        };
        filter.set_parameters(parameters)?;
        Ok(filter)
    }

    /// Replace the filter parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the expression refers to a parameter index beyond
    /// the new parameter list.
    pub fn set_parameters(&mut self, parameters: Vec<String>) -> Result<(), BusError> {
        let needed = self
            .clauses
            .iter()
            .filter_map(|c| match c.operand {
                Operand::Param(index) => Some(index + 1),
                Operand::Literal(_) => None,
            })
            .max()
            .unwrap_or(0);

        if parameters.len() < needed {
            return Err(BusError::InvalidFilter(format!(
                "expression needs {needed} parameters, got {}",
                parameters.len()
            )));
        }

        self.parameters = parameters
            .iter()
            .map(|p| unquote(p).to_string())
            .collect();
        Ok(())
    }

    /// The filter expression.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// The current (unquoted) parameters.
    #[must_use]
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    /// Evaluate the filter against a record.
    #[must_use]
    pub fn matches<T: Record>(&self, record: &T) -> bool {
        self.clauses.iter().any(|clause| {
            let expected = match &clause.operand {
                Operand::Param(index) => self.parameters.get(*index).map(String::as_str),
                Operand::Literal(value) => Some(value.as_str()),
            };
            matches!(
                (record.field(&clause.field), expected),
                (Some(actual), Some(expected)) if actual == expected
            )
        })
    }
}
