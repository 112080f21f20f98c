//! Rule-language parser
//!
//! Two passes:
//!
//! 1. [`paren_pairs`] walks the source once with an explicit stack and maps
//!    every `(` offset to its matching `)` offset. Unbalanced input fails
//!    here, before any structure is built. Parentheses inside string
//!    literals are ignored.
//! 2. The structural pass reads one expression at a time. A parenthesised
//!    form is bounded by the precomputed pair map; operator names and
//!    literals are recognised with nom combinators.
//!
//! ```text
//! expr     := literal | "(" operator expr* ")"
//! operator := [a-z-]+
//! literal  := "\"" [^"]* "\"" | [0-9]+ | "true" | "false"
//! ```
//!
//! Exactly one top-level expression is accepted; anything but whitespace
//! after it is [`ParseError::TrailingInput`].

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1},
    combinator::{map, map_res, value},
    error::{FromExternalError, ParseError as NomParseError},
    sequence::delimited,
    IResult,
};
use std::collections::BTreeMap;
use std::num::ParseIntError;

use crate::ast::{Exp, Literal, Node, Op, Span};
use crate::error::ParseError;

/// Opening-paren offset → closing-paren offset.
pub type ParenPairs = BTreeMap<usize, usize>;

// ============================================================================
// Public API
// ============================================================================

/// Parse a complete rule program.
pub fn parse_program(source: &str) -> Result<Node, ParseError> {
    parse_program_with_limit(source, usize::MAX)
}

/// Parse a rule program, rejecting sources longer than `limit` bytes.
pub fn parse_program_with_limit(source: &str, limit: usize) -> Result<Node, ParseError> {
    if source.len() > limit {
        return Err(ParseError::TooLong {
            len: source.len(),
            limit,
        });
    }

    let start = skip_whitespace(source, 0);
    if start == source.len() {
        return Err(ParseError::Empty);
    }

    let parser = Parser {
        source,
        pairs: paren_pairs(source)?,
    };
    let (node, end) = parser.expression(start, source.len())?;

    let rest = skip_whitespace(source, end);
    if rest < source.len() {
        return Err(ParseError::TrailingInput(rest));
    }
    Ok(node)
}

/// Match every `(` with its `)` in one left-to-right scan.
pub fn paren_pairs(source: &str) -> Result<ParenPairs, ParseError> {
    let mut pairs = ParenPairs::new();
    let mut open = Vec::new();
    let mut string_start: Option<usize> = None;

    for (pos, ch) in source.char_indices() {
        match (string_start, ch) {
            (Some(_), '"') => string_start = None,
            (Some(_), _) => {}
            (None, '"') => string_start = Some(pos),
            (None, '(') => open.push(pos),
            (None, ')') => {
                let start = open.pop().ok_or(ParseError::UnbalancedParen(pos))?;
                pairs.insert(start, pos);
            }
            (None, _) => {}
        }
    }

    if let Some(start) = string_start {
        return Err(ParseError::UnterminatedString(start));
    }
    if let Some(&start) = open.first() {
        return Err(ParseError::UnclosedParen(start));
    }
    Ok(pairs)
}

// ============================================================================
// Structural pass
// ============================================================================

struct Parser<'a> {
    source: &'a str,
    pairs: ParenPairs,
}

impl<'a> Parser<'a> {
    /// Parse one expression starting at `at`, not reading past `end`.
    /// Returns the node and the offset just after it.
    fn expression(&self, at: usize, end: usize) -> Result<(Node, usize), ParseError> {
        if self.source[at..end].starts_with('(') {
            let close = *self
                .pairs
                .get(&at)
                .ok_or(ParseError::UnclosedParen(at))?;
            let exp = self.form(at, close)?;
            return Ok((Node::Exp(exp), close + 1));
        }

        let input = &self.source[at..end];
        match literal::<nom::error::Error<&str>>(input) {
            Ok((rest, lit)) => {
                let next = end - rest.len();
                self.expect_boundary(next, end)?;
                Ok((Node::Literal(lit), next))
            }
            Err(_) => Err(self.literal_error(at)),
        }
    }

    /// Parse `(operator arg*)` occupying `open..=close`.
    fn form(&self, open: usize, close: usize) -> Result<Exp, ParseError> {
        let start = skip_whitespace(self.source, open + 1);
        if start >= close {
            return Err(ParseError::MissingOperator(open));
        }

        let name = match operator_name::<nom::error::Error<&str>>(&self.source[start..close]) {
            Ok((_, name)) => name,
            Err(_) => {
                let found = self.char_at(start);
                return Err(ParseError::Unexpected {
                    found,
                    position: start,
                });
            }
        };
        let after_name = start + name.len();
        self.expect_boundary(after_name, close)?;

        let op = Op::from_name(name).ok_or_else(|| ParseError::UnknownOperator {
            name: name.to_string(),
            position: start,
        })?;

        let mut args = Vec::new();
        let mut pos = skip_whitespace(self.source, after_name);
        while pos < close {
            let (arg, next) = self.expression(pos, close)?;
            args.push(arg);
            pos = skip_whitespace(self.source, next);
        }

        Ok(Exp {
            op,
            args,
            span: Span::new(open, close + 1),
        })
    }

    /// A token must not run straight into another word-like token.
    fn expect_boundary(&self, pos: usize, end: usize) -> Result<(), ParseError> {
        if pos >= end {
            return Ok(());
        }
        let c = self.char_at(pos);
        if c.is_alphanumeric() || c == '_' || c == '-' || c == '"' {
            return Err(ParseError::Unexpected {
                found: c,
                position: pos,
            });
        }
        Ok(())
    }

    fn literal_error(&self, at: usize) -> ParseError {
        let found = self.char_at(at);
        if found.is_ascii_digit() {
            ParseError::InvalidLiteral {
                position: at,
                message: "integer out of range".to_string(),
            }
        } else {
            ParseError::Unexpected {
                found,
                position: at,
            }
        }
    }

    fn char_at(&self, pos: usize) -> char {
        self.source[pos..].chars().next().unwrap_or(' ')
    }
}

fn skip_whitespace(source: &str, at: usize) -> usize {
    let rest = &source[at..];
    at + (rest.len() - rest.trim_start().len())
}

// ============================================================================
// Tokens
// ============================================================================

fn operator_name<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, &'a str, E> {
    take_while1(|c: char| c.is_ascii_lowercase() || c == '-')(input)
}

fn literal<'a, E>(input: &'a str) -> IResult<&'a str, Literal, E>
where
    E: NomParseError<&'a str> + FromExternalError<&'a str, ParseIntError>,
{
    alt((
        map(string_literal, |s: &str| Literal::String(s.to_string())),
        map(boolean_literal, Literal::Boolean),
        map(integer_literal, Literal::Integer),
    ))(input)
}

// No escape processing: a string ends at the next double quote.
fn string_literal<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, &'a str, E> {
    delimited(char('"'), take_while(|c: char| c != '"'), char('"'))(input)
}

fn boolean_literal<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, bool, E> {
    alt((value(true, tag("true")), value(false, tag("false"))))(input)
}

fn integer_literal<'a, E>(input: &'a str) -> IResult<&'a str, i64, E>
where
    E: NomParseError<&'a str> + FromExternalError<&'a str, ParseIntError>,
{
    map_res(digit1, str::parse::<i64>)(input)
}

// ============================================================================
// Tests
// ============================================================================
