//! Rule-language AST
//!
//! An expression is either a literal or an operator applied to argument
//! expressions. The operator set is closed: every operator the language
//! knows is a variant of [`Op`], and the checker, compiler and VM match on
//! it exhaustively.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Byte range in the source text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// Rule-language operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Op {
    And,
    Or,
    Not,
    Add,
    Sub,
    Mul,
    Div,
    Floor,
    Eq,
    Neq,
    Lt,
    Gt,
    Lte,
    Gte,
    If,
    One,
    Answer,
    Initiator,
    Candidate,
    Named,
    Members,
    SizeOf,
    In,
    VoteApproval,
    VoteConfirm,
    VoteConsensus,
}

impl Op {
    pub const ALL: [Op; 26] = [
        Op::And,
        Op::Or,
        Op::Not,
        Op::Add,
        Op::Sub,
        Op::Mul,
        Op::Div,
        Op::Floor,
        Op::Eq,
        Op::Neq,
        Op::Lt,
        Op::Gt,
        Op::Lte,
        Op::Gte,
        Op::If,
        Op::One,
        Op::Answer,
        Op::Initiator,
        Op::Candidate,
        Op::Named,
        Op::Members,
        Op::SizeOf,
        Op::In,
        Op::VoteApproval,
        Op::VoteConfirm,
        Op::VoteConsensus,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Op::And => "and",
            Op::Or => "or",
            Op::Not => "not",
            Op::Add => "add",
            Op::Sub => "sub",
            Op::Mul => "mul",
            Op::Div => "div",
            Op::Floor => "floor",
            Op::Eq => "eq",
            Op::Neq => "neq",
            Op::Lt => "lt",
            Op::Gt => "gt",
            Op::Lte => "lte",
            Op::Gte => "gte",
            Op::If => "if",
            Op::One => "one",
            Op::Answer => "answer",
            Op::Initiator => "initiator",
            Op::Candidate => "candidate",
            Op::Named => "named",
            Op::Members => "members",
            Op::SizeOf => "size-of",
            Op::In => "in",
            Op::VoteApproval => "vote-approval",
            Op::VoteConfirm => "vote-confirm",
            Op::VoteConsensus => "vote-consensus",
        }
    }

    pub fn from_name(name: &str) -> Option<Op> {
        Op::ALL.into_iter().find(|op| op.name() == name)
    }

    /// True for operators that suspend evaluation to wait for a vote.
    pub fn is_suspension(self) -> bool {
        matches!(self, Op::VoteApproval | Op::VoteConfirm | Op::VoteConsensus)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Literal leaf.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Literal {
    Integer(i64),
    String(String),
    Boolean(bool),
}

/// Operator application.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exp {
    pub op: Op,
    pub args: Vec<Node>,
    #[serde(default)]
    pub span: Span,
}

/// AST node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Node {
    Literal(Literal),
    Exp(Exp),
}

impl Node {
    /// Build an operator node without source position.
    pub fn exp(op: Op, args: Vec<Node>) -> Self {
        Node::Exp(Exp {
            op,
            args,
            span: Span::default(),
        })
    }

    pub fn int(n: i64) -> Self {
        Node::Literal(Literal::Integer(n))
    }

    pub fn boolean(b: bool) -> Self {
        Node::Literal(Literal::Boolean(b))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Node::Literal(Literal::String(s.into()))
    }

    /// Does evaluating this node ever suspend?
    pub fn suspends(&self) -> bool {
        match self {
            Node::Literal(_) => false,
            Node::Exp(exp) => exp.op.is_suspension() || exp.args.iter().any(Node::suspends),
        }
    }

    /// Ignores spans, so a reparsed rendering compares equal to the original.
    pub fn same_shape(&self, other: &Node) -> bool {
        match (self, other) {
            (Node::Literal(a), Node::Literal(b)) => a == b,
            (Node::Exp(a), Node::Exp(b)) => {
                a.op == b.op
                    && a.args.len() == b.args.len()
                    && a.args.iter().zip(&b.args).all(|(x, y)| x.same_shape(y))
            }
            _ => false,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Literal(Literal::Integer(n)) => write!(f, "{n}"),
            Node::Literal(Literal::String(s)) => write!(f, "\"{s}\""),
            Node::Literal(Literal::Boolean(b)) => write!(f, "{b}"),
            Node::Exp(exp) => {
                write!(f, "({}", exp.op)?;
                for arg in &exp.args {
                    write!(f, " {arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_op_name_round_trips() {
        for op in Op::ALL {
            assert_eq!(Op::from_name(op.name()), Some(op));
        }
        assert_eq!(Op::from_name("loop"), None);
    }

    #[test]
    fn test_display_renders_source() {
        let node = Node::exp(
            Op::If,
            vec![
                Node::exp(Op::Eq, vec![Node::int(1), Node::int(1)]),
                Node::string("a"),
                Node::boolean(false),
            ],
        );
        assert_eq!(node.to_string(), "(if (eq 1 1) \"a\" false)");
    }

    #[test]
    fn test_suspends_finds_nested_votes() {
        let node = Node::exp(
            Op::And,
            vec![
                Node::boolean(true),
                Node::exp(Op::VoteApproval, vec![Node::int(2)]),
            ],
        );
        assert!(node.suspends());
        assert!(!Node::exp(Op::Members, vec![]).suspends());
    }
}
