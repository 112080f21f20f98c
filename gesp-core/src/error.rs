//! Error types for the gesp rule language and governance engine
//!
//! One `thiserror` enum per layer. Parse and type errors never reach the VM;
//! they surface to whoever asked for the rule to be compiled. `VmError` is an
//! internal-consistency failure for programs that were checked and compiled
//! correctly, except for the data-dependent cases (division by zero, named
//! index, missing candidate) a rule author can trigger.

use thiserror::Error;
use uuid::Uuid;

use crate::action::ActionKind;
use crate::ast::Op;
use crate::types::Type;

/// Top-level error for governance operations
#[derive(Error, Debug)]
pub enum GovernanceError {
    #[error("Rule compilation failed: {0}")]
    Compile(#[from] CompileError),

    #[error("VM error: {0}")]
    Vm(#[from] VmError),

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("No rules configured for entity {0}")]
    NoRules(Uuid),

    #[error("Rules for entity {entity} have no program for {kind:?}")]
    NoProgram { entity: Uuid, kind: ActionKind },

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// Rejection of a rules program at definition time
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("syntax error: {0}")]
    Syntax(#[from] ParseError),

    #[error("type error: {0}")]
    Type(#[from] TypeError),
}

/// Syntax errors from the parser
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty program")]
    Empty,

    #[error("program is {len} bytes, limit is {limit}")]
    TooLong { len: usize, limit: usize },

    #[error("unmatched ')' at position {0}")]
    UnbalancedParen(usize),

    #[error("unclosed '(' at position {0}")]
    UnclosedParen(usize),

    #[error("unterminated string starting at position {0}")]
    UnterminatedString(usize),

    #[error("missing operator at position {0}")]
    MissingOperator(usize),

    #[error("unknown operator '{name}' at position {position}")]
    UnknownOperator { name: String, position: usize },

    #[error("invalid literal at position {position}: {message}")]
    InvalidLiteral { position: usize, message: String },

    #[error("unexpected '{found}' at position {position}")]
    Unexpected { found: char, position: usize },

    #[error("unexpected content after expression at position {0}")]
    TrailingInput(usize),
}

/// Static type errors from the checker
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("'{op}' expects {expected} argument(s), got {found}")]
    Arity {
        op: Op,
        expected: usize,
        found: usize,
    },

    #[error("'{op}' cannot be applied to ({})", join_types(.found))]
    Mismatch { op: Op, found: Vec<Type> },

    #[error("'if' branches disagree: {then_branch} vs {else_branch}")]
    BranchMismatch { then_branch: Type, else_branch: Type },

    #[error("rule must produce bool, got {0}")]
    NotBoolean(Type),
}

fn join_types(types: &[Type]) -> String {
    types
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Runtime errors raised by the VM
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("program finished with stack depth {0}, expected 1")]
    StackDepth(usize),

    #[error("{0}: stack underflow")]
    StackUnderflow(&'static str),

    #[error("{instr}: expected {expected}, found {found}")]
    TypeMismatch {
        instr: &'static str,
        expected: Type,
        found: Type,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),

    #[error("named index {index} out of range ({len} named users)")]
    NamedIndex { index: String, len: usize },

    #[error("rule reads the candidate but the action has none")]
    NoCandidate,

    #[error("vote requirement {0} is not a non-negative integer")]
    InvalidRequirement(String),

    #[error("jump target {target} outside program of length {len}")]
    BadJump { target: u32, len: usize },

    #[error("step budget of {0} exhausted")]
    StepBudget(usize),
}

/// Errors decoding persisted records
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported {record} schema version {found} (expected {expected})")]
    UnsupportedVersion {
        record: &'static str,
        found: u32,
        expected: u32,
    },

    #[error("invalid {record}: {message}")]
    Invalid {
        record: &'static str,
        message: String,
    },
}
