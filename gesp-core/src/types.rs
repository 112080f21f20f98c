use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

// ─── Scalar aliases ───────────────────────────────────────────

/// Bytecode address (instruction pointer).
pub type Addr = u32;

/// Chat-platform user id.
pub type UserId = u64;

/// Chat-platform channel id.
pub type ChannelId = u64;

/// Chat-platform server (guild) id.
pub type ServerId = u64;

/// Id of the message presenting a vote. Votes are keyed by it.
pub type MessageId = u64;

/// Governed entity (mask) id.
pub type EntityId = Uuid;

/// Epoch milliseconds (UTC).
pub type Timestamp = i64;

// ─── Static types ─────────────────────────────────────────────

/// Result type of a rule-language expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Type {
    Bool,
    Int,
    Str,
    User,
    Set,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Type::Bool => "bool",
            Type::Int => "int",
            Type::Str => "string",
            Type::User => "user",
            Type::Set => "set",
        };
        f.write_str(name)
    }
}

// ─── Value ────────────────────────────────────────────────────

/// A value on the operand stack.
///
/// Numbers are exact decimals: `div` is real division and `floor` brings the
/// result back to an integer, so `(floor (div 5 2))` is exactly 2.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Num(Decimal),
    Str(String),
    User(UserId),
    Set(BTreeSet<UserId>),
}

impl Value {
    pub fn int(n: i64) -> Self {
        Value::Num(Decimal::from(n))
    }

    pub fn type_of(&self) -> Type {
        match self {
            Value::Bool(_) => Type::Bool,
            Value::Num(_) => Type::Int,
            Value::Str(_) => Type::Str,
            Value::User(_) => Type::User,
            Value::Set(_) => Type::Set,
        }
    }

    /// Only a boolean `true` approves an action.
    pub fn is_true(&self) -> bool {
        matches!(self, Value::Bool(true))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Num(n) => write!(f, "{}", n.normalize()),
            Value::Str(s) => write!(f, "\"{s}\""),
            Value::User(id) => write!(f, "user:{id}"),
            Value::Set(ids) => {
                let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
                write!(f, "{{{}}}", ids.join(", "))
            }
        }
    }
}

// ─── Bytecode instructions ────────────────────────────────────

/// The gesp VM instruction set.
///
/// Jump targets are absolute addresses into the same program. A target equal
/// to the program length is valid and ends execution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instr {
    // Literals
    Push(Value),
    One,

    // Control flow
    /// Pop a bool; if false push `false` and jump to `skip_to`.
    And {
        skip_to: Addr,
    },
    /// Pop a bool; if true push `true` and jump to `skip_to`.
    Or {
        skip_to: Addr,
    },
    JumpIfFalse {
        target: Addr,
    },
    Jump {
        target: Addr,
    },

    // Logic and arithmetic
    Not,
    Add,
    Sub,
    Mul,
    Div,
    Floor,

    // Comparison
    Eq,
    Neq,
    Lt,
    Gt,
    Lte,
    Gte,

    // Context reads
    Answer,
    Initiator,
    Candidate,
    Named,
    Members,
    SizeOf,
    In,

    // Suspension points
    VoteApproval,
    VoteConfirm,
    VoteConsensus,
}

impl Instr {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Instr::Push(_) => "push",
            Instr::One => "one",
            Instr::And { .. } => "and",
            Instr::Or { .. } => "or",
            Instr::JumpIfFalse { .. } => "jf",
            Instr::Jump { .. } => "jp",
            Instr::Not => "not",
            Instr::Add => "add",
            Instr::Sub => "sub",
            Instr::Mul => "mul",
            Instr::Div => "div",
            Instr::Floor => "floor",
            Instr::Eq => "eq",
            Instr::Neq => "neq",
            Instr::Lt => "lt",
            Instr::Gt => "gt",
            Instr::Lte => "lte",
            Instr::Gte => "gte",
            Instr::Answer => "answer",
            Instr::Initiator => "initiator",
            Instr::Candidate => "candidate",
            Instr::Named => "named",
            Instr::Members => "members",
            Instr::SizeOf => "size-of",
            Instr::In => "in",
            Instr::VoteApproval => "vote-approval",
            Instr::VoteConfirm => "vote-confirm",
            Instr::VoteConsensus => "vote-consensus",
        }
    }

    /// Jump target carried by this instruction, if any.
    pub fn target(&self) -> Option<Addr> {
        match self {
            Instr::And { skip_to } | Instr::Or { skip_to } => Some(*skip_to),
            Instr::JumpIfFalse { target } | Instr::Jump { target } => Some(*target),
            _ => None,
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Push(v) => write!(f, "push {v}"),
            other => match other.target() {
                Some(target) => write!(f, "{} @{target}", other.mnemonic()),
                None => f.write_str(other.mnemonic()),
            },
        }
    }
}

// ─── Program state ────────────────────────────────────────────

/// A resumable evaluation: the program, where we are in it, and the operand
/// stack. This is the whole continuation; nothing else is needed to resume.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramState {
    pub program: Vec<Instr>,
    pub pc: Addr,
    pub stack: Vec<Value>,
}

impl ProgramState {
    pub fn new(program: Vec<Instr>) -> Self {
        Self {
            program,
            pc: 0,
            stack: Vec::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.pc as usize >= self.program.len()
    }
}

// ─── Context ──────────────────────────────────────────────────

/// The facts a rule program evaluates against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub initiator: UserId,
    pub channel: ChannelId,
    /// Role slots from the rules, indexed by `(named n)`.
    pub named: Vec<UserId>,
    pub members: BTreeSet<UserId>,
    pub candidate: Option<UserId>,
    /// Outcome of the most recent vote, set before resuming.
    pub answer: Option<bool>,
}

impl Context {
    pub fn new(initiator: UserId, channel: ChannelId) -> Self {
        Self {
            initiator,
            channel,
            named: Vec::new(),
            members: BTreeSet::new(),
            candidate: None,
            answer: None,
        }
    }

    pub fn with_named(mut self, named: Vec<UserId>) -> Self {
        self.named = named;
        self
    }

    pub fn with_members(mut self, members: impl IntoIterator<Item = UserId>) -> Self {
        self.members = members.into_iter().collect();
        self
    }

    pub fn with_candidate(mut self, candidate: Option<UserId>) -> Self {
        self.candidate = candidate;
        self
    }
}

// ─── Votes ────────────────────────────────────────────────────

/// Which vote a suspension asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteKind {
    /// A single named user decides.
    Confirm,
    /// A fixed number of yes ballots approves.
    Approval,
    /// Every eligible voter must ballot.
    Consensus,
}

/// Who may ballot on a vote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Eligibility {
    /// Exactly these users.
    Voters(BTreeSet<UserId>),
    /// Any current member; this many yes ballots are required.
    Count(u32),
}

/// A ballot choice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ballot {
    Yes,
    No,
    Abstain,
}

pub fn now_ms() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}
