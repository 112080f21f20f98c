//! gesp-core: governance rule language and vote orchestration
//!
//! This crate contains:
//! - AST, nom-based S-expression parser and static type checker
//! - Bytecode compiler and a stack VM that suspends for votes
//! - Votable actions, votes and entity rules
//! - Versioned JSON records for persisted votes and rules
//! - Store/presenter traits with in-memory implementations
//! - The `Governor`, which ties rules, votes and actions together

pub mod action;
pub mod ast;
pub mod compiler;
pub mod config;
pub mod error;
pub mod governance;
pub mod parser;
pub mod persist;
pub mod rules;
pub mod store;
pub mod store_memory;
pub mod typecheck;
pub mod types;
pub mod vm;
pub mod vote;

// Re-export commonly used types
pub use action::{Action, ActionBody, ActionKind};
pub use ast::{Node, Op};
pub use compiler::{compile_source, CompiledProgram};
pub use config::GespConfig;
pub use error::{CompileError, GovernanceError, ParseError, PersistError, TypeError, VmError};
pub use governance::{BallotOutcome, Governor, Resolution};
pub use parser::{parse_program, parse_program_with_limit};
pub use persist::{RulesRecord, VoteRecord};
pub use rules::{CompiledRules, Rules, RulesKind};
pub use store::{MaskStore, VotePresenter};
pub use store_memory::{MemoryStore, RecordingPresenter};
pub use typecheck::{check, check_rule};
pub use types::{Ballot, Context, Eligibility, Instr, Type, Value, VoteKind};
pub use vm::{Outcome, Suspension, Vm};
pub use vote::{BallotEffect, Vote};
