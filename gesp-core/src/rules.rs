//! Entity rules
//!
//! Built-in rule kinds are stored as their source text, the same as custom
//! rules, so everything goes through the one compiler.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::action::ActionKind;
use crate::compiler::CompiledProgram;
use crate::error::CompileError;
use crate::parser::parse_program_with_limit;
use crate::typecheck::check_rule;
use crate::types::UserId;

/// The first named user decides; their own actions pass.
pub const DICTATOR_RULE: &str = "(if (eq (initiator) (named 0)) true (vote-confirm (named 0)))";

/// Strictly more than half of the current members approve.
pub const MAJORITY_RULE: &str = "(vote-approval (add (floor (div (size-of (members)) 2)) 1))";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RulesKind {
    Dictator,
    Majority,
    Custom,
}

impl fmt::Display for RulesKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RulesKind::Dictator => "dictator",
            RulesKind::Majority => "majority",
            RulesKind::Custom => "custom",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rules {
    Dictator { named: Vec<UserId> },
    Majority { named: Vec<UserId> },
    Custom { named: Vec<UserId>, source: String },
}

impl Rules {
    pub fn kind(&self) -> RulesKind {
        match self {
            Rules::Dictator { .. } => RulesKind::Dictator,
            Rules::Majority { .. } => RulesKind::Majority,
            Rules::Custom { .. } => RulesKind::Custom,
        }
    }

    /// Users the rule refers to as `(named i)`.
    pub fn named(&self) -> &[UserId] {
        match self {
            Rules::Dictator { named } | Rules::Majority { named } | Rules::Custom { named, .. } => {
                named
            }
        }
    }

    pub fn source(&self) -> &str {
        match self {
            Rules::Dictator { .. } => DICTATOR_RULE,
            Rules::Majority { .. } => MAJORITY_RULE,
            Rules::Custom { source, .. } => source,
        }
    }

    /// Parse and check once, then compile one program per action kind.
    pub fn compile(&self, max_source_len: usize) -> Result<CompiledRules, CompileError> {
        let rule = parse_program_with_limit(self.source(), max_source_len)?;
        check_rule(&rule)?;

        let mut programs = BTreeMap::new();
        for kind in ActionKind::ALL {
            let program = CompiledProgram::rule_from_ast(&kind.embellish(rule.clone()))?;
            programs.insert(kind, program);
        }
        Ok(CompiledRules {
            rules: self.clone(),
            programs,
        })
    }
}

/// Rules plus their derived bytecode. Never persisted.
#[derive(Clone, Debug)]
pub struct CompiledRules {
    pub rules: Rules,
    programs: BTreeMap<ActionKind, CompiledProgram>,
}

impl CompiledRules {
    pub fn program(&self, kind: ActionKind) -> Option<&CompiledProgram> {
        self.programs.get(&kind)
    }
}
