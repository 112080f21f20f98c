//! Versioned persisted records
//!
//! Votes and rules are stored as JSON documents. Each record carries a
//! `schema_version`; the version is read first so an unknown one is reported
//! as such rather than as whatever field happened to fail.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::action::Action;
use crate::error::PersistError;
use crate::rules::{Rules, RulesKind};
use crate::types::*;
use crate::vote::Vote;

pub const VOTE_SCHEMA_VERSION: u32 = 1;
pub const RULES_SCHEMA_VERSION: u32 = 1;

#[derive(Deserialize)]
struct VersionHeader {
    schema_version: u32,
}

fn check_version(json: &str, record: &'static str, expected: u32) -> Result<(), PersistError> {
    let header: VersionHeader = serde_json::from_str(json)?;
    if header.schema_version != expected {
        return Err(PersistError::UnsupportedVersion {
            record,
            found: header.schema_version,
            expected,
        });
    }
    Ok(())
}

// ─── Votes ────────────────────────────────────────────────────

/// A suspended vote at rest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub schema_version: u32,
    pub variant_tag: VoteKind,
    pub action: Action,
    pub program: Vec<Instr>,
    pub program_counter: Addr,
    pub operand_stack: Vec<Value>,
    pub context: Context,
    pub eligible: Eligibility,
    pub yes: BTreeSet<UserId>,
    pub no: BTreeSet<UserId>,
    pub program_version: String,
    pub opened_at: Timestamp,
}

impl From<&Vote> for VoteRecord {
    fn from(vote: &Vote) -> Self {
        Self {
            schema_version: VOTE_SCHEMA_VERSION,
            variant_tag: vote.kind,
            action: vote.action.clone(),
            program: vote.state.program.clone(),
            program_counter: vote.state.pc,
            operand_stack: vote.state.stack.clone(),
            context: vote.context.clone(),
            eligible: vote.eligible.clone(),
            yes: vote.yes.clone(),
            no: vote.no.clone(),
            program_version: vote.program_version.clone(),
            opened_at: vote.opened_at,
        }
    }
}

impl VoteRecord {
    pub fn to_json(&self) -> Result<String, PersistError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, PersistError> {
        check_version(json, "vote", VOTE_SCHEMA_VERSION)?;
        Ok(serde_json::from_str(json)?)
    }

    /// Rebuild the live vote, rejecting records that break its invariants.
    pub fn into_vote(self) -> Result<Vote, PersistError> {
        if self.schema_version != VOTE_SCHEMA_VERSION {
            return Err(PersistError::UnsupportedVersion {
                record: "vote",
                found: self.schema_version,
                expected: VOTE_SCHEMA_VERSION,
            });
        }
        if self.program_counter as usize > self.program.len() {
            return Err(PersistError::Invalid {
                record: "vote",
                message: format!(
                    "program counter {} past end of {}-instruction program",
                    self.program_counter,
                    self.program.len()
                ),
            });
        }
        if let Some(voter) = self.yes.intersection(&self.no).next() {
            return Err(PersistError::Invalid {
                record: "vote",
                message: format!("voter {voter} is in both yes and no"),
            });
        }

        Ok(Vote {
            kind: self.variant_tag,
            action: self.action,
            state: ProgramState {
                program: self.program,
                pc: self.program_counter,
                stack: self.operand_stack,
            },
            context: self.context,
            eligible: self.eligible,
            yes: self.yes,
            no: self.no,
            program_version: self.program_version,
            opened_at: self.opened_at,
        })
    }
}

// ─── Rules ────────────────────────────────────────────────────

/// Rules at rest. Bytecode is derived and not stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesRecord {
    pub schema_version: u32,
    pub variant_tag: RulesKind,
    pub named: Vec<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl From<&Rules> for RulesRecord {
    fn from(rules: &Rules) -> Self {
        let source = match rules {
            Rules::Custom { source, .. } => Some(source.clone()),
            Rules::Dictator { .. } | Rules::Majority { .. } => None,
        };
        Self {
            schema_version: RULES_SCHEMA_VERSION,
            variant_tag: rules.kind(),
            named: rules.named().to_vec(),
            source,
        }
    }
}

impl RulesRecord {
    pub fn to_json(&self) -> Result<String, PersistError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, PersistError> {
        check_version(json, "rules", RULES_SCHEMA_VERSION)?;
        Ok(serde_json::from_str(json)?)
    }

    pub fn into_rules(self) -> Result<Rules, PersistError> {
        if self.schema_version != RULES_SCHEMA_VERSION {
            return Err(PersistError::UnsupportedVersion {
                record: "rules",
                found: self.schema_version,
                expected: RULES_SCHEMA_VERSION,
            });
        }
        let named = self.named;
        match (self.variant_tag, self.source) {
            (RulesKind::Dictator, _) => Ok(Rules::Dictator { named }),
            (RulesKind::Majority, _) => Ok(Rules::Majority { named }),
            (RulesKind::Custom, Some(source)) => Ok(Rules::Custom { named, source }),
            (RulesKind::Custom, None) => Err(PersistError::Invalid {
                record: "rules",
                message: "custom rules without source".into(),
            }),
        }
    }
}
