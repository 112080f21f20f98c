//! Open votes
//!
//! A [`Vote`] is the live side of a suspension: the paused program plus the
//! ballots cast so far. Each [`VoteKind`] has its own decision rule.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::action::Action;
use crate::types::*;
use crate::vm::Suspension;

/// Whether a ballot changed the tally.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BallotEffect {
    Recorded,
    Unchanged,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub kind: VoteKind,
    pub action: Action,
    pub state: ProgramState,
    pub context: Context,
    pub eligible: Eligibility,
    pub yes: BTreeSet<UserId>,
    pub no: BTreeSet<UserId>,
    /// Bytecode version of the program that opened the vote.
    pub program_version: String,
    pub opened_at: Timestamp,
}

impl Vote {
    pub fn open(action: Action, suspension: Suspension, program_version: String) -> Self {
        Self {
            kind: suspension.kind,
            action,
            state: suspension.state,
            context: suspension.context,
            eligible: suspension.eligibility,
            yes: BTreeSet::new(),
            no: BTreeSet::new(),
            program_version,
            opened_at: now_ms(),
        }
    }

    /// Split back into the action and the paused program.
    pub fn into_parts(self) -> (Action, Suspension) {
        (
            self.action,
            Suspension {
                kind: self.kind,
                eligibility: self.eligible,
                state: self.state,
                context: self.context,
            },
        )
    }

    /// `members` is only consulted for count-based eligibility.
    pub fn is_eligible(&self, voter: UserId, members: &BTreeSet<UserId>) -> bool {
        match &self.eligible {
            Eligibility::Voters(voters) => voters.contains(&voter),
            Eligibility::Count(_) => members.contains(&voter),
        }
    }

    /// Record a ballot. A voter is in at most one of yes/no; abstaining
    /// withdraws an earlier ballot.
    pub fn record(&mut self, voter: UserId, ballot: Ballot) -> BallotEffect {
        let changed = match ballot {
            Ballot::Yes => {
                let moved = self.no.remove(&voter);
                self.yes.insert(voter) || moved
            }
            Ballot::No => {
                let moved = self.yes.remove(&voter);
                self.no.insert(voter) || moved
            }
            Ballot::Abstain => self.yes.remove(&voter) | self.no.remove(&voter),
        };
        if changed {
            BallotEffect::Recorded
        } else {
            BallotEffect::Unchanged
        }
    }

    /// The outcome, once the tally decides it.
    pub fn decision(&self) -> Option<bool> {
        match self.kind {
            VoteKind::Confirm => {
                if !self.yes.is_empty() {
                    Some(true)
                } else if !self.no.is_empty() {
                    Some(false)
                } else {
                    None
                }
            }
            VoteKind::Approval => (self.yes.len() >= self.required()).then_some(true),
            VoteKind::Consensus => {
                let everyone = match &self.eligible {
                    Eligibility::Voters(voters) => voters
                        .iter()
                        .all(|v| self.yes.contains(v) || self.no.contains(v)),
                    Eligibility::Count(n) => self.yes.len() + self.no.len() >= *n as usize,
                };
                everyone.then(|| self.no.is_empty())
            }
        }
    }

    /// Yes ballots needed for an approval.
    pub fn required(&self) -> usize {
        match &self.eligible {
            Eligibility::Voters(voters) => voters.len(),
            Eligibility::Count(n) => *n as usize,
        }
    }
}
