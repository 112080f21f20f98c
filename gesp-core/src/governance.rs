//! Governance orchestrator
//!
//! Runs an action through its entity's rules: apply it, reject it, or park
//! it behind a vote. Ballots on a parked vote are tallied until the vote
//! decides, then the paused program resumes with the outcome.

use anyhow::anyhow;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::action::{Action, ActionBody};
use crate::config::GespConfig;
use crate::error::{CompileError, GovernanceError};
use crate::persist::{RulesRecord, VoteRecord};
use crate::rules::{CompiledRules, Rules};
use crate::store::{MaskStore, VotePresenter};
use crate::types::*;
use crate::vm::{Outcome, Suspension, Vm};
use crate::vote::{BallotEffect, Vote};

/// Where an action ended up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Applied,
    Rejected,
    Pending { message_id: MessageId },
}

/// Result of a ballot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BallotOutcome {
    Ack {
        effect: BallotEffect,
        /// Set when this ballot decided the vote.
        resolution: Option<Resolution>,
    },
    Ineligible,
    NoSuchVote,
}

pub struct Governor {
    store: Arc<dyn MaskStore>,
    presenter: Arc<dyn VotePresenter>,
    vm: Vm,
    config: GespConfig,
    rules: RwLock<HashMap<EntityId, Arc<CompiledRules>>>,
    vote_locks: Mutex<HashMap<MessageId, Arc<tokio::sync::Mutex<()>>>>,
}

impl Governor {
    pub fn new(
        store: Arc<dyn MaskStore>,
        presenter: Arc<dyn VotePresenter>,
        config: GespConfig,
    ) -> Self {
        Self {
            store,
            presenter,
            vm: Vm::new(config.max_steps),
            config,
            rules: RwLock::new(HashMap::new()),
            vote_locks: Mutex::new(HashMap::new()),
        }
    }

    // ─── Actions ──────────────────────────────────────────────

    /// Run `action` through the entity's rules on behalf of `initiator`.
    pub async fn initiate(
        &self,
        entity: EntityId,
        initiator: UserId,
        channel: ChannelId,
        action: Action,
    ) -> Result<Resolution, GovernanceError> {
        let compiled = self.compiled_rules(entity).await?;
        let kind = action.kind();
        let program = compiled
            .program(kind)
            .ok_or(GovernanceError::NoProgram { entity, kind })?;
        let members = self.store.members(entity).await?;

        let context = Context::new(initiator, channel)
            .with_named(compiled.rules.named().to_vec())
            .with_members(members)
            .with_candidate(action.candidate());

        info!(
            entity = %entity,
            initiator,
            ?kind,
            version = %program.bytecode_version,
            "Initiating action"
        );

        let outcome = self.vm.evaluate(&program.program, context)?;
        self.settle(action, outcome, &program.bytecode_version).await
    }

    /// Apply, reject or open a vote for a finished or suspended run.
    ///
    /// A vote that is already decided when opened resumes straight away, so
    /// this loops until the program ends or a vote really needs ballots.
    async fn settle(
        &self,
        mut action: Action,
        mut outcome: Outcome,
        version: &str,
    ) -> Result<Resolution, GovernanceError> {
        loop {
            let suspension = match outcome {
                Outcome::Done(value) => {
                    if value.is_true() {
                        self.apply(&action).await?;
                        return Ok(Resolution::Applied);
                    }
                    info!(entity = %action.entity, kind = ?action.kind(), %value, "Action rejected");
                    return Ok(Resolution::Rejected);
                }
                Outcome::Suspended(suspension) => suspension,
            };

            let vote = Vote::open(action, suspension, version.to_string());
            if let Some(answer) = vote.decision() {
                debug!(kind = ?vote.kind, answer, "Vote decided without ballots");
                let (parked, suspension) = vote.into_parts();
                action = parked;
                outcome = self.vm.resume(suspension, answer)?;
                continue;
            }

            let message_id = self.presenter.present(vote.context.channel, &vote).await?;
            self.store
                .save_vote(message_id, &VoteRecord::from(&vote))
                .await?;
            info!(
                entity = %vote.action.entity,
                message_id,
                kind = ?vote.kind,
                eligible = ?vote.eligible,
                "Vote opened"
            );
            return Ok(Resolution::Pending { message_id });
        }
    }

    async fn apply(&self, action: &Action) -> Result<(), GovernanceError> {
        action.execute(self.store.as_ref()).await?;
        if let ActionBody::RulesChange { .. } = action.body {
            // Store write above happens first; evict only once it succeeded.
            self.rules.write().await.remove(&action.entity);
            info!(entity = %action.entity, "Rules changed, cache evicted");
        }
        info!(entity = %action.entity, action = %action, "Action applied");
        Ok(())
    }

    // ─── Ballots ──────────────────────────────────────────────

    pub async fn record_ballot(
        &self,
        message_id: MessageId,
        voter: UserId,
        ballot: Ballot,
    ) -> Result<BallotOutcome, GovernanceError> {
        let lock = self.vote_lock(message_id)?;
        let result = {
            let _guard = lock.lock().await;
            self.record_ballot_locked(message_id, voter, ballot).await
        };
        if let Err(err) = self.release_vote_lock(message_id, lock) {
            warn!(message_id, error = %err, "Failed to release vote lock");
        }
        result
    }

    async fn record_ballot_locked(
        &self,
        message_id: MessageId,
        voter: UserId,
        ballot: Ballot,
    ) -> Result<BallotOutcome, GovernanceError> {
        let Some(record) = self.store.load_vote(message_id).await? else {
            debug!(message_id, voter, "Ballot for unknown or decided vote");
            return Ok(BallotOutcome::NoSuchVote);
        };
        let mut vote = record.into_vote()?;

        let members = match vote.eligible {
            Eligibility::Count(_) => self.store.members(vote.action.entity).await?,
            Eligibility::Voters(_) => BTreeSet::new(),
        };
        if !vote.is_eligible(voter, &members) {
            info!(message_id, voter, "Ineligible ballot");
            return Ok(BallotOutcome::Ineligible);
        }

        let effect = vote.record(voter, ballot);
        debug!(message_id, voter, ?ballot, ?effect, "Ballot recorded");

        let Some(answer) = vote.decision() else {
            if effect == BallotEffect::Recorded {
                self.store
                    .save_vote(message_id, &VoteRecord::from(&vote))
                    .await?;
            }
            return Ok(BallotOutcome::Ack {
                effect,
                resolution: None,
            });
        };

        // One-shot: the record goes before anything is applied.
        let record = VoteRecord::from(&vote);
        if !self.store.delete_vote(message_id).await? {
            warn!(message_id, "Vote vanished while deciding");
            return Ok(BallotOutcome::NoSuchVote);
        }
        info!(
            message_id,
            entity = %vote.action.entity,
            kind = ?vote.kind,
            answer,
            yes = vote.yes.len(),
            no = vote.no.len(),
            "Vote decided"
        );

        let version = vote.program_version.clone();
        let (action, suspension) = vote.into_parts();
        let resolution = match self.resume_decided(action, suspension, answer, &version).await {
            Ok(resolution) => resolution,
            Err(err) => {
                // Nothing was applied; put the vote back so the next ballot retries.
                warn!(message_id, error = %err, "Decided vote failed to resume, reinstating");
                self.store.save_vote(message_id, &record).await?;
                return Err(err);
            }
        };

        if let Err(err) = self.presenter.closed(message_id, answer).await {
            warn!(message_id, error = %err, "Failed to mark vote closed");
        }
        Ok(BallotOutcome::Ack {
            effect,
            resolution: Some(resolution),
        })
    }

    async fn resume_decided(
        &self,
        action: Action,
        suspension: Suspension,
        answer: bool,
        version: &str,
    ) -> Result<Resolution, GovernanceError> {
        let outcome = self.vm.resume(suspension, answer)?;
        self.settle(action, outcome, version).await
    }

    fn vote_lock(&self, message_id: MessageId) -> anyhow::Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self.vote_locks.lock().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(locks.entry(message_id).or_default().clone())
    }

    /// Drop the map entry once nobody else holds or waits on it.
    fn release_vote_lock(
        &self,
        message_id: MessageId,
        lock: Arc<tokio::sync::Mutex<()>>,
    ) -> anyhow::Result<()> {
        let mut locks = self.vote_locks.lock().map_err(|e| anyhow!("Lock: {}", e))?;
        // Held by the map and by `lock`; clones are only made under this mutex.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&message_id);
        }
        Ok(())
    }

    // ─── Rules ────────────────────────────────────────────────

    /// Validate custom rules source against the entity's named users.
    /// The rules in force are not touched.
    pub async fn compile_rules(
        &self,
        entity: EntityId,
        rules_text: &str,
    ) -> Result<Rules, GovernanceError> {
        let named = match self.stored_rules(entity).await? {
            Some(rules) => rules.named().to_vec(),
            None => Vec::new(),
        };
        let rules = Rules::Custom {
            named,
            source: rules_text.to_string(),
        };
        if let Err(err) = rules.compile(self.config.max_source_len) {
            info!(entity = %entity, error = %err, "Rejected rules");
            return Err(err.into());
        }
        Ok(rules)
    }

    /// Set an entity's rules without a vote. Used when the entity is created.
    pub async fn install_rules(&self, entity: EntityId, rules: Rules) -> Result<(), GovernanceError> {
        let compiled = Arc::new(rules.compile(self.config.max_source_len)?);
        self.store
            .save_rules(entity, &RulesRecord::from(&rules))
            .await?;
        self.rules.write().await.insert(entity, compiled);
        info!(entity = %entity, kind = %rules.kind(), "Rules installed");
        Ok(())
    }

    /// Stored rules, else the configured default.
    async fn stored_rules(&self, entity: EntityId) -> Result<Option<Rules>, GovernanceError> {
        match self.store.load_rules(entity).await? {
            Some(record) => Ok(Some(record.into_rules()?)),
            None => Ok(self.config.default_rules.clone()),
        }
    }

    async fn compiled_rules(&self, entity: EntityId) -> Result<Arc<CompiledRules>, GovernanceError> {
        if let Some(compiled) = self.rules.read().await.get(&entity) {
            return Ok(compiled.clone());
        }

        // Fill under the write lock so an eviction after a rules write cannot
        // land between our load and our insert.
        let mut cache = self.rules.write().await;
        if let Some(compiled) = cache.get(&entity) {
            return Ok(compiled.clone());
        }

        let rules = self
            .stored_rules(entity)
            .await?
            .ok_or(GovernanceError::NoRules(entity))?;
        let compiled = rules
            .compile(self.config.max_source_len)
            .map_err(|err: CompileError| {
                warn!(entity = %entity, error = %err, "Stored rules no longer compile");
                err
            })?;
        info!(entity = %entity, kind = %rules.kind(), "Compiled rules");

        let compiled = Arc::new(compiled);
        cache.insert(entity, compiled.clone());
        Ok(compiled)
    }
}
