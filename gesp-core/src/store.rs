use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::persist::{RulesRecord, VoteRecord};
use crate::types::*;
use crate::vote::Vote;

/// Persistence for governed entities ("masks") and their open votes.
///
/// Each action variant maps onto one mutation here. The orchestrator only
/// touches state through this trait.
#[async_trait]
pub trait MaskStore: Send + Sync {
    // ── Membership ──

    async fn members(&self, entity: EntityId) -> Result<BTreeSet<UserId>>;
    async fn add_member(&self, entity: EntityId, user: UserId) -> Result<()>;
    async fn remove_member(&self, entity: EntityId, user: UserId) -> Result<()>;

    // ── Entity attributes ──

    async fn add_server(&self, entity: EntityId, server: ServerId) -> Result<()>;
    async fn set_attribute(&self, entity: EntityId, field: &str, value: &str) -> Result<()>;

    // ── Rules ──

    async fn save_rules(&self, entity: EntityId, rules: &RulesRecord) -> Result<()>;
    async fn load_rules(&self, entity: EntityId) -> Result<Option<RulesRecord>>;

    // ── Votes (keyed by presenting message) ──

    async fn save_vote(&self, message_id: MessageId, vote: &VoteRecord) -> Result<()>;
    async fn load_vote(&self, message_id: MessageId) -> Result<Option<VoteRecord>>;

    /// Delete a vote. Returns false if it was already gone.
    async fn delete_vote(&self, message_id: MessageId) -> Result<bool>;
}

/// Shows votes to voters.
#[async_trait]
pub trait VotePresenter: Send + Sync {
    /// Render an open vote. The returned message id keys the vote from then on.
    async fn present(&self, channel: ChannelId, vote: &Vote) -> Result<MessageId>;

    /// A vote was decided. Default: nothing to update.
    async fn closed(&self, _message_id: MessageId, _approved: bool) -> Result<()> {
        Ok(())
    }
}
