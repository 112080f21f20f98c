use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use crate::persist::{RulesRecord, VoteRecord};
use crate::store::{MaskStore, VotePresenter};
use crate::types::*;
use crate::vote::Vote;

// ── MemoryStore ──

#[derive(Default)]
struct MemoryInner {
    members: HashMap<EntityId, BTreeSet<UserId>>,
    servers: HashMap<EntityId, BTreeSet<ServerId>>,
    attributes: HashMap<EntityId, BTreeMap<String, String>>,
    /// JSON text, as a durable store would hold it.
    rules: HashMap<EntityId, String>,
    votes: HashMap<MessageId, String>,
}

/// In-memory MaskStore for tests and the CLI.
///
/// Rules and votes go through their JSON records on every save and load.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entity's membership.
    pub fn with_members(self, entity: EntityId, members: impl IntoIterator<Item = UserId>) -> Self {
        if let Ok(mut inner) = self.inner.write() {
            inner.members.entry(entity).or_default().extend(members);
        }
        self
    }

    pub fn servers(&self, entity: EntityId) -> Result<BTreeSet<ServerId>> {
        let inner = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(inner.servers.get(&entity).cloned().unwrap_or_default())
    }

    pub fn attribute(&self, entity: EntityId, field: &str) -> Result<Option<String>> {
        let inner = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(inner
            .attributes
            .get(&entity)
            .and_then(|attrs| attrs.get(field))
            .cloned())
    }

    pub fn open_votes(&self) -> Result<usize> {
        let inner = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(inner.votes.len())
    }
}

#[async_trait]
impl MaskStore for MemoryStore {
    async fn members(&self, entity: EntityId) -> Result<BTreeSet<UserId>> {
        let inner = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(inner.members.get(&entity).cloned().unwrap_or_default())
    }

    async fn add_member(&self, entity: EntityId, user: UserId) -> Result<()> {
        let mut inner = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;
        inner.members.entry(entity).or_default().insert(user);
        Ok(())
    }

    async fn remove_member(&self, entity: EntityId, user: UserId) -> Result<()> {
        let mut inner = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;
        if let Some(members) = inner.members.get_mut(&entity) {
            members.remove(&user);
        }
        Ok(())
    }

    async fn add_server(&self, entity: EntityId, server: ServerId) -> Result<()> {
        let mut inner = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;
        inner.servers.entry(entity).or_default().insert(server);
        Ok(())
    }

    async fn set_attribute(&self, entity: EntityId, field: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;
        inner
            .attributes
            .entry(entity)
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn save_rules(&self, entity: EntityId, rules: &RulesRecord) -> Result<()> {
        let json = rules.to_json()?;
        let mut inner = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;
        inner.rules.insert(entity, json);
        Ok(())
    }

    async fn load_rules(&self, entity: EntityId) -> Result<Option<RulesRecord>> {
        let inner = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        match inner.rules.get(&entity) {
            Some(json) => Ok(Some(RulesRecord::from_json(json)?)),
            None => Ok(None),
        }
    }

    async fn save_vote(&self, message_id: MessageId, vote: &VoteRecord) -> Result<()> {
        let json = vote.to_json()?;
        let mut inner = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;
        inner.votes.insert(message_id, json);
        Ok(())
    }

    async fn load_vote(&self, message_id: MessageId) -> Result<Option<VoteRecord>> {
        let inner = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        match inner.votes.get(&message_id) {
            Some(json) => Ok(Some(VoteRecord::from_json(json)?)),
            None => Ok(None),
        }
    }

    async fn delete_vote(&self, message_id: MessageId) -> Result<bool> {
        let mut inner = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(inner.votes.remove(&message_id).is_some())
    }
}

// ── RecordingPresenter ──

/// A vote as it was shown.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Presented {
    pub message_id: MessageId,
    pub channel: ChannelId,
    pub kind: VoteKind,
    pub summary: String,
}

/// VotePresenter that hands out sequential message ids and remembers what
/// it showed.
pub struct RecordingPresenter {
    next_id: AtomicU64,
    presented: Mutex<Vec<Presented>>,
    closed: Mutex<Vec<(MessageId, bool)>>,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            presented: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
        }
    }

    pub fn presented(&self) -> Result<Vec<Presented>> {
        let presented = self.presented.lock().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(presented.clone())
    }

    pub fn closed_votes(&self) -> Result<Vec<(MessageId, bool)>> {
        let closed = self.closed.lock().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(closed.clone())
    }
}

impl Default for RecordingPresenter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VotePresenter for RecordingPresenter {
    async fn present(&self, channel: ChannelId, vote: &Vote) -> Result<MessageId> {
        let message_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut presented = self.presented.lock().map_err(|e| anyhow!("Lock: {}", e))?;
        presented.push(Presented {
            message_id,
            channel,
            kind: vote.kind,
            summary: vote.action.to_string(),
        });
        Ok(message_id)
    }

    async fn closed(&self, message_id: MessageId, approved: bool) -> Result<()> {
        let mut closed = self.closed.lock().map_err(|e| anyhow!("Lock: {}", e))?;
        closed.push((message_id, approved));
        Ok(())
    }
}
