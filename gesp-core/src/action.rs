//! Votable actions
//!
//! Every governance mutation is a variant of [`ActionBody`]. An action is
//! built by a command handler, gated by the entity's rules, and its effect
//! is applied through [`MaskStore`] only once the rules approve it.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ast::{Node, Op};
use crate::persist::RulesRecord;
use crate::rules::Rules;
use crate::store::MaskStore;
use crate::types::{EntityId, ServerId, UserId};

/// Action variant tag. Rules compile one program per kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Join,
    Invite,
    Remove,
    ServerAdd,
    AttributeChange,
    RulesChange,
}

impl ActionKind {
    pub const ALL: [ActionKind; 6] = [
        ActionKind::Join,
        ActionKind::Invite,
        ActionKind::Remove,
        ActionKind::ServerAdd,
        ActionKind::AttributeChange,
        ActionKind::RulesChange,
    ];

    /// Wrap the entity's rule with this kind's own policy before compiling.
    ///
    /// An invite also needs the candidate to accept.
    pub fn embellish(self, rule: Node) -> Node {
        match self {
            ActionKind::Invite => Node::exp(
                Op::And,
                vec![
                    rule,
                    Node::exp(Op::VoteConfirm, vec![Node::exp(Op::Candidate, vec![])]),
                ],
            ),
            ActionKind::Join
            | ActionKind::Remove
            | ActionKind::ServerAdd
            | ActionKind::AttributeChange
            | ActionKind::RulesChange => rule,
        }
    }
}

/// What the action does.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionBody {
    Join { candidate: UserId },
    Invite { candidate: UserId },
    Remove { candidate: UserId },
    ServerAdd { server: ServerId },
    AttributeChange { field: String, value: String },
    RulesChange { rules: Rules },
}

/// An action against one governed entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub entity: EntityId,
    pub body: ActionBody,
}

impl Action {
    pub fn new(entity: EntityId, body: ActionBody) -> Self {
        Self { entity, body }
    }

    pub fn kind(&self) -> ActionKind {
        match self.body {
            ActionBody::Join { .. } => ActionKind::Join,
            ActionBody::Invite { .. } => ActionKind::Invite,
            ActionBody::Remove { .. } => ActionKind::Remove,
            ActionBody::ServerAdd { .. } => ActionKind::ServerAdd,
            ActionBody::AttributeChange { .. } => ActionKind::AttributeChange,
            ActionBody::RulesChange { .. } => ActionKind::RulesChange,
        }
    }

    /// The user the action is about, if any.
    pub fn candidate(&self) -> Option<UserId> {
        match self.body {
            ActionBody::Join { candidate }
            | ActionBody::Invite { candidate }
            | ActionBody::Remove { candidate } => Some(candidate),
            ActionBody::ServerAdd { .. }
            | ActionBody::AttributeChange { .. }
            | ActionBody::RulesChange { .. } => None,
        }
    }

    /// Apply the action's effect.
    pub async fn execute(&self, store: &dyn MaskStore) -> Result<()> {
        match &self.body {
            ActionBody::Join { candidate } | ActionBody::Invite { candidate } => {
                store.add_member(self.entity, *candidate).await
            }
            ActionBody::Remove { candidate } => store.remove_member(self.entity, *candidate).await,
            ActionBody::ServerAdd { server } => store.add_server(self.entity, *server).await,
            ActionBody::AttributeChange { field, value } => {
                store.set_attribute(self.entity, field, value).await
            }
            ActionBody::RulesChange { rules } => {
                store
                    .save_rules(self.entity, &RulesRecord::from(rules))
                    .await
            }
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            ActionBody::Join { candidate } => write!(f, "user {candidate} joins"),
            ActionBody::Invite { candidate } => write!(f, "invite user {candidate}"),
            ActionBody::Remove { candidate } => write!(f, "remove user {candidate}"),
            ActionBody::ServerAdd { server } => write!(f, "add server {server}"),
            ActionBody::AttributeChange { field, value } => write!(f, "set {field} to {value:?}"),
            ActionBody::RulesChange { rules } => write!(f, "change rules to {}", rules.kind()),
        }
    }
}
