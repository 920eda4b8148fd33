//! Conversation state and response assembly.
//!
//! `ConversationState` is the record threaded through one turn of the
//! dispatch workflow: the ordered message history, the auxiliary context
//! map, and the owning user. The message sequence is append-only; nothing
//! in this crate reorders or deletes entries, and `user_id` has no setter.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Origin tag recorded on assistant messages produced without a capability.
pub const DIRECT_ORIGIN: &str = "direct";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// One entry in a conversation history.
///
/// `origin` is only set on assistant messages: the name of the capability
/// that produced the text, or [`DIRECT_ORIGIN`]. It is carried for UI and
/// analytics use and never influences control flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), origin: None }
    }

    pub fn assistant(content: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            origin: Some(origin.into()),
        }
    }
}

/// The mutable record for one conversation, mutated by exactly one workflow
/// execution per turn and persisted by the caller afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    messages: Vec<Message>,
    context: BTreeMap<String, Value>,
    user_id: String,
}

impl ConversationState {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self::from_history(user_id, Vec::new())
    }

    /// Rebuilds a state from a persisted message history.
    pub fn from_history(user_id: impl Into<String>, messages: Vec<Message>) -> Self {
        Self { messages, context: BTreeMap::new(), user_id: user_id.into() }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn context(&self) -> &BTreeMap<String, Value> {
        &self.context
    }

    /// Appends the incoming user message for this turn.
    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
    }

    /// Merges context values returned by a capability handler. Only the
    /// dispatch workflow calls this; handlers return new values instead of
    /// mutating the state they can read.
    pub(crate) fn merge_context(&mut self, updates: BTreeMap<String, Value>) {
        self.context.extend(updates);
    }
}

/// Extends `state` with one assistant message and returns the new state.
///
/// Pure: the input is left untouched, so a caller that keeps the prior
/// state observes a consistent snapshot. No deduplication is performed;
/// assembling the same text twice yields two messages.
pub fn assemble(state: &ConversationState, text: &str, origin: &str) -> ConversationState {
    let mut next = state.clone();
    next.messages.push(Message::assistant(text, origin));
    next
}
