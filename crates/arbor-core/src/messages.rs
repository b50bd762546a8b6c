//! Conversation and message data model.
//!
//! A [`Conversation`] stores its messages as an arena keyed by
//! [`MessageId`] — parent/child relationships are expressed purely through
//! id lists (`ancestors`, `children`), never through embedded references, so
//! a dangling reference is structurally impossible to hold and trivially
//! checkable. Tree mutation lives in [`crate::tree`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_TITLE;
use crate::events::MessageUpdate;
use crate::ids::{ConversationId, MessageId};

/// Author of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageFrom {
    /// End user.
    User,
    /// Model-generated answer.
    Assistant,
    /// System prompt.
    System,
}

/// How a file attachment is carried.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// `value` holds the base64-encoded content itself.
    Inline,
    /// `value` holds the content hash of a file already in the store.
    Reference,
}

/// A file attached to a message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFile {
    /// Inline payload or store reference.
    pub kind: FileKind,
    /// Original file name.
    pub name: String,
    /// MIME type.
    pub mime: String,
    /// Base64 content or content hash, depending on `kind`.
    pub value: String,
}

/// A single node of the conversation tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique id, the arena key.
    pub id: MessageId,
    /// Author.
    pub from: MessageFrom,
    /// Content buffer, mutated during an active generation.
    pub content: String,
    /// Attached files.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<MessageFile>,
    /// Audit log of applied non-transient update events.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updates: Vec<MessageUpdate>,
    /// Whether the last generation into this message was cut short.
    #[serde(default)]
    pub interrupted: bool,
    /// User vote on the answer (-1, 0, +1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i8>,
    /// Path of ids from the root to this message's parent (exclusive of self).
    #[serde(default)]
    pub ancestors: Vec<MessageId>,
    /// Direct children, in insertion order.
    #[serde(default)]
    pub children: Vec<MessageId>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Seed data for a message about to be inserted into the tree.
///
/// Ids, ancestry and timestamps are assigned by the tree operation that
/// performs the insertion.
#[derive(Clone, Debug, PartialEq)]
pub struct NewMessage {
    /// Author.
    pub from: MessageFrom,
    /// Initial content.
    pub content: String,
    /// Attached files.
    pub files: Vec<MessageFile>,
}

impl NewMessage {
    /// A user message with content and files.
    #[must_use]
    pub fn user(content: impl Into<String>, files: Vec<MessageFile>) -> Self {
        Self {
            from: MessageFrom::User,
            content: content.into(),
            files,
        }
    }

    /// An empty assistant message — the write target of a generation.
    #[must_use]
    pub fn blank_assistant() -> Self {
        Self {
            from: MessageFrom::Assistant,
            content: String::new(),
            files: Vec::new(),
        }
    }
}

/// A branching conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Unique id.
    pub id: ConversationId,
    /// Display title.
    pub title: String,
    /// Model identifier used for generation.
    pub model: String,
    /// Root of the tree, if any message has been added.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_message_id: Option<MessageId>,
    /// Message arena keyed by id.
    #[serde(default)]
    pub messages: HashMap<MessageId, Message>,
    /// Bound preset assistant, if any. Disables web search and tool stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create an empty conversation for a model.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            title: DEFAULT_TITLE.to_owned(),
            model: model.into(),
            root_message_id: None,
            messages: HashMap::new(),
            assistant_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Look up a message by id.
    #[must_use]
    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.get(id)
    }

    /// Look up a message mutably by id.
    #[must_use]
    pub fn message_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.messages.get_mut(id)
    }

    /// Whether the conversation still carries the placeholder title.
    #[must_use]
    pub fn is_untitled(&self) -> bool {
        self.title == DEFAULT_TITLE || self.title.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
