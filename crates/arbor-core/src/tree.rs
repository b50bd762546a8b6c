//! Conversation-tree mutation and traversal.
//!
//! Three operations grow and read the tree:
//!
//! - [`Conversation::add_child`] — append a message under a parent (or plant
//!   the root)
//! - [`Conversation::add_sibling`] — branch an alternative next to an
//!   existing message
//! - [`Conversation::build_subtree`] — resolve the unique root→message path
//!
//! Ancestry is maintained eagerly: a child's `ancestors` is always its
//! parent's `ancestors` plus the parent id, and an id is only appended after
//! the referenced node exists, so the tree is single-rooted and acyclic by
//! construction.

use chrono::Utc;
use thiserror::Error;

use crate::ids::MessageId;
use crate::messages::{Conversation, Message, NewMessage};

/// Faults raised by tree operations.
#[derive(Debug, Error)]
pub enum TreeError {
    /// The referenced message id is not in the conversation.
    #[error("message {0} not found in conversation")]
    NotFound(MessageId),

    /// A rootless insert was attempted on a conversation that has a root.
    #[error("the conversation already has a root message")]
    RootExists,

    /// A sibling was requested for the root message, which has no parent.
    #[error("message {0} is the root and cannot have siblings")]
    RootSibling(MessageId),

    /// An ancestor list references an id missing from the arena.
    ///
    /// This is a corrupt-state fault: the caller must not treat it as an
    /// empty path.
    #[error("corrupt tree: message {id} references missing ancestor {missing}")]
    Corrupt {
        /// The message whose ancestry failed to resolve.
        id: MessageId,
        /// The missing ancestor id.
        missing: MessageId,
    },
}

impl Conversation {
    /// Insert a new message as a child of `parent_id`, or as the root when
    /// `parent_id` is `None`.
    ///
    /// Returns the new message's id. Fails with [`TreeError::NotFound`] if
    /// the parent is absent, or [`TreeError::RootExists`] when planting a
    /// second root.
    pub fn add_child(
        &mut self,
        seed: NewMessage,
        parent_id: Option<&MessageId>,
    ) -> Result<MessageId, TreeError> {
        let id = MessageId::new();

        let ancestors = match parent_id {
            Some(pid) => {
                let parent = self
                    .messages
                    .get_mut(pid)
                    .ok_or_else(|| TreeError::NotFound(pid.clone()))?;
                parent.children.push(id.clone());
                let mut ancestors = parent.ancestors.clone();
                ancestors.push(pid.clone());
                ancestors
            }
            None => {
                if self.root_message_id.is_some() {
                    return Err(TreeError::RootExists);
                }
                self.root_message_id = Some(id.clone());
                Vec::new()
            }
        };

        self.insert_message(id.clone(), seed, ancestors);
        Ok(id)
    }

    /// Insert a new message as a branch alternative next to `sibling_id`.
    ///
    /// The new message shares the sibling's ancestry (same parent) and is
    /// appended to the **parent's** children list — it is an alternative, not
    /// a grandchild. Fails with [`TreeError::NotFound`] if the sibling is
    /// absent and [`TreeError::RootSibling`] if it is the root.
    pub fn add_sibling(
        &mut self,
        seed: NewMessage,
        sibling_id: &MessageId,
    ) -> Result<MessageId, TreeError> {
        let sibling = self
            .messages
            .get(sibling_id)
            .ok_or_else(|| TreeError::NotFound(sibling_id.clone()))?;
        let ancestors = sibling.ancestors.clone();
        let parent_id = ancestors
            .last()
            .cloned()
            .ok_or_else(|| TreeError::RootSibling(sibling_id.clone()))?;

        let id = MessageId::new();
        let parent = self
            .messages
            .get_mut(&parent_id)
            .ok_or_else(|| TreeError::Corrupt {
                id: sibling_id.clone(),
                missing: parent_id.clone(),
            })?;
        parent.children.push(id.clone());

        self.insert_message(id.clone(), seed, ancestors);
        Ok(id)
    }

    /// Resolve the unique root→`id` path, ending with the message itself.
    ///
    /// Runs in time proportional to the path depth. A missing ancestor is a
    /// [`TreeError::Corrupt`] fault, never an empty result.
    pub fn build_subtree(&self, id: &MessageId) -> Result<Vec<&Message>, TreeError> {
        let message = self
            .messages
            .get(id)
            .ok_or_else(|| TreeError::NotFound(id.clone()))?;

        let mut path = Vec::with_capacity(message.ancestors.len() + 1);
        for ancestor_id in &message.ancestors {
            let ancestor = self
                .messages
                .get(ancestor_id)
                .ok_or_else(|| TreeError::Corrupt {
                    id: id.clone(),
                    missing: ancestor_id.clone(),
                })?;
            path.push(ancestor);
        }
        path.push(message);
        Ok(path)
    }

    /// Whether the message exists and has no children.
    ///
    /// `None` when the id is not in the conversation.
    #[must_use]
    pub fn is_leaf(&self, id: &MessageId) -> Option<bool> {
        self.messages.get(id).map(|m| m.children.is_empty())
    }

    fn insert_message(&mut self, id: MessageId, seed: NewMessage, ancestors: Vec<MessageId>) {
        let now = Utc::now();
        let _ = self.messages.insert(
            id.clone(),
            Message {
                id,
                from: seed.from,
                content: seed.content,
                files: seed.files,
                updates: Vec::new(),
                interrupted: false,
                score: None,
                ancestors,
                children: Vec::new(),
                created_at: now,
                updated_at: now,
            },
        );
        self.updated_at = now;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
