//! Typed update events streamed to clients during a generation.
//!
//! A [`MessageUpdate`] is the unit the whole streaming path deals in: the
//! generation pipeline produces them, the update applier turns them into
//! conversation mutations, and the transport serializes each one as a single
//! newline-delimited JSON record.
//!
//! Every kind except `Stream` is also recorded in the target message's audit
//! log (`Stream` is too high-frequency to persist). Matching on the enum is
//! exhaustive everywhere; adding a kind is a compile-time ripple, not a
//! silent pass-through.

use serde::{Deserialize, Serialize};

/// Phase carried by a [`MessageUpdate::Status`] event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StatusKind {
    /// The generation run has begun.
    Started,
    /// A stage progress note (web search, tool execution).
    Progress,
    /// A recovered or terminal error, carried in-stream.
    Error,
}

/// An update event applied to a message/conversation and mirrored on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessageUpdate {
    /// Lifecycle / progress / error marker. Audit-logged, mutates nothing.
    #[serde(rename = "status")]
    Status {
        /// Phase discriminator.
        status: StatusKind,
        /// Optional human-readable detail.
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Incremental answer token. Appended to message content; never logged.
    #[serde(rename = "stream")]
    Stream {
        /// Token text. Empty tokens are discarded by the applier.
        token: String,
    },

    /// Conversation title produced by the title task. Not message-logged.
    #[serde(rename = "title")]
    Title {
        /// The new conversation title.
        title: String,
    },

    /// Authoritative final answer text. Replaces the streamed-so-far buffer.
    #[serde(rename = "finalAnswer")]
    FinalAnswer {
        /// Final generated text (exclusive of pre-generation content).
        text: String,
        /// Whether generation was cut short by an abort request.
        interrupted: bool,
    },

    /// A file attached to the message, resolved to a content-hash reference.
    #[serde(rename = "file")]
    File {
        /// Original file name.
        name: String,
        /// Content hash in the file store.
        sha: String,
        /// MIME type.
        mime: String,
    },
}

impl MessageUpdate {
    /// Shorthand for a status event with a message.
    #[must_use]
    pub fn status(status: StatusKind, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: Some(message.into()),
        }
    }

    /// Shorthand for an in-stream error status.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::status(StatusKind::Error, message)
    }

    /// Whether this event belongs in the per-message audit log.
    ///
    /// `Stream` is too high-frequency to persist; `Title` mutates the
    /// conversation, not the message.
    #[must_use]
    pub fn is_audit_logged(&self) -> bool {
        !matches!(self, Self::Stream { .. } | Self::Title { .. })
    }

    /// Event type string as it appears on the wire.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Stream { .. } => "stream",
            Self::Title { .. } => "title",
            Self::FinalAnswer { .. } => "finalAnswer",
            Self::File { .. } => "file",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
