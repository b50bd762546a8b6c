//! Update applier — turns typed events into conversation mutations and wire
//! records.
//!
//! The applier owns the request's [`Conversation`] for the stream's duration
//! and is the only writer of the target message, so applying an event —
//! mutation, audit-log append, and the output-channel write — is one
//! uninterruptible `&mut self` step. Events for a message are therefore
//! applied strictly in emission order and never interleave.
//!
//! Two wire countermeasures sit between mutation and the channel write:
//!
//! - `Stream` tokens are right-padded with NUL to [`TOKEN_PAD_WIDTH`] so
//!   packet sizes do not leak token lengths.
//! - A `FinalAnswer` record is followed by a [`FLUSH_FILLER_LEN`]-byte
//!   whitespace record so buffering intermediaries release the tail.

use bytes::Bytes;
use chrono::Utc;
use metrics::counter;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;

use arbor_core::constants::{FLUSH_FILLER_LEN, TOKEN_PAD_CHAR, TOKEN_PAD_WIDTH};
use arbor_core::events::MessageUpdate;
use arbor_core::ids::MessageId;
use arbor_core::messages::{Conversation, FileKind, MessageFile};

/// Faults raised while applying an event.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The write target is missing from the conversation arena.
    #[error("target message {0} is missing from the conversation")]
    TargetMissing(MessageId),

    /// The consumer dropped the output channel.
    ///
    /// Distinguished from natural completion by the orchestrator's
    /// completion flag, never by the close itself.
    #[error("output channel closed")]
    ChannelClosed,

    /// Event serialization failed.
    #[error("event encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Applies [`MessageUpdate`]s to one target message and mirrors each event
/// onto the output channel.
pub struct UpdateApplier {
    conversation: Conversation,
    target: MessageId,
    /// Content of the target at generation start. `FinalAnswer` replaces the
    /// streamed-so-far buffer with `initial_content + text`.
    initial_content: String,
    sink: mpsc::Sender<Bytes>,
    last_token_at: Option<Instant>,
}

impl UpdateApplier {
    /// Create an applier for `target`, capturing its pre-generation content.
    pub fn new(
        conversation: Conversation,
        target: MessageId,
        sink: mpsc::Sender<Bytes>,
    ) -> Result<Self, ApplyError> {
        let initial_content = conversation
            .message(&target)
            .ok_or_else(|| ApplyError::TargetMissing(target.clone()))?
            .content
            .clone();
        Ok(Self {
            conversation,
            target,
            initial_content,
            sink,
            last_token_at: None,
        })
    }

    /// Apply one event: mutate, audit-log, and write to the channel.
    ///
    /// An empty `Stream` token is a complete no-op.
    pub async fn apply(&mut self, event: MessageUpdate) -> Result<(), ApplyError> {
        let now = Utc::now();

        match &event {
            MessageUpdate::Stream { token } => {
                if token.is_empty() {
                    return Ok(());
                }
                let message = self.target_mut()?;
                message.content.push_str(token);
                message.updated_at = now;
                self.last_token_at = Some(Instant::now());
                counter!("generation_tokens_total").increment(1);
            }
            MessageUpdate::Title { title } => {
                self.conversation.title.clone_from(title);
                self.conversation.updated_at = now;
            }
            MessageUpdate::FinalAnswer { text, interrupted } => {
                let initial = self.initial_content.clone();
                let message = self.target_mut()?;
                message.content = format!("{initial}{text}");
                message.interrupted = *interrupted;
                message.updated_at = now;
            }
            MessageUpdate::File { name, sha, mime } => {
                let file = MessageFile {
                    kind: FileKind::Reference,
                    name: name.clone(),
                    mime: mime.clone(),
                    value: sha.clone(),
                };
                let message = self.target_mut()?;
                message.files.push(file);
                message.updated_at = now;
            }
            MessageUpdate::Status { .. } => {
                self.target_mut()?.updated_at = now;
            }
        }

        if event.is_audit_logged() {
            let logged = event.clone();
            self.target_mut()?.updates.push(logged);
        }

        self.write_to_wire(event).await
    }

    /// Serialize the event as one newline-delimited record, padding stream
    /// tokens, and follow a final answer with the flush filler.
    async fn write_to_wire(&self, event: MessageUpdate) -> Result<(), ApplyError> {
        let is_final = matches!(event, MessageUpdate::FinalAnswer { .. });
        let wire_event = match event {
            MessageUpdate::Stream { token } => MessageUpdate::Stream {
                token: pad_token(&token),
            },
            other => other,
        };

        let mut line = serde_json::to_vec(&wire_event)?;
        line.push(b'\n');
        self.send(Bytes::from(line)).await?;

        if is_final {
            self.send(Bytes::from(" ".repeat(FLUSH_FILLER_LEN))).await?;
        }
        Ok(())
    }

    async fn send(&self, chunk: Bytes) -> Result<(), ApplyError> {
        self.sink
            .send(chunk)
            .await
            .map_err(|_| ApplyError::ChannelClosed)
    }

    fn target_mut(&mut self) -> Result<&mut arbor_core::messages::Message, ApplyError> {
        let target = self.target.clone();
        self.conversation
            .message_mut(&target)
            .ok_or(ApplyError::TargetMissing(target))
    }

    /// The conversation in its current state, for mid-stream commits.
    #[must_use]
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// When the last non-empty token was applied, for latency accounting.
    #[must_use]
    pub fn last_token_at(&self) -> Option<Instant> {
        self.last_token_at
    }

    /// Hand the conversation back at end of stream.
    #[must_use]
    pub fn finish(self) -> Conversation {
        self.conversation
    }
}

/// Right-pad a token with NUL to the minimum wire width.
fn pad_token(token: &str) -> String {
    let mut padded = String::with_capacity(token.len().max(TOKEN_PAD_WIDTH));
    padded.push_str(token);
    while padded.len() < TOKEN_PAD_WIDTH {
        padded.push(TOKEN_PAD_CHAR);
    }
    padded
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
