//! Response orchestrator — drives one request's event stream to completion.
//!
//! [`run_generation`] wires the pieces together: the generation pipeline and
//! the title producer are merged by the fan-in, every merged event goes
//! through the update applier (mutation + wire write as one step), and the
//! encoded records come out of the returned byte stream.
//!
//! Failure and cleanup policy:
//!
//! - A terminal pipeline fault is converted into an in-stream error status;
//!   no fault reaches the transport once streaming has begun.
//! - A completion flag is set when the merged stream finishes *before* the
//!   channel closes; cleanup distinguishes natural completion from an early
//!   transport close by that flag, never by the close itself.
//! - The conversation is committed to the persistence store when the title
//!   and the final answer are applied, and once more at stream end — on the
//!   early-close path too, so partial content survives a dropped client.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use metrics::counter;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use arbor_core::events::MessageUpdate;
use arbor_core::ids::MessageId;
use arbor_core::messages::{Conversation, MessageFrom};

use crate::abort::AbortRegistry;
use crate::applier::{ApplyError, UpdateApplier};
use crate::engine::{Collaborators, PersistenceStore};
use crate::errors::PipelineError;
use crate::fan_in;
use crate::pipeline::{self, GenerationContext, UpdateStream};
use crate::title;

/// Channel depth between the drive task and the transport.
const OUTPUT_CHANNEL_CAPACITY: usize = 64;

/// Start a generation run, returning the byte stream for the transport.
///
/// The conversation is owned by the run until the stream ends; `target` is
/// the assistant message the run writes into. Fails fast (before any wire
/// output) when the target is missing from the conversation.
pub fn run_generation(
    conversation: Conversation,
    target: MessageId,
    ctx: GenerationContext,
    deps: Collaborators,
    abort: Arc<AbortRegistry>,
) -> Result<impl Stream<Item = Bytes> + Send, ApplyError> {
    let (tx, rx) = mpsc::channel::<Bytes>(OUTPUT_CHANNEL_CAPACITY);

    // Title inputs are snapshotted before the applier takes the conversation.
    let untitled = conversation.is_untitled();
    let first_user_prompt = ctx
        .prompt
        .iter()
        .find(|m| m.from == MessageFrom::User)
        .map(|m| m.content.clone());

    let applier = UpdateApplier::new(conversation, target, tx)?;

    let producers: Vec<UpdateStream> = vec![
        pipeline::run(ctx, deps.clone(), abort),
        title::run(untitled, first_user_prompt, deps.generation.clone()),
    ];
    let merged = fan_in::merge(producers);

    counter!("generations_started_total").increment(1);
    let _task = tokio::spawn(drive(applier, merged, deps.persistence));

    Ok(ReceiverStream::new(rx))
}

async fn drive(
    mut applier: UpdateApplier,
    mut merged: UpdateStream,
    persistence: Arc<dyn PersistenceStore>,
) {
    let mut done_streaming = false;
    let mut closed_early = false;

    while let Some(item) = merged.next().await {
        let event = match item {
            Ok(event) => event,
            Err(PipelineError::ChannelClosed) => {
                closed_early = true;
                break;
            }
            Err(fault) => {
                error!(error = %fault, "generation pipeline failed");
                MessageUpdate::error(fault.to_string())
            }
        };

        let commit_after = matches!(
            event,
            MessageUpdate::Title { .. } | MessageUpdate::FinalAnswer { .. }
        );

        match applier.apply(event).await {
            Ok(()) => {
                if commit_after {
                    commit(&persistence, applier.conversation()).await;
                }
            }
            Err(ApplyError::ChannelClosed) => {
                closed_early = true;
                break;
            }
            Err(e) => {
                // Encoding or target faults indicate a bug, not a client
                // condition; stop the stream rather than emit garbage.
                error!(error = %e, "failed to apply update event");
                break;
            }
        }
    }

    if !closed_early {
        // Set before the channel closes (by dropping the applier's sender):
        // cleanup must never infer completion from the close event alone.
        done_streaming = true;
    }

    let conversation = applier.finish();
    commit(&persistence, &conversation).await;

    if done_streaming {
        debug!(conversation_id = %conversation.id, "stream completed and committed");
    } else {
        info!(
            conversation_id = %conversation.id,
            "transport closed before completion, partial state committed"
        );
    }
}

async fn commit(persistence: &Arc<dyn PersistenceStore>, conversation: &Conversation) {
    if let Err(e) = persistence.save_conversation(conversation).await {
        warn!(conversation_id = %conversation.id, error = %e, "conversation commit failed");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
