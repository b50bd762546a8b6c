//! `POST /conversations/generate` — the streaming chat endpoint.
//!
//! The handler validates the request, grows the conversation tree for one of
//! the three request shapes (new turn, retry, continuation), then hands the
//! conversation to the runtime orchestrator and streams its newline-delimited
//! JSON event records back. Every failure in this file happens before the
//! first streamed byte; after that point errors travel in-stream.

use std::collections::HashMap;
use std::convert::Infallible;

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine as _;
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use tokio::time::timeout;
use tracing::{info, warn};

use arbor_core::constants::{FILE_UPLOAD_TIMEOUT, MAX_INLINE_FILE_BYTES};
use arbor_core::ids::MessageId;
use arbor_core::messages::{Conversation, FileKind, Message, MessageFile, MessageFrom, NewMessage};
use arbor_runtime::orchestrator::run_generation;
use arbor_runtime::pipeline::GenerationContext;

use crate::rejection::Rejection;
use crate::server::AppState;

/// Request body for a generation run.
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    /// The conversation state, owned by this request for the stream's life.
    pub conversation: Conversation,
    /// Parent message to append to, or the target for a retry/continuation.
    #[serde(default)]
    pub id: Option<MessageId>,
    /// New user prompt text.
    #[serde(default)]
    pub inputs: Option<String>,
    /// Re-generate at `id` instead of appending.
    #[serde(default)]
    pub is_retry: bool,
    /// Extend the message at `id` instead of answering it.
    #[serde(default)]
    pub is_continue: bool,
    /// Run the web-search stage if the model is eligible.
    #[serde(default)]
    pub web_search: bool,
    /// Per-tool preference map.
    #[serde(default)]
    pub tools: HashMap<String, bool>,
    /// Attached files, each inline base64 or a store reference.
    #[serde(default)]
    pub files: Vec<MessageFile>,
}

/// Handle one generation request.
pub async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Response, Rejection> {
    let prompted_at = Utc::now();
    let mut conversation = request.conversation;

    let model = state
        .collaborators
        .models
        .resolve(&conversation.model)
        .ok_or(Rejection::ModelNotFound)?;

    if let Some(id) = &request.id {
        if !id.is_well_formed() {
            return Err(Rejection::BadRequest("malformed message id".into()));
        }
    }

    let inputs = normalize_inputs(request.inputs)?;
    let files = upload_files(&state, &conversation, request.files).await?;

    let shaped = shape_tree(
        &mut conversation,
        request.id.as_ref(),
        inputs,
        request.is_retry,
        request.is_continue,
        files,
    )?;
    if shaped.prompt.is_empty() {
        return Err(Rejection::Internal("Failed to create prompt".into()));
    }

    info!(
        conversation_id = %conversation.id,
        model = %model.id,
        is_retry = request.is_retry,
        is_continue = request.is_continue,
        web_search = request.web_search,
        "starting generation"
    );

    let ctx = GenerationContext {
        conversation_id: conversation.id.clone(),
        model,
        prompt: shaped.prompt,
        is_continue: request.is_continue,
        web_search: request.web_search,
        tools_preference: request.tools,
        assistant_bound: conversation.assistant_id.is_some(),
        prompted_at,
    };

    let stream = run_generation(
        conversation,
        shaped.target,
        ctx,
        state.collaborators.clone(),
        state.abort.clone(),
    )
    .map_err(|e| Rejection::Internal(format!("Failed to create message: {e}")))?;

    let body = Body::from_stream(stream.map(Ok::<_, Infallible>));
    Ok(([(header::CONTENT_TYPE, "text/event-stream")], body).into_response())
}

/// Normalize CRLF and reject empty prompt text.
fn normalize_inputs(inputs: Option<String>) -> Result<Option<String>, Rejection> {
    match inputs {
        None => Ok(None),
        Some(text) => {
            let normalized = text.replace("\r\n", "\n");
            if normalized.is_empty() {
                return Err(Rejection::BadRequest("inputs must not be empty".into()));
            }
            Ok(Some(normalized))
        }
    }
}

/// Resolve attached files: references pass through, inline payloads are
/// decoded, size-checked, and uploaded to the content store.
///
/// Upload failures are non-fatal — the file's contribution is dropped.
async fn upload_files(
    state: &AppState,
    conversation: &Conversation,
    files: Vec<MessageFile>,
) -> Result<Vec<MessageFile>, Rejection> {
    let mut resolved = Vec::with_capacity(files.len());
    for file in files {
        match file.kind {
            FileKind::Reference => resolved.push(file),
            FileKind::Inline => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(&file.value)
                    .map_err(|_| {
                        Rejection::BadRequest(format!("file {} is not valid base64", file.name))
                    })?;
                if bytes.len() > MAX_INLINE_FILE_BYTES {
                    return Err(Rejection::PayloadTooLarge);
                }

                let upload = state.collaborators.files.upload(
                    &conversation.id,
                    &file.name,
                    &file.mime,
                    Bytes::from(bytes),
                );
                match timeout(FILE_UPLOAD_TIMEOUT, upload).await {
                    Ok(Ok(reference)) => resolved.push(reference),
                    Ok(Err(e)) => {
                        warn!(name = %file.name, error = %e, "file upload failed, dropping file");
                    }
                    Err(_) => {
                        warn!(name = %file.name, "file upload timed out, dropping file");
                    }
                }
            }
        }
    }
    Ok(resolved)
}

/// The write target and prompt path produced by tree shaping.
struct ShapedRequest {
    target: MessageId,
    prompt: Vec<Message>,
}

/// Grow the tree for the request shape and pick the write target.
///
/// - Normal turn: append a user message and a blank assistant child.
/// - Retry of a user message with new text: branch a sibling user message
///   (the edit) and give it a blank assistant child.
/// - Retry of an assistant message: branch a blank assistant sibling; the
///   prompt excludes the answer being retried.
/// - Continuation: write into the leaf itself.
fn shape_tree(
    conversation: &mut Conversation,
    id: Option<&MessageId>,
    inputs: Option<String>,
    is_retry: bool,
    is_continue: bool,
    files: Vec<MessageFile>,
) -> Result<ShapedRequest, Rejection> {
    if is_continue {
        let id = id.ok_or_else(|| {
            Rejection::BadRequest("continuation requires a message id".into())
        })?;
        return match conversation.is_leaf(id) {
            None => Err(Rejection::MessageNotFound),
            Some(false) => Err(Rejection::NotALeaf),
            Some(true) => Ok(ShapedRequest {
                target: id.clone(),
                prompt: clone_path(conversation, id)?,
            }),
        };
    }

    if is_retry {
        let id = id
            .ok_or_else(|| Rejection::BadRequest("retry requires a message id".into()))?;
        let retried_from = conversation
            .message(id)
            .ok_or(Rejection::MessageNotFound)?
            .from;

        return match (retried_from, inputs) {
            // Editing a user message: branch the edit, answer under it.
            (MessageFrom::User, Some(text)) => {
                let new_user =
                    conversation.add_sibling(NewMessage::user(text, files), id)?;
                let target =
                    conversation.add_child(NewMessage::blank_assistant(), Some(&new_user))?;
                Ok(ShapedRequest {
                    target,
                    prompt: clone_path(conversation, &new_user)?,
                })
            }
            // Regenerating an assistant answer: branch a blank sibling.
            (MessageFrom::Assistant, _) => {
                let target = conversation.add_sibling(NewMessage::blank_assistant(), id)?;
                let mut prompt = clone_path(conversation, id)?;
                let _ = prompt.pop(); // the retried answer is not part of its own prompt
                Ok(ShapedRequest { target, prompt })
            }
            (MessageFrom::User, None) => Err(Rejection::BadRequest(
                "retrying a user message requires new content".into(),
            )),
            (MessageFrom::System, _) => {
                Err(Rejection::BadRequest("cannot retry a system message".into()))
            }
        };
    }

    // Normal linear turn: user message and blank assistant, back to back.
    let new_user = conversation.add_child(
        NewMessage::user(inputs.unwrap_or_default(), files),
        id,
    )?;
    let target = conversation.add_child(NewMessage::blank_assistant(), Some(&new_user))?;
    Ok(ShapedRequest {
        target,
        prompt: clone_path(conversation, &new_user)?,
    })
}

fn clone_path(
    conversation: &Conversation,
    id: &MessageId,
) -> Result<Vec<Message>, Rejection> {
    Ok(conversation
        .build_subtree(id)?
        .into_iter()
        .cloned()
        .collect())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
