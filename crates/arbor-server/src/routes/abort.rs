//! `POST /conversations/{id}/abort` — request cancellation of a running
//! generation.
//!
//! The abort lands in the authoritative source; running pipelines observe it
//! through the registry snapshot within one refresh interval.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use tracing::info;

use arbor_core::ids::ConversationId;

use crate::server::AppState;

/// Record an abort request for a conversation.
pub async fn abort(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    let conversation = ConversationId::from(id);
    info!(conversation_id = %conversation, "abort requested");
    state.abort_source.request_abort(&conversation);
    StatusCode::NO_CONTENT
}
