//! Pre-stream request rejections.
//!
//! Everything here happens before the first byte of the event stream: once
//! streaming begins, failures travel in-stream as error statuses instead
//! (see the runtime's orchestrator).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use arbor_core::tree::TreeError;

/// A request rejected before streaming started.
#[derive(Debug, Error)]
pub enum Rejection {
    /// The conversation's model id is not served here.
    #[error("Model not found")]
    ModelNotFound,

    /// A referenced message id is absent from the conversation.
    #[error("Message not found")]
    MessageNotFound,

    /// Continuation was requested against a message that has children.
    #[error("Can only continue the last message")]
    NotALeaf,

    /// Malformed flags or payload.
    #[error("{0}")]
    BadRequest(String),

    /// An inline file exceeds the size cap.
    #[error("File too large, should be <10MB")]
    PayloadTooLarge,

    /// The tree failed to produce a valid write target or prompt.
    #[error("{0}")]
    Internal(String),
}

impl Rejection {
    /// HTTP status for this rejection.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::ModelNotFound | Self::MessageNotFound => StatusCode::NOT_FOUND,
            Self::NotALeaf | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

impl From<TreeError> for Rejection {
    fn from(err: TreeError) -> Self {
        match err {
            TreeError::NotFound(_) => Self::MessageNotFound,
            TreeError::RootExists | TreeError::RootSibling(_) | TreeError::Corrupt { .. } => {
                Self::Internal(format!("Failed to create message: {err}"))
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
