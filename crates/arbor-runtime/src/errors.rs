//! Runtime error types.

use thiserror::Error;

use crate::engine::EngineError;

/// Faults that terminate a pipeline run.
///
/// Collaborator failures in optional stages (search, scrape, individual
/// tools, title) are recovered in place and never surface here; only the
/// core generation call and infrastructure failures are terminal.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The generation engine failed. Fatal to the run.
    #[error("generation failed: {0}")]
    Generation(#[source] EngineError),

    /// The consumer dropped the output channel mid-stream.
    #[error("output channel closed by the consumer")]
    ChannelClosed,

    /// Unexpected internal failure.
    #[error("{0}")]
    Internal(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
