//! Cross-request cancellation registry.
//!
//! Generation runs poll for aborts per event, which is far too hot a path to
//! hit an authoritative store. The registry keeps an in-memory snapshot of
//! aborted conversation ids, refreshed wholesale from an [`AbortSource`]
//! every second by a background task, so readers see at most one refresh
//! interval of staleness and never block each other on partial writes.
//!
//! This is an explicit service object: constructed once at startup, passed
//! by `Arc` into request handlers, and shut down with the process.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use arbor_core::constants::ABORT_REFRESH_INTERVAL;
use arbor_core::ids::ConversationId;

use crate::engine::EngineResult;

/// Authoritative source of abort requests.
///
/// Real deployments read these from the persistence layer; tests and the
/// bundled server use [`InMemoryAbortSource`].
#[async_trait]
pub trait AbortSource: Send + Sync {
    /// All outstanding abort requests as (conversation, requested-at) pairs.
    async fn fetch(&self) -> EngineResult<Vec<(ConversationId, DateTime<Utc>)>>;
}

/// Periodically-refreshed snapshot of aborted generations.
pub struct AbortRegistry {
    snapshot: RwLock<HashMap<ConversationId, DateTime<Utc>>>,
    cancel: CancellationToken,
}

impl AbortRegistry {
    /// Construct the registry and start its background refresh task.
    #[must_use]
    pub fn start(source: Arc<dyn AbortSource>) -> Arc<Self> {
        let registry = Arc::new(Self {
            snapshot: RwLock::new(HashMap::new()),
            cancel: CancellationToken::new(),
        });

        let refresher = Arc::clone(&registry);
        let _task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(ABORT_REFRESH_INTERVAL);
            loop {
                tokio::select! {
                    () = refresher.cancel.cancelled() => {
                        debug!("abort registry refresh task stopping");
                        break;
                    }
                    _ = interval.tick() => {
                        match source.fetch().await {
                            Ok(entries) => {
                                // Replace wholesale; merging risks serving a
                                // partially-updated view.
                                *refresher.snapshot.write() = entries.into_iter().collect();
                            }
                            Err(e) => warn!(error = %e, "abort snapshot refresh failed"),
                        }
                    }
                }
            }
        });

        registry
    }

    /// Whether an abort for `conversation` was stamped after `started_at`.
    ///
    /// Reads the snapshot only; staleness is bounded by the refresh interval.
    #[must_use]
    pub fn aborted_after(
        &self,
        conversation: &ConversationId,
        started_at: DateTime<Utc>,
    ) -> bool {
        self.snapshot
            .read()
            .get(conversation)
            .is_some_and(|requested_at| *requested_at > started_at)
    }

    /// Stop the background refresh task. Called once at process shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// In-memory abort source, doubling as the abort endpoint's write target.
#[derive(Default)]
pub struct InMemoryAbortSource {
    entries: Mutex<HashMap<ConversationId, DateTime<Utc>>>,
}

impl InMemoryAbortSource {
    /// Record an abort request for a conversation, stamped now.
    pub fn request_abort(&self, conversation: &ConversationId) {
        let _ = self
            .entries
            .lock()
            .insert(conversation.clone(), Utc::now());
    }
}

#[async_trait]
impl AbortSource for InMemoryAbortSource {
    async fn fetch(&self) -> EngineResult<Vec<(ConversationId, DateTime<Utc>)>> {
        Ok(self
            .entries
            .lock()
            .iter()
            .map(|(id, at)| (id.clone(), *at))
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
