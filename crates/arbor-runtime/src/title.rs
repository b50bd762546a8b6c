//! Best-effort conversation title generation.
//!
//! Runs concurrently with the answer pipeline via the fan-in, so a title can
//! reach the client before the answer finishes. Failures are logged and
//! degrade to a prompt-derived fallback; an already-titled conversation
//! produces no events at all.

use std::sync::Arc;

use async_stream::stream;
use tokio::time::timeout;
use tracing::{debug, warn};

use arbor_core::constants::TITLE_TIMEOUT;
use arbor_core::events::MessageUpdate;

use crate::engine::GenerationEngine;
use crate::pipeline::UpdateStream;

/// Words taken from the prompt when the engine can't produce a title.
const FALLBACK_TITLE_WORDS: usize = 5;

/// Produce at most one `Title` event for an untitled conversation.
pub fn run(
    untitled: bool,
    first_user_prompt: Option<String>,
    engine: Arc<dyn GenerationEngine>,
) -> UpdateStream {
    Box::pin(stream! {
        if !untitled {
            return;
        }
        let Some(prompt) = first_user_prompt else {
            debug!("no user prompt to derive a title from");
            return;
        };

        let title = match timeout(TITLE_TIMEOUT, engine.title(&prompt)).await {
            Ok(Ok(title)) if !title.trim().is_empty() => title.trim().to_owned(),
            Ok(Ok(_)) => {
                warn!("title engine returned an empty title, falling back");
                fallback_title(&prompt)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "title generation failed, falling back");
                fallback_title(&prompt)
            }
            Err(_) => {
                warn!("title generation timed out, falling back");
                fallback_title(&prompt)
            }
        };

        yield Ok(MessageUpdate::Title { title });
    })
}

/// First few words of the prompt.
fn fallback_title(prompt: &str) -> String {
    prompt
        .split_whitespace()
        .take(FALLBACK_TITLE_WORDS)
        .collect::<Vec<_>>()
        .join(" ")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineError, EngineResult, GenerationRequest, TokenStream};
    use async_trait::async_trait;
    use futures::StreamExt;

    struct TitleOnly {
        result: EngineResult<String>,
    }

    #[async_trait]
    impl GenerationEngine for TitleOnly {
        async fn stream(&self, _request: GenerationRequest) -> EngineResult<TokenStream> {
            Err(EngineError::other("unused"))
        }

        async fn title(&self, _prompt: &str) -> EngineResult<String> {
            match &self.result {
                Ok(t) => Ok(t.clone()),
                Err(_) => Err(EngineError::backend("title backend down")),
            }
        }
    }

    async fn collect(stream: UpdateStream) -> Vec<MessageUpdate> {
        stream.map(|item| item.unwrap()).collect().await
    }

    #[tokio::test]
    async fn titled_conversation_yields_nothing() {
        let engine = Arc::new(TitleOnly {
            result: Ok("ignored".into()),
        });
        let events = collect(run(false, Some("hello".into()), engine)).await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn no_prompt_yields_nothing() {
        let engine = Arc::new(TitleOnly {
            result: Ok("ignored".into()),
        });
        let events = collect(run(true, None, engine)).await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn engine_title_is_used() {
        let engine = Arc::new(TitleOnly {
            result: Ok("Rust Questions".into()),
        });
        let events = collect(run(true, Some("what is rust?".into()), engine)).await;
        assert_eq!(
            events,
            vec![MessageUpdate::Title {
                title: "Rust Questions".into()
            }]
        );
    }

    #[tokio::test]
    async fn engine_failure_falls_back_to_prompt_words() {
        let engine = Arc::new(TitleOnly {
            result: Err(EngineError::backend("down")),
        });
        let events = collect(run(
            true,
            Some("tell me about borrow checking in rust today".into()),
            engine,
        ))
        .await;
        assert_eq!(
            events,
            vec![MessageUpdate::Title {
                title: "tell me about borrow checking".into()
            }]
        );
    }

    #[test]
    fn fallback_truncates_to_five_words() {
        assert_eq!(fallback_title("a b c d e f g"), "a b c d e");
        assert_eq!(fallback_title("short"), "short");
    }
}
