//! Development collaborators.
//!
//! In-process stand-ins for the external backends so the server runs end to
//! end out of the box: a static model registry, a content-hash file store,
//! and an echoing generation backend. Production deployments replace these
//! when wiring [`arbor_runtime::engine::Collaborators`] in `main`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use arbor_core::ids::ConversationId;
use arbor_core::messages::{FileKind, Message, MessageFile, MessageFrom};
use arbor_runtime::engine::{
    Collaborators, EngineError, EngineResult, FileStore, GenerationEngine, GenerationRequest,
    ModelResolver, NoopPersistence, ResolvedModel, SearchEngine, TokenStream, ToolCall,
    ToolEngine, ToolOutcome, ToolSpec, WebSearchSource,
};

/// Model registry backed by a fixed list.
pub struct StaticModelRegistry {
    models: Vec<ResolvedModel>,
}

impl StaticModelRegistry {
    /// Registry serving exactly these models.
    #[must_use]
    pub fn new(models: Vec<ResolvedModel>) -> Self {
        Self { models }
    }

    /// The built-in development models: one plain, one tool-capable.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(vec![
            ResolvedModel {
                id: "dev/echo".into(),
                display_name: "Echo (dev)".into(),
                supports_tools: false,
                multimodal: false,
            },
            ResolvedModel {
                id: "dev/echo-tools".into(),
                display_name: "Echo with tools (dev)".into(),
                supports_tools: true,
                multimodal: false,
            },
        ])
    }
}

impl ModelResolver for StaticModelRegistry {
    fn resolve(&self, id: &str) -> Option<ResolvedModel> {
        self.models.iter().find(|m| m.id == id).cloned()
    }
}

/// Content-addressed in-memory file store.
#[derive(Default)]
pub struct Sha256FileStore {
    blobs: Mutex<HashMap<String, Bytes>>,
}

#[async_trait]
impl FileStore for Sha256FileStore {
    async fn upload(
        &self,
        _conversation: &ConversationId,
        name: &str,
        mime: &str,
        bytes: Bytes,
    ) -> EngineResult<MessageFile> {
        let sha = format!("{:x}", Sha256::digest(&bytes));
        let _ = self.blobs.lock().insert(sha.clone(), bytes);
        Ok(MessageFile {
            kind: FileKind::Reference,
            name: name.to_owned(),
            mime: mime.to_owned(),
            value: sha,
        })
    }
}

/// Echoes the last user message back, token by token.
pub struct EchoGeneration;

#[async_trait]
impl GenerationEngine for EchoGeneration {
    async fn stream(&self, request: GenerationRequest) -> EngineResult<TokenStream> {
        let prompt = last_user_content(&request.messages)
            .ok_or_else(|| EngineError::backend("prompt contains no user message"))?;
        let tokens: Vec<String> = prompt
            .split_inclusive(' ')
            .map(ToOwned::to_owned)
            .collect();
        Ok(Box::pin(futures::stream::iter(
            std::iter::once(Ok("You said: ".to_owned())).chain(tokens.into_iter().map(Ok)),
        )))
    }

    async fn title(&self, prompt: &str) -> EngineResult<String> {
        Ok(prompt.split_whitespace().take(5).collect::<Vec<_>>().join(" "))
    }
}

/// Search backend that never finds anything; the pipeline degrades cleanly.
pub struct NoResultsSearch;

#[async_trait]
impl SearchEngine for NoResultsSearch {
    async fn build_query(&self, prompt: &[Message]) -> EngineResult<String> {
        Ok(last_user_content(prompt)
            .unwrap_or_default()
            .split_whitespace()
            .take(10)
            .collect::<Vec<_>>()
            .join(" "))
    }

    async fn search(&self, _query: &str) -> EngineResult<Vec<WebSearchSource>> {
        Ok(Vec::new())
    }

    async fn scrape(&self, _source: &WebSearchSource) -> EngineResult<String> {
        Err(EngineError::other("nothing to scrape"))
    }
}

/// Tool backend with an empty catalog.
pub struct NoToolEngine;

#[async_trait]
impl ToolEngine for NoToolEngine {
    fn catalog(&self) -> Vec<ToolSpec> {
        Vec::new()
    }

    async fn plan(&self, _prompt: &[Message], _tools: &[ToolSpec]) -> EngineResult<Vec<ToolCall>> {
        Ok(Vec::new())
    }

    async fn execute(&self, call: &ToolCall) -> EngineResult<ToolOutcome> {
        Err(EngineError::other(format!("unknown tool {}", call.name)))
    }
}

fn last_user_content(messages: &[Message]) -> Option<String> {
    messages
        .iter()
        .rev()
        .find(|m| m.from == MessageFrom::User)
        .map(|m| m.content.clone())
}

/// The full development wiring.
#[must_use]
pub fn collaborators() -> Collaborators {
    Collaborators {
        models: Arc::new(StaticModelRegistry::with_defaults()),
        generation: Arc::new(EchoGeneration),
        search: Arc::new(NoResultsSearch),
        tools: Arc::new(NoToolEngine),
        files: Arc::new(Sha256FileStore::default()),
        persistence: Arc::new(NoopPersistence),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::messages::{Conversation, NewMessage};
    use futures::StreamExt;

    #[test]
    fn registry_resolves_known_models() {
        let registry = StaticModelRegistry::with_defaults();
        let model = registry.resolve("dev/echo").unwrap();
        assert!(!model.supports_tools);
        assert!(registry.resolve("dev/echo-tools").unwrap().supports_tools);
        assert!(registry.resolve("missing").is_none());
    }

    #[tokio::test]
    async fn file_store_hashes_content() {
        let store = Sha256FileStore::default();
        let file = store
            .upload(
                &ConversationId::new(),
                "a.txt",
                "text/plain",
                Bytes::from_static(b"hello"),
            )
            .await
            .unwrap();
        assert_eq!(file.kind, FileKind::Reference);
        // sha256("hello")
        assert_eq!(
            file.value,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[tokio::test]
    async fn echo_generation_replays_prompt() {
        let mut conv = Conversation::new("dev/echo");
        let root = conv
            .add_child(NewMessage::user("hi there", vec![]), None)
            .unwrap();
        let prompt: Vec<Message> = conv
            .build_subtree(&root)
            .unwrap()
            .into_iter()
            .cloned()
            .collect();

        let stream = EchoGeneration
            .stream(GenerationRequest {
                model: StaticModelRegistry::with_defaults()
                    .resolve("dev/echo")
                    .unwrap(),
                messages: prompt,
                continue_message: false,
                tool_results: vec![],
            })
            .await
            .unwrap();

        let text: String = stream.map(|t| t.unwrap()).collect().await;
        assert_eq!(text, "You said: hi there");
    }
}
