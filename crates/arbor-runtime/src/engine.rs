//! Collaborator traits.
//!
//! Everything the pipeline talks to outside its own process boundary lives
//! behind a trait here: model resolution, token generation, web search, tool
//! execution, file storage, and persistence. The runtime only depends on
//! these interfaces; the server wires concrete implementations (or stubs) at
//! startup.
//!
//! Implementors must be `Send + Sync` for use across async tasks.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};

use arbor_core::ids::ConversationId;
use arbor_core::messages::{Conversation, Message, MessageFile};

/// Result type alias for collaborator operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Boxed stream of answer tokens returned by [`GenerationEngine::stream`].
pub type TokenStream = Pin<Box<dyn Stream<Item = EngineResult<String>> + Send>>;

/// Errors raised by collaborators.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The backend reported a failure.
    #[error("backend error: {message}")]
    Backend {
        /// Error description.
        message: String,
        /// Whether retrying could succeed.
        retryable: bool,
    },

    /// The call exceeded its deadline.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Payload encoding/decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Collaborator-specific error.
    #[error("{message}")]
    Other {
        /// Error description.
        message: String,
    },
}

impl EngineError {
    /// A non-retryable backend error.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            retryable: false,
        }
    }

    /// A freeform error.
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Whether this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Backend { retryable, .. } => *retryable,
            Self::Timeout(_) => true,
            Self::Json(_) | Self::Other { .. } => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Model resolution
// ─────────────────────────────────────────────────────────────────────────────

/// A model resolved from its identifier, with capability flags.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedModel {
    /// Model identifier.
    pub id: String,
    /// Human-readable name.
    pub display_name: String,
    /// Whether the model supports native tool-calling.
    pub supports_tools: bool,
    /// Whether the model accepts image inputs.
    pub multimodal: bool,
}

/// Resolves a model identifier to its capabilities.
pub trait ModelResolver: Send + Sync {
    /// Look up a model. `None` when the id is unknown.
    fn resolve(&self, id: &str) -> Option<ResolvedModel>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Generation
// ─────────────────────────────────────────────────────────────────────────────

/// One generation request: the processed prompt plus stage contributions.
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    /// Target model.
    pub model: ResolvedModel,
    /// Prompt messages, root→leaf, with web-search context already injected.
    pub messages: Vec<Message>,
    /// The last message is being extended rather than answered.
    pub continue_message: bool,
    /// Results of the tool-execution stage.
    pub tool_results: Vec<ToolOutcome>,
}

/// The core LLM generation backend.
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    /// Stream answer tokens for a prompt.
    ///
    /// The stream ends when the model finishes; a mid-stream `Err` is fatal
    /// to the pipeline run.
    async fn stream(&self, request: GenerationRequest) -> EngineResult<TokenStream>;

    /// Produce a short conversation title for a user prompt.
    async fn title(&self, prompt: &str) -> EngineResult<String>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Web search
// ─────────────────────────────────────────────────────────────────────────────

/// One ranked search source with its extracted text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSearchSource {
    /// Page title.
    pub title: String,
    /// Page URL.
    pub link: String,
    /// Extracted text, filled by the scrape step.
    #[serde(default)]
    pub text: String,
}

/// The result of a completed web-search stage.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSearchBundle {
    /// The query that was searched.
    pub query: String,
    /// Ranked sources with extracted text.
    pub sources: Vec<WebSearchSource>,
}

/// Web-search collaborator: query building, provider search, scraping.
///
/// Ranking happens inside [`search`](SearchEngine::search) — sources come
/// back best-first.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Derive a search query from the prompt messages.
    async fn build_query(&self, prompt: &[Message]) -> EngineResult<String>;

    /// Run the query against the configured provider.
    async fn search(&self, query: &str) -> EngineResult<Vec<WebSearchSource>>;

    /// Extract the text of one source.
    async fn scrape(&self, source: &WebSearchSource) -> EngineResult<String>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tools
// ─────────────────────────────────────────────────────────────────────────────

/// A tool available for selection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name, the key of the caller's preference map.
    pub name: String,
    /// What the tool does, shown to the planning backend.
    pub description: String,
}

/// A planned invocation of a tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool name.
    pub name: String,
    /// Call parameters.
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

/// The result of one executed tool call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutcome {
    /// The call that produced this outcome.
    pub call: ToolCall,
    /// Tool output text.
    pub output: String,
    /// Whether the tool reported failure.
    pub is_error: bool,
}

/// Tool collaborator: catalog, call planning, execution.
#[async_trait]
pub trait ToolEngine: Send + Sync {
    /// All tools this engine can run.
    fn catalog(&self) -> Vec<ToolSpec>;

    /// Ask the backend which of the selected tools to call for this prompt.
    async fn plan(&self, prompt: &[Message], tools: &[ToolSpec]) -> EngineResult<Vec<ToolCall>>;

    /// Execute one planned call.
    async fn execute(&self, call: &ToolCall) -> EngineResult<ToolOutcome>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Files
// ─────────────────────────────────────────────────────────────────────────────

/// Content-addressed file storage.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Store file bytes, returning a reference-kind [`MessageFile`] whose
    /// `value` is the content hash.
    async fn upload(
        &self,
        conversation: &ConversationId,
        name: &str,
        mime: &str,
        bytes: Bytes,
    ) -> EngineResult<MessageFile>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Persistence
// ─────────────────────────────────────────────────────────────────────────────

/// Durable conversation storage.
///
/// The orchestrator commits at stage boundaries (title, final answer) and at
/// stream end, including the early-close partial path.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Durably save the conversation state.
    async fn save_conversation(&self, conversation: &Conversation) -> EngineResult<()>;
}

/// No-op persistence used until a real store is wired in.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopPersistence;

#[async_trait]
impl PersistenceStore for NoopPersistence {
    async fn save_conversation(&self, _conversation: &Conversation) -> EngineResult<()> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bundle
// ─────────────────────────────────────────────────────────────────────────────

/// Every collaborator the pipeline needs, wired once at startup.
#[derive(Clone)]
pub struct Collaborators {
    /// Model resolver.
    pub models: Arc<dyn ModelResolver>,
    /// Generation backend.
    pub generation: Arc<dyn GenerationEngine>,
    /// Web-search backend.
    pub search: Arc<dyn SearchEngine>,
    /// Tool backend.
    pub tools: Arc<dyn ToolEngine>,
    /// File store.
    pub files: Arc<dyn FileStore>,
    /// Persistence store.
    pub persistence: Arc<dyn PersistenceStore>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
