//! Generation pipeline — the per-request stage state machine.
//!
//! `STARTED → [WEBSEARCH] → [TOOL_SELECTION → TOOL_EXECUTION] → GENERATE →
//! {FINAL | ERROR}`. Bracketed stages are conditional on model capabilities
//! and request flags. The pipeline runs as a task writing typed events into
//! a channel; [`run`] returns the receiving side as a stream for the fan-in.
//!
//! Failure policy: search, scrape, and individual tool calls recover locally
//! as in-stream error statuses; the core generation call is fatal and
//! surfaces as a terminal stream fault for the orchestrator to convert.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, instrument, warn};

use arbor_core::events::{MessageUpdate, StatusKind};
use arbor_core::ids::ConversationId;
use arbor_core::messages::Message;

use crate::engine::{Collaborators, GenerationRequest, ResolvedModel};
use crate::errors::PipelineError;
use crate::fan_in::EventStream;
use crate::{tools, websearch};

/// Merged event stream type produced by the pipeline and the title task.
pub type UpdateStream = EventStream<MessageUpdate, PipelineError>;

/// Sender half used by the pipeline stages.
pub(crate) type EventSender = mpsc::Sender<Result<MessageUpdate, PipelineError>>;

/// Channel depth between the pipeline task and the fan-in.
const STAGE_CHANNEL_CAPACITY: usize = 32;

/// Everything a pipeline run needs to know about its request.
///
/// The prompt is a snapshot of the root→target path; the persisted tree is
/// never touched from here.
#[derive(Clone, Debug)]
pub struct GenerationContext {
    /// Conversation this run writes into, the abort-registry key.
    pub conversation_id: ConversationId,
    /// Resolved target model.
    pub model: ResolvedModel,
    /// Prompt messages, root→leaf.
    pub prompt: Vec<Message>,
    /// The target message is being extended, not answered afresh.
    pub is_continue: bool,
    /// The caller asked for web search.
    pub web_search: bool,
    /// Per-tool preference map from the caller.
    pub tools_preference: HashMap<String, bool>,
    /// The conversation is bound to a preset assistant.
    pub assistant_bound: bool,
    /// When the request arrived; aborts stamped after this interrupt the run.
    pub prompted_at: DateTime<Utc>,
}

impl GenerationContext {
    fn websearch_applies(&self) -> bool {
        !self.is_continue && !self.model.supports_tools && self.web_search && !self.assistant_bound
    }

    fn tools_apply(&self) -> bool {
        self.model.supports_tools && !self.assistant_bound
    }
}

/// Send one event downstream, failing with `ChannelClosed` if the consumer
/// is gone.
pub(crate) async fn emit(tx: &EventSender, event: MessageUpdate) -> Result<(), PipelineError> {
    tx.send(Ok(event))
        .await
        .map_err(|_| PipelineError::ChannelClosed)
}

/// Start the pipeline for one request, returning its event stream.
pub fn run(
    ctx: GenerationContext,
    deps: Collaborators,
    abort: Arc<crate::abort::AbortRegistry>,
) -> UpdateStream {
    let (tx, rx) = mpsc::channel(STAGE_CHANNEL_CAPACITY);
    let _task = tokio::spawn(async move {
        if let Err(fault) = drive(ctx, &deps, &abort, &tx).await {
            if matches!(fault, PipelineError::ChannelClosed) {
                debug!("pipeline consumer went away, stopping");
            } else {
                // Terminal fault: re-raise through the stream for the
                // orchestrator to surface.
                let _ = tx.send(Err(fault)).await;
            }
        }
    });
    Box::pin(ReceiverStream::new(rx))
}

#[instrument(skip_all, fields(conversation_id = %ctx.conversation_id, model = %ctx.model.id))]
async fn drive(
    ctx: GenerationContext,
    deps: &Collaborators,
    abort: &crate::abort::AbortRegistry,
    tx: &EventSender,
) -> Result<(), PipelineError> {
    emit(
        tx,
        MessageUpdate::Status {
            status: StatusKind::Started,
            message: None,
        },
    )
    .await?;

    let search_bundle = if ctx.websearch_applies() {
        websearch::run(&ctx, deps, tx).await?
    } else {
        None
    };

    let mut tool_results = Vec::new();
    if ctx.tools_apply() {
        let selected = tools::pick(&deps.tools.catalog(), &ctx.tools_preference);
        if tools::requires_execution(&selected) {
            tool_results = tools::run(&ctx, &selected, deps, tx).await?;
        } else {
            debug!("only direct answer selected, skipping tool execution");
        }
    }

    let messages = websearch::inject_context(ctx.prompt.clone(), search_bundle.as_ref());
    generate(&ctx, messages, tool_results, deps, abort, tx).await
}

/// The GENERATE stage: stream tokens from the engine, polling the abort
/// registry, then emit the authoritative final answer.
async fn generate(
    ctx: &GenerationContext,
    messages: Vec<Message>,
    tool_results: Vec<crate::engine::ToolOutcome>,
    deps: &Collaborators,
    abort: &crate::abort::AbortRegistry,
    tx: &EventSender,
) -> Result<(), PipelineError> {
    let request = GenerationRequest {
        model: ctx.model.clone(),
        messages,
        continue_message: ctx.is_continue,
        tool_results,
    };

    let mut stream = deps
        .generation
        .stream(request)
        .await
        .map_err(PipelineError::Generation)?;

    let mut answer = String::new();
    let mut produced_output = false;
    let mut interrupted = false;

    while let Some(item) = stream.next().await {
        let token = item.map_err(PipelineError::Generation)?;

        if abort.aborted_after(&ctx.conversation_id, ctx.prompted_at) {
            info!(conversation_id = %ctx.conversation_id, "abort observed, interrupting generation");
            interrupted = true;
            break;
        }

        if !token.is_empty() {
            produced_output = true;
        }
        answer.push_str(&token);
        emit(tx, MessageUpdate::Stream { token }).await?;
    }

    if produced_output || interrupted {
        emit(
            tx,
            MessageUpdate::FinalAnswer {
                text: answer,
                interrupted,
            },
        )
        .await?;
    } else {
        // Silent empty success is a failure.
        warn!(conversation_id = %ctx.conversation_id, "generation completed without output");
        emit(tx, MessageUpdate::error("no output was generated")).await?;
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abort::{AbortRegistry, InMemoryAbortSource};
    use crate::engine::{
        EngineError, EngineResult, FileStore, GenerationEngine, ModelResolver, NoopPersistence,
        SearchEngine, TokenStream, ToolCall, ToolEngine, ToolOutcome, ToolSpec, WebSearchSource,
    };
    use arbor_core::ids::ConversationId;
    use arbor_core::messages::{MessageFile, NewMessage};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FixedModels;
    impl ModelResolver for FixedModels {
        fn resolve(&self, _id: &str) -> Option<ResolvedModel> {
            None
        }
    }

    struct FakeGeneration {
        tokens: Vec<&'static str>,
        fail: bool,
    }

    #[async_trait]
    impl GenerationEngine for FakeGeneration {
        async fn stream(&self, _request: GenerationRequest) -> EngineResult<TokenStream> {
            if self.fail {
                return Err(EngineError::backend("model unavailable"));
            }
            let tokens = self.tokens.clone();
            Ok(Box::pin(futures::stream::iter(
                tokens.into_iter().map(|t| Ok(t.to_owned())),
            )))
        }

        async fn title(&self, _prompt: &str) -> EngineResult<String> {
            Ok("A Title".into())
        }
    }

    #[derive(Default)]
    struct CountingSearch {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SearchEngine for CountingSearch {
        async fn build_query(&self, _prompt: &[Message]) -> EngineResult<String> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("rust streams".into())
        }

        async fn search(&self, _query: &str) -> EngineResult<Vec<WebSearchSource>> {
            Ok(vec![WebSearchSource {
                title: "Result".into(),
                link: "https://example.com".into(),
                text: String::new(),
            }])
        }

        async fn scrape(&self, _source: &WebSearchSource) -> EngineResult<String> {
            Ok("page text".into())
        }
    }

    #[derive(Default)]
    struct FakeTools {
        specs: Vec<ToolSpec>,
        plan_calls: AtomicUsize,
        fail_execution: bool,
    }

    #[async_trait]
    impl ToolEngine for FakeTools {
        fn catalog(&self) -> Vec<ToolSpec> {
            self.specs.clone()
        }

        async fn plan(
            &self,
            _prompt: &[Message],
            tools: &[ToolSpec],
        ) -> EngineResult<Vec<ToolCall>> {
            let _ = self.plan_calls.fetch_add(1, Ordering::SeqCst);
            Ok(tools
                .iter()
                .filter(|t| t.name != crate::tools::DIRECT_ANSWER_TOOL)
                .map(|t| ToolCall {
                    name: t.name.clone(),
                    parameters: serde_json::Map::new(),
                })
                .collect())
        }

        async fn execute(&self, call: &ToolCall) -> EngineResult<ToolOutcome> {
            if self.fail_execution {
                return Err(EngineError::backend("tool crashed"));
            }
            Ok(ToolOutcome {
                call: call.clone(),
                output: "tool output".into(),
                is_error: false,
            })
        }
    }

    struct NullFiles;

    #[async_trait]
    impl FileStore for NullFiles {
        async fn upload(
            &self,
            _conversation: &ConversationId,
            _name: &str,
            _mime: &str,
            _bytes: Bytes,
        ) -> EngineResult<MessageFile> {
            Err(EngineError::other("unused"))
        }
    }

    fn collaborators(
        generation: FakeGeneration,
        search: Arc<CountingSearch>,
        tool_engine: Arc<FakeTools>,
    ) -> Collaborators {
        Collaborators {
            models: Arc::new(FixedModels),
            generation: Arc::new(generation),
            search,
            tools: tool_engine,
            files: Arc::new(NullFiles),
            persistence: Arc::new(NoopPersistence),
        }
    }

    fn model(supports_tools: bool) -> ResolvedModel {
        ResolvedModel {
            id: "test-model".into(),
            display_name: "Test".into(),
            supports_tools,
            multimodal: false,
        }
    }

    fn context(model: ResolvedModel, web_search: bool) -> GenerationContext {
        let mut conv = arbor_core::messages::Conversation::new("test-model");
        let root = conv
            .add_child(NewMessage::user("what is rust?", vec![]), None)
            .unwrap();
        let prompt: Vec<Message> = conv
            .build_subtree(&root)
            .unwrap()
            .into_iter()
            .cloned()
            .collect();
        GenerationContext {
            conversation_id: conv.id,
            model,
            prompt,
            is_continue: false,
            web_search,
            tools_preference: HashMap::new(),
            assistant_bound: false,
            prompted_at: Utc::now(),
        }
    }

    fn idle_registry() -> Arc<AbortRegistry> {
        AbortRegistry::start(Arc::new(InMemoryAbortSource::default()))
    }

    async fn collect(stream: UpdateStream) -> Vec<MessageUpdate> {
        stream
            .map(|item| item.expect("no terminal fault expected"))
            .collect()
            .await
    }

    #[tokio::test]
    async fn starts_with_started_status_and_ends_with_final_answer() {
        let deps = collaborators(
            FakeGeneration {
                tokens: vec!["Hel", "lo"],
                fail: false,
            },
            Arc::new(CountingSearch::default()),
            Arc::new(FakeTools::default()),
        );
        let events = collect(run(context(model(false), false), deps, idle_registry())).await;

        assert_eq!(
            events.first(),
            Some(&MessageUpdate::Status {
                status: StatusKind::Started,
                message: None
            })
        );
        assert_eq!(
            events.last(),
            Some(&MessageUpdate::FinalAnswer {
                text: "Hello".into(),
                interrupted: false
            })
        );
    }

    #[tokio::test]
    async fn websearch_runs_once_for_toolless_model_with_flag() {
        let search = Arc::new(CountingSearch::default());
        let deps = collaborators(
            FakeGeneration {
                tokens: vec!["ok"],
                fail: false,
            },
            search.clone(),
            Arc::new(FakeTools::default()),
        );
        let events = collect(run(context(model(false), true), deps, idle_registry())).await;

        assert_eq!(search.calls.load(Ordering::SeqCst), 1, "exactly one search");

        // Search progress precedes generation output.
        let first_progress = events
            .iter()
            .position(|e| {
                matches!(
                    e,
                    MessageUpdate::Status {
                        status: StatusKind::Progress,
                        ..
                    }
                )
            })
            .expect("search progress event");
        let first_token = events
            .iter()
            .position(|e| matches!(e, MessageUpdate::Stream { .. }))
            .expect("stream token");
        assert!(first_progress < first_token);
    }

    #[tokio::test]
    async fn websearch_skipped_for_tool_capable_model() {
        let search = Arc::new(CountingSearch::default());
        let deps = collaborators(
            FakeGeneration {
                tokens: vec!["ok"],
                fail: false,
            },
            search.clone(),
            Arc::new(FakeTools::default()),
        );
        let _ = collect(run(context(model(true), true), deps, idle_registry())).await;
        assert_eq!(search.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn websearch_skipped_for_continuation() {
        let search = Arc::new(CountingSearch::default());
        let deps = collaborators(
            FakeGeneration {
                tokens: vec!["ok"],
                fail: false,
            },
            search.clone(),
            Arc::new(FakeTools::default()),
        );
        let mut ctx = context(model(false), true);
        ctx.is_continue = true;
        let _ = collect(run(ctx, deps, idle_registry())).await;
        assert_eq!(search.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn websearch_skipped_for_bound_assistant() {
        let search = Arc::new(CountingSearch::default());
        let deps = collaborators(
            FakeGeneration {
                tokens: vec!["ok"],
                fail: false,
            },
            search.clone(),
            Arc::new(FakeTools::default()),
        );
        let mut ctx = context(model(false), true);
        ctx.assistant_bound = true;
        let _ = collect(run(ctx, deps, idle_registry())).await;
        assert_eq!(search.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_generation_synthesizes_error_status() {
        // Only empty tokens, no final answer: silent success is failure.
        let deps = collaborators(
            FakeGeneration {
                tokens: vec!["", ""],
                fail: false,
            },
            Arc::new(CountingSearch::default()),
            Arc::new(FakeTools::default()),
        );
        let events = collect(run(context(model(false), false), deps, idle_registry())).await;

        assert!(!events
            .iter()
            .any(|e| matches!(e, MessageUpdate::FinalAnswer { .. })));
        assert_eq!(
            events.last(),
            Some(&MessageUpdate::error("no output was generated"))
        );
    }

    #[tokio::test]
    async fn generation_failure_is_a_terminal_stream_fault() {
        let deps = collaborators(
            FakeGeneration {
                tokens: vec![],
                fail: true,
            },
            Arc::new(CountingSearch::default()),
            Arc::new(FakeTools::default()),
        );
        let items: Vec<_> = run(context(model(false), false), deps, idle_registry())
            .collect()
            .await;

        assert_matches::assert_matches!(
            items.last(),
            Some(Err(PipelineError::Generation(_)))
        );
    }

    #[tokio::test]
    async fn tool_failure_is_recovered_not_fatal() {
        let tool_engine = Arc::new(FakeTools {
            specs: vec![
                ToolSpec {
                    name: crate::tools::DIRECT_ANSWER_TOOL.into(),
                    description: "answer directly".into(),
                },
                ToolSpec {
                    name: "calculator".into(),
                    description: "math".into(),
                },
            ],
            plan_calls: AtomicUsize::new(0),
            fail_execution: true,
        });
        let deps = collaborators(
            FakeGeneration {
                tokens: vec!["fine"],
                fail: false,
            },
            Arc::new(CountingSearch::default()),
            tool_engine,
        );
        let mut ctx = context(model(true), false);
        let _ = ctx.tools_preference.insert("calculator".into(), true);

        let events = collect(run(ctx, deps, idle_registry())).await;

        assert!(events.iter().any(|e| matches!(
            e,
            MessageUpdate::Status {
                status: StatusKind::Error,
                ..
            }
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, MessageUpdate::FinalAnswer { .. })));
    }

    #[tokio::test]
    async fn only_direct_answer_skips_tool_execution() {
        let tool_engine = Arc::new(FakeTools {
            specs: vec![
                ToolSpec {
                    name: crate::tools::DIRECT_ANSWER_TOOL.into(),
                    description: "answer directly".into(),
                },
                ToolSpec {
                    name: "calculator".into(),
                    description: "math".into(),
                },
            ],
            plan_calls: AtomicUsize::new(0),
            fail_execution: false,
        });
        let deps = collaborators(
            FakeGeneration {
                tokens: vec!["fine"],
                fail: false,
            },
            Arc::new(CountingSearch::default()),
            tool_engine.clone(),
        );
        // No preferences enabled: only the always-on direct answer survives.
        let events = collect(run(context(model(true), false), deps, idle_registry())).await;

        assert_eq!(tool_engine.plan_calls.load(Ordering::SeqCst), 0);
        assert!(events
            .iter()
            .any(|e| matches!(e, MessageUpdate::FinalAnswer { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn abort_interrupts_generation() {
        let source = Arc::new(InMemoryAbortSource::default());
        let registry = AbortRegistry::start(source.clone());

        let mut ctx = context(model(false), false);
        // The abort lands after the request started.
        ctx.prompted_at = Utc::now() - chrono::Duration::seconds(5);
        source.request_abort(&ctx.conversation_id);

        // Let the refresher pick up the snapshot.
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let deps = collaborators(
            FakeGeneration {
                tokens: vec!["a", "b", "c"],
                fail: false,
            },
            Arc::new(CountingSearch::default()),
            Arc::new(FakeTools::default()),
        );
        let events = collect(run(ctx, deps, registry)).await;

        let final_answer = events
            .iter()
            .find_map(|e| match e {
                MessageUpdate::FinalAnswer { interrupted, .. } => Some(*interrupted),
                _ => None,
            })
            .expect("final answer present");
        assert!(final_answer, "interrupted flag set");
        assert!(
            !events.iter().any(|e| matches!(e, MessageUpdate::Stream { .. })),
            "no tokens forwarded after abort observed"
        );
    }
}
