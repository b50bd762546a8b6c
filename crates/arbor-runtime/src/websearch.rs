//! Web-search stage runner.
//!
//! Drives the search collaborator through query building, the provider
//! search, and per-source scraping, emitting progress statuses along the
//! way. Every step is bounded by a timeout and recovers locally: a failed
//! search degrades to "no web context", a failed scrape drops that source.
//! The persisted tree is never touched — context injection happens on a
//! working copy of the prompt.

use tokio::time::timeout;
use tracing::warn;

use arbor_core::constants::{SCRAPE_TIMEOUT, SEARCH_TIMEOUT};
use arbor_core::events::{MessageUpdate, StatusKind};
use arbor_core::messages::{Message, MessageFrom};

use crate::engine::{Collaborators, WebSearchBundle};
use crate::errors::PipelineError;
use crate::pipeline::{emit, EventSender, GenerationContext};

/// Sources scraped per search, best-ranked first.
const MAX_SCRAPED_SOURCES: usize = 5;

/// Run the websearch stage. `None` means the stage contributed nothing.
pub(crate) async fn run(
    ctx: &GenerationContext,
    deps: &Collaborators,
    tx: &EventSender,
) -> Result<Option<WebSearchBundle>, PipelineError> {
    emit(
        tx,
        MessageUpdate::status(StatusKind::Progress, "Generating search query"),
    )
    .await?;

    let query = match timeout(SEARCH_TIMEOUT, deps.search.build_query(&ctx.prompt)).await {
        Ok(Ok(query)) if !query.trim().is_empty() => query,
        Ok(Ok(_)) => {
            warn!("search query builder returned an empty query");
            emit(tx, MessageUpdate::error("Could not build a search query")).await?;
            return Ok(None);
        }
        Ok(Err(e)) => {
            warn!(error = %e, "search query builder failed");
            emit(tx, MessageUpdate::error(format!("Web search failed: {e}"))).await?;
            return Ok(None);
        }
        Err(_) => {
            warn!("search query builder timed out");
            emit(tx, MessageUpdate::error("Web search timed out")).await?;
            return Ok(None);
        }
    };

    emit(
        tx,
        MessageUpdate::status(StatusKind::Progress, format!("Searching for \"{query}\"")),
    )
    .await?;

    let sources = match timeout(SEARCH_TIMEOUT, deps.search.search(&query)).await {
        Ok(Ok(sources)) if !sources.is_empty() => sources,
        Ok(Ok(_)) => {
            emit(tx, MessageUpdate::error("No web search results")).await?;
            return Ok(None);
        }
        Ok(Err(e)) => {
            warn!(error = %e, query, "web search failed");
            emit(tx, MessageUpdate::error(format!("Web search failed: {e}"))).await?;
            return Ok(None);
        }
        Err(_) => {
            warn!(query, "web search timed out");
            emit(tx, MessageUpdate::error("Web search timed out")).await?;
            return Ok(None);
        }
    };

    emit(
        tx,
        MessageUpdate::status(StatusKind::Progress, "Browsing search results"),
    )
    .await?;

    let mut scraped = Vec::with_capacity(MAX_SCRAPED_SOURCES);
    for mut source in sources.into_iter().take(MAX_SCRAPED_SOURCES) {
        match timeout(SCRAPE_TIMEOUT, deps.search.scrape(&source)).await {
            Ok(Ok(text)) => {
                source.text = text;
                scraped.push(source);
            }
            Ok(Err(e)) => warn!(error = %e, link = %source.link, "scrape failed, dropping source"),
            Err(_) => warn!(link = %source.link, "scrape timed out, dropping source"),
        }
    }

    if scraped.is_empty() {
        emit(tx, MessageUpdate::error("No sources could be read")).await?;
        return Ok(None);
    }

    Ok(Some(WebSearchBundle {
        query,
        sources: scraped,
    }))
}

/// Inject web-search context into a working copy of the prompt.
///
/// The context block is appended to the last user message; with no bundle
/// the prompt passes through untouched.
pub(crate) fn inject_context(
    mut messages: Vec<Message>,
    bundle: Option<&WebSearchBundle>,
) -> Vec<Message> {
    let Some(bundle) = bundle else {
        return messages;
    };
    let Some(last_user) = messages
        .iter_mut()
        .rev()
        .find(|m| m.from == MessageFrom::User)
    else {
        return messages;
    };

    let mut block = format!(
        "\n\nAnswer using the results of this web search for \"{}\":\n",
        bundle.query
    );
    for source in &bundle.sources {
        block.push_str(&format!("- {} ({})\n{}\n", source.title, source.link, source.text));
    }
    last_user.content.push_str(&block);
    messages
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
