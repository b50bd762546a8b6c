//! Tool selection and execution stage.
//!
//! Selection filters the engine's catalog by the caller's preference map;
//! the direct-answer capability is always selected and can't be turned off.
//! Execution plans calls through the tool engine and runs them one by one,
//! recovering each failure locally so one broken tool never kills the run.

use std::collections::HashMap;

use tokio::time::timeout;
use tracing::{debug, warn};

use arbor_core::constants::TOOL_TIMEOUT;
use arbor_core::events::{MessageUpdate, StatusKind};

use crate::engine::{Collaborators, ToolOutcome, ToolSpec};
use crate::errors::PipelineError;
use crate::pipeline::{emit, EventSender, GenerationContext};

/// The capability that answers without calling anything.
pub const DIRECT_ANSWER_TOOL: &str = "directlyAnswer";

/// Filter the catalog by the caller's preferences.
///
/// The direct-answer tool is always included; everything else must be
/// switched on explicitly.
#[must_use]
pub fn pick(catalog: &[ToolSpec], preference: &HashMap<String, bool>) -> Vec<ToolSpec> {
    catalog
        .iter()
        .filter(|tool| {
            tool.name == DIRECT_ANSWER_TOOL || preference.get(&tool.name).copied().unwrap_or(false)
        })
        .cloned()
        .collect()
}

/// Whether the selection contains anything beyond the direct answer.
#[must_use]
pub fn requires_execution(selected: &[ToolSpec]) -> bool {
    selected.iter().any(|tool| tool.name != DIRECT_ANSWER_TOOL)
}

/// Plan and execute the selected tools, collecting their outcomes.
pub(crate) async fn run(
    ctx: &GenerationContext,
    selected: &[ToolSpec],
    deps: &Collaborators,
    tx: &EventSender,
) -> Result<Vec<ToolOutcome>, PipelineError> {
    let calls = match timeout(TOOL_TIMEOUT, deps.tools.plan(&ctx.prompt, selected)).await {
        Ok(Ok(calls)) => calls,
        Ok(Err(e)) => {
            warn!(error = %e, "tool planning failed");
            emit(tx, MessageUpdate::error(format!("Tool selection failed: {e}"))).await?;
            return Ok(Vec::new());
        }
        Err(_) => {
            warn!("tool planning timed out");
            emit(tx, MessageUpdate::error("Tool selection timed out")).await?;
            return Ok(Vec::new());
        }
    };

    let mut outcomes = Vec::with_capacity(calls.len());
    for call in calls {
        emit(
            tx,
            MessageUpdate::status(StatusKind::Progress, format!("Calling tool {}", call.name)),
        )
        .await?;

        match timeout(TOOL_TIMEOUT, deps.tools.execute(&call)).await {
            Ok(Ok(outcome)) => {
                debug!(tool = %call.name, is_error = outcome.is_error, "tool finished");
                outcomes.push(outcome);
            }
            Ok(Err(e)) => {
                warn!(tool = %call.name, error = %e, "tool failed");
                emit(
                    tx,
                    MessageUpdate::error(format!("Tool {} failed: {e}", call.name)),
                )
                .await?;
            }
            Err(_) => {
                warn!(tool = %call.name, "tool timed out");
                emit(
                    tx,
                    MessageUpdate::error(format!("Tool {} timed out", call.name)),
                )
                .await?;
            }
        }
    }
    Ok(outcomes)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
