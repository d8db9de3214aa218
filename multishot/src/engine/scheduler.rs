//! Execution scheduler: the state machine that walks a run to completion.
//!
//! States: AnalyzeQuery -> {RouteSingleTool | Decompose} -> RouteSubQuestion
//! -> ExecuteTool -> CollectResult -> {RouteSubQuestion | Aggregate} -> Done.
//!
//! Routing and result collection are pure functions over [`RunState`]
//! snapshots; only the driving loop awaits collaborators. Sub-questions
//! execute sequentially so the dependency resolver always sees a consistent
//! result map. Two ceilings bound the loop: the safety-valve step cap and
//! the whole-run wall-clock deadline. Either one forces completion with
//! whatever partial results exist.

use std::sync::Arc;
use std::time::Instant;

use multishot_sdk::{
    log_safety_valve, log_state, log_subquestion_complete, log_tool_failed, log_tool_start,
    log_unresolved_reference, LanguageModel,
};

use crate::engine::resolver::{
    extract_expression, resolve_expression, resolve_search_text, Resolution,
};
use crate::engine::types::{RunConfig, RunState, ToolKind};
use crate::tools::{invoke_tool, ToolSet};

/// Routing decision for the next scheduler step
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Execute the sub-question with this id
    Execute(String),
    /// Nothing left to execute; synthesize the answer
    Aggregate,
}

/// Select the next sub-question whose dependencies are all satisfied.
///
/// Moves to Aggregate when nothing remains executable: everything is done,
/// no sub-questions exist at all (degenerate case), or the remaining ones
/// are permanently blocked.
pub fn route_sub_question(state: &RunState) -> Route {
    let completed = state.completed_ids();
    match state
        .sub_questions
        .iter()
        .find(|sq| sq.is_ready(&completed))
    {
        Some(sq) => Route::Execute(sq.id.clone()),
        None => Route::Aggregate,
    }
}

/// Store a result and mark the sub-question completed, returning the next
/// state snapshot.
pub fn collect_result(mut state: RunState, id: &str, result: String) -> RunState {
    state
        .intermediate_results
        .insert(id.to_string(), result.clone());
    if let Some(sq) = state.sub_questions.iter_mut().find(|sq| sq.id == id) {
        sq.result = Some(result);
        sq.completed = true;
    }
    state.current = None;
    if state.sub_questions.iter().all(|sq| sq.completed) {
        state.processing_complete = true;
    }
    state
}

/// Safety valve: force completion once the step cap is reached, preventing
/// runaway iteration over a malformed dependency graph.
pub fn safety_valve_reached(state: &RunState, step_cap: usize) -> bool {
    state.completed_count() >= step_cap
}

/// Prefix used when a tool failure is recorded as a sub-question result
pub const TOOL_FAILURE_PREFIX: &str = "Tool error:";

/// Whether a stored result records a tool failure
pub fn result_is_failure(result: &str) -> bool {
    result.trim_start().starts_with(TOOL_FAILURE_PREFIX)
}

/// Drive the multishot loop until every sub-question is completed or a
/// ceiling forces completion. Failures are recorded as results and the loop
/// continues; the blast radius is confined to dependent sub-questions.
pub async fn execute_multishot(
    model: &Arc<dyn LanguageModel>,
    tools: &ToolSet,
    config: &RunConfig,
    mut state: RunState,
    deadline: Instant,
) -> RunState {
    loop {
        if Instant::now() >= deadline {
            log_safety_valve!(
                &state.run_id,
                state.completed_count(),
                state.sub_questions.len()
            );
            state.processing_complete = true;
            return state;
        }

        if safety_valve_reached(&state, config.step_cap) {
            log_safety_valve!(
                &state.run_id,
                state.completed_count(),
                state.sub_questions.len()
            );
            state.processing_complete = true;
            return state;
        }

        log_state!(&state.run_id, "route_sub_question");
        let id = match route_sub_question(&state) {
            Route::Execute(id) => id,
            Route::Aggregate => {
                state.processing_complete = true;
                return state;
            }
        };

        state.current = Some(id.clone());
        let result = execute_sub_question(model, tools, config, &state, &id).await;
        log_subquestion_complete!(&state.run_id, &id, summarize(&result));
        state = collect_result(state, &id, result);
    }
}

/// Execute one sub-question against its assigned tool, resolving references
/// to prior results first. Never fails: tool failures come back as
/// [`TOOL_FAILURE_PREFIX`]-tagged result text.
async fn execute_sub_question(
    model: &Arc<dyn LanguageModel>,
    tools: &ToolSet,
    config: &RunConfig,
    state: &RunState,
    id: &str,
) -> String {
    let Some(sq) = state.sub_question(id) else {
        return format!("{} unknown sub-question {}", TOOL_FAILURE_PREFIX, id);
    };

    let resolution = match sq.tool {
        ToolKind::Calculator => resolve_expression(&sq.text, &state.intermediate_results),
        _ => resolve_search_text(&sq.text, &state.intermediate_results),
    };
    let Resolution { text, unresolved } = resolution;
    for reference in &unresolved {
        log_unresolved_reference!(&state.run_id, reference);
    }

    log_tool_start!(&state.run_id, sq.tool.label(), Some(id.to_string()));
    match sq.tool {
        ToolKind::Direct => {
            match tokio::time::timeout(config.model_timeout, model.complete(&text)).await {
                Ok(Ok(answer)) => answer,
                Ok(Err(e)) => {
                    log_tool_failed!(&state.run_id, "direct", e);
                    format!("{} {}", TOOL_FAILURE_PREFIX, e)
                }
                Err(_) => {
                    log_tool_failed!(&state.run_id, "direct", "model timed out");
                    format!("{} model timed out", TOOL_FAILURE_PREFIX)
                }
            }
        }
        kind => {
            // The calculator wants a bare expression, not the surrounding
            // prose. Skipped when references stayed unresolved: the leftover
            // id must fail the evaluation rather than be silently dropped.
            let input = match kind {
                ToolKind::Calculator if unresolved.is_empty() => {
                    extract_expression(&text).unwrap_or(text)
                }
                _ => text,
            };
            match invoke_tool(tools, kind, &input, config.tool_timeout, config.max_output_len)
                .await
            {
                Ok(result) => result,
                Err(e) => {
                    log_tool_failed!(&state.run_id, kind.label(), e);
                    format!("{} {}", TOOL_FAILURE_PREFIX, e)
                }
            }
        }
    }
}

/// Execute a single-tool run (no decomposition).
///
/// On adapter failure the run falls back to a direct model answer; the
/// returned label records the degradation.
pub async fn execute_single_tool(
    model: &Arc<dyn LanguageModel>,
    tools: &ToolSet,
    config: &RunConfig,
    mut state: RunState,
    kind: ToolKind,
) -> (RunState, String) {
    log_state!(&state.run_id, "execute_tool");

    if kind != ToolKind::Direct {
        let input = match kind {
            ToolKind::Calculator => {
                extract_expression(&state.query).unwrap_or_else(|| state.query.clone())
            }
            _ => state.query.clone(),
        };
        log_tool_start!(&state.run_id, kind.label(), None);
        match invoke_tool(
            tools,
            kind,
            &input,
            config.tool_timeout,
            config.max_output_len,
        )
        .await
        {
            Ok(result) => {
                state.final_response = Some(present_tool_result(&input, kind, &result));
                state.processing_complete = true;
                return (state, kind.label().to_string());
            }
            Err(e) => {
                log_tool_failed!(&state.run_id, kind.label(), e);
            }
        }
    }

    let label = if kind == ToolKind::Direct {
        "direct".to_string()
    } else {
        "direct (fallback)".to_string()
    };
    state.final_response = Some(direct_answer(model, config, &state.query).await);
    state.processing_complete = true;
    (state, label)
}

/// Answer straight from the model; degrades to a templated apology so the
/// caller never sees an empty response or a raw error.
pub async fn direct_answer(
    model: &Arc<dyn LanguageModel>,
    config: &RunConfig,
    query: &str,
) -> String {
    match tokio::time::timeout(config.model_timeout, model.complete(query)).await {
        Ok(Ok(answer)) if !answer.trim().is_empty() => answer,
        _ => format!(
            "I wasn't able to look that up right now. Could you rephrase or try again? (question: {})",
            query
        ),
    }
}

/// Wrap raw tool output in a sentence for single-tool runs
fn present_tool_result(input: &str, kind: ToolKind, result: &str) -> String {
    match kind {
        ToolKind::Calculator => format!("{} = {}", input.trim_end_matches('?').trim(), result),
        _ => result.to_string(),
    }
}

/// Short form for logs
fn summarize(result: &str) -> String {
    const LIMIT: usize = 80;
    if result.chars().count() <= LIMIT {
        result.to_string()
    } else {
        format!("{}...", result.chars().take(LIMIT).collect::<String>())
    }
}
