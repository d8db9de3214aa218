//! Aggregator: synthesizes one user-facing answer from all sub-question
//! results.
//!
//! Preferred path: a model call that reconciles the (sub-question, result)
//! pairs, with an explicit instruction to recompute manually when a
//! calculator step failed. Deterministic fallback: direct numeric
//! aggregation over the search results (sum, optional multiplier from the
//! original query). Last resort: a templated message listing the partial
//! results. The output is never empty.

use std::sync::Arc;
use std::time::Instant;

use multishot_sdk::{log_aggregation_fallback, LanguageModel};

use crate::engine::decomposer::detect_multiplier;
use crate::engine::resolver::extract_numeric;
use crate::engine::scheduler::result_is_failure;
use crate::engine::types::{RunConfig, RunState, ToolKind};

/// Produce the final answer for a multishot run
pub async fn aggregate(
    model: &Arc<dyn LanguageModel>,
    config: &RunConfig,
    state: &RunState,
    deadline: Instant,
) -> String {
    // A failed calculator step means the model would be reconciling garbage;
    // recompute deterministically when the numbers allow it.
    if calculator_step_failed(state) {
        if let Some(answer) = manual_aggregation(state) {
            log_aggregation_fallback!(&state.run_id, "calculator step failed; computed manually");
            return answer;
        }
    }

    // Past the run ceiling there is no budget left for another model call
    if Instant::now() >= deadline {
        log_aggregation_fallback!(&state.run_id, "run ceiling reached before synthesis");
        if let Some(answer) = manual_aggregation(state) {
            return answer;
        }
        return templated_answer(state);
    }

    let prompt = aggregation_prompt(state);
    match tokio::time::timeout(config.model_timeout, model.complete(&prompt)).await {
        Ok(Ok(answer)) if !answer.trim().is_empty() => return answer,
        Ok(Ok(_)) => log_aggregation_fallback!(&state.run_id, "model returned empty synthesis"),
        Ok(Err(e)) => log_aggregation_fallback!(&state.run_id, e),
        Err(_) => log_aggregation_fallback!(&state.run_id, "synthesis call timed out"),
    }

    if let Some(answer) = manual_aggregation(state) {
        return answer;
    }

    templated_answer(state)
}

/// Whether any calculator sub-question is missing a usable result
fn calculator_step_failed(state: &RunState) -> bool {
    state
        .sub_questions
        .iter()
        .filter(|sq| sq.tool == ToolKind::Calculator)
        .any(|sq| match &sq.result {
            Some(result) => result_is_failure(result),
            None => true,
        })
}

fn aggregation_prompt(state: &RunState) -> String {
    let mut prompt = format!(
        "Combine the results below into one clear answer to the user's question.\n\
         If a calculator result reports an error, recompute it yourself from the\n\
         numeric values in the other results.\n\nQuestion: {}\n\nResults:\n",
        state.query
    );
    for sq in &state.sub_questions {
        prompt.push_str(&format!(
            "- [{}] {} -> {}\n",
            sq.id,
            sq.text,
            sq.result.as_deref().unwrap_or("(no result)")
        ));
    }
    prompt
}

/// Deterministic numeric aggregation: sum the values extracted from search
/// results and apply a multiplier detected in the original query. Returns
/// None when no usable numbers exist.
fn manual_aggregation(state: &RunState) -> Option<String> {
    let values: Vec<f64> = state
        .sub_questions
        .iter()
        .filter(|sq| sq.tool == ToolKind::Search)
        .filter_map(|sq| sq.result.as_deref())
        .filter(|result| !result_is_failure(result))
        .filter_map(extract_numeric_f64)
        .collect();

    if values.is_empty() {
        return None;
    }

    let sum: f64 = values.iter().sum();
    let rendered_values = values
        .iter()
        .map(|v| format_number(*v))
        .collect::<Vec<_>>()
        .join(" and ");

    match detect_multiplier(&state.query) {
        Some(multiplier) => {
            let factor: f64 = multiplier.parse().ok()?;
            let total = sum * factor;
            Some(format!(
                "Based on the values I found ({}), their sum is {}, and {} * {} = {}.",
                rendered_values,
                format_number(sum),
                format_number(sum),
                multiplier,
                format_number(total)
            ))
        }
        None => Some(format!(
            "Based on the values I found ({}), the combined total is {}.",
            rendered_values,
            format_number(sum)
        )),
    }
}

fn extract_numeric_f64(result: &str) -> Option<f64> {
    extract_numeric(result)?.parse().ok()
}

/// Round away float noise before rendering
fn format_number(value: f64) -> String {
    let rounded = (value * 1e6).round() / 1e6;
    if rounded.fract() == 0.0 && rounded.abs() < 1e15 {
        format!("{}", rounded as i64)
    } else {
        format!("{}", rounded)
    }
}

/// Last resort: list whatever partial results exist. Never empty.
fn templated_answer(state: &RunState) -> String {
    if state.sub_questions.is_empty() {
        return format!(
            "I couldn't complete the steps needed to answer \"{}\". Please try again.",
            state.query
        );
    }

    let mut answer = format!("Here is what I found for \"{}\":\n", state.query);
    for sq in &state.sub_questions {
        match &sq.result {
            Some(result) if !result_is_failure(result) => {
                answer.push_str(&format!("- {}: {}\n", sq.text, result));
            }
            Some(_) => {
                answer.push_str(&format!("- {}: this step failed\n", sq.text));
            }
            None => {
                answer.push_str(&format!("- {}: not completed\n", sq.text));
            }
        }
    }
    answer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::scheduler::TOOL_FAILURE_PREFIX;
    use crate::engine::types::{RunContext, SubQuestion};

    fn state_with(query: &str, subs: Vec<SubQuestion>) -> RunState {
        let mut state = RunState::new(query, RunContext::default());
        state.is_multishot = true;
        state.sub_questions = subs;
        state
    }

    fn done(id: &str, tool: ToolKind, result: &str) -> SubQuestion {
        let mut sq = SubQuestion::new(id, format!("step {}", id), tool);
        sq.result = Some(result.to_string());
        sq.completed = true;
        sq
    }

    #[test]
    fn test_calculator_step_failed_detection() {
        let ok = state_with(
            "q",
            vec![done("q1", ToolKind::Calculator, "100")],
        );
        assert!(!calculator_step_failed(&ok));

        let failed = state_with(
            "q",
            vec![done(
                "q1",
                ToolKind::Calculator,
                &format!("{} bad expression", TOOL_FAILURE_PREFIX),
            )],
        );
        assert!(calculator_step_failed(&failed));

        let missing = state_with("q", vec![SubQuestion::new("q1", "x", ToolKind::Calculator)]);
        assert!(calculator_step_failed(&missing));
    }

    #[test]
    fn test_manual_aggregation_sum_with_multiplier() {
        let state = state_with(
            "population of Chicago plus population of Houston, multiplied by 0.05",
            vec![
                done("q1", ToolKind::Search, "Chicago: 2,746,388 people"),
                done("q2", ToolKind::Search, "Houston: 2,304,580 people"),
                done(
                    "q3",
                    ToolKind::Calculator,
                    &format!("{} unresolved reference", TOOL_FAILURE_PREFIX),
                ),
            ],
        );
        let answer = manual_aggregation(&state).unwrap();
        assert!(answer.contains("5050968"));
        assert!(answer.contains("252548.4"));
    }

    #[test]
    fn test_manual_aggregation_sum_only() {
        let state = state_with(
            "population of A plus population of B",
            vec![
                done("q1", ToolKind::Search, "1000"),
                done("q2", ToolKind::Search, "500"),
            ],
        );
        let answer = manual_aggregation(&state).unwrap();
        assert!(answer.contains("1500"));
    }

    #[test]
    fn test_manual_aggregation_skips_failed_searches() {
        let state = state_with(
            "q",
            vec![
                done("q1", ToolKind::Search, "1000"),
                done(
                    "q2",
                    ToolKind::Search,
                    &format!("{} search timed out", TOOL_FAILURE_PREFIX),
                ),
            ],
        );
        let answer = manual_aggregation(&state).unwrap();
        assert!(answer.contains("1000"));
    }

    #[test]
    fn test_manual_aggregation_none_without_numbers() {
        let state = state_with(
            "q",
            vec![done("q1", ToolKind::Search, "no figures were found")],
        );
        assert!(manual_aggregation(&state).is_none());
    }

    #[test]
    fn test_templated_answer_never_empty() {
        let empty = state_with("anything at all", Vec::new());
        assert!(!templated_answer(&empty).is_empty());

        let partial = state_with(
            "two part question",
            vec![
                done("q1", ToolKind::Search, "partial data"),
                SubQuestion::new("q2", "never ran", ToolKind::Calculator),
            ],
        );
        let answer = templated_answer(&partial);
        assert!(answer.contains("partial data"));
        assert!(answer.contains("not completed"));
    }

    #[test]
    fn test_format_number_rounds_float_noise() {
        assert_eq!(format_number(252548.40000000002), "252548.4");
        assert_eq!(format_number(100.0), "100");
    }
}
