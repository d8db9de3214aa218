//! Ceilings, step caps, and failure isolation during multishot runs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use multishot::engine::types::{RunConfig, ToolKind};
use multishot::tools::calculator::CalculatorTool;
use multishot::{Engine, RunContext, ToolSet};

use super::common::*;

#[tokio::test]
async fn test_step_cap_forces_partial_aggregation() {
    let model = ScriptedModel::new(vec![Ok(scripted_decomposition())]);
    let tools = ToolSet::new()
        .with_search(Arc::new(CityPopulationSearch))
        .with_calculator(Arc::new(CalculatorTool));
    let config = RunConfig {
        step_cap: 1,
        ..RunConfig::default()
    };
    let engine = Engine::new(model, tools).with_config(config);

    let outcome = engine
        .run(
            "population of Chicago plus population of Houston",
            RunContext::default(),
        )
        .await;

    let subs = outcome.sub_questions.unwrap();
    assert_eq!(subs.iter().filter(|sq| sq.completed).count(), 1);
    // The one completed search still yields a usable partial answer
    assert!(outcome.response.contains("2746388"));
}

#[tokio::test]
async fn test_run_ceiling_stops_before_any_tool_call() {
    let model = ScriptedModel::new(vec![Ok(scripted_decomposition())]);
    let invocations = Arc::new(AtomicUsize::new(0));
    let tools = ToolSet::new()
        .with_search(Arc::new(CountingSearch(invocations.clone())))
        .with_calculator(Arc::new(CalculatorTool));
    let config = RunConfig {
        run_timeout: Duration::ZERO,
        ..RunConfig::default()
    };
    let engine = Engine::new(model, tools).with_config(config);

    let outcome = engine
        .run(
            "population of Chicago plus population of Houston",
            RunContext::default(),
        )
        .await;

    assert_eq!(invocations.load(Ordering::SeqCst), 0);
    assert!(!outcome.response.is_empty());
    let subs = outcome.sub_questions.unwrap();
    assert!(subs.iter().all(|sq| !sq.completed));
}

#[tokio::test]
async fn test_unresolvable_reference_fails_loudly_not_silently() {
    let decomposition = r#"{"sub_questions": [
        {"id": "q1", "question": "What is the population of Atlantis?", "tool_type": "search", "depends_on": []},
        {"id": "q2", "question": "q1 * 2", "tool_type": "calculator", "depends_on": ["q1"]}
    ]}"#;
    let model = ScriptedModel::new(vec![Ok(decomposition.to_string())]);
    let tools = ToolSet::new()
        .with_search(Arc::new(CityPopulationSearch))
        .with_calculator(Arc::new(CalculatorTool));
    let engine = Engine::new(model, tools);

    let outcome = engine
        .run(
            "population of Atlantis plus twice that",
            RunContext::default(),
        )
        .await;

    let subs = outcome.sub_questions.unwrap();
    // The search found no number, so the dependent calculator step must
    // record a failure instead of computing something from thin air
    assert_eq!(subs[0].result.as_deref(), Some("no results found"));
    assert!(subs[1].result.as_deref().unwrap().starts_with("Tool error:"));
    assert!(outcome.response.contains("this step failed"));
}

#[tokio::test]
async fn test_digits_in_failure_messages_are_not_treated_as_values() {
    let decomposition = r#"{"sub_questions": [
        {"id": "q1", "question": "What is the population of Chicago?", "tool_type": "search", "depends_on": []},
        {"id": "q2", "question": "q1 * 2", "tool_type": "calculator", "depends_on": ["q1"]}
    ]}"#;
    let model = ScriptedModel::new(vec![Ok(decomposition.to_string())]);
    let tools = ToolSet::new()
        .with_search(Arc::new(StatusCodeSearch))
        .with_calculator(Arc::new(CalculatorTool));
    let engine = Engine::new(model, tools);

    let outcome = engine
        .run(
            "population of Chicago plus twice that",
            RunContext::default(),
        )
        .await;

    let subs = outcome.sub_questions.unwrap();
    assert!(subs[0].result.as_deref().unwrap().contains("HTTP 503"));
    // The 503 in the failure text must not become 503 * 2
    let calc = subs[1].result.as_deref().unwrap();
    assert!(calc.starts_with("Tool error:"));
    assert!(!calc.contains("1006"));
    assert!(!outcome.response.contains("1006"));
}

#[tokio::test]
async fn test_empty_decomposition_payload_triggers_emergency_tier() {
    let model = ScriptedModel::new(vec![Ok(r#"{"sub_questions": []}"#.to_string())]);
    let tools = ToolSet::new()
        .with_search(Arc::new(CityPopulationSearch))
        .with_calculator(Arc::new(CalculatorTool));
    let engine = Engine::new(model, tools);

    let query = "revenue plus costs for the quarter";
    let outcome = engine.run(query, RunContext::default()).await;

    let subs = outcome.sub_questions.unwrap();
    assert_eq!(subs.len(), 2);
    assert_eq!(subs[0].tool, ToolKind::Search);
    assert_eq!(subs[0].text, query);
    assert_eq!(subs[1].tool, ToolKind::Calculator);
    assert!(!outcome.response.is_empty());
}

#[tokio::test]
async fn test_single_search_run_returns_normalized_payload() {
    let tools = ToolSet::new().with_search(Arc::new(CityPopulationSearch));
    let engine = Engine::new(ScriptedModel::failing(), tools);

    let outcome = engine
        .run("what is the population of Chicago", RunContext::default())
        .await;

    assert_eq!(outcome.tool_used, "search");
    assert!(outcome.response.contains("2746388"));
}
