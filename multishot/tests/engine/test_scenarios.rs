//! End-to-end runs through `Engine::run`, one per routing path

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use multishot::engine::types::ToolKind;
use multishot::tools::calculator::CalculatorTool;
use multishot::{Engine, RunContext, ToolSet};

use super::common::*;

#[tokio::test]
async fn test_wordy_arithmetic_runs_calculator() {
    let tools = ToolSet::new().with_calculator(Arc::new(CalculatorTool));
    let engine = Engine::new(ScriptedModel::failing(), tools);

    let outcome = engine.run("what is 25 * 4?", RunContext::default()).await;

    assert_eq!(outcome.tool_used, "calculator");
    assert!(outcome.response.contains("100"));
    assert!(outcome.sub_questions.is_none());
}

#[tokio::test]
async fn test_composite_population_query_with_model_decomposition() {
    let model = ScriptedModel::new(vec![
        Ok(scripted_decomposition()),
        Ok("Their combined population is 5,050,968.".to_string()),
    ]);
    let tools = ToolSet::new()
        .with_search(Arc::new(CityPopulationSearch))
        .with_calculator(Arc::new(CalculatorTool));
    let engine = Engine::new(model, tools);

    let outcome = engine
        .run(
            "population of Chicago plus population of Houston",
            RunContext::default(),
        )
        .await;

    assert_eq!(outcome.tool_used, "multishot");
    assert_eq!(outcome.response, "Their combined population is 5,050,968.");

    let subs = outcome.sub_questions.unwrap();
    assert_eq!(subs.len(), 3);
    assert!(subs.iter().all(|sq| sq.completed));
    // The calculator step saw the extracted populations, not raw payloads
    assert_eq!(subs[2].result.as_deref(), Some("5050968"));
}

#[tokio::test]
async fn test_composite_query_degrades_to_template_and_manual_aggregation() {
    // Every model call fails: decomposition and aggregation both fall back
    let tools = ToolSet::new()
        .with_search(Arc::new(CityPopulationSearch))
        .with_calculator(Arc::new(CalculatorTool));
    let engine = Engine::new(ScriptedModel::failing(), tools);

    let outcome = engine
        .run(
            "What is the population of Chicago plus the population of Houston, multiplied by 0.05?",
            RunContext::default(),
        )
        .await;

    assert_eq!(outcome.tool_used, "multishot");

    let subs = outcome.sub_questions.unwrap();
    assert_eq!(subs.len(), 4);
    assert_eq!(subs[0].tool, ToolKind::Search);
    assert_eq!(subs[1].tool, ToolKind::Search);
    assert_eq!(
        subs[2].depends_on,
        vec!["q1".to_string(), "q2".to_string()]
    );
    assert_eq!(subs[3].depends_on, vec!["q3".to_string()]);
    assert_eq!(subs[3].result.as_deref(), Some("252548.4"));

    // (2746388 + 2304580) * 0.05
    assert!(outcome.response.contains("252548.4"));
}

#[tokio::test]
async fn test_search_failure_falls_back_to_direct_answer() {
    let model = ScriptedModel::new(vec![Ok("The capital of Norway is Oslo.".to_string())]);
    let tools = ToolSet::new().with_search(Arc::new(FailingSearch));
    let engine = Engine::new(model, tools);

    let outcome = engine
        .run("what is the capital of Norway", RunContext::default())
        .await;

    assert_eq!(outcome.tool_used, "direct (fallback)");
    assert_eq!(outcome.response, "The capital of Norway is Oslo.");
    assert!(!outcome.response.contains("Tool error"));
    assert!(!outcome.response.contains("unavailable"));
}

#[tokio::test]
async fn test_decomposition_timeout_uses_template_and_still_finishes() {
    let tools = ToolSet::new()
        .with_search(Arc::new(CityPopulationSearch))
        .with_calculator(Arc::new(CalculatorTool));
    let engine = Engine::new(Arc::new(HangingModel), tools).with_config(fast_config());

    let outcome = engine
        .run(
            "population of Chicago plus population of Houston, multiplied by 0.05",
            RunContext::default(),
        )
        .await;

    assert_eq!(outcome.tool_used, "multishot");
    let subs = outcome.sub_questions.unwrap();
    assert_eq!(subs.len(), 4);
    assert!(subs.iter().all(|sq| sq.completed));
    assert!(outcome.response.contains("252548.4"));
}

#[tokio::test]
async fn test_unrecognized_query_goes_direct_without_tools() {
    let model = ScriptedModel::new(vec![
        // Analyzer response carries none of the known labels
        Ok("hmm, none of those categories fit".to_string()),
        Ok("Why don't scientists trust atoms? They make up everything.".to_string()),
    ]);
    let invocations = Arc::new(AtomicUsize::new(0));
    let tools = ToolSet::new().with_search(Arc::new(CountingSearch(invocations.clone())));
    let engine = Engine::new(model, tools);

    let outcome = engine.run("tell me a joke", RunContext::default()).await;

    assert_eq!(outcome.tool_used, "direct");
    assert!(outcome.response.contains("atoms"));
    assert!(outcome.sub_questions.is_none());
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
}
