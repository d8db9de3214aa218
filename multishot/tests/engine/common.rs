//! Shared mocks and builders for engine integration tests

use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use multishot::engine::types::RunConfig;
use multishot_sdk::{async_trait, LanguageModel, ToolAdapter, ToolOutput};

/// Model that replays a queue of scripted completions, erroring once the
/// queue is exhausted.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<String>>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<Result<String>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().collect()),
        })
    }

    /// Model whose every call fails
    pub fn failing() -> Arc<Self> {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("no scripted response left")))
    }
}

/// Model that never returns, for exercising timeout paths
pub struct HangingModel;

#[async_trait]
impl LanguageModel for HangingModel {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        tokio::time::sleep(Duration::from_secs(600)).await;
        Ok("too late".to_string())
    }
}

/// Search adapter answering population lookups from a fixed table, the way
/// a real search backend would: a structured payload with a known field.
pub struct CityPopulationSearch;

#[async_trait]
impl ToolAdapter for CityPopulationSearch {
    fn name(&self) -> &str {
        "search"
    }

    async fn invoke(&self, input: &str) -> Result<ToolOutput> {
        let lowered = input.to_lowercase();
        let population = if lowered.contains("chicago") {
            2_746_388
        } else if lowered.contains("houston") {
            2_304_580
        } else {
            return Ok(ToolOutput::Text("no results found".to_string()));
        };
        Ok(ToolOutput::Structured(
            serde_json::json!({ "population": population }),
        ))
    }
}

/// Search adapter that fails on every call
pub struct FailingSearch;

#[async_trait]
impl ToolAdapter for FailingSearch {
    fn name(&self) -> &str {
        "search"
    }

    async fn invoke(&self, _input: &str) -> Result<ToolOutput> {
        Err(anyhow!("search backend unavailable"))
    }
}

/// Search adapter that fails with a digit-bearing status message
pub struct StatusCodeSearch;

#[async_trait]
impl ToolAdapter for StatusCodeSearch {
    fn name(&self) -> &str {
        "search"
    }

    async fn invoke(&self, _input: &str) -> Result<ToolOutput> {
        Err(anyhow!("HTTP 503 from backend"))
    }
}

/// Search adapter counting how often it is invoked
pub struct CountingSearch(pub Arc<AtomicUsize>);

#[async_trait]
impl ToolAdapter for CountingSearch {
    fn name(&self) -> &str {
        "search"
    }

    async fn invoke(&self, _input: &str) -> Result<ToolOutput> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(ToolOutput::Text("counted".to_string()))
    }
}

/// Configuration with short ceilings so timeout paths finish quickly
pub fn fast_config() -> RunConfig {
    RunConfig {
        tool_timeout: Duration::from_millis(500),
        model_timeout: Duration::from_millis(50),
        decompose_timeout: Duration::from_millis(50),
        run_timeout: Duration::from_secs(5),
        ..RunConfig::default()
    }
}

/// Well-formed decomposition payload for the two-city population query
pub fn scripted_decomposition() -> String {
    r#"{"sub_questions": [
        {"id": "q1", "question": "What is the population of Chicago?", "tool_type": "search", "depends_on": []},
        {"id": "q2", "question": "What is the population of Houston?", "tool_type": "search", "depends_on": []},
        {"id": "q3", "question": "Sum(q1, q2)", "tool_type": "calculator", "depends_on": ["q1", "q2"]}
    ]}"#
    .to_string()
}
