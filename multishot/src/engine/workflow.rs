//! Workflow orchestration: the public entry point tying classification,
//! decomposition, scheduling, and aggregation together.
//!
//! One call to [`Engine::run`] handles one query end to end. The engine owns
//! nothing across runs: every run gets a fresh [`RunState`] that is dropped
//! once the outcome is returned.

use std::sync::Arc;
use std::time::Instant;

use multishot_sdk::{log_classified, log_run_complete, log_run_start, log_state, LanguageModel};

use crate::engine::aggregator::aggregate;
use crate::engine::analyzer::analyze_with_model;
use crate::engine::classifier::classify;
use crate::engine::decomposer::decompose;
use crate::engine::scheduler::{execute_multishot, execute_single_tool};
use crate::engine::types::{Classification, RunConfig, RunContext, RunOutcome, RunState, ToolKind};
use crate::tools::ToolSet;

/// The tool-selection and multi-step execution engine.
///
/// Holds the collaborators and configuration shared by runs; all per-run
/// state lives in the [`RunState`] created inside [`run`](Engine::run).
pub struct Engine {
    model: Arc<dyn LanguageModel>,
    tools: ToolSet,
    config: RunConfig,
}

impl Engine {
    pub fn new(model: Arc<dyn LanguageModel>, tools: ToolSet) -> Self {
        Self {
            model,
            tools,
            config: RunConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// Run one query to completion: classify, route, execute, aggregate.
    ///
    /// Never returns an empty response and never surfaces a collaborator
    /// error to the caller; every failure path degrades per the recovery
    /// ladder.
    pub async fn run(&self, query: &str, context: RunContext) -> RunOutcome {
        let mut state = RunState::new(query, context);
        let deadline = Instant::now() + self.config.run_timeout;
        log_run_start!(&state.run_id, query);

        log_state!(&state.run_id, "analyze_query");
        let classification = self.analyze(&state).await;
        state.classification = Some(classification);
        log_classified!(&state.run_id, classification.label());

        match classification {
            Classification::Composite => self.run_multishot(state, deadline).await,
            Classification::Calculator => self.run_single(state, ToolKind::Calculator).await,
            Classification::Search => self.run_single(state, ToolKind::Search).await,
            Classification::StructuredQuery => {
                self.run_single(state, ToolKind::StructuredQuery).await
            }
            Classification::Unclear => self.run_single(state, ToolKind::Direct).await,
        }
    }

    /// Pattern classification, escalating to the model-assisted analyzer and
    /// downgrading Composite when no search-capable tool is configured.
    async fn analyze(&self, state: &RunState) -> Classification {
        let mut classification = classify(&state.query);

        if classification == Classification::Unclear {
            classification =
                analyze_with_model(&self.model, &state.query, self.config.model_timeout).await;
        }

        // Decomposition needs at least a search-capable tool
        if classification == Classification::Composite && !self.tools.has_search() {
            return Classification::Unclear;
        }

        classification
    }

    async fn run_multishot(&self, mut state: RunState, deadline: Instant) -> RunOutcome {
        state.is_multishot = true;

        log_state!(&state.run_id, "decompose");
        state.sub_questions = decompose(
            &self.model,
            &state.query,
            &state.context,
            self.config.decompose_timeout,
            &state.run_id,
        )
        .await;

        let mut state =
            execute_multishot(&self.model, &self.tools, &self.config, state, deadline).await;

        log_state!(&state.run_id, "aggregate");
        let response = aggregate(&self.model, &self.config, &state, deadline).await;
        state.final_response = Some(response.clone());
        log_run_complete!(&state.run_id, "multishot");

        RunOutcome {
            response,
            tool_used: "multishot".to_string(),
            sub_questions: Some(state.sub_questions),
        }
    }

    async fn run_single(&self, state: RunState, kind: ToolKind) -> RunOutcome {
        let (state, tool_used) =
            execute_single_tool(&self.model, &self.tools, &self.config, state, kind).await;
        log_run_complete!(&state.run_id, &tool_used);

        RunOutcome {
            // Single-tool execution always sets a response
            response: state
                .final_response
                .unwrap_or_else(|| "I wasn't able to answer that. Please try again.".to_string()),
            tool_used,
            sub_questions: None,
        }
    }
}
