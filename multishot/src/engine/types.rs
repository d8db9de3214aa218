//! Data types for the multishot engine.
//!
//! This module defines all data structures threaded through a run:
//!
//! 1. **ToolKind / Classification** - tool routing labels
//! 2. **SubQuestion** - one atomic unit of a decomposed query
//! 3. **RunState** - the state snapshot advanced by the scheduler
//! 4. **RunConfig / RunContext** - explicit per-run configuration
//! 5. **RunOutcome** - what the engine hands back to its caller

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// Tool Labels
// ============================================================================

/// Which adapter executes a sub-question (or a single-tool run)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Calculator,
    Search,
    StructuredQuery,
    /// Answer straight from the model, no tool
    Direct,
}

impl ToolKind {
    /// Short label for logging and the produced contract
    pub fn label(&self) -> &'static str {
        match self {
            ToolKind::Calculator => "calculator",
            ToolKind::Search => "search",
            ToolKind::StructuredQuery => "structured_query",
            ToolKind::Direct => "direct",
        }
    }
}

/// Outcome of query classification, before routing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Calculator,
    Search,
    StructuredQuery,
    /// Needs decomposition into sub-questions
    Composite,
    /// No pattern matched; escalate to the model-assisted analyzer
    Unclear,
}

impl Classification {
    pub fn label(&self) -> &'static str {
        match self {
            Classification::Calculator => "calculator",
            Classification::Search => "search",
            Classification::StructuredQuery => "structured_query",
            Classification::Composite => "multishot",
            Classification::Unclear => "unclear",
        }
    }
}

// ============================================================================
// Sub-Questions
// ============================================================================

/// One atomic unit of work within a decomposed query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuestion {
    /// Unique token ("q1"), stable for the lifetime of a run
    pub id: String,

    /// Question or expression to execute
    pub text: String,

    /// Which adapter runs this sub-question
    pub tool: ToolKind,

    /// Ids that must be completed before this one
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Whether the result has been collected
    #[serde(default)]
    pub completed: bool,

    /// Raw tool output once executed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl SubQuestion {
    pub fn new(id: impl Into<String>, text: impl Into<String>, tool: ToolKind) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            tool,
            depends_on: Vec::new(),
            completed: false,
            result: None,
        }
    }

    pub fn with_dependencies(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    /// Eligible for execution iff every dependency id is in `completed`
    pub fn is_ready(&self, completed: &HashSet<&str>) -> bool {
        !self.completed
            && self
                .depends_on
                .iter()
                .all(|dep| completed.contains(dep.as_str()))
    }
}

/// Check that every referenced dependency id names an existing sub-question
pub fn dependencies_resolve(sub_questions: &[SubQuestion]) -> bool {
    let ids: HashSet<&str> = sub_questions.iter().map(|sq| sq.id.as_str()).collect();
    sub_questions
        .iter()
        .flat_map(|sq| sq.depends_on.iter())
        .all(|dep| ids.contains(dep.as_str()))
}

/// Ids left unschedulable by Kahn's algorithm (members of dependency cycles)
fn cyclic_ids(sub_questions: &[SubQuestion]) -> Vec<String> {
    let mut remaining: HashMap<&str, HashSet<&str>> = sub_questions
        .iter()
        .map(|sq| {
            (
                sq.id.as_str(),
                sq.depends_on.iter().map(|d| d.as_str()).collect(),
            )
        })
        .collect();

    while !remaining.is_empty() {
        let ready: Vec<&str> = remaining
            .iter()
            .filter(|(_, deps)| deps.iter().all(|d| !remaining.contains_key(*d)))
            .map(|(id, _)| *id)
            .collect();
        if ready.is_empty() {
            break;
        }
        for id in ready {
            remaining.remove(id);
        }
    }

    // Preserve declaration order for deterministic repair
    sub_questions
        .iter()
        .filter(|sq| remaining.contains_key(sq.id.as_str()))
        .map(|sq| sq.id.clone())
        .collect()
}

/// Check the dependency relation forms a DAG
pub fn dependencies_acyclic(sub_questions: &[SubQuestion]) -> bool {
    cyclic_ids(sub_questions).is_empty()
}

/// Repair a decomposition so the scheduler can always make forward progress.
///
/// Unknown dependency ids are dropped, and if no sub-question is entry-eligible
/// (empty `depends_on`), the first one has its dependencies cleared.
pub fn repair_dependencies(mut sub_questions: Vec<SubQuestion>) -> Vec<SubQuestion> {
    let ids: HashSet<String> = sub_questions.iter().map(|sq| sq.id.clone()).collect();
    for sq in &mut sub_questions {
        sq.depends_on.retain(|dep| ids.contains(dep) && *dep != sq.id);
    }

    let has_entry = sub_questions.iter().any(|sq| sq.depends_on.is_empty());
    if !has_entry {
        if let Some(first) = sub_questions.first_mut() {
            first.depends_on.clear();
        }
    }

    // A cycle among later items can still starve the loop; break it the same
    // way, clearing dependencies on the first member of the cycle.
    loop {
        let stuck = cyclic_ids(&sub_questions);
        let Some(first_stuck) = stuck.first() else {
            break;
        };
        if let Some(sq) = sub_questions.iter_mut().find(|sq| &sq.id == first_stuck) {
            sq.depends_on.clear();
        }
    }

    sub_questions
}

// ============================================================================
// Run Configuration
// ============================================================================

/// Caller-supplied context for a run
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    /// Prior tool query templates, surfaced to the decomposition prompt
    pub prior_tool_query_templates: Vec<String>,
}

/// Explicit per-run configuration (no ambient flags)
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Ceiling for a single calculator/search/structured-query call
    pub tool_timeout: Duration,

    /// Ceiling for analyzer and aggregation model calls
    pub model_timeout: Duration,

    /// Ceiling for the decomposition model call
    pub decompose_timeout: Duration,

    /// Wall-clock ceiling for the whole run
    pub run_timeout: Duration,

    /// Safety valve: absolute cap on completed sub-question steps
    pub step_cap: usize,

    /// Character cap applied when normalizing tool output
    pub max_output_len: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            tool_timeout: Duration::from_secs(5),
            model_timeout: Duration::from_secs(10),
            decompose_timeout: Duration::from_secs(10),
            run_timeout: Duration::from_secs(60),
            step_cap: 20,
            max_output_len: 4000,
        }
    }
}

// ============================================================================
// Run State
// ============================================================================

/// Mutable record threaded through one run, created per incoming query and
/// discarded after the response is returned.
///
/// The scheduler treats values of this type as snapshots: transition
/// functions consume a state and return the next one.
#[derive(Debug, Clone)]
pub struct RunState {
    /// Identifier for log correlation
    pub run_id: String,

    /// Original user query, immutable input to the run
    pub query: String,

    /// Caller-supplied context
    pub context: RunContext,

    /// Classification label once decided
    pub classification: Option<Classification>,

    /// Whether this run went through decomposition
    pub is_multishot: bool,

    /// Ordered sub-questions (empty for single-tool runs)
    pub sub_questions: Vec<SubQuestion>,

    /// Extracted/raw results keyed by sub-question id
    pub intermediate_results: HashMap<String, String>,

    /// Sub-question currently being processed
    pub current: Option<String>,

    /// Set when the multishot loop decided to stop executing
    pub processing_complete: bool,

    /// Eventual user-facing answer
    pub final_response: Option<String>,
}

impl RunState {
    pub fn new(query: impl Into<String>, context: RunContext) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            query: query.into(),
            context,
            classification: None,
            is_multishot: false,
            sub_questions: Vec::new(),
            intermediate_results: HashMap::new(),
            current: None,
            processing_complete: false,
            final_response: None,
        }
    }

    pub fn completed_count(&self) -> usize {
        self.sub_questions.iter().filter(|sq| sq.completed).count()
    }

    /// Ids of completed sub-questions, for readiness checks
    pub fn completed_ids(&self) -> HashSet<&str> {
        self.sub_questions
            .iter()
            .filter(|sq| sq.completed)
            .map(|sq| sq.id.as_str())
            .collect()
    }

    pub fn sub_question(&self, id: &str) -> Option<&SubQuestion> {
        self.sub_questions.iter().find(|sq| sq.id == id)
    }
}

// ============================================================================
// Run Outcome
// ============================================================================

/// What the engine exposes to its caller (e.g. a chat route)
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// Final user-facing answer, never empty
    pub response: String,

    /// Label of the path taken ("calculator", "multishot", "direct (fallback)", ...)
    pub tool_used: String,

    /// Sub-questions with results, present for multishot runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_questions: Option<Vec<SubQuestion>>,
}
