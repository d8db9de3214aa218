//! Collaborator contracts for the multishot engine.
//!
//! This crate defines the narrow seams between the engine and everything it
//! treats as external:
//!
//! 1. **Tool adapters** - the `invoke(input) -> output` contract wrapping a
//!    calculator, web search, or structured-query executor
//! 2. **Language model** - single-turn text completion, no streaming
//! 3. **Tool output** - the tagged text/structured union with defensive
//!    normalization to bounded text
//! 4. **Run logs** - structured events emitted to stderr for an observing
//!    front-end, kept separate from user-facing text

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Re-export async trait for convenience
pub use async_trait::async_trait;

/// A tool wrapped behind the uniform invoke contract.
///
/// Adapters may fail by returning `Err` or by returning an error-shaped
/// string; the engine treats both as tool failure.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    /// Short label for logging ("calculator", "search", ...)
    fn name(&self) -> &str;

    /// Execute the tool against the given input text.
    async fn invoke(&self, input: &str) -> Result<ToolOutput>;
}

/// Single-turn text completion capability.
///
/// The engine treats the model as unreliable: every caller has a parse
/// fallback for whatever this returns.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// What a tool adapter returns.
///
/// Search-style tools may return structured payloads with optional nested
/// fields (direct answer, knowledge panel, organic results); extraction
/// logic pattern-matches on which fields are present rather than probing
/// an untyped object.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// Plain prose output
    Text(String),
    /// Structured payload, shape not guaranteed
    Structured(serde_json::Value),
}

/// Nesting depth beyond which structured payloads are summarized instead
/// of serialized in full.
const MAX_FLATTEN_DEPTH: usize = 4;

impl ToolOutput {
    /// Normalize to bounded text for storage in the result map.
    ///
    /// Structured payloads are serialized defensively: objects nested deeper
    /// than [`MAX_FLATTEN_DEPTH`] are replaced with a summary marker, and the
    /// final text is truncated to `max_len` characters.
    pub fn into_normalized_text(self, max_len: usize) -> String {
        let text = match self {
            ToolOutput::Text(text) => text,
            ToolOutput::Structured(value) => {
                let flattened = flatten_value(value, 0);
                serde_json::to_string(&flattened)
                    .unwrap_or_else(|_| "[unserializable tool output]".to_string())
            }
        };
        truncate_chars(&text, max_len)
    }

    /// Borrow the structured payload if present.
    pub fn as_structured(&self) -> Option<&serde_json::Value> {
        match self {
            ToolOutput::Structured(value) => Some(value),
            ToolOutput::Text(_) => None,
        }
    }
}

/// Replace values nested deeper than the depth cap with a summary marker.
fn flatten_value(value: serde_json::Value, depth: usize) -> serde_json::Value {
    use serde_json::Value;

    if depth >= MAX_FLATTEN_DEPTH {
        return match &value {
            Value::Object(map) => Value::String(format!("[object with {} fields]", map.len())),
            Value::Array(items) => Value::String(format!("[array of {} items]", items.len())),
            other => other.clone(),
        };
    }

    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, flatten_value(v, depth + 1)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| flatten_value(v, depth + 1))
                .collect(),
        ),
        other => other,
    }
}

/// Truncate to a character budget without splitting a UTF-8 boundary.
fn truncate_chars(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_len).collect();
    format!("{}... [truncated]", truncated)
}

/// Structured events emitted by engine runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunLog {
    /// Run started for a query
    RunStarted { run_id: String, query: String },
    /// Classifier/analyzer settled on a label
    QueryClassified { run_id: String, label: String },
    /// State machine entered a state
    StateEntered { run_id: String, state: String },
    /// Tool invocation started
    ToolInvoked {
        run_id: String,
        tool: String,
        sub_question: Option<String>,
    },
    /// Tool invocation failed (timeout, error, or error-shaped output)
    ToolFailed {
        run_id: String,
        tool: String,
        error: String,
    },
    /// Sub-question result stored
    SubQuestionCompleted {
        run_id: String,
        id: String,
        summary: String,
    },
    /// Decomposition fell through to a lower tier
    DecompositionFallback { run_id: String, tier: String },
    /// Dependency reference could not be resolved to a value
    UnresolvedReference { run_id: String, reference: String },
    /// Safety valve forced completion of the multishot loop
    SafetyValveTriggered {
        run_id: String,
        completed: usize,
        total: usize,
    },
    /// Aggregation fell back to a deterministic path
    AggregationFallback { run_id: String, reason: String },
    /// Run finished with a response
    RunCompleted { run_id: String, tool_used: String },
}

/// Envelope adding a timestamp to every emitted event
#[derive(Debug, Serialize)]
struct RunLogEnvelope<'a> {
    ts: DateTime<Utc>,
    #[serde(flatten)]
    event: &'a RunLog,
}

impl RunLog {
    /// Emit this event to stderr for front-end parsing
    pub fn emit(&self) {
        let envelope = RunLogEnvelope {
            ts: Utc::now(),
            event: self,
        };
        if let Ok(json) = serde_json::to_string(&envelope) {
            use std::io::Write;
            eprintln!("__MS_EVENT__:{}", json);
            // Force flush stderr in async contexts
            let _ = std::io::stderr().flush();
        }
    }
}

/// Helper macros for run logging
#[macro_export]
macro_rules! log_run_start {
    ($run_id:expr, $query:expr) => {
        $crate::RunLog::RunStarted {
            run_id: $run_id.to_string(),
            query: $query.to_string(),
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_classified {
    ($run_id:expr, $label:expr) => {
        $crate::RunLog::QueryClassified {
            run_id: $run_id.to_string(),
            label: $label.to_string(),
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_state {
    ($run_id:expr, $state:expr) => {
        $crate::RunLog::StateEntered {
            run_id: $run_id.to_string(),
            state: $state.to_string(),
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_tool_start {
    ($run_id:expr, $tool:expr, $sub_question:expr) => {
        $crate::RunLog::ToolInvoked {
            run_id: $run_id.to_string(),
            tool: $tool.to_string(),
            sub_question: $sub_question,
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_tool_failed {
    ($run_id:expr, $tool:expr, $error:expr) => {
        $crate::RunLog::ToolFailed {
            run_id: $run_id.to_string(),
            tool: $tool.to_string(),
            error: $error.to_string(),
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_subquestion_complete {
    ($run_id:expr, $id:expr, $summary:expr) => {
        $crate::RunLog::SubQuestionCompleted {
            run_id: $run_id.to_string(),
            id: $id.to_string(),
            summary: $summary.to_string(),
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_decomposition_fallback {
    ($run_id:expr, $tier:expr) => {
        $crate::RunLog::DecompositionFallback {
            run_id: $run_id.to_string(),
            tier: $tier.to_string(),
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_unresolved_reference {
    ($run_id:expr, $reference:expr) => {
        $crate::RunLog::UnresolvedReference {
            run_id: $run_id.to_string(),
            reference: $reference.to_string(),
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_safety_valve {
    ($run_id:expr, $completed:expr, $total:expr) => {
        $crate::RunLog::SafetyValveTriggered {
            run_id: $run_id.to_string(),
            completed: $completed,
            total: $total,
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_aggregation_fallback {
    ($run_id:expr, $reason:expr) => {
        $crate::RunLog::AggregationFallback {
            run_id: $run_id.to_string(),
            reason: $reason.to_string(),
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_run_complete {
    ($run_id:expr, $tool_used:expr) => {
        $crate::RunLog::RunCompleted {
            run_id: $run_id.to_string(),
            tool_used: $tool_used.to_string(),
        }
        .emit();
    };
}
