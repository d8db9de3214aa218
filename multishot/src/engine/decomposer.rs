//! Decomposer: converts a composite query into an ordered dependency graph
//! of sub-questions.
//!
//! The primary path asks the model for a fixed-shape JSON payload under a
//! short timeout. Parsing degrades through a ladder, never surfacing an
//! error to the user:
//!
//! 1. Strict parse of the full payload
//! 2. Scoped extraction of the sub-question array, then per-object parse
//! 3. Field-by-field regex extraction when the array is beyond repair
//! 4. Deterministic template decomposition for canonical query shapes
//! 5. Emergency decomposition: one search over the whole query, plus a
//!    dependent calculator step when arithmetic vocabulary is present
//!
//! Every path terminates with a non-empty list containing at least one
//! entry-eligible sub-question.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use multishot_sdk::{log_decomposition_fallback, LanguageModel};

use crate::engine::types::{repair_dependencies, RunContext, SubQuestion, ToolKind};

// ============================================================================
// Wire Shape
// ============================================================================

/// Fixed-shape payload the model is asked to produce
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecompositionPayload {
    pub sub_questions: Vec<SubQuestionSpec>,
}

/// One sub-question as it appears on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuestionSpec {
    /// Unique token ("q1")
    pub id: String,

    /// Question or expression text
    pub question: String,

    /// Tool the model assigned ("search" or "calculator")
    pub tool_type: SpecToolType,

    /// Ids that must complete first
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Tools the decomposition prompt allows the model to assign
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecToolType {
    Search,
    Calculator,
}

impl From<SpecToolType> for ToolKind {
    fn from(tool: SpecToolType) -> Self {
        match tool {
            SpecToolType::Search => ToolKind::Search,
            SpecToolType::Calculator => ToolKind::Calculator,
        }
    }
}

impl SubQuestionSpec {
    fn into_sub_question(self) -> SubQuestion {
        SubQuestion::new(self.id, self.question, self.tool_type.into())
            .with_dependencies(self.depends_on)
    }
}

// ============================================================================
// Model Path
// ============================================================================

fn decomposition_prompt(query: &str, context: &RunContext) -> String {
    let mut prompt = format!(
        r#"Break the user's question into 2-3 sub-questions that can each be
answered by a single tool. Tools available: "search" (fact lookup) and
"calculator" (arithmetic over earlier results, referencing them by id).

Respond with only this JSON structure, no markdown:
{{"sub_questions": [
  {{"id": "q1", "question": "...", "tool_type": "search", "depends_on": []}},
  {{"id": "q2", "question": "q1 * 2", "tool_type": "calculator", "depends_on": ["q1"]}}
]}}

Question: {}"#,
        query
    );

    if !context.prior_tool_query_templates.is_empty() {
        prompt.push_str("\n\nQuery templates that worked for this user before:\n");
        for template in &context.prior_tool_query_templates {
            prompt.push_str(&format!("- {}\n", template));
        }
    }

    prompt
}

/// Decompose a composite query into sub-questions.
///
/// Falls through the parse ladder and deterministic tiers as needed; the
/// returned list is always non-empty, dependency-repaired, and acyclic.
pub async fn decompose(
    model: &Arc<dyn LanguageModel>,
    query: &str,
    context: &RunContext,
    timeout: Duration,
    run_id: &str,
) -> Vec<SubQuestion> {
    let prompt = decomposition_prompt(query, context);

    let specs = match tokio::time::timeout(timeout, model.complete(&prompt)).await {
        Ok(Ok(response)) => match parse_decomposition(&response) {
            Some(specs) => specs,
            None => {
                log_decomposition_fallback!(run_id, "template");
                deterministic_decomposition(query, run_id)
            }
        },
        // Model error or timeout: skip straight to the deterministic tiers
        Ok(Err(_)) | Err(_) => {
            log_decomposition_fallback!(run_id, "template");
            deterministic_decomposition(query, run_id)
        }
    };

    let sub_questions: Vec<SubQuestion> = specs
        .into_iter()
        .map(SubQuestionSpec::into_sub_question)
        .collect();

    let repaired = repair_dependencies(sub_questions);
    if repaired.is_empty() {
        // Parsing produced an empty list; the emergency tier cannot
        log_decomposition_fallback!(run_id, "emergency");
        repair_dependencies(
            emergency_decomposition(query)
                .into_iter()
                .map(SubQuestionSpec::into_sub_question)
                .collect(),
        )
    } else {
        repaired
    }
}

fn deterministic_decomposition(query: &str, run_id: &str) -> Vec<SubQuestionSpec> {
    match template_decomposition(query) {
        Some(specs) => specs,
        None => {
            log_decomposition_fallback!(run_id, "emergency");
            emergency_decomposition(query)
        }
    }
}

// ============================================================================
// Parse Ladder (tiers 1-3)
// ============================================================================

static ID_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""id"\s*:\s*"([^"]+)""#).expect("id field pattern"));

static QUESTION_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""question"\s*:\s*"([^"]+)""#).expect("question field pattern"));

static TOOL_TYPE_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""tool_type"\s*:\s*"(\w+)""#).expect("tool type field pattern"));

static OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{[^{}]*\}").expect("object pattern"));

/// Parse a model response into sub-question specs, degrading through the
/// ladder. Returns None only when every tier fails.
pub fn parse_decomposition(response: &str) -> Option<Vec<SubQuestionSpec>> {
    let cleaned = strip_markdown_fences(response);

    // Tier 1: strict parse of the full payload (or a bare array)
    if let Ok(payload) = serde_json::from_str::<DecompositionPayload>(&cleaned) {
        if !payload.sub_questions.is_empty() {
            return Some(payload.sub_questions);
        }
    }
    if let Ok(specs) = serde_json::from_str::<Vec<SubQuestionSpec>>(&cleaned) {
        if !specs.is_empty() {
            return Some(specs);
        }
    }

    // Tier 2: scope to the sub-question array, then parse whole or per-object
    if let Some(array_text) = extract_array(&cleaned, "sub_questions") {
        if let Ok(specs) = serde_json::from_str::<Vec<SubQuestionSpec>>(&array_text) {
            if !specs.is_empty() {
                return Some(specs);
            }
        }

        let specs: Vec<SubQuestionSpec> = OBJECT
            .find_iter(&array_text)
            .filter_map(|m| serde_json::from_str::<SubQuestionSpec>(m.as_str()).ok())
            .collect();
        if !specs.is_empty() {
            return Some(specs);
        }
    }

    // Tier 3: field-by-field extraction, accepted only when the counts agree
    parse_fields(&cleaned)
}

/// Drop ```json fences the model may wrap the payload in
fn strip_markdown_fences(response: &str) -> String {
    let trimmed = response.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    trimmed
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extract the bracket-balanced array following `"key":`
fn extract_array(text: &str, key: &str) -> Option<String> {
    let key_pos = text.find(&format!("\"{}\"", key))?;
    let open = text[key_pos..].find('[')? + key_pos;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[open..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '[' if !in_string => depth += 1,
            ']' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[open..=open + offset].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Zip separately-extracted id/question/tool_type fields into specs.
///
/// Dependency information is gone at this tier, so calculator steps are
/// assumed to depend on every step before them.
fn parse_fields(text: &str) -> Option<Vec<SubQuestionSpec>> {
    let ids: Vec<String> = ID_FIELD
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect();
    let questions: Vec<String> = QUESTION_FIELD
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect();
    let tools: Vec<SpecToolType> = TOOL_TYPE_FIELD
        .captures_iter(text)
        .map(|c| match c[1].to_lowercase().as_str() {
            "calculator" => SpecToolType::Calculator,
            _ => SpecToolType::Search,
        })
        .collect();

    if ids.is_empty() || ids.len() != questions.len() || ids.len() != tools.len() {
        return None;
    }

    let mut specs = Vec::with_capacity(ids.len());
    for (index, ((id, question), tool)) in ids
        .into_iter()
        .zip(questions.into_iter())
        .zip(tools.into_iter())
        .enumerate()
    {
        let depends_on = if tool == SpecToolType::Calculator {
            specs
                .iter()
                .take(index)
                .map(|prior: &SubQuestionSpec| prior.id.clone())
                .collect()
        } else {
            Vec::new()
        };
        specs.push(SubQuestionSpec {
            id,
            question,
            tool_type: tool,
            depends_on,
        });
    }
    Some(specs)
}

// ============================================================================
// Deterministic Tiers (4-5)
// ============================================================================

static LOCATION_VALUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(population|gdp|area|distance|price|temperature)\s+(?:of|to|in)\s+([A-Za-z][A-Za-z .'-]*?)(?:\s*(?:,|\?|$|\bplus\b|\band\b|\bminus\b|\btimes\b|\bmultiplied\b|\bdivided\b))")
        .expect("location value pattern")
});

static MULTIPLIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:multiplied\s+by|times)\s+(\d+(?:\.\d+)?)|(\d+(?:\.\d+)?)\s*(?:%|percent)")
        .expect("multiplier pattern")
});

static ARITHMETIC_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(plus|minus|times|multiply|multiplied|divide|divided|sum|total|percent|add|subtract)\b|[-+*/%]")
        .expect("arithmetic hint pattern")
});

/// Tier 4: recognize the canonical "<metric> of <entity> ... combined"
/// shape and synthesize named-entity sub-questions.
pub fn template_decomposition(query: &str) -> Option<Vec<SubQuestionSpec>> {
    let entities: Vec<(String, String)> = LOCATION_VALUE
        .captures_iter(&format!("{} ", query))
        .map(|caps| (caps[1].to_lowercase(), caps[2].trim().to_string()))
        .collect();

    if entities.len() < 2 {
        return None;
    }

    let mut specs: Vec<SubQuestionSpec> = entities
        .iter()
        .enumerate()
        .map(|(index, (metric, entity))| SubQuestionSpec {
            id: format!("q{}", index + 1),
            question: format!("What is the {} of {}?", metric, entity),
            tool_type: SpecToolType::Search,
            depends_on: Vec::new(),
        })
        .collect();

    let search_ids: Vec<String> = specs.iter().map(|s| s.id.clone()).collect();
    let combine_id = format!("q{}", specs.len() + 1);
    specs.push(SubQuestionSpec {
        id: combine_id.clone(),
        question: format!("Sum({})", search_ids.join(", ")),
        tool_type: SpecToolType::Calculator,
        depends_on: search_ids,
    });

    if let Some(multiplier) = detect_multiplier(query) {
        specs.push(SubQuestionSpec {
            id: format!("q{}", specs.len() + 1),
            question: format!("{} * {}", combine_id, multiplier),
            tool_type: SpecToolType::Calculator,
            depends_on: vec![combine_id],
        });
    }

    Some(specs)
}

/// Detected trailing multiplier ("multiplied by 0.05", "5 percent")
pub fn detect_multiplier(query: &str) -> Option<String> {
    let caps = MULTIPLIER.captures(query)?;
    if let Some(factor) = caps.get(1) {
        return Some(factor.as_str().to_string());
    }
    let percent: f64 = caps.get(2)?.as_str().parse().ok()?;
    Some(format!("{}", percent / 100.0))
}

/// Tier 5: one search over the whole query, plus a dependent calculator
/// step when arithmetic vocabulary is present.
pub fn emergency_decomposition(query: &str) -> Vec<SubQuestionSpec> {
    let mut specs = vec![SubQuestionSpec {
        id: "q1".to_string(),
        question: query.to_string(),
        tool_type: SpecToolType::Search,
        depends_on: Vec::new(),
    }];

    if ARITHMETIC_HINT.is_match(query) {
        specs.push(SubQuestionSpec {
            id: "q2".to_string(),
            question: "Compute the arithmetic requested in the question using the result of q1"
                .to_string(),
            tool_type: SpecToolType::Calculator,
            depends_on: vec!["q1".to_string()],
        });
    }

    specs
}
