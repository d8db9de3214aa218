//! Dependency resolver: substitutes completed sub-question results into
//! later sub-questions' inputs before tool invocation.
//!
//! References come in two shapes: explicit id mentions ("q1 + q2") and
//! natural-language instructions ("using the result of q1"). Values are
//! pulled from the intermediate result map with a tiered numeric extraction
//! that never fabricates a number: an unresolvable reference is left in
//! place and reported, so the downstream calculator failure is handled as a
//! tool error instead of a silent zero.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::engine::scheduler::result_is_failure;

/// Well-known answer-bearing fields probed at one or two nesting levels
const KNOWN_FIELDS: &[&str] = &[
    "population",
    "direct_answer",
    "answer",
    "value",
    "result",
    "count",
    "total",
];

static MILLION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*million").expect("million pattern"));

static COMMA_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{1,3}(?:,\d{3})+(?:\.\d+)?").expect("comma number pattern"));

static BARE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("bare number pattern"));

static AGGREGATE_SUM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bsum\s*\(([^)]*)\)").expect("sum pattern"));

static RESULT_OF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:using\s+)?the\s+result\s+of\s+(q\d+)").expect("result-of pattern")
});

static SUB_QUESTION_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bq\d+\b").expect("sub-question id pattern"));

static EXPRESSION_SPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9.,+\-*/×÷()\s]+").expect("expression span pattern"));

static OPERATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[+*/×÷]|\d\s*-\s*\d").expect("operator pattern"));

/// Result of substituting references into a sub-question input
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Input text with every resolvable reference replaced by a value
    pub text: String,
    /// References that could not be resolved to a value
    pub unresolved: Vec<String>,
}

/// Extract a numeric value from an arbitrary prior result string.
///
/// Tiers, in order: well-known JSON fields, "<number> million" scaling,
/// comma-formatted numbers, bare numbers. Returns None rather than guessing.
pub fn extract_numeric(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if let Some(found) = extract_from_json(&value) {
            return Some(found);
        }
    }

    if let Some(caps) = MILLION.captures(trimmed) {
        if let Ok(base) = caps[1].parse::<f64>() {
            return Some(format_number(base * 1_000_000.0));
        }
    }

    if let Some(m) = COMMA_NUMBER.find(trimmed) {
        return Some(m.as_str().replace(',', ""));
    }

    BARE_NUMBER
        .find(trimmed)
        .map(|m| m.as_str().to_string())
}

/// Probe known fields at the top level, then one level deeper
fn extract_from_json(value: &Value) -> Option<String> {
    let Value::Object(map) = value else {
        return None;
    };

    for field in KNOWN_FIELDS {
        if let Some(found) = map.get(*field).and_then(numeric_from_value) {
            return Some(found);
        }
    }

    for nested in map.values() {
        if let Value::Object(inner) = nested {
            for field in KNOWN_FIELDS {
                if let Some(found) = inner.get(*field).and_then(numeric_from_value) {
                    return Some(found);
                }
            }
        }
    }

    None
}

/// Numeric content of a single JSON value, stripping separators from strings
fn numeric_from_value(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => {
            let stripped: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            if stripped.is_empty() || stripped.parse::<f64>().is_err() {
                None
            } else {
                Some(stripped)
            }
        }
        _ => None,
    }
}

/// Render without a trailing ".0" for whole numbers
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Pull the arithmetic expression out of wordy text ("what is 25 * 4?"),
/// returning the widest span of digits, operators, and parentheses. Returns
/// None when the text contains no operator-joined numbers.
pub fn extract_expression(text: &str) -> Option<String> {
    EXPRESSION_SPAN
        .find_iter(text)
        .map(|m| m.as_str().trim().trim_matches(',').trim())
        .filter(|span| span.chars().any(|c| c.is_ascii_digit()) && OPERATOR.is_match(span))
        .max_by_key(|span| span.len())
        .map(|span| span.to_string())
}

/// Resolve references in calculator expression text.
///
/// Aggregate calls like "Sum(q1, q2)" are rewritten to explicit additions
/// first, then generic reference substitution runs over the rest.
pub fn resolve_expression(text: &str, results: &HashMap<String, String>) -> Resolution {
    let mut unresolved = Vec::new();

    let rewritten = AGGREGATE_SUM.replace_all(text, |caps: &regex::Captures| {
        let operands: Vec<String> = caps[1]
            .split(',')
            .map(|op| op.trim().to_string())
            .filter(|op| !op.is_empty())
            .collect();
        format!("({})", operands.join(" + "))
    });

    let resolved = substitute_ids(&rewritten, results, true, &mut unresolved);
    Resolution {
        text: resolved,
        unresolved,
    }
}

/// Resolve references in search text, preferring the numeric value when one
/// can be extracted and falling back to the raw result otherwise.
pub fn resolve_search_text(text: &str, results: &HashMap<String, String>) -> Resolution {
    let mut unresolved = Vec::new();
    let resolved = substitute_ids(text, results, false, &mut unresolved);
    Resolution {
        text: resolved,
        unresolved,
    }
}

fn substitute_ids(
    text: &str,
    results: &HashMap<String, String>,
    numeric_only: bool,
    unresolved: &mut Vec<String>,
) -> String {
    // Phrase references first so "the result of q1" collapses to one value
    let phase1 = RESULT_OF.replace_all(text, |caps: &regex::Captures| {
        lookup(&caps[1], results, numeric_only).unwrap_or_else(|| {
            unresolved.push(caps[1].to_string());
            caps[0].to_string()
        })
    });

    let phase2 = SUB_QUESTION_ID.replace_all(&phase1, |caps: &regex::Captures| {
        lookup(&caps[0], results, numeric_only).unwrap_or_else(|| {
            unresolved.push(caps[0].to_string());
            caps[0].to_string()
        })
    });

    // Both passes can trip over the same id; report it once
    let mut seen = HashSet::new();
    unresolved.retain(|id| seen.insert(id.clone()));

    phase2.into_owned()
}

fn lookup(id: &str, results: &HashMap<String, String>, numeric_only: bool) -> Option<String> {
    let raw = results.get(id)?;
    // A recorded tool failure carries no value, even when its message
    // happens to contain digits (status codes, timeouts in seconds)
    if result_is_failure(raw) {
        return None;
    }
    match extract_numeric(raw) {
        Some(numeric) => Some(numeric),
        None if numeric_only => None,
        None => Some(raw.clone()),
    }
}
