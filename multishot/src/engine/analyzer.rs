//! Model-assisted analyzer, reached only when the pattern classifier
//! returns Unclear.
//!
//! The model is given a closed-label instruction and treated as unreliable:
//! label extraction is a case-insensitive substring match against the known
//! vocabulary, and anything else (including model errors and timeouts)
//! defaults to a direct answer so downstream always has a decision.

use std::sync::Arc;
use std::time::Duration;

use multishot_sdk::LanguageModel;

use crate::engine::types::Classification;

/// Closed label vocabulary, checked in order. "multishot" is checked first
/// so a rationale mentioning the other tools cannot shadow it.
const LABEL_CHECKS: &[(&str, Classification)] = &[
    ("multishot", Classification::Composite),
    ("calculator", Classification::Calculator),
    ("structured-query", Classification::StructuredQuery),
    ("search", Classification::Search),
    ("direct-answer", Classification::Unclear),
];

fn analysis_prompt(query: &str) -> String {
    format!(
        r#"Decide which tool is needed to answer the user's question.

Answer with exactly one of these labels, followed by a one-sentence rationale:
- calculator: the question is a pure arithmetic calculation
- search: the question needs a single up-to-date fact lookup
- structured-query: the question is about the contents of a database
- multishot: the question needs several lookups or calculations combined
- direct-answer: the question can be answered from general knowledge

Question: {}"#,
        query
    )
}

/// Ask the model to pick a label for a query the heuristics could not place.
///
/// Never fails: any error, timeout, or off-vocabulary response resolves to
/// `Classification::Unclear`, which the workflow routes as a direct answer.
pub async fn analyze_with_model(
    model: &Arc<dyn LanguageModel>,
    query: &str,
    timeout: Duration,
) -> Classification {
    let prompt = analysis_prompt(query);
    let response = match tokio::time::timeout(timeout, model.complete(&prompt)).await {
        Ok(Ok(text)) => text,
        // Model error or timeout: fall through to a direct answer
        Ok(Err(_)) | Err(_) => return Classification::Unclear,
    };

    extract_label(&response)
}

/// Case-insensitive substring match against the known vocabulary only
fn extract_label(response: &str) -> Classification {
    let lowered = response.to_lowercase();
    for (label, classification) in LABEL_CHECKS {
        if lowered.contains(label) {
            return *classification;
        }
    }
    Classification::Unclear
}
