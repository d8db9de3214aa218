//! Pattern classifier: cheap regex/heuristic labeling before any model call.
//!
//! Precedence order, per the routing contract:
//!
//! 1. Composite patterns short-circuit to decomposition
//! 2. Calculator patterns beat Search patterns on co-occurrence
//! 3. Structured-query patterns
//! 4. Search patterns
//! 5. Anything else is Unclear and escalates to the model-assisted analyzer
//!
//! Pure function over the text; no side effects.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::engine::types::Classification;

/// Domain nouns that suggest values to be looked up and combined
static DOMAIN_NOUNS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(population|distance|price|cost|temperature|gdp|area|revenue|salary|height|weight|age|budget|income)\b",
    )
    .expect("domain noun pattern")
});

/// Arithmetic-relation vocabulary connecting looked-up values
static ARITHMETIC_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(plus|minus|times|multiply|multiplied|divide|divided|percent|sum|total|difference|add|added|subtract)\b|%",
    )
    .expect("arithmetic word pattern")
});

/// Explicit multi-step phrasing
static MULTI_STEP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bfirst\b.*\bthen\b|\bafter that\b|\band then\b").expect("multi-step pattern")
});

/// Literal arithmetic expressions ("25 * 4", "3.5 / 2")
static EXPRESSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d+(\.\d+)?\s*[-+*/^×÷]\s*\d").expect("expression pattern")
});

/// Arithmetic requests spelled out in words ("what is 12 times 8")
static WORDY_CALCULATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(calculate|compute)\b|\b\d+(\.\d+)?\s+(plus|minus|times|divided by)\s+\d")
        .expect("wordy calculation pattern")
});

/// Database-flavoured requests
static STRUCTURED_QUERY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(database|table|rows?|records?)\b|(?i)\bselect\b.+\bfrom\b")
        .expect("structured query pattern")
});

/// Lookup-flavoured requests
static SEARCH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(who|what|when|where|which)\b|\b(current|latest|today|recent|news|weather)\b|\b(population|capital|price|president)\s+of\b|\bsearch\b",
    )
    .expect("search pattern")
});

/// Classify a raw query with pattern heuristics only.
///
/// Composite detection here is independent of tool configuration; the
/// workflow layer downgrades Composite when no search-capable adapter is
/// configured.
pub fn classify(query: &str) -> Classification {
    if is_composite(query) {
        return Classification::Composite;
    }

    // Calculator takes precedence over Search on co-occurrence
    if EXPRESSION.is_match(query) || WORDY_CALCULATION.is_match(query) {
        return Classification::Calculator;
    }

    if STRUCTURED_QUERY.is_match(query) {
        return Classification::StructuredQuery;
    }

    if SEARCH.is_match(query) {
        return Classification::Search;
    }

    Classification::Unclear
}

/// A query is composite when domain nouns co-occur with arithmetic relations,
/// or when it spells out multiple steps explicitly.
fn is_composite(query: &str) -> bool {
    (DOMAIN_NOUNS.is_match(query) && ARITHMETIC_WORDS.is_match(query))
        || MULTI_STEP.is_match(query)
}
