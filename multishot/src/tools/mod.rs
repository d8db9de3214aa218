//! Tool adapters behind the uniform invoke contract.
//!
//! [`ToolSet`] holds whichever adapters the caller configured; the engine
//! checks availability before routing and invokes through
//! [`invoke_tool`], which wraps every call in an explicit timeout and
//! normalizes the output to bounded text. A returned error-shaped string is
//! treated the same as a thrown error.

pub mod calculator;

use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;

use multishot_sdk::ToolAdapter;

use crate::engine::types::ToolKind;

/// Adapters configured for a run, keyed by tool kind
#[derive(Clone, Default)]
pub struct ToolSet {
    calculator: Option<Arc<dyn ToolAdapter>>,
    search: Option<Arc<dyn ToolAdapter>>,
    structured_query: Option<Arc<dyn ToolAdapter>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_calculator(mut self, adapter: Arc<dyn ToolAdapter>) -> Self {
        self.calculator = Some(adapter);
        self
    }

    pub fn with_search(mut self, adapter: Arc<dyn ToolAdapter>) -> Self {
        self.search = Some(adapter);
        self
    }

    pub fn with_structured_query(mut self, adapter: Arc<dyn ToolAdapter>) -> Self {
        self.structured_query = Some(adapter);
        self
    }

    pub fn adapter_for(&self, kind: ToolKind) -> Option<&Arc<dyn ToolAdapter>> {
        match kind {
            ToolKind::Calculator => self.calculator.as_ref(),
            ToolKind::Search => self.search.as_ref(),
            ToolKind::StructuredQuery => self.structured_query.as_ref(),
            ToolKind::Direct => None,
        }
    }

    pub fn has(&self, kind: ToolKind) -> bool {
        self.adapter_for(kind).is_some()
    }

    /// Composite classification requires at least a search-capable tool
    pub fn has_search(&self) -> bool {
        self.search.is_some()
    }
}

/// Invoke the adapter for `kind`, racing it against `timeout`.
///
/// The output is normalized to at most `max_output_len` characters. Both a
/// thrown error and an error-shaped string count as failure.
pub async fn invoke_tool(
    tools: &ToolSet,
    kind: ToolKind,
    input: &str,
    timeout: Duration,
    max_output_len: usize,
) -> Result<String> {
    let adapter = tools
        .adapter_for(kind)
        .ok_or_else(|| anyhow!("no {} tool configured", kind.label()))?;

    let output = tokio::time::timeout(timeout, adapter.invoke(input))
        .await
        .map_err(|_| anyhow!("{} tool timed out", kind.label()))??;

    let text = output.into_normalized_text(max_output_len);
    if looks_like_error(&text) {
        return Err(anyhow!("{} tool reported an error: {}", kind.label(), text));
    }
    Ok(text)
}

/// Adapters may report failure as text instead of an Err
fn looks_like_error(text: &str) -> bool {
    let lowered = text.trim_start().to_lowercase();
    lowered.starts_with("error") || lowered.starts_with("\"error")
}
