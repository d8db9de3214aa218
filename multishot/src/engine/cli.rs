//! CLI argument definitions for the multishot binary.

use clap::Parser;
use std::time::Duration;

use crate::engine::types::RunConfig;

/// Tool-selection and multi-step execution engine
///
/// Classifies a query, routes it to a tool (or decomposes it into dependent
/// sub-questions), and synthesizes one answer.
#[derive(Parser, Debug, Clone)]
#[command(name = "multishot")]
#[command(about = "Run one query through the multishot engine")]
#[command(version)]
pub struct Args {
    /// Query to run
    #[arg(value_name = "QUERY")]
    pub query: String,

    /// Wall-clock ceiling for the whole run, in seconds
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub run_timeout: u64,

    /// Ceiling for a single tool call, in seconds
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    pub tool_timeout: u64,

    /// Ceiling for a single model call, in seconds
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    pub model_timeout: u64,

    /// Safety valve: maximum sub-question steps per run
    #[arg(long, value_name = "N", default_value_t = 20)]
    pub step_cap: usize,

    /// Print the full outcome as JSON instead of plain text
    #[arg(long)]
    pub json: bool,
}

impl Args {
    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            tool_timeout: Duration::from_secs(self.tool_timeout),
            model_timeout: Duration::from_secs(self.model_timeout),
            decompose_timeout: Duration::from_secs(self.model_timeout),
            run_timeout: Duration::from_secs(self.run_timeout),
            step_cap: self.step_cap,
            ..RunConfig::default()
        }
    }
}
