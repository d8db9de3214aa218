//! Demo binary: run one query through the engine from the command line.
//!
//! Only the built-in calculator adapter is wired up; search and
//! structured-query routing degrade per the recovery ladder, which makes
//! this a convenient way to observe the engine's fallback behavior.

use anyhow::{bail, Result};
use clap::Parser;
use std::sync::Arc;

use multishot::engine::cli::Args;
use multishot::tools::calculator::CalculatorTool;
use multishot::{Engine, RunContext, ToolSet};
use multishot_sdk::{async_trait, LanguageModel};

/// Stands in when no language model is configured; every completion fails,
/// exercising the engine's degradation paths.
struct OfflineModel;

#[async_trait]
impl LanguageModel for OfflineModel {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        bail!("no language model configured")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let model: Arc<dyn LanguageModel> = Arc::new(OfflineModel);
    let tools = ToolSet::new().with_calculator(Arc::new(CalculatorTool));
    let engine = Engine::new(model, tools).with_config(args.run_config());

    let outcome = engine.run(&args.query, RunContext::default()).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("[{}] {}", outcome.tool_used, outcome.response);
    }

    Ok(())
}
