// Engine core: classification, decomposition, scheduling, aggregation
pub mod engine;

// Tool adapters and the configured tool set
pub mod tools;

pub use engine::{Engine, RunConfig, RunContext, RunOutcome};
pub use tools::ToolSet;
