//! The tool-selection and multi-step execution engine.
//!
//! One query flows in and one answer flows out:
//! classifier/analyzer -> single-tool execution, or
//! decomposer -> resolver/scheduler loop -> aggregator.
//!
//! ## Module Structure
//!
//! - `types` - Run state, sub-questions, tool labels, configuration
//! - `classifier` - Regex/heuristic query labeling
//! - `analyzer` - Model-assisted labeling for unclear queries
//! - `decomposer` - Composite query decomposition with fallback ladder
//! - `resolver` - Reference substitution and numeric extraction
//! - `scheduler` - The state machine walking the dependency graph
//! - `aggregator` - Final answer synthesis with deterministic fallbacks
//! - `workflow` - Public entry point tying the pieces together
//! - `cli` - Command-line argument definitions

pub mod aggregator;
pub mod analyzer;
pub mod classifier;
pub mod cli;
pub mod decomposer;
pub mod resolver;
pub mod scheduler;
pub mod types;
pub mod workflow;

pub use types::{RunConfig, RunContext, RunOutcome, RunState, SubQuestion, ToolKind};
pub use workflow::Engine;
