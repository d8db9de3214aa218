//! Integration tests for the multishot engine
//!
//! This test suite exercises the engine end to end through `Engine::run`:
//! - Classification and single-tool routing
//! - Composite decomposition, scheduling, and aggregation
//! - Degradation paths: tool failures, model failures, timeouts, step cap

mod engine {
    mod common;
    mod test_degradation;
    mod test_scenarios;
}
