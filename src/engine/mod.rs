//! Core engine: the scan → decide → execute loop and its runner.

pub mod agent_loop;
pub mod executor;
pub mod runner;

#[cfg(test)]
pub(crate) mod testing;

pub use agent_loop::AgentLoop;
pub use executor::{ExecutionError, ExecutionOutcome, ExecutionResult, Executor, Routing};
pub use runner::AgentRunner;
