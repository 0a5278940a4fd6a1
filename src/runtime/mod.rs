/// Runtime execution engine
///
/// Drives runs through the state graph:
/// - step functions and their collaborator calls
/// - slot validation, evidence gating and two-phase memory commit
/// - suspension at human pause points and resumption from checkpoints

// Durable workflow engine: start, resume, recover
pub mod engine;

// Idempotent step functions
pub mod executor;

// Minimum-evidence gate for irreversible actions
pub mod gate;

// petgraph state machine and pure router
pub mod graph;

// Pause point bookkeeping
pub mod interrupt;

// Two-phase long-term memory commit
pub mod memory;

// Required-field validation and clarification merging
pub mod validator;

// Re-export main types
pub use engine::{EngineConfig, RunHandle, WorkflowEngine};
pub use interrupt::SuspensionToken;
