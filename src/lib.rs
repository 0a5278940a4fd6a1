/// resqflow: durable, interruptible workflow orchestration for emergency requests
///
/// Classifies incoming requests, completes their parameters through bounded
/// human clarification, reasons over external evidence, gates irreversible
/// actions behind an approval pause and commits long-term memory in two phases.
/// Every step is checkpointed so a run survives process restarts.

// Core configuration and setup
pub mod config;

// Error taxonomy
pub mod error;

// Tenant isolation - one SQLite database per tenant plus a run catalog
pub mod tenant;

// Run types, intent catalog, checkpoint and audit stores
pub mod workflow;

// Runtime engine - state graph, steps, gate, memory commit
pub mod runtime;

// External collaborator contracts and implementations
pub mod ports;

// HTTP API layer
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use error::{EngineError, PortError, StoreError};
pub use runtime::{EngineConfig, RunHandle, WorkflowEngine};
pub use server::start_server;
pub use workflow::{Run, RunStatus};
