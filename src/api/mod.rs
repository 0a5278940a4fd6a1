/// HTTP API Layer
///
/// Tenant-scoped REST endpoints over the workflow engine:
/// - start a run and inspect its latest state
/// - resume a suspended run or recover an interrupted one
/// - read a run's audit trail

// Run endpoints
pub mod runs;

// Re-export router builder
pub use runs::{create_run_routes, AppState};
