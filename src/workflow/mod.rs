/// Workflow data layer
///
/// Run and payload types, the intent catalog, and the two append-only logs
/// every run writes: checkpoints and audit entries.

// Core run type definitions
pub mod types;

// Intent name -> required fields table
pub mod catalog;

// Checkpoint persistence (SQLite + in-memory)
pub mod storage;

// Append-only audit log (SQLite + in-memory)
pub mod audit;

// Re-export commonly used types
pub use audit::{AuditEntry, AuditStore};
pub use catalog::IntentCatalog;
pub use storage::{Checkpoint, CheckpointStore};
pub use types::{PausePoint, Run, RunPayload, RunStatus};
