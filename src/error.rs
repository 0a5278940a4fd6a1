/// Error taxonomy for the orchestration engine
///
/// Every failure a caller can observe is one of these variants. Input errors and
/// transient collaborator failures leave persisted state untouched; invariant
/// violations indicate a bug and are logged at error level where they are raised.

use crate::workflow::types::{PausePoint, RunStatus};
use thiserror::Error;

/// Errors raised by checkpoint and audit persistence
#[derive(Error, Debug)]
pub enum StoreError {
    /// Append rejected because step_sequence is not exactly previous + 1
    #[error("Out-of-order checkpoint for run {run_id}: expected sequence {expected}, got {actual}")]
    OutOfOrder {
        run_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Unknown run: {0}")]
    UnknownRun(String),

    #[error("Run {run_id} is owned by tenant '{owner}', not '{tenant_id}'")]
    TenantMismatch {
        run_id: String,
        owner: String,
        tenant_id: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Errors reported by external collaborators (classifier, reasoning, actions, memory)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PortError {
    /// Transient: the collaborator could not be reached or answered 5xx.
    /// The run stays in its pre-step status and may be recovered later.
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    /// Unrecoverable: the collaborator refused the request or answered garbage.
    /// The run is routed to `error`.
    #[error("Collaborator rejected request: {0}")]
    Rejected(String),
}

impl PortError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PortError::Unavailable(_))
    }
}

/// Names of the collaborator ports, used in error reports and failure reason codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Port {
    Classifier,
    Reasoning,
    Action,
    MemoryStore,
}

impl Port {
    pub fn as_str(&self) -> &'static str {
        match self {
            Port::Classifier => "classifier",
            Port::Reasoning => "reasoning",
            Port::Action => "action",
            Port::MemoryStore => "memory_store",
        }
    }
}

impl std::fmt::Display for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by `WorkflowEngine` operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed request envelope or resume payload. Nothing was persisted.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Run not found: {0}")]
    NotFound(String),

    /// Resume called on a run that is not waiting for external input
    #[error("Run {run_id} is not resumable in status '{status}'")]
    NotResumable { run_id: String, status: RunStatus },

    /// Latest checkpoint's pause point disagrees with the run status (bug)
    #[error("Pause point mismatch for run {run_id}: status expects {expected:?}, checkpoint recorded {recorded:?}")]
    PausePointMismatch {
        run_id: String,
        expected: PausePoint,
        recorded: Option<PausePoint>,
    },

    /// Router selected a transition that the state graph does not contain (bug)
    #[error("Invalid transition for run {run_id}: {from} -> {to}")]
    InvalidTransition {
        run_id: String,
        from: RunStatus,
        to: RunStatus,
    },

    /// Transient collaborator failure; no checkpoint was written for the step
    #[error("{port} call failed for run {run_id}: {source}")]
    Collaborator {
        run_id: String,
        port: Port,
        #[source]
        source: PortError,
    },

    /// Memory flush acknowledged only part of the pending items; progress was checkpointed
    #[error("Memory flush incomplete for run {run_id}: {remaining} item(s) still pending")]
    MemoryFlushIncomplete { run_id: String, remaining: usize },

    #[error("Checkpoint store failure: {0}")]
    Checkpoint(#[source] StoreError),

    #[error("Audit store failure: {0}")]
    Audit(#[source] StoreError),
}

impl EngineError {
    /// Short machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::NotFound(_) => "not_found",
            EngineError::NotResumable { .. } => "not_resumable",
            EngineError::PausePointMismatch { .. } => "pause_point_mismatch",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::Collaborator { .. } => "collaborator_unavailable",
            EngineError::MemoryFlushIncomplete { .. } => "memory_flush_incomplete",
            EngineError::Checkpoint(StoreError::OutOfOrder { .. }) => "checkpoint_conflict",
            EngineError::Checkpoint(_) => "checkpoint_failure",
            EngineError::Audit(_) => "audit_failure",
        }
    }
}
