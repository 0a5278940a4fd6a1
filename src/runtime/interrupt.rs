/// Interrupt coordination for the two human pause points
///
/// Suspending writes a checkpoint tagged with the pause point and hands the
/// caller a token describing what the human must answer. Resuming starts by
/// reloading that checkpoint and checking that the run is really parked where
/// its status says it is.

use crate::error::{EngineError, StoreError};
use crate::workflow::audit::AuditEntry;
use crate::workflow::storage::{Checkpoint, CheckpointOrigin, CheckpointStore, Suspension};
use crate::workflow::types::{PausePoint, Run, RunPayload};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// What a suspended run exposes to the human side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspensionToken {
    pub run_id: String,
    pub pause_point: PausePoint,
    pub payload_for_human: Value,
    pub step_sequence: u64,
}

impl SuspensionToken {
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Option<Self> {
        checkpoint.suspension.as_ref().map(|suspension| SuspensionToken {
            run_id: checkpoint.run_id.clone(),
            pause_point: suspension.pause_point,
            payload_for_human: suspension.payload_for_human.clone(),
            step_sequence: checkpoint.step_sequence,
        })
    }
}

#[derive(Clone)]
pub struct InterruptCoordinator {
    checkpoints: Arc<dyn CheckpointStore>,
}

impl std::fmt::Debug for InterruptCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptCoordinator").finish_non_exhaustive()
    }
}

impl InterruptCoordinator {
    pub fn new(checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self { checkpoints }
    }

    /// Persist a checkpoint parked at `pause_point` and return the token for the human
    pub async fn suspend(
        &self,
        run: &Run,
        origin: CheckpointOrigin,
        pause_point: PausePoint,
        audit: Vec<AuditEntry>,
    ) -> Result<(Checkpoint, SuspensionToken), StoreError> {
        let suspension = Suspension {
            pause_point,
            payload_for_human: payload_for_human(pause_point, &run.payload),
        };
        let checkpoint = Checkpoint::new(run.clone(), origin, Some(suspension.clone()), audit);
        self.checkpoints.append(&checkpoint).await?;

        tracing::info!(
            "⏸️ Run {} suspended at {} (sequence {})",
            run.run_id,
            pause_point.as_str(),
            checkpoint.step_sequence
        );

        let token = SuspensionToken {
            run_id: run.run_id.clone(),
            pause_point,
            payload_for_human: suspension.payload_for_human,
            step_sequence: checkpoint.step_sequence,
        };
        Ok((checkpoint, token))
    }

    /// Load the latest checkpoint of a run that is waiting for external input
    pub async fn expect_resumable(&self, run_id: &str) -> Result<(Checkpoint, PausePoint), EngineError> {
        let checkpoint = self
            .checkpoints
            .latest(run_id)
            .await
            .map_err(EngineError::Checkpoint)?
            .ok_or_else(|| EngineError::NotFound(run_id.to_string()))?;

        let status = checkpoint.run.status;
        let Some(expected) = status.pause_point() else {
            return Err(EngineError::NotResumable {
                run_id: run_id.to_string(),
                status,
            });
        };

        let recorded = checkpoint.pause_point();
        if recorded != Some(expected) {
            tracing::error!(
                "❌ Run {} is '{}' but its latest checkpoint records pause point {:?}",
                run_id,
                status,
                recorded
            );
            return Err(EngineError::PausePointMismatch {
                run_id: run_id.to_string(),
                expected,
                recorded,
            });
        }

        Ok((checkpoint, expected))
    }
}

/// Question put to the human at a pause point, derived only from the payload
pub fn payload_for_human(pause_point: PausePoint, payload: &RunPayload) -> Value {
    match pause_point {
        PausePoint::ClarificationNeeded => {
            let validation = payload.validation.as_ref();
            json!({
                "intent": payload.intent.as_ref().map(|i| i.intent_name.as_str()),
                "prompt": validation.and_then(|v| v.clarification_prompt.as_deref()),
                "missing_fields": validation.map(|v| v.missing_fields.clone()).unwrap_or_default(),
                "attempt": validation.map(|v| v.attempt_count).unwrap_or(0),
            })
        }
        PausePoint::ApprovalNeeded => json!({
            "intent": payload.intent.as_ref().map(|i| i.intent_name.as_str()),
            "risk_level": payload.reasoning.as_ref().map(|r| r.risk_level),
            "plan_summary": payload.reasoning.as_ref().map(|r| r.plan_summary.as_str()),
            "gate": payload.gate,
            "proposals": payload.proposals,
        }),
    }
}
