/// Durable workflow engine
///
/// Drives a run through the state graph one step at a time. After every step
/// the engine bumps step_sequence, appends a full checkpoint and only then
/// flushes the step's audit records, so the checkpoint log is always the
/// source of truth. The engine holds no lock across collaborator calls: it
/// works on an owned copy of the latest snapshot and touches shared state only
/// through the checkpoint append, which admits a single writer per sequence.

use crate::error::{EngineError, StoreError};
use crate::ports::Collaborators;
use crate::runtime::executor::StepExecutor;
use crate::runtime::gate::EvidenceGate;
use crate::runtime::graph::{route, StateGraph};
use crate::runtime::interrupt::{InterruptCoordinator, SuspensionToken};
use crate::runtime::validator::{merge_clarification, SlotValidator};
use crate::workflow::audit::{AuditAction, AuditEntry, AuditRecord, AuditStore};
use crate::workflow::catalog::IntentCatalog;
use crate::workflow::storage::{Checkpoint, CheckpointOrigin, CheckpointStore};
use crate::workflow::types::{
    validate_tenant_id, ApprovalDecision, PausePoint, RequestEnvelope, Run, RunFailure, RunStatus, Step,
};
use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// Tunables for the workflow rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub max_clarification_attempts: u32,
    pub knowledge_graph_min_evidence: u32,
    pub document_retrieval_min_evidence: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_clarification_attempts: 3,
            knowledge_graph_min_evidence: 3,
            document_retrieval_min_evidence: 2,
        }
    }
}

/// Structured result of start/resume/recover
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunHandle {
    pub run_id: String,
    pub tenant_id: String,
    pub status: RunStatus,
    pub step_sequence: u64,
    pub suspension: Option<SuspensionToken>,
    pub failure: Option<RunFailure>,
}

impl RunHandle {
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        Self {
            run_id: checkpoint.run_id.clone(),
            tenant_id: checkpoint.tenant_id.clone(),
            status: checkpoint.run.status,
            step_sequence: checkpoint.step_sequence,
            suspension: SuspensionToken::from_checkpoint(checkpoint),
            failure: checkpoint.run.payload.failure.clone(),
        }
    }
}

pub struct WorkflowEngine {
    checkpoints: Arc<dyn CheckpointStore>,
    audit: Arc<dyn AuditStore>,
    interrupts: InterruptCoordinator,
    executor: StepExecutor,
    graph: StateGraph,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("graph", &self.graph)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl WorkflowEngine {
    pub fn new(
        catalog: Arc<IntentCatalog>,
        collaborators: Collaborators,
        checkpoints: Arc<dyn CheckpointStore>,
        audit: Arc<dyn AuditStore>,
        config: EngineConfig,
    ) -> Result<Self> {
        let validator = SlotValidator::new(catalog, config.max_clarification_attempts);
        let gate = EvidenceGate::new(
            config.knowledge_graph_min_evidence,
            config.document_retrieval_min_evidence,
        );
        Ok(Self {
            interrupts: InterruptCoordinator::new(checkpoints.clone()),
            checkpoints,
            audit,
            executor: StepExecutor::new(collaborators, validator, gate),
            graph: StateGraph::new()?,
        })
    }

    /// Create a run from the initial input and drive it to a pause point or terminal status
    pub async fn start(&self, tenant_id: &str, initial_input: Value) -> Result<RunHandle, EngineError> {
        let envelope = RequestEnvelope::parse(tenant_id, &initial_input)?;
        let run = Run::new(envelope);
        tracing::info!("🚀 Starting run {} for tenant '{}'", run.run_id, run.tenant_id);

        let created = self
            .persist(
                &run,
                CheckpointOrigin::Created,
                vec![AuditRecord::system(
                    AuditAction::RunStarted,
                    json!({ "text": run.payload.request.text }),
                )],
            )
            .await?;
        self.drive(created).await
    }

    /// Inject external input at the run's pause point and continue
    pub async fn resume(&self, run_id: &str, external_input: Value) -> Result<RunHandle, EngineError> {
        let (checkpoint, pause_point) = self.interrupts.expect_resumable(run_id).await?;
        self.flush_outbox(&checkpoint).await?;

        let mut run = checkpoint.run.clone();
        let record = match pause_point {
            PausePoint::ClarificationNeeded => {
                let missing = run
                    .payload
                    .validation
                    .as_ref()
                    .map(|v| v.missing_fields.clone())
                    .unwrap_or_default();
                let merged = merge_clarification(&mut run.payload.parameters, &missing, &external_input)?;
                run.payload.clarification_round += 1;
                tracing::info!(
                    "💬 Run {} clarification round {} filled {:?}",
                    run_id,
                    run.payload.clarification_round,
                    merged
                );
                AuditRecord::human(
                    AuditAction::ClarificationReceived,
                    json!({ "round": run.payload.clarification_round, "fields": merged }),
                )
            }
            PausePoint::ApprovalNeeded => {
                let decision = parse_approval(&run, external_input)?;
                let record = match &decision {
                    ApprovalDecision::Approve { approved_ids } => {
                        tracing::info!("👍 Run {} approved proposals {:?}", run_id, approved_ids);
                        AuditRecord::human(AuditAction::ApprovalGranted, json!({ "approved_ids": approved_ids }))
                            .irreversible()
                    }
                    ApprovalDecision::Cancel => {
                        tracing::info!("🛑 Run {} cancelled at approval", run_id);
                        AuditRecord::human(AuditAction::RunCancelled, json!({}))
                    }
                };
                run.payload.approval = Some(decision);
                record
            }
        };

        let next = route(run.status, &run.payload);
        self.graph.ensure_edge(run_id, run.status, next)?;
        run.status = next;
        advance(&mut run);

        let resumed = self
            .persist(&run, CheckpointOrigin::Resumed(pause_point), vec![record])
            .await?;
        self.drive(resumed).await
    }

    /// Read-only snapshot of the latest checkpoint
    pub async fn get_state(&self, run_id: &str) -> Result<Run, EngineError> {
        Ok(self.latest(run_id).await?.run)
    }

    /// As `get_state`, but runs owned by another tenant are reported as missing
    pub async fn get_state_for_tenant(&self, tenant_id: &str, run_id: &str) -> Result<Run, EngineError> {
        self.authorize(tenant_id, run_id).await?;
        self.get_state(run_id).await
    }

    /// Check that `run_id` exists and belongs to `tenant_id`
    pub async fn authorize(&self, tenant_id: &str, run_id: &str) -> Result<(), EngineError> {
        validate_tenant_id(tenant_id)?;
        match self.checkpoints.owner(run_id).await.map_err(EngineError::Checkpoint)? {
            Some(owner) if owner == tenant_id => Ok(()),
            Some(_) => {
                tracing::warn!("🚫 Tenant '{}' asked for run {} owned by another tenant", tenant_id, run_id);
                Err(EngineError::NotFound(run_id.to_string()))
            }
            None => Err(EngineError::NotFound(run_id.to_string())),
        }
    }

    /// Continue a run after a crash, restart or transient failure
    ///
    /// The latest checkpoint's audit outbox is re-flushed first. Suspended and
    /// terminal runs are returned as they are.
    pub async fn recover(&self, run_id: &str) -> Result<RunHandle, EngineError> {
        let checkpoint = self.latest(run_id).await?;
        self.flush_outbox(&checkpoint).await?;

        let status = checkpoint.run.status;
        if status.is_terminal() || status.is_suspended() {
            tracing::debug!("🔁 Run {} is '{}', nothing to recover", run_id, status);
            return Ok(RunHandle::from_checkpoint(&checkpoint));
        }

        tracing::info!(
            "🔁 Recovering run {} from '{}' at sequence {}",
            run_id,
            status,
            checkpoint.step_sequence
        );
        self.drive(checkpoint).await
    }

    /// Audit entries of a run in append order
    pub async fn audit_trail(&self, run_id: &str) -> Result<Vec<AuditEntry>, EngineError> {
        if self.checkpoints.owner(run_id).await.map_err(EngineError::Checkpoint)?.is_none() {
            return Err(EngineError::NotFound(run_id.to_string()));
        }
        self.audit.query(run_id).await.map_err(|e| match e {
            StoreError::UnknownRun(id) => EngineError::NotFound(id),
            other => EngineError::Audit(other),
        })
    }

    /// Run steps until the run suspends, terminates, or a step cannot finish
    async fn drive(&self, mut last: Checkpoint) -> Result<RunHandle, EngineError> {
        loop {
            let mut run = last.run.clone();
            let Some(step) = Step::for_status(run.status) else {
                if run.status.is_terminal() {
                    tracing::info!("🏁 Run {} finished as '{}'", run.run_id, run.status);
                }
                return Ok(RunHandle::from_checkpoint(&last));
            };

            let running = step.running_status();
            if run.status != running {
                self.graph.ensure_edge(&run.run_id, run.status, running)?;
                run.status = running;
            }

            tracing::info!(
                "📍 Run {} step '{}' from sequence {}",
                run.run_id,
                step.as_str(),
                run.step_sequence
            );
            let outcome = self.executor.execute(step, &run).await?;

            let flush = outcome.flush;
            run.payload = outcome.payload;
            let next = route(run.status, &run.payload);
            self.graph.ensure_edge(&run.run_id, run.status, next)?;
            run.status = next;
            advance(&mut run);

            last = self.persist(&run, CheckpointOrigin::Step(step), outcome.audit).await?;

            if let Some(report) = flush.filter(|report| report.remaining > 0) {
                return Err(EngineError::MemoryFlushIncomplete {
                    run_id: run.run_id.clone(),
                    remaining: report.remaining,
                });
            }
        }
    }

    /// Append the checkpoint for `run` (suspending if its status is a pause point), then flush its audit
    async fn persist(
        &self,
        run: &Run,
        origin: CheckpointOrigin,
        records: Vec<AuditRecord>,
    ) -> Result<Checkpoint, EngineError> {
        let entries = AuditEntry::stamp(&run.run_id, &run.tenant_id, run.step_sequence, records);

        let checkpoint = match run.status.pause_point() {
            Some(pause_point) => {
                let (checkpoint, _token) = self
                    .interrupts
                    .suspend(run, origin, pause_point, entries)
                    .await
                    .map_err(checkpoint_error)?;
                checkpoint
            }
            None => {
                let checkpoint = Checkpoint::new(run.clone(), origin, None, entries);
                self.checkpoints.append(&checkpoint).await.map_err(checkpoint_error)?;
                tracing::debug!(
                    "💾 Checkpoint {} of run {} written ({})",
                    checkpoint.step_sequence,
                    run.run_id,
                    origin.label()
                );
                checkpoint
            }
        };

        self.flush_outbox(&checkpoint).await?;
        Ok(checkpoint)
    }

    async fn flush_outbox(&self, checkpoint: &Checkpoint) -> Result<(), EngineError> {
        if checkpoint.audit.is_empty() {
            return Ok(());
        }
        let added = self.audit.append(&checkpoint.audit).await.map_err(|e| {
            tracing::error!(
                "❌ Audit flush failed for run {} at sequence {}: {}",
                checkpoint.run_id,
                checkpoint.step_sequence,
                e
            );
            EngineError::Audit(e)
        })?;
        tracing::debug!("📝 Flushed {} new audit entr(ies) for run {}", added, checkpoint.run_id);
        Ok(())
    }

    async fn latest(&self, run_id: &str) -> Result<Checkpoint, EngineError> {
        self.checkpoints
            .latest(run_id)
            .await
            .map_err(EngineError::Checkpoint)?
            .ok_or_else(|| EngineError::NotFound(run_id.to_string()))
    }
}

fn advance(run: &mut Run) {
    run.step_sequence += 1;
    run.updated_at = Utc::now();
}

fn checkpoint_error(err: StoreError) -> EngineError {
    if let StoreError::OutOfOrder { run_id, expected, actual } = &err {
        tracing::warn!(
            "⚠️ Lost checkpoint race for run {}: expected sequence {}, wrote {}",
            run_id,
            expected,
            actual
        );
    }
    EngineError::Checkpoint(err)
}

/// Decode and check an approval decision against the run's proposals
fn parse_approval(run: &Run, input: Value) -> Result<ApprovalDecision, EngineError> {
    let decision: ApprovalDecision = serde_json::from_value(input).map_err(|e| {
        EngineError::InvalidInput(format!(
            "approval input must be {{\"decision\":\"approve\",\"approved_ids\":[...]}} or {{\"decision\":\"cancel\"}}: {}",
            e
        ))
    })?;

    if let ApprovalDecision::Approve { approved_ids } = &decision {
        if approved_ids.is_empty() {
            return Err(EngineError::InvalidInput("approved_ids must not be empty".to_string()));
        }
        let known: HashSet<&str> = run.payload.proposals.iter().map(|p| p.proposal_id.as_str()).collect();
        if let Some(unknown) = approved_ids.iter().find(|id| !known.contains(id.as_str())) {
            return Err(EngineError::InvalidInput(format!("unknown proposal id: {}", unknown)));
        }
    }
    Ok(decision)
}
