/// Step functions of the workflow
///
/// Each step reads the run, calls at most the collaborators it owns, and
/// returns the new payload plus the audit records it produced. Steps are
/// idempotent: when their output key is already in the payload they return
/// the payload unchanged, without any external call or audit record.
///
/// Collaborator failures split two ways:
/// - `PortError::Unavailable` is returned as `EngineError::Collaborator`; the
///   engine writes no checkpoint and the run can be recovered later
/// - `PortError::Rejected` is recorded as the run's failure and routes it to `error`

use crate::error::{EngineError, Port, PortError};
use crate::ports::{ActionRequest, Collaborators, ReasoningQuery};
use crate::runtime::gate::{EvidenceGate, EvidenceSource};
use crate::runtime::memory::{FlushReport, MemoryCommitter};
use crate::runtime::validator::SlotValidator;
use crate::workflow::audit::{AuditAction, AuditRecord};
use crate::workflow::types::{
    ApprovalDecision, FailureReason, IntentResult, MemoryKind, Proposal, ReasoningRecord, Run, RunFailure,
    RunPayload, Step, ValidationStatus,
};
use serde_json::{json, Value};

/// Result of executing one step
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub payload: RunPayload,
    pub audit: Vec<AuditRecord>,
    /// Set only by the memory commit step
    pub flush: Option<FlushReport>,
}

impl StepOutcome {
    fn unchanged(run: &Run) -> Self {
        Self {
            payload: run.payload.clone(),
            audit: Vec::new(),
            flush: None,
        }
    }
}

/// Dispatches steps to their handlers
#[derive(Debug, Clone)]
pub struct StepExecutor {
    collaborators: Collaborators,
    validator: SlotValidator,
    gate: EvidenceGate,
    memory: MemoryCommitter,
}

impl StepExecutor {
    pub fn new(collaborators: Collaborators, validator: SlotValidator, gate: EvidenceGate) -> Self {
        let memory = MemoryCommitter::new(collaborators.memory.clone());
        Self {
            collaborators,
            validator,
            gate,
            memory,
        }
    }

    /// Execute one step against an owned copy of the run's state
    pub async fn execute(&self, step: Step, run: &Run) -> Result<StepOutcome, EngineError> {
        tracing::debug!("🚀 Executing step '{}' for run {}", step.as_str(), run.run_id);
        let start_time = std::time::Instant::now();

        let outcome = match step {
            Step::Classify => self.classify(run).await,
            Step::Validate => Ok(self.validate(run)),
            Step::Reason => self.reason(run).await,
            Step::Execute => self.execute_actions(run).await,
            Step::CommitMemories => self.commit_memories(run).await,
        }?;

        tracing::debug!(
            "✅ Step '{}' for run {} finished in {:?} ({} audit record(s))",
            step.as_str(),
            run.run_id,
            start_time.elapsed(),
            outcome.audit.len()
        );
        Ok(outcome)
    }

    async fn classify(&self, run: &Run) -> Result<StepOutcome, EngineError> {
        if run.payload.intent.is_some() {
            return Ok(StepOutcome::unchanged(run));
        }

        let mut payload = run.payload.clone();
        let mut audit = Vec::new();

        match self.collaborators.classifier.classify(&payload.request.text).await {
            Ok(classification) => {
                tracing::info!(
                    "🏷️ Run {} classified as '{}' (confidence {:.2})",
                    run.run_id,
                    classification.intent_name,
                    classification.confidence
                );
                audit.push(AuditRecord::agent(
                    Port::Classifier,
                    AuditAction::IntentClassified,
                    json!({
                        "intent": classification.intent_name,
                        "confidence": classification.confidence,
                        "risk_flag": classification.risk_flag,
                        "parameters": classification.parameters,
                    }),
                ));
                payload.parameters = classification.parameters.clone();
                payload.intent = Some(IntentResult {
                    intent_name: classification.intent_name,
                    parameters: classification.parameters,
                    confidence: classification.confidence,
                    risk_flag: classification.risk_flag,
                });
            }
            Err(err) => record_port_failure(&run.run_id, Port::Classifier, err, &mut payload, &mut audit)?,
        }

        Ok(StepOutcome {
            payload,
            audit,
            flush: None,
        })
    }

    fn validate(&self, run: &Run) -> StepOutcome {
        let Some(intent) = run.payload.intent.as_ref() else {
            return StepOutcome::unchanged(run);
        };
        let round = run.payload.clarification_round;
        if run.payload.validation.as_ref().is_some_and(|v| v.round == round) {
            return StepOutcome::unchanged(run);
        }

        let mut payload = run.payload.clone();
        let mut audit = Vec::new();
        let previous_attempts = payload.validation.as_ref().map(|v| v.attempt_count).unwrap_or(0);
        let outcome = self
            .validator
            .validate(&intent.intent_name, &payload.parameters, previous_attempts, round);

        match outcome.status {
            ValidationStatus::Valid => {
                tracing::info!("✅ Run {} parameters complete for '{}'", run.run_id, intent.intent_name);
                audit.push(AuditRecord::system(
                    AuditAction::ValidationPassed,
                    json!({
                        "intent": intent.intent_name,
                        "attempts": outcome.attempt_count,
                    }),
                ));
            }
            ValidationStatus::Invalid => {
                tracing::info!(
                    "❓ Run {} needs clarification (attempt {}/{}): {:?}",
                    run.run_id,
                    outcome.attempt_count,
                    self.validator.max_attempts(),
                    outcome.missing_fields
                );
                audit.push(AuditRecord::system(
                    AuditAction::ClarificationRequested,
                    json!({
                        "missing_fields": outcome.missing_fields,
                        "attempt": outcome.attempt_count,
                        "prompt": outcome.clarification_prompt,
                    }),
                ));
            }
            ValidationStatus::Failed => {
                audit.push(AuditRecord::system(
                    AuditAction::ValidationExhausted,
                    json!({
                        "missing_fields": outcome.missing_fields,
                        "attempts": outcome.attempt_count,
                    }),
                ));
                audit.push(fail(
                    &mut payload,
                    FailureReason::ValidationExhausted,
                    format!(
                        "still missing {} after {} clarification attempt(s)",
                        outcome.missing_fields.join(", "),
                        outcome.attempt_count
                    ),
                ));
            }
        }

        payload.validation = Some(outcome);
        StepOutcome {
            payload,
            audit,
            flush: None,
        }
    }

    async fn reason(&self, run: &Run) -> Result<StepOutcome, EngineError> {
        let Some(intent) = run.payload.intent.as_ref() else {
            return Ok(StepOutcome::unchanged(run));
        };
        if run.payload.reasoning.is_some() {
            return Ok(StepOutcome::unchanged(run));
        }

        let mut payload = run.payload.clone();
        let mut audit = Vec::new();
        let query = ReasoningQuery {
            tenant_id: run.tenant_id.clone(),
            run_id: run.run_id.clone(),
            intent_name: intent.intent_name.clone(),
            parameters: payload.parameters.clone(),
            risk_flag: intent.risk_flag,
        };

        let reasoning = &self.collaborators.reasoning;
        let risk = match reasoning.assess_risk(&query).await {
            Ok(risk) => risk,
            Err(err) => {
                record_port_failure(&run.run_id, Port::Reasoning, err, &mut payload, &mut audit)?;
                return Ok(StepOutcome { payload, audit, flush: None });
            }
        };
        let plan = match reasoning.generate_plan(&query, &risk).await {
            Ok(plan) => plan,
            Err(err) => {
                record_port_failure(&run.run_id, Port::Reasoning, err, &mut payload, &mut audit)?;
                return Ok(StepOutcome { payload, audit, flush: None });
            }
        };

        let decision = self.gate.check(plan.resource_available, &risk.corroboration);
        tracing::info!(
            "🛡️ Evidence gate for run {}: allowed={} reason={}",
            run.run_id,
            decision.allowed,
            decision.reason.code()
        );
        audit.push(AuditRecord::system(
            AuditAction::EvidenceEvaluated,
            json!({
                "allowed": decision.allowed,
                "reason": decision.reason,
                "resource_available": plan.resource_available,
                "corroboration": risk.corroboration,
                "risk_level": risk.risk_level,
            }),
        ));

        let record = ReasoningRecord {
            risk_level: risk.risk_level,
            findings: risk.findings,
            corroboration: risk.corroboration,
            resource_available: plan.resource_available,
            plan_summary: plan.summary,
            planned_actions: plan.actions,
        };

        if decision.allowed {
            payload.proposals = build_proposals(&intent.intent_name, &payload.parameters, &record);
            for proposal in &payload.proposals {
                audit.push(AuditRecord::agent(
                    Port::Reasoning,
                    AuditAction::ProposalCreated,
                    json!({
                        "proposal_id": proposal.proposal_id,
                        "action_type": proposal.action_type,
                        "risk_level": proposal.risk_level,
                    }),
                ));
            }
        } else {
            audit.push(fail(
                &mut payload,
                FailureReason::EvidenceGate(decision.reason),
                format!("evidence gate blocked execution: {}", decision.reason.code()),
            ));
        }

        payload.reasoning = Some(record);
        payload.gate = Some(decision);
        Ok(StepOutcome {
            payload,
            audit,
            flush: None,
        })
    }

    async fn execute_actions(&self, run: &Run) -> Result<StepOutcome, EngineError> {
        if run.payload.executions.is_some() {
            return Ok(StepOutcome::unchanged(run));
        }
        let Some(ApprovalDecision::Approve { approved_ids }) = run.payload.approval.as_ref() else {
            return Ok(StepOutcome::unchanged(run));
        };

        let mut payload = run.payload.clone();
        let mut audit = Vec::new();
        let mut receipts = Vec::new();
        let approved: Vec<Proposal> = payload
            .proposals
            .iter()
            .filter(|p| approved_ids.contains(&p.proposal_id))
            .cloned()
            .collect();

        for proposal in approved {
            let request = ActionRequest {
                idempotency_key: format!("{}:action:{}", run.run_id, proposal.proposal_id),
                tenant_id: run.tenant_id.clone(),
                run_id: run.run_id.clone(),
                proposal: proposal.clone(),
            };

            let receipt = match self.collaborators.actions.execute(&request).await {
                Ok(receipt) => receipt,
                Err(err) => {
                    // A transient error drops this attempt; the replay reuses the same keys.
                    // A rejection keeps what already ran so the trail shows every executed action.
                    record_port_failure(&run.run_id, Port::Action, err, &mut payload, &mut audit)?;
                    payload.executions = Some(receipts);
                    return Ok(StepOutcome {
                        payload,
                        audit,
                        flush: None,
                    });
                }
            };

            tracing::info!("⚡ Run {} executed proposal {} ({})", run.run_id, proposal.proposal_id, proposal.action_type);
            audit.push(
                AuditRecord::system(
                    AuditAction::ActionExecuted,
                    json!({
                        "proposal_id": proposal.proposal_id,
                        "action_type": proposal.action_type,
                        "idempotency_key": receipt.idempotency_key,
                        "reference": receipt.reference,
                    }),
                )
                .irreversible(),
            );
            let fact = memory_fact(&payload, &proposal);
            MemoryCommitter::prepare(&mut payload.memory, &run.run_id, MemoryKind::Fact, fact, Step::Execute);
            receipts.push(receipt);
        }

        payload.executions = Some(receipts);
        Ok(StepOutcome {
            payload,
            audit,
            flush: None,
        })
    }

    async fn commit_memories(&self, run: &Run) -> Result<StepOutcome, EngineError> {
        if run.payload.memory.pending.is_empty() {
            return Ok(StepOutcome::unchanged(run));
        }

        let mut payload = run.payload.clone();
        let mut audit = Vec::new();

        match self.memory.flush(&mut payload.memory, &run.tenant_id).await {
            Ok(report) => {
                if report.committed > 0 {
                    let keys: Vec<&str> = payload
                        .memory
                        .committed
                        .iter()
                        .rev()
                        .take(report.committed)
                        .map(|item| item.idempotency_key.as_str())
                        .collect();
                    audit.push(AuditRecord::system(
                        AuditAction::MemoryCommitted,
                        json!({
                            "committed": report.committed,
                            "remaining": report.remaining,
                            "keys": keys.into_iter().rev().collect::<Vec<_>>(),
                        }),
                    ));
                }
                if report.remaining > 0 {
                    tracing::warn!(
                        "⚠️ Run {} memory flush incomplete: {} committed, {} pending",
                        run.run_id,
                        report.committed,
                        report.remaining
                    );
                }
                Ok(StepOutcome {
                    payload,
                    audit,
                    flush: Some(report),
                })
            }
            Err(err) => {
                let mut failed = run.payload.clone();
                record_port_failure(&run.run_id, Port::MemoryStore, err, &mut failed, &mut audit)?;
                Ok(StepOutcome {
                    payload: failed,
                    audit,
                    flush: None,
                })
            }
        }
    }
}

/// Surface a transient failure, or record an unrecoverable one on the payload
fn record_port_failure(
    run_id: &str,
    port: Port,
    err: PortError,
    payload: &mut RunPayload,
    audit: &mut Vec<AuditRecord>,
) -> Result<(), EngineError> {
    if err.is_transient() {
        tracing::warn!("⚠️ {} unavailable for run {}, step left for recovery: {}", port, run_id, err);
        return Err(EngineError::Collaborator {
            run_id: run_id.to_string(),
            port,
            source: err,
        });
    }

    tracing::error!("❌ {} rejected the request: {}", port, err);
    audit.push(fail(payload, FailureReason::CollaboratorRejected(port), err.to_string()));
    Ok(())
}

fn fail(payload: &mut RunPayload, reason: FailureReason, detail: String) -> AuditRecord {
    let record = AuditRecord::system(
        AuditAction::RunFailed,
        json!({ "reason": reason.code(), "detail": detail }),
    );
    payload.failure = Some(RunFailure { reason, detail });
    record
}

/// One proposal per planned action; a plan without actions proposes the intent itself
fn build_proposals(intent_name: &str, parameters: &serde_json::Map<String, Value>, record: &ReasoningRecord) -> Vec<Proposal> {
    let evidence_summary = evidence_summary(record);
    let planned: Vec<(String, Value)> = if record.planned_actions.is_empty() {
        vec![(intent_name.to_string(), Value::Object(parameters.clone()))]
    } else {
        record
            .planned_actions
            .iter()
            .map(|action| (action.action_type.clone(), action.parameters.clone()))
            .collect()
    };

    planned
        .into_iter()
        .enumerate()
        .map(|(index, (action_type, parameters))| Proposal {
            proposal_id: format!("p-{}", index + 1),
            action_type,
            parameters,
            evidence_summary: evidence_summary.clone(),
            risk_level: record.risk_level,
        })
        .collect()
}

fn evidence_summary(record: &ReasoningRecord) -> String {
    let counts: Vec<String> = EvidenceSource::ALL
        .iter()
        .map(|source| format!("{}={}", source.code(), record.corroboration.get(source).copied().unwrap_or(0)))
        .collect();
    let mut summary = format!("{}; resources available", counts.join(", "));
    if !record.plan_summary.is_empty() {
        summary.push_str("; ");
        summary.push_str(&record.plan_summary);
    }
    summary
}

fn memory_fact(payload: &RunPayload, proposal: &Proposal) -> String {
    let intent = payload
        .intent
        .as_ref()
        .map(|i| i.intent_name.as_str())
        .unwrap_or("unknown");
    format!(
        "{} executed for {} with {}",
        proposal.action_type, intent, proposal.parameters
    )
}
