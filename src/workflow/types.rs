/// Core run type definitions
///
/// Defines the Run, its status machine vocabulary and the schema-constrained payload
/// that step functions read and write. Everything here is serialized into checkpoint
/// snapshots, so payload fields never carry wall-clock values: replaying the same
/// checkpoint sequence must produce byte-identical state.

use crate::error::{EngineError, Port};
use crate::runtime::gate::{EvidenceSource, GateDecision, GateReason};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Lifecycle status of a run
///
/// `classifying` and `committing_memory` are transient statuses held while the
/// corresponding step runs; the two `awaiting_*` statuses are suspension points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Init,
    Classifying,
    Validating,
    AwaitingClarification,
    Reasoning,
    AwaitingApproval,
    Executing,
    CommittingMemory,
    Completed,
    Error,
    Cancelled,
}

impl RunStatus {
    pub const ALL: [RunStatus; 11] = [
        RunStatus::Init,
        RunStatus::Classifying,
        RunStatus::Validating,
        RunStatus::AwaitingClarification,
        RunStatus::Reasoning,
        RunStatus::AwaitingApproval,
        RunStatus::Executing,
        RunStatus::CommittingMemory,
        RunStatus::Completed,
        RunStatus::Error,
        RunStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Init => "init",
            RunStatus::Classifying => "classifying",
            RunStatus::Validating => "validating",
            RunStatus::AwaitingClarification => "awaiting_clarification",
            RunStatus::Reasoning => "reasoning",
            RunStatus::AwaitingApproval => "awaiting_approval",
            RunStatus::Executing => "executing",
            RunStatus::CommittingMemory => "committing_memory",
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Error | RunStatus::Cancelled)
    }

    pub fn is_suspended(&self) -> bool {
        self.pause_point().is_some()
    }

    /// The pause point a suspended status is waiting at
    pub fn pause_point(&self) -> Option<PausePoint> {
        match self {
            RunStatus::AwaitingClarification => Some(PausePoint::ClarificationNeeded),
            RunStatus::AwaitingApproval => Some(PausePoint::ApprovalNeeded),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named suspension points. The workflow uses exactly these two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PausePoint {
    ClarificationNeeded,
    ApprovalNeeded,
}

impl PausePoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            PausePoint::ClarificationNeeded => "clarification_needed",
            PausePoint::ApprovalNeeded => "approval_needed",
        }
    }
}

/// Executable steps of the workflow, selected from the run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Classify,
    Validate,
    Reason,
    Execute,
    CommitMemories,
}

impl Step {
    /// Step to run for a status, or None for suspended/terminal statuses
    pub fn for_status(status: RunStatus) -> Option<Step> {
        match status {
            RunStatus::Init | RunStatus::Classifying => Some(Step::Classify),
            RunStatus::Validating => Some(Step::Validate),
            RunStatus::Reasoning => Some(Step::Reason),
            RunStatus::Executing => Some(Step::Execute),
            RunStatus::CommittingMemory => Some(Step::CommitMemories),
            _ => None,
        }
    }

    /// Status the run holds while this step is in flight
    pub fn running_status(&self) -> RunStatus {
        match self {
            Step::Classify => RunStatus::Classifying,
            Step::Validate => RunStatus::Validating,
            Step::Reason => RunStatus::Reasoning,
            Step::Execute => RunStatus::Executing,
            Step::CommitMemories => RunStatus::CommittingMemory,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Classify => "classify",
            Step::Validate => "validate",
            Step::Reason => "reason",
            Step::Execute => "execute",
            Step::CommitMemories => "commit_memories",
        }
    }
}

/// Minimal request envelope every run starts from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub tenant_id: String,
    pub text: String,
}

impl RequestEnvelope {
    /// Parse the initial input into an envelope
    ///
    /// Accepts `{"text": "..."}` or a bare JSON string. Tenant ids double as
    /// storage directory names, so only `[A-Za-z0-9_-]` is allowed.
    pub fn parse(tenant_id: &str, input: &Value) -> Result<Self, EngineError> {
        validate_tenant_id(tenant_id)?;

        let text = match input {
            Value::String(text) => text.as_str(),
            Value::Object(map) => map
                .get("text")
                .and_then(Value::as_str)
                .ok_or_else(|| EngineError::InvalidInput("missing string field 'text'".to_string()))?,
            _ => {
                return Err(EngineError::InvalidInput(
                    "initial input must be a JSON object or string".to_string(),
                ))
            }
        };

        let text = text.trim();
        if text.is_empty() {
            return Err(EngineError::InvalidInput("request text is empty".to_string()));
        }

        Ok(Self {
            tenant_id: tenant_id.to_string(),
            text: text.to_string(),
        })
    }
}

/// Check that a tenant id is a safe, non-empty slug
pub fn validate_tenant_id(tenant_id: &str) -> Result<(), EngineError> {
    let valid = !tenant_id.is_empty()
        && tenant_id.len() <= 64
        && tenant_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(EngineError::InvalidInput(format!("invalid tenant id: '{}'", tenant_id)))
    }
}

/// Classifier output, produced once per run and reused on every resume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent_name: String,
    pub parameters: Map<String, Value>,
    pub confidence: f64,
    pub risk_flag: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Valid,
    Invalid,
    Failed,
}

/// Result of checking the working parameters against the intent schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub status: ValidationStatus,
    pub missing_fields: Vec<String>,
    /// Number of invalid attempts so far, bounded by the configured maximum
    pub attempt_count: u32,
    pub clarification_prompt: Option<String>,
    /// Clarification round this outcome was computed for
    pub round: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// One action suggested by the plan generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAction {
    pub action_type: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub rationale: String,
}

/// Reasoning output kept in the payload so the reason step never calls out twice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningRecord {
    pub risk_level: RiskLevel,
    pub findings: Value,
    pub corroboration: BTreeMap<EvidenceSource, u32>,
    pub resource_available: bool,
    pub plan_summary: String,
    pub planned_actions: Vec<PlannedAction>,
}

/// A candidate irreversible action awaiting human approval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub proposal_id: String,
    pub action_type: String,
    pub parameters: Value,
    pub evidence_summary: String,
    pub risk_level: RiskLevel,
}

/// Human decision injected at the approval pause point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve { approved_ids: Vec<String> },
    Cancel,
}

/// Confirmation returned by the action collaborator for one executed proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionReceipt {
    pub proposal_id: String,
    pub idempotency_key: String,
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Fact,
    Summary,
}

/// A fact produced mid-run that is queued for long-term storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub sequence: u64,
    pub idempotency_key: String,
    pub kind: MemoryKind,
    pub content: String,
    pub source_step: Step,
}

/// Pending/committed memory lists for the two-phase commit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryLedger {
    pub pending: Vec<MemoryItem>,
    pub committed: Vec<MemoryItem>,
    pub next_sequence: u64,
}

/// Why a run ended in `error`
///
/// Serialized as its reason code so callers can tell "missing resources" apart
/// from "missing corroboration" without parsing prose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum FailureReason {
    ValidationExhausted,
    EvidenceGate(GateReason),
    CollaboratorRejected(Port),
}

impl FailureReason {
    pub fn code(&self) -> String {
        match self {
            FailureReason::ValidationExhausted => "validation_exhausted".to_string(),
            FailureReason::EvidenceGate(reason) => reason.code(),
            FailureReason::CollaboratorRejected(port) => format!("collaborator_failure:{}", port),
        }
    }
}

impl From<FailureReason> for String {
    fn from(reason: FailureReason) -> Self {
        reason.code()
    }
}

impl TryFrom<String> for FailureReason {
    type Error = String;

    fn try_from(code: String) -> Result<Self, Self::Error> {
        if code == "validation_exhausted" {
            return Ok(FailureReason::ValidationExhausted);
        }
        if let Some(port) = code.strip_prefix("collaborator_failure:") {
            let port = match port {
                "classifier" => Port::Classifier,
                "reasoning" => Port::Reasoning,
                "action" => Port::Action,
                "memory_store" => Port::MemoryStore,
                other => return Err(format!("unknown port in failure code: {}", other)),
            };
            return Ok(FailureReason::CollaboratorRejected(port));
        }
        GateReason::try_from(code).map(FailureReason::EvidenceGate)
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub reason: FailureReason,
    pub detail: String,
}

/// The run's schema-constrained state, mutated only by step functions and resume injection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunPayload {
    pub request: RequestEnvelope,
    #[serde(default)]
    pub intent: Option<IntentResult>,
    /// Working parameter set: classifier output merged with clarification answers
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub clarification_round: u32,
    #[serde(default)]
    pub validation: Option<ValidationOutcome>,
    #[serde(default)]
    pub reasoning: Option<ReasoningRecord>,
    #[serde(default)]
    pub gate: Option<GateDecision>,
    #[serde(default)]
    pub proposals: Vec<Proposal>,
    #[serde(default)]
    pub approval: Option<ApprovalDecision>,
    #[serde(default)]
    pub executions: Option<Vec<ActionReceipt>>,
    #[serde(default)]
    pub memory: MemoryLedger,
    #[serde(default)]
    pub failure: Option<RunFailure>,
}

impl RunPayload {
    pub fn new(request: RequestEnvelope) -> Self {
        Self {
            request,
            intent: None,
            parameters: Map::new(),
            clarification_round: 0,
            validation: None,
            reasoning: None,
            gate: None,
            proposals: Vec::new(),
            approval: None,
            executions: None,
            memory: MemoryLedger::default(),
            failure: None,
        }
    }
}

/// One execution of the workflow for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub tenant_id: String,
    pub status: RunStatus,
    pub step_sequence: u64,
    pub payload: RunPayload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    /// Create a fresh run in `init` from a parsed envelope
    pub fn new(request: RequestEnvelope) -> Self {
        let now = Utc::now();
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            tenant_id: request.tenant_id.clone(),
            status: RunStatus::Init,
            step_sequence: 0,
            payload: RunPayload::new(request),
            created_at: now,
            updated_at: now,
        }
    }
}
