/// External collaborator contracts
///
/// The engine talks to classification, reasoning, action execution and long-term
/// memory only through these traits. Implementations:
/// - `http`: JSON-over-HTTP clients for deployed services
/// - `mock`: scripted in-process collaborators for tests and local runs

pub mod http;
pub mod mock;

use crate::error::PortError;
use crate::runtime::gate::EvidenceSource;
use crate::workflow::types::{ActionReceipt, MemoryKind, PlannedAction, Proposal, RiskLevel};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Classifier answer for a piece of free text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub intent_name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    pub confidence: f64,
    #[serde(default)]
    pub risk_flag: bool,
}

/// Validated request handed to the reasoning services
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningQuery {
    pub tenant_id: String,
    pub run_id: String,
    pub intent_name: String,
    pub parameters: Map<String, Value>,
    pub risk_flag: bool,
}

/// Risk inference result with raw corroboration counts per source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub findings: Value,
    #[serde(default)]
    pub corroboration: BTreeMap<EvidenceSource, u32>,
}

/// Plan generation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPlan {
    pub resource_available: bool,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub actions: Vec<PlannedAction>,
}

/// Request to carry out one approved proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub idempotency_key: String,
    pub tenant_id: String,
    pub run_id: String,
    pub proposal: Proposal,
}

/// One long-term memory write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryWrite {
    pub idempotency_key: String,
    pub tenant_id: String,
    pub kind: MemoryKind,
    pub content: String,
}

/// Per-item acknowledgement from the memory store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryAck {
    pub idempotency_key: String,
    pub stored: bool,
}

#[async_trait]
pub trait ClassifierPort: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Classification, PortError>;
}

#[async_trait]
pub trait ReasoningPort: Send + Sync {
    async fn assess_risk(&self, query: &ReasoningQuery) -> Result<RiskAssessment, PortError>;

    async fn generate_plan(&self, query: &ReasoningQuery, risk: &RiskAssessment) -> Result<ActionPlan, PortError>;
}

/// Executes approved actions. A repeated idempotency key must be a no-op.
#[async_trait]
pub trait ActionPort: Send + Sync {
    async fn execute(&self, request: &ActionRequest) -> Result<ActionReceipt, PortError>;
}

/// Long-term memory store. Duplicate idempotency keys must be acknowledged without a second write.
#[async_trait]
pub trait MemoryStorePort: Send + Sync {
    async fn write_many(&self, items: &[MemoryWrite]) -> Result<Vec<MemoryAck>, PortError>;
}

/// Bundle of collaborators handed to the engine constructor
#[derive(Clone)]
pub struct Collaborators {
    pub classifier: Arc<dyn ClassifierPort>,
    pub reasoning: Arc<dyn ReasoningPort>,
    pub actions: Arc<dyn ActionPort>,
    pub memory: Arc<dyn MemoryStorePort>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
