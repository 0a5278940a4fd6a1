/// Evidence gate for irreversible actions
///
/// A pure, total rule evaluation over resource availability and per-source
/// corroboration counts. The reason step consults it before creating any
/// proposal; nothing else is allowed to authorize an irreversible action.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Independent knowledge sources that can corroborate a finding
///
/// Ordering is significant: the gate reports the first insufficient source in
/// declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EvidenceSource {
    /// Knowledge-graph facts
    #[serde(rename = "source_A")]
    KnowledgeGraph,
    /// Document-retrieval passages
    #[serde(rename = "source_B")]
    DocumentRetrieval,
}

impl EvidenceSource {
    pub const ALL: [EvidenceSource; 2] = [EvidenceSource::KnowledgeGraph, EvidenceSource::DocumentRetrieval];

    pub fn code(&self) -> &'static str {
        match self {
            EvidenceSource::KnowledgeGraph => "source_A",
            EvidenceSource::DocumentRetrieval => "source_B",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|source| source.code() == code)
    }
}

/// Reason code attached to every gate decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum GateReason {
    Ok,
    InsufficientResources,
    InsufficientEvidence(EvidenceSource),
}

impl GateReason {
    pub fn code(&self) -> String {
        match self {
            GateReason::Ok => "ok".to_string(),
            GateReason::InsufficientResources => "insufficient_resources".to_string(),
            GateReason::InsufficientEvidence(source) => format!("insufficient_evidence:{}", source.code()),
        }
    }
}

impl From<GateReason> for String {
    fn from(reason: GateReason) -> Self {
        reason.code()
    }
}

impl TryFrom<String> for GateReason {
    type Error = String;

    fn try_from(code: String) -> Result<Self, Self::Error> {
        match code.as_str() {
            "ok" => Ok(GateReason::Ok),
            "insufficient_resources" => Ok(GateReason::InsufficientResources),
            other => other
                .strip_prefix("insufficient_evidence:")
                .and_then(EvidenceSource::from_code)
                .map(GateReason::InsufficientEvidence)
                .ok_or_else(|| format!("unknown reason code: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    pub allowed: bool,
    pub reason: GateReason,
}

/// Minimum-evidence rules, one minimum per source
#[derive(Debug, Clone)]
pub struct EvidenceGate {
    minimums: BTreeMap<EvidenceSource, u32>,
}

impl EvidenceGate {
    pub fn new(knowledge_graph_min: u32, document_retrieval_min: u32) -> Self {
        let mut minimums = BTreeMap::new();
        minimums.insert(EvidenceSource::KnowledgeGraph, knowledge_graph_min);
        minimums.insert(EvidenceSource::DocumentRetrieval, document_retrieval_min);
        Self { minimums }
    }

    pub fn minimum(&self, source: EvidenceSource) -> u32 {
        self.minimums.get(&source).copied().unwrap_or(0)
    }

    /// Decide whether an irreversible action may proceed
    ///
    /// A source missing from `corroboration_counts` counts as zero.
    pub fn check(&self, resource_available: bool, corroboration_counts: &BTreeMap<EvidenceSource, u32>) -> GateDecision {
        if !resource_available {
            return GateDecision {
                allowed: false,
                reason: GateReason::InsufficientResources,
            };
        }

        for (source, minimum) in &self.minimums {
            let count = corroboration_counts.get(source).copied().unwrap_or(0);
            if count < *minimum {
                return GateDecision {
                    allowed: false,
                    reason: GateReason::InsufficientEvidence(*source),
                };
            }
        }

        GateDecision {
            allowed: true,
            reason: GateReason::Ok,
        }
    }
}

impl Default for EvidenceGate {
    fn default() -> Self {
        Self::new(3, 2)
    }
}
