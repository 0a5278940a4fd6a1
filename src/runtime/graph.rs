/// Run state machine as a petgraph DiGraph
///
/// Nodes are run statuses and edges are the transitions the engine may take.
/// `route` picks the next status from the current status and payload; the
/// engine then checks that the pair is an edge before persisting it.

use crate::error::EngineError;
use crate::workflow::types::{ApprovalDecision, RunPayload, RunStatus, ValidationStatus};
use anyhow::Result;
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// Edge labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Begin,
    Classified,
    Valid,
    NeedsClarification,
    Exhausted,
    Clarified,
    EvidenceSufficient,
    EvidenceInsufficient,
    Approved,
    Cancelled,
    Executed,
    FlushPartial,
    MemoryCommitted,
    Failed,
}

#[derive(Debug)]
pub struct StateGraph {
    graph: DiGraph<RunStatus, Transition>,
    index: HashMap<RunStatus, NodeIndex>,
}

impl StateGraph {
    /// Build the workflow graph and check that every non-terminal status can finish
    pub fn new() -> Result<Self> {
        use RunStatus::*;

        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for status in RunStatus::ALL {
            index.insert(status, graph.add_node(status));
        }

        let edges = [
            (Init, Classifying, Transition::Begin),
            (Classifying, Validating, Transition::Classified),
            (Validating, Reasoning, Transition::Valid),
            (Validating, AwaitingClarification, Transition::NeedsClarification),
            (Validating, Error, Transition::Exhausted),
            (AwaitingClarification, Validating, Transition::Clarified),
            (Reasoning, AwaitingApproval, Transition::EvidenceSufficient),
            (Reasoning, Error, Transition::EvidenceInsufficient),
            (AwaitingApproval, Executing, Transition::Approved),
            (AwaitingApproval, Cancelled, Transition::Cancelled),
            (Executing, CommittingMemory, Transition::Executed),
            (CommittingMemory, CommittingMemory, Transition::FlushPartial),
            (CommittingMemory, Completed, Transition::MemoryCommitted),
        ];
        for (from, to, transition) in edges {
            graph.add_edge(index[&from], index[&to], transition);
        }

        // Any non-terminal status may fail on an unrecoverable collaborator error.
        for status in RunStatus::ALL.into_iter().filter(|s| !s.is_terminal()) {
            if graph.find_edge(index[&status], index[&Error]).is_none() {
                graph.add_edge(index[&status], index[&Error], Transition::Failed);
            }
        }

        let state_graph = Self { graph, index };
        state_graph.check_termination()?;
        tracing::debug!(
            "🕸️ State graph built: {} statuses, {} transitions",
            state_graph.graph.node_count(),
            state_graph.graph.edge_count()
        );
        Ok(state_graph)
    }

    fn check_termination(&self) -> Result<()> {
        let terminals: Vec<NodeIndex> = RunStatus::ALL
            .into_iter()
            .filter(|s| s.is_terminal())
            .map(|s| self.index[&s])
            .collect();

        for status in RunStatus::ALL.into_iter().filter(|s| !s.is_terminal()) {
            let from = self.index[&status];
            if !terminals.iter().any(|&to| has_path_connecting(&self.graph, from, to, None)) {
                tracing::error!("❌ Status '{}' cannot reach a terminal status", status);
                return Err(anyhow::anyhow!("Status '{}' cannot reach a terminal status", status));
            }
        }
        Ok(())
    }

    pub fn transition(&self, from: RunStatus, to: RunStatus) -> Option<Transition> {
        let edge = self.graph.find_edge(self.index[&from], self.index[&to])?;
        self.graph.edge_weight(edge).copied()
    }

    /// Fail loudly if `from -> to` is not part of the workflow
    pub fn ensure_edge(&self, run_id: &str, from: RunStatus, to: RunStatus) -> Result<Transition, EngineError> {
        self.transition(from, to).ok_or_else(|| {
            tracing::error!("❌ Run {} attempted illegal transition {} -> {}", run_id, from, to);
            EngineError::InvalidTransition {
                run_id: run_id.to_string(),
                from,
                to,
            }
        })
    }
}

/// Next status for a run, computed only from its status and payload
///
/// Returns the current status when the payload does not yet carry what the
/// status is waiting for; callers treat a missing self-edge as a bug.
pub fn route(status: RunStatus, payload: &RunPayload) -> RunStatus {
    if status.is_terminal() {
        return status;
    }
    if payload.failure.is_some() {
        return RunStatus::Error;
    }

    match status {
        RunStatus::Init => RunStatus::Classifying,
        RunStatus::Classifying => {
            if payload.intent.is_some() {
                RunStatus::Validating
            } else {
                RunStatus::Classifying
            }
        }
        RunStatus::Validating => match payload.validation.as_ref().map(|v| v.status) {
            Some(ValidationStatus::Valid) => RunStatus::Reasoning,
            Some(ValidationStatus::Invalid) => RunStatus::AwaitingClarification,
            Some(ValidationStatus::Failed) => RunStatus::Error,
            None => RunStatus::Validating,
        },
        RunStatus::AwaitingClarification => {
            let answered = payload
                .validation
                .as_ref()
                .is_some_and(|v| v.round < payload.clarification_round);
            if answered {
                RunStatus::Validating
            } else {
                RunStatus::AwaitingClarification
            }
        }
        RunStatus::Reasoning => match payload.gate {
            Some(gate) if gate.allowed => RunStatus::AwaitingApproval,
            Some(_) => RunStatus::Error,
            None => RunStatus::Reasoning,
        },
        RunStatus::AwaitingApproval => match payload.approval {
            Some(ApprovalDecision::Approve { .. }) => RunStatus::Executing,
            Some(ApprovalDecision::Cancel) => RunStatus::Cancelled,
            None => RunStatus::AwaitingApproval,
        },
        RunStatus::Executing => {
            if payload.executions.is_some() {
                RunStatus::CommittingMemory
            } else {
                RunStatus::Executing
            }
        }
        RunStatus::CommittingMemory => {
            if payload.memory.pending.is_empty() {
                RunStatus::Completed
            } else {
                RunStatus::CommittingMemory
            }
        }
        RunStatus::Completed | RunStatus::Error | RunStatus::Cancelled => status,
    }
}
