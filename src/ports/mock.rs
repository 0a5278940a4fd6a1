/// Scripted in-process collaborators
///
/// Deterministic stand-ins for the external services, with call counters and
/// failure injection. Used by the test suites and for running the engine
/// without any deployed collaborator.

use crate::error::PortError;
use crate::ports::{
    ActionPlan, ActionPort, ActionRequest, Classification, ClassifierPort, MemoryAck, MemoryStorePort,
    MemoryWrite, ReasoningPort, ReasoningQuery, RiskAssessment,
};
use crate::workflow::types::ActionReceipt;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Classifier returning one fixed classification, optionally after scripted failures
#[derive(Debug)]
pub struct ScriptedClassifier {
    response: Classification,
    failures: Mutex<VecDeque<PortError>>,
    calls: AtomicUsize,
}

impl ScriptedClassifier {
    pub fn new(response: Classification) -> Self {
        Self {
            response,
            failures: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail the next calls with these errors, in order, before answering normally
    pub fn with_failures(self, failures: Vec<PortError>) -> Self {
        Self {
            failures: Mutex::new(failures.into()),
            ..self
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClassifierPort for ScriptedClassifier {
    async fn classify(&self, _text: &str) -> Result<Classification, PortError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().await.pop_front() {
            return Err(err);
        }
        Ok(self.response.clone())
    }
}

/// Reasoning services with fixed risk and plan answers
#[derive(Debug)]
pub struct ScriptedReasoning {
    risk: RiskAssessment,
    plan: ActionPlan,
    failures: Mutex<VecDeque<PortError>>,
    risk_calls: AtomicUsize,
    plan_calls: AtomicUsize,
}

impl ScriptedReasoning {
    pub fn new(risk: RiskAssessment, plan: ActionPlan) -> Self {
        Self {
            risk,
            plan,
            failures: Mutex::new(VecDeque::new()),
            risk_calls: AtomicUsize::new(0),
            plan_calls: AtomicUsize::new(0),
        }
    }

    /// Fail the next risk assessments with these errors before answering normally
    pub fn with_failures(self, failures: Vec<PortError>) -> Self {
        Self {
            failures: Mutex::new(failures.into()),
            ..self
        }
    }

    pub fn risk_calls(&self) -> usize {
        self.risk_calls.load(Ordering::SeqCst)
    }

    pub fn plan_calls(&self) -> usize {
        self.plan_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReasoningPort for ScriptedReasoning {
    async fn assess_risk(&self, _query: &ReasoningQuery) -> Result<RiskAssessment, PortError> {
        self.risk_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().await.pop_front() {
            return Err(err);
        }
        Ok(self.risk.clone())
    }

    async fn generate_plan(&self, _query: &ReasoningQuery, _risk: &RiskAssessment) -> Result<ActionPlan, PortError> {
        self.plan_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.plan.clone())
    }
}

/// Action executor that records requests and treats repeated keys as no-ops
#[derive(Debug, Default)]
pub struct RecordingActionPort {
    executed: Mutex<HashMap<String, ActionReceipt>>,
    failures: Mutex<VecDeque<PortError>>,
    succeed_first: usize,
    calls: AtomicUsize,
}

impl RecordingActionPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failures(self, failures: Vec<PortError>) -> Self {
        Self {
            failures: Mutex::new(failures.into()),
            ..self
        }
    }

    /// Answer the first `successes` calls normally, then fail with these errors in order
    pub fn with_failures_after(self, successes: usize, failures: Vec<PortError>) -> Self {
        Self {
            succeed_first: successes,
            ..self.with_failures(failures)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of distinct actions actually carried out
    pub async fn executed_count(&self) -> usize {
        self.executed.lock().await.len()
    }
}

#[async_trait]
impl ActionPort for RecordingActionPort {
    async fn execute(&self, request: &ActionRequest) -> Result<ActionReceipt, PortError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call >= self.succeed_first {
            if let Some(err) = self.failures.lock().await.pop_front() {
                return Err(err);
            }
        }

        let mut executed = self.executed.lock().await;
        let receipt = executed
            .entry(request.idempotency_key.clone())
            .or_insert_with(|| ActionReceipt {
                proposal_id: request.proposal.proposal_id.clone(),
                idempotency_key: request.idempotency_key.clone(),
                reference: Some(format!("act-{}", request.idempotency_key)),
            })
            .clone();
        Ok(receipt)
    }
}

#[derive(Debug, Clone, Copy)]
enum FlushFault {
    /// Store the first k items, then fail the whole call as if the connection dropped
    InterruptAfter(usize),
    /// Store the first k items and acknowledge the rest as not stored
    DeclineAfter(usize),
}

#[derive(Debug, Default)]
struct MemoryStoreState {
    entries: Vec<MemoryWrite>,
    keys: HashMap<String, usize>,
    ignored_duplicates: usize,
    fault: Option<FlushFault>,
}

/// Long-term memory store keyed by idempotency key
#[derive(Debug, Default)]
pub struct InMemoryMemoryStore {
    state: Mutex<MemoryStoreState>,
    calls: AtomicUsize,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next `write_many` stores `k` items and then fails with `Unavailable`
    pub async fn interrupt_next_flush_after(&self, k: usize) {
        self.state.lock().await.fault = Some(FlushFault::InterruptAfter(k));
    }

    /// Next `write_many` stores `k` items and declines the rest
    pub async fn decline_next_flush_after(&self, k: usize) {
        self.state.lock().await.fault = Some(FlushFault::DeclineAfter(k));
    }

    pub async fn entries(&self) -> Vec<MemoryWrite> {
        self.state.lock().await.entries.clone()
    }

    /// Writes that arrived with an already-stored key and were ignored
    pub async fn ignored_duplicates(&self) -> usize {
        self.state.lock().await.ignored_duplicates
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MemoryStorePort for InMemoryMemoryStore {
    async fn write_many(&self, items: &[MemoryWrite]) -> Result<Vec<MemoryAck>, PortError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        let fault = state.fault.take();

        let mut acks = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            match fault {
                Some(FlushFault::InterruptAfter(k)) if index >= k => {
                    return Err(PortError::Unavailable(format!(
                        "memory store connection lost after {} item(s)",
                        k
                    )));
                }
                Some(FlushFault::DeclineAfter(k)) if index >= k => {
                    acks.push(MemoryAck {
                        idempotency_key: item.idempotency_key.clone(),
                        stored: false,
                    });
                    continue;
                }
                _ => {}
            }

            if state.keys.contains_key(&item.idempotency_key) {
                state.ignored_duplicates += 1;
            } else {
                let position = state.entries.len();
                state.keys.insert(item.idempotency_key.clone(), position);
                state.entries.push(item.clone());
            }
            acks.push(MemoryAck {
                idempotency_key: item.idempotency_key.clone(),
                stored: true,
            });
        }

        Ok(acks)
    }
}
