//! End-to-end workflow scenarios against scripted collaborators

use resqflow::error::{EngineError, Port, PortError};
use resqflow::ports::mock::{InMemoryMemoryStore, RecordingActionPort, ScriptedClassifier, ScriptedReasoning};
use resqflow::ports::{ActionPlan, Classification, Collaborators, RiskAssessment};
use resqflow::runtime::gate::EvidenceSource;
use resqflow::runtime::{EngineConfig, WorkflowEngine};
use resqflow::tenant::TenantDatabaseManager;
use resqflow::workflow::audit::{AuditAction, AuditStore, InMemoryAuditStore, SqliteAuditStore};
use resqflow::workflow::storage::{CheckpointStore, InMemoryCheckpointStore, SqliteCheckpointStore};
use resqflow::workflow::types::{FailureReason, PausePoint, PlannedAction, RunStatus};
use resqflow::workflow::IntentCatalog;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

struct Scenario {
    parameters: Value,
    knowledge_graph: u32,
    documents: u32,
    resource_available: bool,
    actions: usize,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            parameters: json!({"location": "riverside", "count": 3}),
            knowledge_graph: 3,
            documents: 2,
            resource_available: true,
            actions: 1,
        }
    }
}

struct Harness {
    engine: WorkflowEngine,
    classifier: Arc<ScriptedClassifier>,
    reasoning: Arc<ScriptedReasoning>,
    actions: Arc<RecordingActionPort>,
    memory: Arc<InMemoryMemoryStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    audit: Arc<dyn AuditStore>,
}

fn classifier(scenario: &Scenario) -> ScriptedClassifier {
    let parameters: Map<String, Value> = scenario.parameters.as_object().cloned().unwrap_or_default();
    ScriptedClassifier::new(Classification {
        intent_name: "rescue_request".to_string(),
        parameters,
        confidence: 0.91,
        risk_flag: true,
    })
}

fn reasoning(scenario: &Scenario) -> ScriptedReasoning {
    let mut corroboration = BTreeMap::new();
    corroboration.insert(EvidenceSource::KnowledgeGraph, scenario.knowledge_graph);
    corroboration.insert(EvidenceSource::DocumentRetrieval, scenario.documents);
    let actions = (1..=scenario.actions)
        .map(|n| PlannedAction {
            action_type: "dispatch_team".to_string(),
            parameters: json!({"team": format!("boat-{}", n)}),
            rationale: "nearest available team".to_string(),
        })
        .collect();
    ScriptedReasoning::new(
        RiskAssessment {
            risk_level: resqflow::workflow::types::RiskLevel::High,
            findings: json!({"hazard": "flooding"}),
            corroboration,
        },
        ActionPlan {
            resource_available: scenario.resource_available,
            summary: "send boat teams".to_string(),
            actions,
        },
    )
}

fn build(
    classifier: Arc<ScriptedClassifier>,
    reasoning: Arc<ScriptedReasoning>,
    checkpoints: Arc<dyn CheckpointStore>,
    audit: Arc<dyn AuditStore>,
) -> Harness {
    build_with_actions(classifier, reasoning, Arc::new(RecordingActionPort::new()), checkpoints, audit)
}

fn build_with_actions(
    classifier: Arc<ScriptedClassifier>,
    reasoning: Arc<ScriptedReasoning>,
    actions: Arc<RecordingActionPort>,
    checkpoints: Arc<dyn CheckpointStore>,
    audit: Arc<dyn AuditStore>,
) -> Harness {
    let memory = Arc::new(InMemoryMemoryStore::new());
    let collaborators = Collaborators {
        classifier: classifier.clone(),
        reasoning: reasoning.clone(),
        actions: actions.clone(),
        memory: memory.clone(),
    };
    let engine = WorkflowEngine::new(
        Arc::new(IntentCatalog::builtin()),
        collaborators,
        checkpoints.clone(),
        audit.clone(),
        EngineConfig::default(),
    )
    .unwrap();
    Harness {
        engine,
        classifier,
        reasoning,
        actions,
        memory,
        checkpoints,
        audit,
    }
}

fn harness(scenario: Scenario) -> Harness {
    build(
        Arc::new(classifier(&scenario)),
        Arc::new(reasoning(&scenario)),
        Arc::new(InMemoryCheckpointStore::new()),
        Arc::new(InMemoryAuditStore::new()),
    )
}

fn approve(ids: &[&str]) -> Value {
    json!({"decision": "approve", "approved_ids": ids})
}

async fn actions_of(h: &Harness, run_id: &str) -> Vec<AuditAction> {
    h.engine
        .audit_trail(run_id)
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.action)
        .collect()
}

async fn assert_contiguous_history(h: &Harness, run_id: &str) {
    let history = h.checkpoints.history(run_id).await.unwrap();
    for (index, checkpoint) in history.iter().enumerate() {
        assert_eq!(checkpoint.step_sequence, index as u64);
        assert_eq!(checkpoint.run.step_sequence, index as u64);
    }
}

#[tokio::test]
async fn happy_path_runs_to_completion() {
    let h = harness(Scenario::default());

    let handle = h
        .engine
        .start("coastal-ops", json!({"text": "flood near riverside, 3 people trapped"}))
        .await
        .unwrap();
    assert_eq!(handle.status, RunStatus::AwaitingApproval);
    let token = handle.suspension.clone().unwrap();
    assert_eq!(token.pause_point, PausePoint::ApprovalNeeded);
    assert_eq!(token.payload_for_human["proposals"][0]["proposal_id"], json!("p-1"));

    let done = h.engine.resume(&handle.run_id, approve(&["p-1"])).await.unwrap();
    assert_eq!(done.status, RunStatus::Completed);
    assert!(done.suspension.is_none());
    assert_eq!(done.step_sequence, 6);

    let run = h.engine.get_state(&handle.run_id).await.unwrap();
    assert!(run.payload.memory.pending.is_empty());
    assert_eq!(run.payload.memory.committed.len(), 1);
    assert_eq!(h.actions.executed_count().await, 1);
    assert_eq!(h.memory.entries().await.len(), 1);
    assert_eq!(h.classifier.calls(), 1);
    assert_eq!(h.reasoning.risk_calls(), 1);

    assert_eq!(
        actions_of(&h, &handle.run_id).await,
        vec![
            AuditAction::RunStarted,
            AuditAction::IntentClassified,
            AuditAction::ValidationPassed,
            AuditAction::EvidenceEvaluated,
            AuditAction::ProposalCreated,
            AuditAction::ApprovalGranted,
            AuditAction::ActionExecuted,
            AuditAction::MemoryCommitted,
        ]
    );
    let trail = h.engine.audit_trail(&handle.run_id).await.unwrap();
    let executed = trail.iter().find(|e| e.action == AuditAction::ActionExecuted).unwrap();
    assert!(!executed.reversible);
    assert_contiguous_history(&h, &handle.run_id).await;
}

#[tokio::test]
async fn clarification_loop_exhausts_after_three_attempts() {
    let h = harness(Scenario {
        parameters: json!({"location": "riverside"}),
        ..Scenario::default()
    });

    let handle = h.engine.start("coastal-ops", json!("people trapped by water")).await.unwrap();
    assert_eq!(handle.status, RunStatus::AwaitingClarification);
    let token = handle.suspension.unwrap();
    assert_eq!(token.pause_point, PausePoint::ClarificationNeeded);
    assert_eq!(token.payload_for_human["missing_fields"], json!(["count"]));

    let second = h.engine.resume(&handle.run_id, json!({})).await.unwrap();
    assert_eq!(second.status, RunStatus::AwaitingClarification);
    let third = h.engine.resume(&handle.run_id, json!({"note": "unknown"})).await.unwrap();
    assert_eq!(third.status, RunStatus::AwaitingClarification);
    assert_eq!(third.suspension.unwrap().payload_for_human["attempt"], json!(3));

    let failed = h.engine.resume(&handle.run_id, json!({"count": ""})).await.unwrap();
    assert_eq!(failed.status, RunStatus::Error);
    assert_eq!(failed.failure.unwrap().reason, FailureReason::ValidationExhausted);

    let actions = actions_of(&h, &handle.run_id).await;
    let requested = actions
        .iter()
        .filter(|a| **a == AuditAction::ClarificationRequested)
        .count();
    assert_eq!(requested, 3);
    assert!(actions.contains(&AuditAction::ValidationExhausted));
    assert_eq!(h.reasoning.risk_calls(), 0);

    let again = h.engine.resume(&handle.run_id, json!({"count": 3})).await.unwrap_err();
    assert!(matches!(again, EngineError::NotResumable { status: RunStatus::Error, .. }));
}

#[tokio::test]
async fn clarification_only_fills_missing_fields() {
    let h = harness(Scenario {
        parameters: json!({"location": "riverside"}),
        ..Scenario::default()
    });

    let handle = h.engine.start("coastal-ops", json!("people trapped")).await.unwrap();
    let resumed = h
        .engine
        .resume(&handle.run_id, json!({"count": 4, "location": "hilltop"}))
        .await
        .unwrap();
    assert_eq!(resumed.status, RunStatus::AwaitingApproval);

    let run = h.engine.get_state(&handle.run_id).await.unwrap();
    assert_eq!(run.payload.parameters["location"], json!("riverside"));
    assert_eq!(run.payload.parameters["count"], json!(4));
    assert_eq!(run.payload.clarification_round, 1);
    assert_eq!(h.classifier.calls(), 1);
}

#[tokio::test]
async fn insufficient_evidence_blocks_execution() {
    let h = harness(Scenario {
        knowledge_graph: 1,
        ..Scenario::default()
    });

    let handle = h.engine.start("coastal-ops", json!("bridge collapse")).await.unwrap();
    assert_eq!(handle.status, RunStatus::Error);
    assert!(handle.suspension.is_none());
    let failure = handle.failure.unwrap();
    assert_eq!(failure.reason.code(), "insufficient_evidence:source_A");

    let run = h.engine.get_state(&handle.run_id).await.unwrap();
    assert!(run.payload.proposals.is_empty());
    assert!(run.payload.memory.pending.is_empty());
    assert_eq!(h.actions.calls(), 0);
    assert!(actions_of(&h, &handle.run_id).await.contains(&AuditAction::EvidenceEvaluated));
}

#[tokio::test]
async fn missing_resources_are_reported_before_evidence() {
    let h = harness(Scenario {
        knowledge_graph: 0,
        resource_available: false,
        ..Scenario::default()
    });

    let handle = h.engine.start("coastal-ops", json!("bridge collapse")).await.unwrap();
    assert_eq!(handle.status, RunStatus::Error);
    assert_eq!(handle.failure.unwrap().reason.code(), "insufficient_resources");
}

#[tokio::test]
async fn cancel_at_approval_has_no_side_effects() {
    let h = harness(Scenario::default());

    let handle = h.engine.start("coastal-ops", json!("flood")).await.unwrap();
    let cancelled = h.engine.resume(&handle.run_id, json!({"decision": "cancel"})).await.unwrap();
    assert_eq!(cancelled.status, RunStatus::Cancelled);
    assert_eq!(h.actions.calls(), 0);
    assert_eq!(h.memory.calls(), 0);
    assert_eq!(
        actions_of(&h, &handle.run_id).await.last(),
        Some(&AuditAction::RunCancelled)
    );
}

#[tokio::test]
async fn invalid_approval_input_changes_nothing() {
    let h = harness(Scenario::default());
    let handle = h.engine.start("coastal-ops", json!("flood")).await.unwrap();
    let before = h.engine.get_state(&handle.run_id).await.unwrap();

    for input in [approve(&[]), approve(&["p-9"]), json!({"decision": "maybe"}), json!("yes")] {
        let err = h.engine.resume(&handle.run_id, input).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)), "{:?}", err);
    }

    let after = h.engine.get_state(&handle.run_id).await.unwrap();
    assert_eq!(before, after);
    assert_eq!(h.actions.calls(), 0);
}

#[tokio::test]
async fn malformed_start_creates_nothing() {
    let h = harness(Scenario::default());
    for input in [json!({"body": "x"}), json!({"text": "  "}), json!(17)] {
        let err = h.engine.start("coastal-ops", input).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }
    assert!(matches!(
        h.engine.start("../escape", json!("x")).await,
        Err(EngineError::InvalidInput(_))
    ));
    assert_eq!(h.classifier.calls(), 0);
}

#[tokio::test]
async fn transient_classifier_failure_is_recoverable() {
    let scenario = Scenario::default();
    let h = build(
        Arc::new(classifier(&scenario).with_failures(vec![PortError::Unavailable("timeout".to_string())])),
        Arc::new(reasoning(&scenario)),
        Arc::new(InMemoryCheckpointStore::new()),
        Arc::new(InMemoryAuditStore::new()),
    );

    let err = h.engine.start("coastal-ops", json!("flood")).await.unwrap_err();
    let run_id = match err {
        EngineError::Collaborator { run_id, port, .. } => {
            assert_eq!(port, Port::Classifier);
            run_id
        }
        other => panic!("expected collaborator error, got {:?}", other),
    };

    let parked = h.engine.get_state(&run_id).await.unwrap();
    assert_eq!(parked.status, RunStatus::Init);
    assert_eq!(parked.step_sequence, 0);

    let recovered = h.engine.recover(&run_id).await.unwrap();
    assert_eq!(recovered.status, RunStatus::AwaitingApproval);
    assert_eq!(h.classifier.calls(), 2);
    assert_contiguous_history(&h, &run_id).await;
}

#[tokio::test]
async fn rejected_classifier_routes_to_error() {
    let scenario = Scenario::default();
    let h = build(
        Arc::new(classifier(&scenario).with_failures(vec![PortError::Rejected("400 bad text".to_string())])),
        Arc::new(reasoning(&scenario)),
        Arc::new(InMemoryCheckpointStore::new()),
        Arc::new(InMemoryAuditStore::new()),
    );

    let handle = h.engine.start("coastal-ops", json!("flood")).await.unwrap();
    assert_eq!(handle.status, RunStatus::Error);
    assert_eq!(handle.failure.unwrap().reason.code(), "collaborator_failure:classifier");
    assert_eq!(
        actions_of(&h, &handle.run_id).await,
        vec![AuditAction::RunStarted, AuditAction::RunFailed]
    );
}

#[tokio::test]
async fn interrupted_memory_flush_commits_each_item_once() {
    let h = harness(Scenario {
        actions: 3,
        ..Scenario::default()
    });
    let handle = h.engine.start("coastal-ops", json!("flood")).await.unwrap();
    h.memory.interrupt_next_flush_after(2).await;

    let err = h
        .engine
        .resume(&handle.run_id, approve(&["p-1", "p-2", "p-3"]))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Collaborator { port: Port::MemoryStore, .. }));

    // The crash left the ledger as checkpointed by the execute step.
    let parked = h.engine.get_state(&handle.run_id).await.unwrap();
    assert_eq!(parked.status, RunStatus::CommittingMemory);
    assert_eq!(parked.payload.memory.pending.len(), 3);
    assert!(parked.payload.memory.committed.is_empty());

    let done = h.engine.recover(&handle.run_id).await.unwrap();
    assert_eq!(done.status, RunStatus::Completed);

    let run = h.engine.get_state(&handle.run_id).await.unwrap();
    assert_eq!(run.payload.memory.committed.len(), 3);
    assert!(run.payload.memory.pending.is_empty());
    assert_eq!(h.memory.entries().await.len(), 3);
    assert_eq!(h.memory.ignored_duplicates().await, 2);
    assert_eq!(h.actions.executed_count().await, 3);
}

#[tokio::test]
async fn declined_memory_items_stay_pending_until_recovered() {
    let h = harness(Scenario {
        actions: 3,
        ..Scenario::default()
    });
    let handle = h.engine.start("coastal-ops", json!("flood")).await.unwrap();
    h.memory.decline_next_flush_after(1).await;

    let err = h
        .engine
        .resume(&handle.run_id, approve(&["p-1", "p-2", "p-3"]))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::MemoryFlushIncomplete { remaining: 2, .. }));

    let parked = h.engine.get_state(&handle.run_id).await.unwrap();
    assert_eq!(parked.status, RunStatus::CommittingMemory);
    assert_eq!(parked.payload.memory.committed.len(), 1);
    assert_eq!(parked.payload.memory.pending.len(), 2);

    let done = h.engine.recover(&handle.run_id).await.unwrap();
    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(h.memory.entries().await.len(), 3);
    // Only the declined items were sent again.
    assert_eq!(h.memory.ignored_duplicates().await, 0);
}

fn action_harness(actions: RecordingActionPort) -> Harness {
    let scenario = Scenario {
        actions: 2,
        ..Scenario::default()
    };
    build_with_actions(
        Arc::new(classifier(&scenario)),
        Arc::new(reasoning(&scenario)),
        Arc::new(actions),
        Arc::new(InMemoryCheckpointStore::new()),
        Arc::new(InMemoryAuditStore::new()),
    )
}

#[tokio::test]
async fn rejected_action_keeps_the_actions_already_executed() {
    let h = action_harness(
        RecordingActionPort::new().with_failures_after(1, vec![PortError::Rejected("team unavailable".to_string())]),
    );
    let handle = h.engine.start("coastal-ops", json!("flood")).await.unwrap();

    let failed = h.engine.resume(&handle.run_id, approve(&["p-1", "p-2"])).await.unwrap();
    assert_eq!(failed.status, RunStatus::Error);
    assert_eq!(failed.failure.unwrap().reason.code(), "collaborator_failure:action");

    let run = h.engine.get_state(&handle.run_id).await.unwrap();
    let executions = run.payload.executions.as_ref().unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].proposal_id, "p-1");
    assert_eq!(run.payload.memory.pending.len(), 1);
    assert_eq!(h.actions.executed_count().await, 1);

    let trail = h.engine.audit_trail(&handle.run_id).await.unwrap();
    let tail: Vec<AuditAction> = trail.iter().rev().take(3).rev().map(|e| e.action).collect();
    assert_eq!(
        tail,
        vec![AuditAction::ApprovalGranted, AuditAction::ActionExecuted, AuditAction::RunFailed]
    );
    let executed = trail.iter().find(|e| e.action == AuditAction::ActionExecuted).unwrap();
    assert_eq!(executed.payload["proposal_id"], json!("p-1"));
    assert!(!executed.reversible);
    assert_contiguous_history(&h, &handle.run_id).await;
}

#[tokio::test]
async fn transient_action_failure_replays_under_the_same_keys() {
    let h = action_harness(
        RecordingActionPort::new().with_failures_after(1, vec![PortError::Unavailable("timeout".to_string())]),
    );
    let handle = h.engine.start("coastal-ops", json!("flood")).await.unwrap();

    let err = h
        .engine
        .resume(&handle.run_id, approve(&["p-1", "p-2"]))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Collaborator { port: Port::Action, .. }));

    let parked = h.engine.get_state(&handle.run_id).await.unwrap();
    assert_eq!(parked.status, RunStatus::Executing);
    assert!(parked.payload.executions.is_none());
    assert!(parked.payload.memory.pending.is_empty());

    let done = h.engine.recover(&handle.run_id).await.unwrap();
    assert_eq!(done.status, RunStatus::Completed);
    // p-1 was sent twice under one key and carried out once.
    assert_eq!(h.actions.calls(), 4);
    assert_eq!(h.actions.executed_count().await, 2);

    let executed = actions_of(&h, &handle.run_id)
        .await
        .into_iter()
        .filter(|a| *a == AuditAction::ActionExecuted)
        .count();
    assert_eq!(executed, 2);
    assert_eq!(h.memory.entries().await.len(), 2);
    assert_contiguous_history(&h, &handle.run_id).await;
}

#[tokio::test]
async fn recover_leaves_suspended_runs_alone_and_never_duplicates_audit() {
    let h = harness(Scenario::default());
    let handle = h.engine.start("coastal-ops", json!("flood")).await.unwrap();
    let entries_before = h.audit.query(&handle.run_id).await.unwrap().len();

    let first = h.engine.recover(&handle.run_id).await.unwrap();
    let second = h.engine.recover(&handle.run_id).await.unwrap();
    assert_eq!(first, handle);
    assert_eq!(second, handle);
    assert_eq!(h.audit.query(&handle.run_id).await.unwrap().len(), entries_before);
    assert!(matches!(h.engine.recover("missing").await, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn recover_replays_audit_outbox_of_latest_checkpoint() {
    let scenario = Scenario::default();
    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
    let first = build(
        Arc::new(classifier(&scenario)),
        Arc::new(reasoning(&scenario)),
        checkpoints.clone(),
        Arc::new(InMemoryAuditStore::new()),
    );
    let handle = first.engine.start("coastal-ops", json!("flood")).await.unwrap();

    // A second process whose audit store never saw the last flush.
    let second = build(
        Arc::new(classifier(&scenario)),
        Arc::new(reasoning(&scenario)),
        checkpoints,
        Arc::new(InMemoryAuditStore::new()),
    );
    second.engine.recover(&handle.run_id).await.unwrap();
    let replayed: Vec<AuditAction> = second
        .audit
        .query(&handle.run_id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(replayed, vec![AuditAction::EvidenceEvaluated, AuditAction::ProposalCreated]);
}

#[tokio::test]
async fn tenants_cannot_see_each_others_runs() {
    let h = harness(Scenario::default());
    let handle = h.engine.start("coastal-ops", json!("flood")).await.unwrap();

    assert!(h.engine.get_state_for_tenant("coastal-ops", &handle.run_id).await.is_ok());
    assert!(matches!(
        h.engine.get_state_for_tenant("inland-ops", &handle.run_id).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        h.engine.authorize("inland-ops", &handle.run_id).await,
        Err(EngineError::NotFound(_))
    ));
}

fn sqlite_stores(databases: &Arc<TenantDatabaseManager>) -> (Arc<dyn CheckpointStore>, Arc<dyn AuditStore>) {
    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(SqliteCheckpointStore::new(databases.clone()));
    let audit: Arc<dyn AuditStore> = Arc::new(SqliteAuditStore::new(databases.clone()));
    (checkpoints, audit)
}

fn normalized(payload: &resqflow::workflow::RunPayload, run_id: &str) -> String {
    serde_json::to_string(payload).unwrap().replace(run_id, "RUN")
}

#[tokio::test]
async fn suspend_resume_across_restart_matches_uninterrupted_run() {
    let dir = tempfile::tempdir().unwrap();
    let scenario = Scenario {
        actions: 2,
        ..Scenario::default()
    };

    // Uninterrupted: one process suspends and resumes.
    let databases = Arc::new(TenantDatabaseManager::new(dir.path()));
    let (checkpoints, audit) = sqlite_stores(&databases);
    let steady = build(
        Arc::new(classifier(&scenario)),
        Arc::new(reasoning(&scenario)),
        checkpoints,
        audit,
    );
    let steady_run = steady.engine.start("coastal-ops", json!("flood")).await.unwrap();
    steady.engine.resume(&steady_run.run_id, approve(&["p-1", "p-2"])).await.unwrap();

    // Interrupted: the suspending process goes away before the resume arrives.
    let restarted_id = {
        let databases = Arc::new(TenantDatabaseManager::new(dir.path()));
        let (checkpoints, audit) = sqlite_stores(&databases);
        let before = build(
            Arc::new(classifier(&scenario)),
            Arc::new(reasoning(&scenario)),
            checkpoints,
            audit,
        );
        before.engine.start("coastal-ops", json!("flood")).await.unwrap().run_id
    };

    let databases = Arc::new(TenantDatabaseManager::new(dir.path()));
    let (checkpoints, audit) = sqlite_stores(&databases);
    let after = build(
        Arc::new(classifier(&scenario)),
        Arc::new(reasoning(&scenario)),
        checkpoints,
        audit,
    );
    let done = after.engine.resume(&restarted_id, approve(&["p-1", "p-2"])).await.unwrap();
    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(after.classifier.calls(), 0);
    assert_eq!(after.reasoning.risk_calls(), 0);

    let steady_state = steady.engine.get_state(&steady_run.run_id).await.unwrap();
    let restarted_state = after.engine.get_state(&restarted_id).await.unwrap();
    assert_eq!(steady_state.step_sequence, restarted_state.step_sequence);
    assert_eq!(
        normalized(&steady_state.payload, &steady_run.run_id),
        normalized(&restarted_state.payload, &restarted_id)
    );
    assert_eq!(
        after.engine.audit_trail(&restarted_id).await.unwrap().len(),
        steady.engine.audit_trail(&steady_run.run_id).await.unwrap().len()
    );
}

#[tokio::test]
async fn concurrent_resumes_admit_a_single_writer() {
    let dir = tempfile::tempdir().unwrap();
    let databases = Arc::new(TenantDatabaseManager::new(dir.path()));
    let scenario = Scenario::default();
    let h = build(
        Arc::new(classifier(&scenario)),
        Arc::new(reasoning(&scenario)),
        Arc::new(SqliteCheckpointStore::new(databases.clone())),
        Arc::new(SqliteAuditStore::new(databases)),
    );
    let handle = h.engine.start("coastal-ops", json!("flood")).await.unwrap();

    let (a, b) = tokio::join!(
        h.engine.resume(&handle.run_id, json!({"decision": "cancel"})),
        h.engine.resume(&handle.run_id, json!({"decision": "cancel"})),
    );
    let winners = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert!(winners >= 1);

    // Whatever interleaving happened, the history stays gap-free and ends cancelled.
    let run = h.engine.get_state(&handle.run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
    assert_contiguous_history(&h, &handle.run_id).await;
}
