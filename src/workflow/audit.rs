/// Append-only audit log
///
/// Records every decision, human input and executed action of a run. Entry ids
/// are deterministic (`{run_id}:{step_sequence}:{index}`), and both stores skip
/// ids they already hold, so re-flushing a checkpoint's outbox never duplicates
/// an entry.

use crate::error::{Port, StoreError};
use crate::tenant::TenantDatabaseManager;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Row;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Who performed an audited action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Actor {
    System,
    Human,
    Agent(String),
}

impl From<Actor> for String {
    fn from(actor: Actor) -> Self {
        match actor {
            Actor::System => "system".to_string(),
            Actor::Human => "human".to_string(),
            Actor::Agent(name) => name,
        }
    }
}

impl From<String> for Actor {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "system" => Actor::System,
            "human" => Actor::Human,
            _ => Actor::Agent(raw),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    RunStarted,
    IntentClassified,
    ClarificationRequested,
    ClarificationReceived,
    ValidationPassed,
    ValidationExhausted,
    EvidenceEvaluated,
    ProposalCreated,
    ApprovalGranted,
    RunCancelled,
    ActionExecuted,
    MemoryCommitted,
    RunFailed,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::RunStarted => "run_started",
            AuditAction::IntentClassified => "intent_classified",
            AuditAction::ClarificationRequested => "clarification_requested",
            AuditAction::ClarificationReceived => "clarification_received",
            AuditAction::ValidationPassed => "validation_passed",
            AuditAction::ValidationExhausted => "validation_exhausted",
            AuditAction::EvidenceEvaluated => "evidence_evaluated",
            AuditAction::ProposalCreated => "proposal_created",
            AuditAction::ApprovalGranted => "approval_granted",
            AuditAction::RunCancelled => "run_cancelled",
            AuditAction::ActionExecuted => "action_executed",
            AuditAction::MemoryCommitted => "memory_committed",
            AuditAction::RunFailed => "run_failed",
        }
    }
}

/// Unstamped audit record produced by a step; the engine assigns id and time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub actor: Actor,
    pub action: AuditAction,
    pub payload: Value,
    pub reversible: bool,
}

impl AuditRecord {
    pub fn system(action: AuditAction, payload: Value) -> Self {
        Self {
            actor: Actor::System,
            action,
            payload,
            reversible: true,
        }
    }

    pub fn human(action: AuditAction, payload: Value) -> Self {
        Self {
            actor: Actor::Human,
            action,
            payload,
            reversible: true,
        }
    }

    /// Record attributed to the collaborator whose answer it reports
    pub fn agent(port: Port, action: AuditAction, payload: Value) -> Self {
        Self {
            actor: Actor::Agent(port.as_str().to_string()),
            action,
            payload,
            reversible: true,
        }
    }

    pub fn irreversible(self) -> Self {
        Self {
            reversible: false,
            ..self
        }
    }
}

/// One immutable audit log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: String,
    pub run_id: String,
    pub tenant_id: String,
    pub timestamp: DateTime<Utc>,
    pub actor: Actor,
    pub action: AuditAction,
    pub payload: Value,
    pub reversible: bool,
}

impl AuditEntry {
    /// Stamp the records a step produced for the checkpoint at `step_sequence`
    pub fn stamp(run_id: &str, tenant_id: &str, step_sequence: u64, records: Vec<AuditRecord>) -> Vec<AuditEntry> {
        let timestamp = Utc::now();
        records
            .into_iter()
            .enumerate()
            .map(|(index, record)| AuditEntry {
                entry_id: format!("{}:{}:{}", run_id, step_sequence, index),
                run_id: run_id.to_string(),
                tenant_id: tenant_id.to_string(),
                timestamp,
                actor: record.actor,
                action: record.action,
                payload: record.payload,
                reversible: record.reversible,
            })
            .collect()
    }
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append entries in order, skipping ids already stored. Returns how many were new.
    async fn append(&self, entries: &[AuditEntry]) -> Result<usize, StoreError>;

    /// All entries of a run in append order
    async fn query(&self, run_id: &str) -> Result<Vec<AuditEntry>, StoreError>;
}

/// Process-local audit store
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    entries: RwLock<Vec<AuditEntry>>,
    ids: RwLock<HashSet<String>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, entries: &[AuditEntry]) -> Result<usize, StoreError> {
        let mut ids = self.ids.write().await;
        let mut stored = self.entries.write().await;
        let mut added = 0;
        for entry in entries {
            if ids.insert(entry.entry_id.clone()) {
                stored.push(entry.clone());
                added += 1;
            }
        }
        Ok(added)
    }

    async fn query(&self, run_id: &str) -> Result<Vec<AuditEntry>, StoreError> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|entry| entry.run_id == run_id)
            .cloned()
            .collect())
    }
}

/// SQLite audit store writing into each tenant's own database
#[derive(Debug, Clone)]
pub struct SqliteAuditStore {
    databases: Arc<TenantDatabaseManager>,
}

impl SqliteAuditStore {
    pub fn new(databases: Arc<TenantDatabaseManager>) -> Self {
        Self { databases }
    }
}

#[async_trait]
impl AuditStore for SqliteAuditStore {
    async fn append(&self, entries: &[AuditEntry]) -> Result<usize, StoreError> {
        let mut added = 0;
        for entry in entries {
            let pool = self
                .databases
                .get_tenant_pool(&entry.tenant_id)
                .await
                .map_err(|e| StoreError::Backend(format!("{:#}", e)))?;
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO audit_entries (entry_id, run_id, tenant_id, recorded_at, action, entry)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&entry.entry_id)
            .bind(&entry.run_id)
            .bind(&entry.tenant_id)
            .bind(entry.timestamp.to_rfc3339())
            .bind(entry.action.as_str())
            .bind(serde_json::to_string(entry)?)
            .execute(&pool)
            .await?;
            added += result.rows_affected() as usize;
        }
        Ok(added)
    }

    async fn query(&self, run_id: &str) -> Result<Vec<AuditEntry>, StoreError> {
        let tenant_id = self
            .databases
            .tenant_for_run(run_id)
            .await
            .map_err(|e| StoreError::Backend(format!("{:#}", e)))?
            .ok_or_else(|| StoreError::UnknownRun(run_id.to_string()))?;
        let pool = self
            .databases
            .get_tenant_pool(&tenant_id)
            .await
            .map_err(|e| StoreError::Backend(format!("{:#}", e)))?;

        let rows = sqlx::query("SELECT entry FROM audit_entries WHERE run_id = ? ORDER BY position ASC")
            .bind(run_id)
            .fetch_all(&pool)
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.get("entry");
            entries.push(serde_json::from_str(&raw)?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(run_id: &str, tenant_id: &str, seq: u64) -> Vec<AuditEntry> {
        AuditEntry::stamp(
            run_id,
            tenant_id,
            seq,
            vec![
                AuditRecord::system(AuditAction::IntentClassified, json!({"intent": "rescue_request"})),
                AuditRecord::human(AuditAction::ApprovalGranted, json!({"approved_ids": ["p-1"]})).irreversible(),
            ],
        )
    }

    #[test]
    fn actor_serializes_as_plain_string() {
        assert_eq!(serde_json::to_value(Actor::System).unwrap(), json!("system"));
        assert_eq!(serde_json::to_value(Actor::Agent("planner".into())).unwrap(), json!("planner"));
        let actor: Actor = serde_json::from_value(json!("human")).unwrap();
        assert_eq!(actor, Actor::Human);
    }

    #[test]
    fn agent_records_name_their_collaborator() {
        let record = AuditRecord::agent(Port::Reasoning, AuditAction::ProposalCreated, json!({"proposal_id": "p-1"}));
        assert_eq!(record.actor, Actor::Agent("reasoning".to_string()));
        assert!(record.reversible);
        assert_eq!(serde_json::to_value(&record.actor).unwrap(), json!("reasoning"));
    }

    #[test]
    fn stamped_ids_are_deterministic() {
        let entries = sample("run-1", "acme", 4);
        assert_eq!(entries[0].entry_id, "run-1:4:0");
        assert_eq!(entries[1].entry_id, "run-1:4:1");
        assert!(!entries[1].reversible);
    }

    #[tokio::test]
    async fn in_memory_store_skips_duplicate_ids() {
        let store = InMemoryAuditStore::new();
        let entries = sample("run-1", "acme", 1);
        assert_eq!(store.append(&entries).await.unwrap(), 2);
        assert_eq!(store.append(&entries).await.unwrap(), 0);
        assert_eq!(store.query("run-1").await.unwrap().len(), 2);
        assert!(store.query("run-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sqlite_store_keeps_order_and_skips_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let databases = Arc::new(TenantDatabaseManager::new(dir.path()));
        databases.register_run("acme", "run-1").await.unwrap();
        let store = SqliteAuditStore::new(databases);

        let first = sample("run-1", "acme", 1);
        let second = sample("run-1", "acme", 2);
        assert_eq!(store.append(&first).await.unwrap(), 2);
        assert_eq!(store.append(&second).await.unwrap(), 2);
        assert_eq!(store.append(&first).await.unwrap(), 0);

        let trail = store.query("run-1").await.unwrap();
        let ids: Vec<&str> = trail.iter().map(|e| e.entry_id.as_str()).collect();
        assert_eq!(ids, vec!["run-1:1:0", "run-1:1:1", "run-1:2:0", "run-1:2:1"]);
        assert_eq!(trail[1].actor, Actor::Human);
    }

    #[tokio::test]
    async fn sqlite_query_for_unknown_run_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteAuditStore::new(Arc::new(TenantDatabaseManager::new(dir.path())));
        assert!(matches!(store.query("nope").await, Err(StoreError::UnknownRun(_))));
    }
}
