/// Checkpoint persistence
///
/// Every checkpoint is a full snapshot of the run (never a diff), so the latest one
/// alone is enough to resume after a restart. Checkpoints of a run are totally
/// ordered by step_sequence; stores accept an append only when its sequence is
/// exactly previous + 1, which also serializes concurrent writers of one run.

use crate::error::StoreError;
use crate::tenant::TenantDatabaseManager;
use crate::workflow::audit::AuditEntry;
use crate::workflow::types::{PausePoint, Run, Step};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// What produced a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum CheckpointOrigin {
    /// Run creation (sequence 0)
    Created,
    /// A step function
    Step(Step),
    /// External input injected at a pause point
    Resumed(PausePoint),
}

impl CheckpointOrigin {
    pub fn label(&self) -> String {
        match self {
            CheckpointOrigin::Created => "created".to_string(),
            CheckpointOrigin::Step(step) => step.as_str().to_string(),
            CheckpointOrigin::Resumed(point) => format!("resumed:{}", point.as_str()),
        }
    }
}

/// Suspension details stored with a checkpoint taken at a pause point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suspension {
    pub pause_point: PausePoint,
    pub payload_for_human: Value,
}

/// Immutable full snapshot of a run at one step_sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub tenant_id: String,
    pub run_id: String,
    pub step_sequence: u64,
    pub origin: CheckpointOrigin,
    pub suspension: Option<Suspension>,
    pub run: Run,
    /// Audit entries produced by the step, appended to the audit store only
    /// after this checkpoint is durable
    #[serde(default)]
    pub audit: Vec<AuditEntry>,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(run: Run, origin: CheckpointOrigin, suspension: Option<Suspension>, audit: Vec<AuditEntry>) -> Self {
        Self {
            tenant_id: run.tenant_id.clone(),
            run_id: run.run_id.clone(),
            step_sequence: run.step_sequence,
            origin,
            suspension,
            run,
            audit,
            created_at: Utc::now(),
        }
    }

    pub fn pause_point(&self) -> Option<PausePoint> {
        self.suspension.as_ref().map(|s| s.pause_point)
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Append a checkpoint. Rejects sequences other than previous + 1 (0 for a new run).
    async fn append(&self, checkpoint: &Checkpoint) -> Result<(), StoreError>;

    /// Most recent checkpoint of a run
    async fn latest(&self, run_id: &str) -> Result<Option<Checkpoint>, StoreError>;

    /// All checkpoints of a run in sequence order
    async fn history(&self, run_id: &str) -> Result<Vec<Checkpoint>, StoreError>;

    /// Tenant that owns a run
    async fn owner(&self, run_id: &str) -> Result<Option<String>, StoreError>;
}

fn expected_next(run_id: &str, last: Option<u64>, actual: u64) -> Result<(), StoreError> {
    let expected = last.map(|seq| seq + 1).unwrap_or(0);
    if actual == expected {
        Ok(())
    } else {
        Err(StoreError::OutOfOrder {
            run_id: run_id.to_string(),
            expected,
            actual,
        })
    }
}

/// Process-local checkpoint store
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    runs: RwLock<HashMap<String, Vec<Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn append(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        let log = runs.entry(checkpoint.run_id.clone()).or_default();

        if let Some(first) = log.first() {
            if first.tenant_id != checkpoint.tenant_id {
                return Err(StoreError::TenantMismatch {
                    run_id: checkpoint.run_id.clone(),
                    owner: first.tenant_id.clone(),
                    tenant_id: checkpoint.tenant_id.clone(),
                });
            }
        }

        expected_next(
            &checkpoint.run_id,
            log.last().map(|c| c.step_sequence),
            checkpoint.step_sequence,
        )?;
        log.push(checkpoint.clone());
        Ok(())
    }

    async fn latest(&self, run_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self.runs.read().await.get(run_id).and_then(|log| log.last().cloned()))
    }

    async fn history(&self, run_id: &str) -> Result<Vec<Checkpoint>, StoreError> {
        Ok(self.runs.read().await.get(run_id).cloned().unwrap_or_default())
    }

    async fn owner(&self, run_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .runs
            .read()
            .await
            .get(run_id)
            .and_then(|log| log.first())
            .map(|c| c.tenant_id.clone()))
    }
}

/// SQLite checkpoint store with one database per tenant
#[derive(Debug, Clone)]
pub struct SqliteCheckpointStore {
    databases: Arc<TenantDatabaseManager>,
}

impl SqliteCheckpointStore {
    pub fn new(databases: Arc<TenantDatabaseManager>) -> Self {
        Self { databases }
    }

    async fn tenant_pool_for_run(&self, run_id: &str) -> Result<Option<sqlx::SqlitePool>, StoreError> {
        let Some(tenant_id) = self.owner(run_id).await? else {
            return Ok(None);
        };
        let pool = self
            .databases
            .get_tenant_pool(&tenant_id)
            .await
            .map_err(|e| StoreError::Backend(format!("{:#}", e)))?;
        Ok(Some(pool))
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn append(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        match self.owner(&checkpoint.run_id).await? {
            Some(owner) if owner != checkpoint.tenant_id => {
                return Err(StoreError::TenantMismatch {
                    run_id: checkpoint.run_id.clone(),
                    owner,
                    tenant_id: checkpoint.tenant_id.clone(),
                });
            }
            Some(_) => {}
            None if checkpoint.step_sequence == 0 => {
                self.databases
                    .register_run(&checkpoint.tenant_id, &checkpoint.run_id)
                    .await
                    .map_err(|e| StoreError::Backend(format!("{:#}", e)))?;
            }
            None => return Err(StoreError::UnknownRun(checkpoint.run_id.clone())),
        }

        let pool = self
            .databases
            .get_tenant_pool(&checkpoint.tenant_id)
            .await
            .map_err(|e| StoreError::Backend(format!("{:#}", e)))?;

        let row = sqlx::query("SELECT MAX(step_sequence) AS last_seq FROM checkpoints WHERE run_id = ?")
            .bind(&checkpoint.run_id)
            .fetch_one(&pool)
            .await?;
        let last: Option<i64> = row.try_get("last_seq")?;
        expected_next(&checkpoint.run_id, last.map(|seq| seq as u64), checkpoint.step_sequence)?;

        let snapshot = serde_json::to_string(checkpoint)?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO checkpoints (run_id, step_sequence, tenant_id, origin, status, pause_point, snapshot)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&checkpoint.run_id)
        .bind(checkpoint.step_sequence as i64)
        .bind(&checkpoint.tenant_id)
        .bind(checkpoint.origin.label())
        .bind(checkpoint.run.status.as_str())
        .bind(checkpoint.pause_point().map(|p| p.as_str()))
        .bind(&snapshot)
        .execute(&pool)
        .await;

        match inserted {
            Ok(_) => Ok(()),
            // A concurrent writer took this sequence between our read and insert.
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(StoreError::OutOfOrder {
                run_id: checkpoint.run_id.clone(),
                expected: checkpoint.step_sequence + 1,
                actual: checkpoint.step_sequence,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn latest(&self, run_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        let Some(pool) = self.tenant_pool_for_run(run_id).await? else {
            return Ok(None);
        };
        let row = sqlx::query(
            "SELECT snapshot FROM checkpoints WHERE run_id = ? ORDER BY step_sequence DESC LIMIT 1",
        )
        .bind(run_id)
        .fetch_optional(&pool)
        .await?;

        match row {
            Some(row) => {
                let snapshot: String = row.get("snapshot");
                Ok(Some(serde_json::from_str(&snapshot)?))
            }
            None => Ok(None),
        }
    }

    async fn history(&self, run_id: &str) -> Result<Vec<Checkpoint>, StoreError> {
        let Some(pool) = self.tenant_pool_for_run(run_id).await? else {
            return Ok(Vec::new());
        };
        let rows = sqlx::query("SELECT snapshot FROM checkpoints WHERE run_id = ? ORDER BY step_sequence ASC")
            .bind(run_id)
            .fetch_all(&pool)
            .await?;

        let mut checkpoints = Vec::with_capacity(rows.len());
        for row in rows {
            let snapshot: String = row.get("snapshot");
            checkpoints.push(serde_json::from_str(&snapshot)?);
        }
        Ok(checkpoints)
    }

    async fn owner(&self, run_id: &str) -> Result<Option<String>, StoreError> {
        self.databases
            .tenant_for_run(run_id)
            .await
            .map_err(|e| StoreError::Backend(format!("{:#}", e)))
    }
}
