/// Tenant database manager for isolated multi-tenant storage
///
/// Manages one SQLite database per tenant plus a shared catalog:
/// - {tenant}/runs.db: checkpoints and audit entries for that tenant's runs
/// - catalog.db: run_id -> tenant_id index used to route run-scoped calls
///
/// Pools are created lazily on first access and cached.

use crate::tenant::types::{catalog_db_path, TenantLayout};
use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{OnceCell, RwLock};

/// Tenant database manager with isolated connection pools
#[derive(Debug)]
pub struct TenantDatabaseManager {
    /// Connection pools for tenant databases ({tenant}/runs.db)
    tenant_pools: RwLock<HashMap<String, SqlitePool>>,
    /// Connection pool for the shared run catalog
    catalog_pool: OnceCell<SqlitePool>,
    /// Base directory for database files
    data_dir: PathBuf,
}

impl TenantDatabaseManager {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            tenant_pools: RwLock::new(HashMap::new()),
            catalog_pool: OnceCell::new(),
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get or create the pool for a tenant's run database
    pub async fn get_tenant_pool(&self, tenant_id: &str) -> Result<SqlitePool> {
        // Fast path for existing pools
        {
            let pools = self.tenant_pools.read().await;
            if let Some(pool) = pools.get(tenant_id) {
                return Ok(pool.clone());
            }
        }

        let mut pools = self.tenant_pools.write().await;

        // Another task may have created it while we waited for the write lock
        if let Some(pool) = pools.get(tenant_id) {
            return Ok(pool.clone());
        }

        let layout = TenantLayout::new(&self.data_dir, tenant_id);
        std::fs::create_dir_all(&layout.dir)
            .with_context(|| format!("Failed to create tenant directory '{}'", layout.dir.display()))?;
        let db_path = layout.runs_db_path();

        tracing::info!("🗄️ Creating tenant database pool: {}", db_path.display());
        let pool = open_pool(&db_path).await?;
        init_tenant_schema(&pool).await?;

        pools.insert(tenant_id.to_string(), pool.clone());
        tracing::info!("✅ Tenant database pool created: {}/runs.db", tenant_id);

        Ok(pool)
    }

    /// Get or create the shared run catalog pool
    pub async fn get_catalog_pool(&self) -> Result<SqlitePool> {
        let pool = self
            .catalog_pool
            .get_or_try_init(|| async {
                std::fs::create_dir_all(&self.data_dir).with_context(|| {
                    format!("Failed to create data directory '{}'", self.data_dir.display())
                })?;
                let db_path = catalog_db_path(&self.data_dir);
                tracing::info!("🗂️ Opening run catalog: {}", db_path.display());
                let pool = open_pool(&db_path).await?;
                init_catalog_schema(&pool).await?;
                Ok::<_, anyhow::Error>(pool)
            })
            .await?;
        Ok(pool.clone())
    }

    /// Record which tenant owns a run
    ///
    /// Registering the same pair twice is a no-op; claiming a run id that another
    /// tenant already owns is an error.
    pub async fn register_run(&self, tenant_id: &str, run_id: &str) -> Result<()> {
        let pool = self.get_catalog_pool().await?;
        sqlx::query("INSERT OR IGNORE INTO runs (run_id, tenant_id) VALUES (?, ?)")
            .bind(run_id)
            .bind(tenant_id)
            .execute(&pool)
            .await?;

        match self.tenant_for_run(run_id).await? {
            Some(owner) if owner == tenant_id => Ok(()),
            Some(owner) => Err(anyhow::anyhow!(
                "Run {} already belongs to tenant '{}'",
                run_id,
                owner
            )),
            None => Err(anyhow::anyhow!("Run {} vanished from catalog after insert", run_id)),
        }
    }

    /// Look up the owning tenant of a run
    pub async fn tenant_for_run(&self, run_id: &str) -> Result<Option<String>> {
        let pool = self.get_catalog_pool().await?;
        let row = sqlx::query("SELECT tenant_id FROM runs WHERE run_id = ?")
            .bind(run_id)
            .fetch_optional(&pool)
            .await?;
        Ok(row.map(|row| row.get::<String, _>("tenant_id")))
    }

    /// Number of open tenant pools, for monitoring
    pub async fn tenant_pool_count(&self) -> usize {
        self.tenant_pools.read().await.len()
    }
}

async fn open_pool(db_path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open SQLite database '{}'", db_path.display()))?;
    Ok(pool)
}

/// Checkpoints are append-only: (run_id, step_sequence) is the primary key and no
/// statement in the crate updates or deletes rows.
async fn init_tenant_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS checkpoints (
            run_id TEXT NOT NULL,
            step_sequence INTEGER NOT NULL,
            tenant_id TEXT NOT NULL,
            origin TEXT NOT NULL,
            status TEXT NOT NULL,
            pause_point TEXT,
            snapshot JSON NOT NULL,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (run_id, step_sequence)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_entries (
            position INTEGER PRIMARY KEY AUTOINCREMENT,
            entry_id TEXT NOT NULL UNIQUE,
            run_id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            action TEXT NOT NULL,
            entry JSON NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_entries_run ON audit_entries(run_id, position)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn init_catalog_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS runs (
            run_id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_tenant ON runs(tenant_id)")
        .execute(pool)
        .await?;

    Ok(())
}
