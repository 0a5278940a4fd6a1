/// Tenant storage layout
///
/// Each tenant owns a directory under the data dir with its own run database,
/// so one tenant's checkpoints and audit trail never share a file with another's.

use std::path::{Path, PathBuf};

/// File layout for one tenant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantLayout {
    /// Tenant slug (already validated as `[A-Za-z0-9_-]+`)
    pub tenant_id: String,
    /// `{data_dir}/{tenant_id}`
    pub dir: PathBuf,
}

impl TenantLayout {
    pub fn new(data_dir: impl AsRef<Path>, tenant_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            dir: data_dir.as_ref().join(tenant_id),
        }
    }

    /// Checkpoints and audit entries for this tenant's runs
    pub fn runs_db_path(&self) -> PathBuf {
        self.dir.join("runs.db")
    }
}

/// Shared run-id -> tenant index, the only cross-tenant file
pub fn catalog_db_path(data_dir: impl AsRef<Path>) -> PathBuf {
    data_dir.as_ref().join("catalog.db")
}
