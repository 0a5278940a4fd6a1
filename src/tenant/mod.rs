/// Tenant isolation module
///
/// Each tenant gets its own run database under {data_dir}/{tenant}/runs.db;
/// a shared catalog maps run ids to their owning tenant.

pub mod database;
pub mod types;

pub use database::TenantDatabaseManager;
pub use types::TenantLayout;
