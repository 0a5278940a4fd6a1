/// Run REST API endpoints
///
/// Tenant-scoped mapping of engine operations to routes. Every run-scoped route
/// first checks that the run belongs to the tenant in the path; runs of other
/// tenants are reported as missing.

use crate::error::{EngineError, StoreError};
use crate::runtime::{RunHandle, WorkflowEngine};
use crate::workflow::audit::AuditEntry;
use crate::workflow::types::Run;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
}

/// Request body for resuming a suspended run
#[derive(Debug, Deserialize)]
pub struct ResumeRequest {
    pub external_input: Value,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;

/// Create run routes
pub fn create_run_routes() -> Router<AppState> {
    Router::new()
        .route("/api/tenants/{tenant_id}/runs", post(start_run))
        .route("/api/tenants/{tenant_id}/runs/{run_id}", get(get_run))
        .route("/api/tenants/{tenant_id}/runs/{run_id}/resume", post(resume_run))
        .route("/api/tenants/{tenant_id}/runs/{run_id}/recover", post(recover_run))
        .route("/api/tenants/{tenant_id}/runs/{run_id}/audit", get(get_audit_trail))
}

/// Start a run
///
/// POST /api/tenants/{tenant_id}/runs
/// Body: { "text": "..." } or "..."
async fn start_run(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(input): Json<Value>,
) -> ApiResult<RunHandle> {
    let handle = state.engine.start(&tenant_id, input).await.map_err(error_response)?;
    Ok(Json(handle))
}

/// Latest state of a run
///
/// GET /api/tenants/{tenant_id}/runs/{run_id}
async fn get_run(
    State(state): State<AppState>,
    Path((tenant_id, run_id)): Path<(String, String)>,
) -> ApiResult<Run> {
    let run = state
        .engine
        .get_state_for_tenant(&tenant_id, &run_id)
        .await
        .map_err(error_response)?;
    Ok(Json(run))
}

/// Resume a suspended run
///
/// POST /api/tenants/{tenant_id}/runs/{run_id}/resume
/// Body: { "external_input": { ... } }
async fn resume_run(
    State(state): State<AppState>,
    Path((tenant_id, run_id)): Path<(String, String)>,
    Json(request): Json<ResumeRequest>,
) -> ApiResult<RunHandle> {
    state.engine.authorize(&tenant_id, &run_id).await.map_err(error_response)?;
    let handle = state
        .engine
        .resume(&run_id, request.external_input)
        .await
        .map_err(error_response)?;
    Ok(Json(handle))
}

/// Continue a run interrupted mid-step
///
/// POST /api/tenants/{tenant_id}/runs/{run_id}/recover
async fn recover_run(
    State(state): State<AppState>,
    Path((tenant_id, run_id)): Path<(String, String)>,
) -> ApiResult<RunHandle> {
    state.engine.authorize(&tenant_id, &run_id).await.map_err(error_response)?;
    let handle = state.engine.recover(&run_id).await.map_err(error_response)?;
    Ok(Json(handle))
}

/// Audit trail of a run
///
/// GET /api/tenants/{tenant_id}/runs/{run_id}/audit
async fn get_audit_trail(
    State(state): State<AppState>,
    Path((tenant_id, run_id)): Path<(String, String)>,
) -> ApiResult<Vec<AuditEntry>> {
    state.engine.authorize(&tenant_id, &run_id).await.map_err(error_response)?;
    let entries = state.engine.audit_trail(&run_id).await.map_err(error_response)?;
    Ok(Json(entries))
}

pub fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::NotResumable { .. } => StatusCode::CONFLICT,
        EngineError::Checkpoint(StoreError::OutOfOrder { .. }) => StatusCode::CONFLICT,
        EngineError::Collaborator { .. } | EngineError::MemoryFlushIncomplete { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: EngineError) -> (StatusCode, Json<Value>) {
    let status = status_for(&err);
    if status.is_server_error() {
        tracing::error!("❌ Request failed: {}", err);
    } else {
        tracing::debug!("↩️ Request rejected: {}", err);
    }
    (status, Json(json!({ "error": err.code(), "message": err.to_string() })))
}
