// ABOUTME: HTTP request handlers for sandbox lifecycle, deployment and monitoring
// ABOUTME: Thin wrappers over the orchestrator that shape results into ApiResponse

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use tracing::info;
use voxcraft_sandbox::OrchestratorError;

use crate::response::{ok, ApiError, ApiResult};
use crate::AppState;

/// Optional external id supplied by a caller that already knows it
#[derive(Debug, Default, Deserialize)]
pub struct SandboxHint {
    #[serde(default)]
    pub sandbox_id: Option<String>,
}

pub async fn create_sandbox(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult {
    info!("Creating sandbox for project {}", project_id);
    let created = state.orchestrator.create_sandbox(&project_id).await?;
    Ok(ok(created))
}

pub async fn terminate_sandbox(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult {
    info!("Terminating sandbox for project {}", project_id);
    let terminated = state.orchestrator.terminate(&project_id).await?;
    Ok(ok(serde_json::json!({ "terminated": terminated })))
}

#[derive(Debug, Default, Deserialize)]
pub struct DeployRequest {
    /// Program text; the stored source is used when absent
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub sandbox_id: Option<String>,
}

pub async fn deploy(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(request): Json<DeployRequest>,
) -> ApiResult {
    let source = match request.source {
        Some(source) if !source.trim().is_empty() => source,
        _ => state
            .orchestrator
            .current_source(&project_id)
            .await?
            .ok_or_else(|| OrchestratorError::NoSource(project_id.clone()))?,
    };

    let outcome = state
        .orchestrator
        .deploy(&project_id, &source, request.sandbox_id.as_deref())
        .await?;
    info!(
        "Deploy for {} finished (success: {}, ready: {})",
        project_id, outcome.success, outcome.ready
    );
    Ok(ok(outcome))
}

pub async fn get_status(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(hint): Query<SandboxHint>,
) -> ApiResult {
    let report = state
        .orchestrator
        .status(&project_id, hint.sandbox_id.as_deref())
        .await;
    Ok(ok(report))
}

#[derive(Debug, Deserialize)]
pub struct BulkStatusRequest {
    pub project_ids: Vec<String>,
}

pub async fn bulk_status(
    State(state): State<AppState>,
    Json(request): Json<BulkStatusRequest>,
) -> ApiResult {
    if request.project_ids.is_empty() {
        return Err(ApiError::BadRequest("project_ids must not be empty".to_string()));
    }
    let reports = state.orchestrator.status_bulk(&request.project_ids).await;
    Ok(ok(reports))
}

pub async fn get_logs(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult {
    let logs = state.orchestrator.logs(&project_id).await;
    Ok(ok(serde_json::json!({ "logs": logs })))
}

pub async fn recover(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult {
    let report = state.orchestrator.recover(&project_id).await?;
    Ok(ok(report))
}
