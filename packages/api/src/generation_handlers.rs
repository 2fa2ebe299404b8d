// ABOUTME: HTTP handlers that create and refine program text through the code generator
// ABOUTME: Generated source is persisted for the project but never deployed automatically

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use tracing::info;
use voxcraft_sandbox::OrchestratorError;

use crate::generator::GeneratorError;
use crate::response::{ok, ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
}

#[derive(Debug, Deserialize)]
pub struct RefineRequest {
    pub instruction: String,
}

pub async fn generate(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(request): Json<GenerateRequest>,
) -> ApiResult {
    if request.prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("prompt must not be empty".to_string()));
    }
    let generator = state.generator.as_ref().ok_or(GeneratorError::NotConfigured)?;

    info!("Generating program for project {}", project_id);
    let source = generator.generate(&request.prompt).await?;
    state.orchestrator.set_source(&project_id, &source).await?;

    Ok(ok(serde_json::json!({ "source": source })))
}

pub async fn refine(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(request): Json<RefineRequest>,
) -> ApiResult {
    if request.instruction.trim().is_empty() {
        return Err(ApiError::BadRequest("instruction must not be empty".to_string()));
    }
    let generator = state.generator.as_ref().ok_or(GeneratorError::NotConfigured)?;
    let current = state
        .orchestrator
        .current_source(&project_id)
        .await?
        .ok_or_else(|| OrchestratorError::NoSource(project_id.clone()))?;

    info!("Refining program for project {}", project_id);
    let source = generator.refine(&current, &request.instruction).await?;
    state.orchestrator.set_source(&project_id, &source).await?;

    Ok(ok(serde_json::json!({ "source": source })))
}
