// ABOUTME: Shared API response types and error handling
// ABOUTME: Provides consistent response format across all API endpoints

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json as ResponseJson},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use voxcraft_sandbox::OrchestratorError;

use crate::generator::GeneratorError;

/// Standard API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// Wrap a value in a 200 `ApiResponse`
pub fn ok<T: Serialize>(data: T) -> axum::response::Response {
    (StatusCode::OK, ResponseJson(ApiResponse::success(data))).into_response()
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    Generator(#[from] GeneratorError),

    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Orchestrator(e) => match e {
                OrchestratorError::SandboxNotFound(_) => StatusCode::NOT_FOUND,
                OrchestratorError::RecoveryInProgress(_) => StatusCode::CONFLICT,
                OrchestratorError::NoSource(_) => StatusCode::BAD_REQUEST,
                OrchestratorError::Provider(_) | OrchestratorError::WebhookForward(_) => {
                    StatusCode::BAD_GATEWAY
                }
                OrchestratorError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Generator(GeneratorError::NotConfigured) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Generator(_) => StatusCode::BAD_GATEWAY,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let message = match &self {
            ApiError::Orchestrator(OrchestratorError::Store(_)) => "Database error".to_string(),
            _ => self.to_string(),
        };
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        (status, ResponseJson(ApiResponse::<()>::error(message))).into_response()
    }
}

pub type ApiResult = Result<axum::response::Response, ApiError>;
