// ABOUTME: HTTP API layer for the Voxcraft orchestrator providing REST endpoints and routing
// ABOUTME: Sandbox lifecycle, deploy, status, logs, recovery, generation and webhook relay

use axum::{
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use voxcraft_sandbox::Orchestrator;

pub mod generation_handlers;
pub mod generator;
pub mod response;
pub mod sandbox_handlers;
pub mod webhook_handlers;

pub use generator::{CodeGenerator, GeneratorError, HttpCodeGenerator};
pub use response::{ApiError, ApiResponse};

/// Shared state for every route
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub generator: Option<Arc<dyn CodeGenerator>>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            generator: None,
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn CodeGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }
}

/// Creates the per-project API router (nested under /api/projects)
pub fn create_projects_router() -> Router<AppState> {
    Router::new()
        .route("/status", post(sandbox_handlers::bulk_status))
        .route(
            "/{id}/sandbox",
            post(sandbox_handlers::create_sandbox).delete(sandbox_handlers::terminate_sandbox),
        )
        .route("/{id}/deploy", post(sandbox_handlers::deploy))
        .route("/{id}/status", get(sandbox_handlers::get_status))
        .route("/{id}/logs", get(sandbox_handlers::get_logs))
        .route("/{id}/recover", post(sandbox_handlers::recover))
        .route("/{id}/generate", post(generation_handlers::generate))
        .route("/{id}/refine", post(generation_handlers::refine))
}

/// Full application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/projects", create_projects_router())
        .route("/webhook/{id}", post(webhook_handlers::relay_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "voxcraft",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
