// ABOUTME: Server bootstrap for the Voxcraft orchestrator
// ABOUTME: Wires store, Docker provider, orchestrator, health watcher and HTTP router

pub mod config;

use anyhow::{Context, Result};
use axum::http::Method;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use voxcraft_api::{create_router, AppState, HttpCodeGenerator};
use voxcraft_sandbox::{
    DockerProvider, HealthWatcher, Orchestrator, OrchestratorSettings, Provider,
    SqliteProjectStore,
};

pub use config::{Config, ConfigError};

/// Open the store and connect the provider, returning a ready orchestrator
pub async fn build_orchestrator(config: &Config) -> Result<Arc<Orchestrator>> {
    let settings = OrchestratorSettings::from_env().context("Invalid orchestrator settings")?;

    let store = SqliteProjectStore::open(&config.database_url)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_url))?;

    let provider = DockerProvider::new(config.docker_public_host.clone())
        .context("Failed to create Docker client")?;
    if !provider.is_available().await.unwrap_or(false) {
        warn!("Docker daemon is not reachable; sandbox operations will fail until it is");
    }

    Ok(Arc::new(Orchestrator::new(
        Arc::new(provider),
        Arc::new(store),
        settings,
    )))
}

pub async fn run_server(config: Config, watch: bool) -> Result<()> {
    let orchestrator = build_orchestrator(&config).await?;

    let watcher = HealthWatcher::new(orchestrator.clone());
    if watch {
        watcher.start().await;
    } else {
        info!("Health watcher disabled");
    }

    let mut state = AppState::new(orchestrator);
    match &config.codegen_url {
        Some(url) => {
            info!("Code generation via {}", url);
            state = state.with_generator(Arc::new(HttpCodeGenerator::new(
                url.clone(),
                config.codegen_api_key.clone(),
                config.codegen_timeout,
            )));
        }
        None => info!("No code generator configured; generate and refine are disabled"),
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);
    let app = create_router(state).layer(cors);

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Voxcraft orchestrator listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    watcher.stop().await;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
