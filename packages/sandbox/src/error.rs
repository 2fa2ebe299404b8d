// ABOUTME: Error type for public orchestrator operations
// ABOUTME: Wraps provider and store failures alongside orchestration-level conditions

use crate::providers::ProviderError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Sandbox not found for project {0}; create one before deploying")]
    SandboxNotFound(String),

    #[error("Recovery already in progress for project {0}")]
    RecoveryInProgress(String),

    #[error("Project {0} has no source to deploy")]
    NoSource(String),

    #[error("Webhook forward failed: {0}")]
    WebhookForward(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
