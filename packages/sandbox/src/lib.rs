// ABOUTME: Sandbox orchestration for deployed voice-agent programs
// ABOUTME: Provisioning, deployment, log capture, health monitoring and crash recovery

pub mod dependencies;
pub mod deploy;
pub mod error;
pub mod health;
pub mod logs;
pub mod monitor;
pub mod orchestrator;
pub mod probe;
pub mod providers;
pub mod registry;
pub mod settings;
pub mod store;
pub mod wrapper;

pub use dependencies::detect_dependencies;
pub use deploy::{build_manifest, DeployOutcome, DeploymentPipeline};
pub use error::OrchestratorError;
pub use health::{HealthCheck, HealthWatcher};
pub use logs::{LogBuffer, LogStore, LogStream};
pub use monitor::{extract_diagnostics, RecoveryReport, SandboxState, StatusReport};
pub use orchestrator::{Orchestrator, SandboxCreated};
pub use probe::{HealthProber, ProbeOutcome};
pub use providers::{DockerProvider, Provider, ProviderError};
pub use registry::{Detached, SandboxHandle, SandboxRegistry};
pub use settings::{OrchestratorSettings, SettingsError};
pub use store::{
    MemoryProjectStore, ProjectSandboxRecord, ProjectStore, SqliteProjectStore, StoreError,
};
pub use wrapper::wrap_source;
