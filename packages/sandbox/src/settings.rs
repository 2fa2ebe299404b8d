// ABOUTME: Orchestrator settings with built-in defaults and environment overrides
// ABOUTME: Holds sandbox layout, timeouts, log capacity and the preinstalled framework set

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use voxcraft_config::constants::*;
use voxcraft_config::env::{parse_env, EnvError};

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error(transparent)]
    Env(#[from] EnvError),

    #[error("{0} must not be zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    // Sandbox provisioning
    pub sandbox_image: String,
    pub sandbox_lifetime: Duration,

    // Deployed program layout
    pub app_port: u16,
    pub app_dir: String,
    pub entry_file: String,
    /// Base URL the wrapped program calls back into for LLM requests
    pub generation_proxy_url: String,
    /// Packages every deployment gets, also treated as preinstalled
    pub framework_dependencies: BTreeMap<String, String>,

    // Timeouts
    pub install_timeout: Duration,
    pub liveness_timeout: Duration,
    pub readiness_attempts: u32,
    pub readiness_interval: Duration,
    pub readiness_attempt_timeout: Duration,
    pub status_probe_timeout: Duration,
    pub settle_delay: Duration,
    pub webhook_timeout: Duration,

    // Logs and health
    pub log_capacity: usize,
    pub status_concurrency: usize,
    pub health_interval: Duration,
    pub auto_recover: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        let framework_dependencies = BTreeMap::from([
            ("express".to_string(), "^4.19.2".to_string()),
            ("body-parser".to_string(), "^1.20.2".to_string()),
        ]);

        Self {
            sandbox_image: "node:20".to_string(),
            sandbox_lifetime: Duration::from_secs(3600),
            app_port: 3000,
            app_dir: "/app".to_string(),
            entry_file: "server.mjs".to_string(),
            generation_proxy_url: "http://host.docker.internal:4001".to_string(),
            framework_dependencies,
            install_timeout: Duration::from_secs(120),
            liveness_timeout: Duration::from_secs(5),
            readiness_attempts: 15,
            readiness_interval: Duration::from_secs(1),
            readiness_attempt_timeout: Duration::from_secs(2),
            status_probe_timeout: Duration::from_secs(3),
            settle_delay: Duration::from_secs(1),
            webhook_timeout: Duration::from_secs(10),
            log_capacity: 200,
            status_concurrency: 16,
            health_interval: Duration::from_secs(30),
            auto_recover: true,
        }
    }
}

impl OrchestratorSettings {
    /// Defaults overridden by any `VOXCRAFT_*` variables present in the environment
    pub fn from_env() -> Result<Self, SettingsError> {
        let mut settings = Self::default();

        if let Ok(image) = std::env::var(VOXCRAFT_SANDBOX_IMAGE) {
            settings.sandbox_image = image;
        }
        if let Some(secs) = parse_env::<u64>(VOXCRAFT_SANDBOX_LIFETIME_SECS)? {
            settings.sandbox_lifetime = Duration::from_secs(secs);
        }
        if let Some(port) = parse_env::<u16>(VOXCRAFT_APP_PORT)? {
            if port == 0 {
                return Err(SettingsError::Zero(VOXCRAFT_APP_PORT));
            }
            settings.app_port = port;
        }
        if let Ok(dir) = std::env::var(VOXCRAFT_APP_DIR) {
            settings.app_dir = dir.trim_end_matches('/').to_string();
        }
        if let Ok(url) = std::env::var(VOXCRAFT_GENERATION_PROXY_URL) {
            settings.generation_proxy_url = url.trim_end_matches('/').to_string();
        }
        if let Some(secs) = parse_env::<u64>(VOXCRAFT_INSTALL_TIMEOUT_SECS)? {
            settings.install_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env::<u64>(VOXCRAFT_LIVENESS_TIMEOUT_SECS)? {
            settings.liveness_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = parse_env::<u32>(VOXCRAFT_READINESS_ATTEMPTS)? {
            settings.readiness_attempts = attempts.max(1);
        }
        if let Some(ms) = parse_env::<u64>(VOXCRAFT_READINESS_INTERVAL_MS)? {
            settings.readiness_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_env::<u64>(VOXCRAFT_SETTLE_DELAY_MS)? {
            settings.settle_delay = Duration::from_millis(ms);
        }
        if let Some(capacity) = parse_env::<usize>(VOXCRAFT_LOG_CAPACITY)? {
            settings.log_capacity = capacity.max(1);
        }
        if let Some(limit) = parse_env::<usize>(VOXCRAFT_STATUS_CONCURRENCY)? {
            settings.status_concurrency = limit.max(1);
        }
        if let Some(secs) = parse_env::<u64>(VOXCRAFT_HEALTH_INTERVAL_SECS)? {
            settings.health_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(flag) = parse_env::<bool>(VOXCRAFT_AUTO_RECOVER)? {
            settings.auto_recover = flag;
        }

        Ok(settings)
    }

    /// Absolute path of the wrapped entry file inside the sandbox
    pub fn entry_path(&self) -> String {
        format!("{}/{}", self.app_dir, self.entry_file)
    }

    pub fn manifest_path(&self) -> String {
        format!("{}/package.json", self.app_dir)
    }
}
