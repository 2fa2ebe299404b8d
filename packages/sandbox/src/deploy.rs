// ABOUTME: Deployment pipeline that ships a program into a project's sandbox
// ABOUTME: Stops the old process, installs dependencies, writes wrapped source, launches and probes

use crate::dependencies::detect_dependencies;
use crate::error::{OrchestratorError, Result};
use crate::logs::{spawn_log_pump, LogStore, LogStream};
use crate::probe::HealthProber;
use crate::registry::{SandboxHandle, SandboxRegistry};
use crate::settings::OrchestratorSettings;
use crate::store::ProjectStore;
use crate::wrapper::wrap_source;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Result of one deployment attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployOutcome {
    pub success: bool,
    /// Whether the readiness probe saw the server respond
    pub ready: bool,
    pub logs: Vec<String>,
    pub external_id: String,
    pub endpoint: Option<String>,
}

/// Step log for one deploy, mirrored to tracing
struct DeployLog {
    project_id: String,
    lines: Vec<String>,
}

impl DeployLog {
    fn new(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            lines: Vec::new(),
        }
    }

    fn info(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!("[{}] {}", self.project_id, message);
        self.lines.push(message);
    }

    fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("[{}] {}", self.project_id, message);
        self.lines.push(format!("warning: {}", message));
    }

    fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!("[{}] {}", self.project_id, message);
        self.lines.push(format!("error: {}", message));
    }
}

pub struct DeploymentPipeline {
    registry: Arc<SandboxRegistry>,
    logs: Arc<LogStore>,
    store: Arc<dyn ProjectStore>,
    prober: HealthProber,
    settings: Arc<OrchestratorSettings>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DeploymentPipeline {
    pub fn new(
        registry: Arc<SandboxRegistry>,
        logs: Arc<LogStore>,
        store: Arc<dyn ProjectStore>,
        prober: HealthProber,
        settings: Arc<OrchestratorSettings>,
    ) -> Self {
        Self {
            registry,
            logs,
            store,
            prober,
            settings,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn project_lock(&self, project_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(project_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the project's deploy lock unless a deploy is holding it
    pub async fn forget(&self, project_id: &str) {
        let mut locks = self.locks.lock().await;
        if locks
            .get(project_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(project_id);
        }
    }

    /// Projects that currently have a deploy lock entry
    pub async fn lock_count(&self) -> usize {
        self.locks.lock().await.len()
    }

    /// Deploy `source` into the project's sandbox.
    ///
    /// Only a missing sandbox is returned as an error. Every other step
    /// failure is recorded in the outcome's log; installer and readiness
    /// failures leave `success` set.
    pub async fn deploy(
        &self,
        project_id: &str,
        source: &str,
        hint: Option<&str>,
    ) -> Result<DeployOutcome> {
        let lock = self.project_lock(project_id).await;
        let _guard = lock.lock().await;

        let mut log = DeployLog::new(project_id);

        let handle = self
            .registry
            .resolve(project_id, hint)
            .await
            .ok_or_else(|| OrchestratorError::SandboxNotFound(project_id.to_string()))?;
        log.info(format!("Using sandbox {}", handle.external_id));

        self.stop_previous(&handle, &mut log).await;
        tokio::time::sleep(self.settings.settle_delay).await;

        self.install_dependencies(project_id, source, &handle, &mut log)
            .await;

        let mut outcome = DeployOutcome {
            success: false,
            ready: false,
            logs: Vec::new(),
            external_id: handle.external_id.clone(),
            endpoint: handle.endpoint.clone(),
        };

        let wrapped = wrap_source(project_id, source, &self.settings);
        let entry_path = self.settings.entry_path();
        if let Err(e) = handle.write_file(&entry_path, wrapped.as_bytes()).await {
            log.error(format!("Failed to write {}: {}", entry_path, e));
            outcome.logs = log.lines;
            return Ok(outcome);
        }
        log.info(format!("Wrote {} ({} bytes)", entry_path, wrapped.len()));

        if !self.launch(project_id, &handle, &mut log).await {
            outcome.logs = log.lines;
            return Ok(outcome);
        }
        outcome.success = true;

        outcome.ready = match handle.endpoint.as_deref() {
            Some(endpoint) => {
                let readiness = self
                    .prober
                    .wait_until_ready(
                        endpoint,
                        self.settings.readiness_attempts,
                        self.settings.readiness_interval,
                        self.settings.readiness_attempt_timeout,
                    )
                    .await;
                if readiness.ready {
                    log.info(format!(
                        "Server ready after {} attempt(s) ({} ms)",
                        readiness.attempts,
                        readiness.elapsed.as_millis()
                    ));
                } else {
                    log.warn(format!(
                        "Server not responding after {} attempts ({:?}); check status and logs",
                        readiness.attempts, readiness.last
                    ));
                }
                readiness.ready
            }
            None => {
                log.warn("Sandbox has no public endpoint; skipping readiness probe");
                false
            }
        };

        if let Err(e) = self.store.set_source(project_id, source).await {
            log.warn(format!("Failed to persist deployed source: {}", e));
        }

        outcome.logs = log.lines;
        Ok(outcome)
    }

    async fn stop_previous(&self, handle: &SandboxHandle, log: &mut DeployLog) {
        let command = ["pkill", "-f", self.settings.entry_file.as_str()];
        match handle.exec(&command, self.settings.liveness_timeout).await {
            Ok(result) if result.exit_code == 0 => log.info("Stopped previous process"),
            // pkill exits 1 when nothing matched
            Ok(result) if result.exit_code == 1 => log.info("No previous process running"),
            Ok(result) => log.warn(format!(
                "pkill exited with {}: {}",
                result.exit_code,
                result.output_tail(5)
            )),
            Err(e) => log.warn(format!("Failed to stop previous process: {}", e)),
        }
    }

    async fn install_dependencies(
        &self,
        project_id: &str,
        source: &str,
        handle: &SandboxHandle,
        log: &mut DeployLog,
    ) {
        let detected = detect_dependencies(source, &self.settings.framework_dependencies);
        if detected.is_empty() {
            log.info("No extra dependencies detected");
        } else {
            log.info(format!("Detected dependencies: {}", detected.join(", ")));
        }

        let manifest = build_manifest(project_id, &self.settings.framework_dependencies, &detected);
        let manifest_path = self.settings.manifest_path();
        if let Err(e) = handle.write_file(&manifest_path, manifest.as_bytes()).await {
            log.warn(format!("Failed to write {}: {}", manifest_path, e));
            return;
        }

        let command = [
            "npm",
            "install",
            "--no-audit",
            "--no-fund",
            "--loglevel=error",
            "--prefix",
            self.settings.app_dir.as_str(),
        ];
        match handle.exec(&command, self.settings.install_timeout).await {
            Ok(result) if result.success() => log.info("npm install completed"),
            Ok(result) => log.warn(format!(
                "npm install exited with {}: {}",
                result.exit_code,
                result.output_tail(10)
            )),
            Err(e) => log.warn(format!("npm install failed: {}", e)),
        }
    }

    /// Reset the log buffer and start the server detached. Returns false if
    /// the launch itself failed.
    async fn launch(&self, project_id: &str, handle: &SandboxHandle, log: &mut DeployLog) -> bool {
        let buffer = self.logs.buffer(project_id).await;
        let generation = {
            let mut guard = buffer.lock().await;
            let generation = guard.reset();
            guard.append(
                LogStream::System,
                format!("starting node {}", self.settings.entry_file),
            );
            generation
        };

        let command = ["node", self.settings.entry_file.as_str()];
        match handle
            .spawn_background(&command, &self.settings.app_dir)
            .await
        {
            Ok(process) => {
                log.info(format!("Launched server (process {})", process.process_id));
                spawn_log_pump(project_id.to_string(), buffer, generation, process.output);
                true
            }
            Err(e) => {
                buffer
                    .lock()
                    .await
                    .append_if_current(generation, LogStream::System, format!("launch failed: {}", e));
                log.error(format!("Failed to launch server: {}", e));
                false
            }
        }
    }
}

/// `package.json` for the deployed program: framework packages at their
/// pinned ranges plus every detected package at `latest`.
pub fn build_manifest(
    project_id: &str,
    framework: &BTreeMap<String, String>,
    detected: &[String],
) -> String {
    let mut dependencies = framework.clone();
    for package in detected {
        dependencies
            .entry(package.clone())
            .or_insert_with(|| "latest".to_string());
    }

    let manifest = serde_json::json!({
        "name": "voxcraft-agent",
        "version": "1.0.0",
        "private": true,
        "type": "module",
        "description": format!("Voice agent for project {}", project_id),
        "dependencies": dependencies,
    });

    serde_json::to_string_pretty(&manifest).unwrap_or_else(|_| manifest.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_merges_framework_and_detected() {
        let framework = BTreeMap::from([("express".to_string(), "^4.19.2".to_string())]);
        let manifest = build_manifest(
            "p1",
            &framework,
            &["axios".to_string(), "express".to_string()],
        );

        let parsed: serde_json::Value = serde_json::from_str(&manifest).unwrap();
        assert_eq!(parsed["type"], "module");
        assert_eq!(parsed["dependencies"]["express"], "^4.19.2");
        assert_eq!(parsed["dependencies"]["axios"], "latest");
        assert_eq!(parsed["dependencies"].as_object().unwrap().len(), 2);
    }
}
