// ABOUTME: Orchestrator facade owning all per-process sandbox state
// ABOUTME: Create, deploy, status, bulk status, logs, terminate and crash recovery

use crate::deploy::{DeployOutcome, DeploymentPipeline};
use crate::error::{OrchestratorError, Result};
use crate::logs::LogStore;
use crate::monitor::{
    check_status, classify, extract_diagnostics, RecoveryGuard, RecoveryReport, SandboxState,
    StatusReport,
};
use crate::probe::HealthProber;
use crate::providers::{Provider, ProviderError, SandboxConfig};
use crate::registry::{Detached, SandboxHandle, SandboxRegistry};
use crate::settings::OrchestratorSettings;
use crate::store::ProjectStore;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxCreated {
    pub external_id: String,
    pub endpoint: Option<String>,
    /// True when an existing live sandbox was returned instead of a new one
    pub reused: bool,
}

/// Owns the registry, log buffers and deploy pipeline for one process.
///
/// Construct once and share behind an `Arc`. Independent instances never
/// share state, so a fresh instance over the same store behaves like a
/// restarted process.
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    store: Arc<dyn ProjectStore>,
    settings: Arc<OrchestratorSettings>,
    registry: Arc<SandboxRegistry>,
    logs: Arc<LogStore>,
    prober: HealthProber,
    pipeline: DeploymentPipeline,
    recovery: RecoveryGuard,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        store: Arc<dyn ProjectStore>,
        settings: OrchestratorSettings,
    ) -> Self {
        let settings = Arc::new(settings);
        let registry = Arc::new(SandboxRegistry::new(
            provider.clone(),
            store.clone(),
            settings.liveness_timeout,
        ));
        let logs = Arc::new(LogStore::new(settings.log_capacity));
        let prober = HealthProber::new();
        let pipeline = DeploymentPipeline::new(
            registry.clone(),
            logs.clone(),
            store.clone(),
            prober.clone(),
            settings.clone(),
        );

        Self {
            provider,
            store,
            settings,
            registry,
            logs,
            prober,
            pipeline,
            recovery: RecoveryGuard::new(),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn ProjectStore> {
        &self.store
    }

    pub fn registry(&self) -> &SandboxRegistry {
        &self.registry
    }

    pub fn pipeline(&self) -> &DeploymentPipeline {
        &self.pipeline
    }

    /// Provision a sandbox for the project, or return the live one
    pub async fn create_sandbox(&self, project_id: &str) -> Result<SandboxCreated> {
        if let Some(handle) = self.registry.resolve(project_id, None).await {
            info!(
                "Project {} already has sandbox {}",
                project_id, handle.external_id
            );
            return Ok(SandboxCreated {
                external_id: handle.external_id,
                endpoint: handle.endpoint,
                reused: true,
            });
        }

        let config = self.sandbox_config(project_id);
        let sandbox = self.provider.create_sandbox(&config).await?;
        info!(
            "Created sandbox {} for project {} at {:?}",
            sandbox.id, project_id, sandbox.endpoint
        );

        self.registry
            .install(SandboxHandle::new(
                project_id,
                sandbox.id.clone(),
                sandbox.endpoint.clone(),
                self.provider.clone(),
            ))
            .await;
        self.store
            .set_sandbox(project_id, &sandbox.id, sandbox.endpoint.as_deref())
            .await?;

        Ok(SandboxCreated {
            external_id: sandbox.id,
            endpoint: sandbox.endpoint,
            reused: false,
        })
    }

    fn sandbox_config(&self, project_id: &str) -> SandboxConfig {
        let slug: String = project_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .take(40)
            .collect();
        let suffix = uuid::Uuid::new_v4().simple().to_string();

        SandboxConfig {
            name: format!("voxcraft-{}-{}", slug, &suffix[..8]),
            image: self.settings.sandbox_image.clone(),
            app_port: self.settings.app_port,
            working_dir: self.settings.app_dir.clone(),
            lifetime: self.settings.sandbox_lifetime,
            env_vars: HashMap::from([
                ("PROJECT_ID".to_string(), project_id.to_string()),
                ("PORT".to_string(), self.settings.app_port.to_string()),
                ("NODE_ENV".to_string(), "production".to_string()),
            ]),
            labels: HashMap::from([(
                "voxcraft.project_id".to_string(),
                project_id.to_string(),
            )]),
        }
    }

    pub async fn deploy(
        &self,
        project_id: &str,
        source: &str,
        hint: Option<&str>,
    ) -> Result<DeployOutcome> {
        self.pipeline.deploy(project_id, source, hint).await
    }

    /// Redeploy the last persisted source
    pub async fn redeploy(&self, project_id: &str) -> Result<DeployOutcome> {
        let source = self
            .current_source(project_id)
            .await?
            .ok_or_else(|| OrchestratorError::NoSource(project_id.to_string()))?;
        self.pipeline.deploy(project_id, &source, None).await
    }

    pub async fn status(&self, project_id: &str, hint: Option<&str>) -> StatusReport {
        check_status(
            &self.registry,
            &self.prober,
            &self.settings,
            project_id,
            hint,
        )
        .await
    }

    /// Status for many projects at once. Each id is checked independently;
    /// a project whose sandbox the provider reports gone loses its persisted
    /// sandbox id. Provider outages leave the record alone.
    pub async fn status_bulk(&self, project_ids: &[String]) -> HashMap<String, StatusReport> {
        self.bulk(project_ids, true).await
    }

    /// [`Orchestrator::status_bulk`] without clearing anything from the store
    pub async fn status_bulk_read_only(
        &self,
        project_ids: &[String],
    ) -> HashMap<String, StatusReport> {
        self.bulk(project_ids, false).await
    }

    async fn bulk(&self, project_ids: &[String], clear_gone: bool) -> HashMap<String, StatusReport> {
        let unique: BTreeSet<String> = project_ids.iter().cloned().collect();

        stream::iter(unique)
            .map(|project_id| async move {
                let (report, detached) = classify(
                    &self.registry,
                    &self.prober,
                    &self.settings,
                    &project_id,
                    None,
                )
                .await;
                if clear_gone && detached == Some(Detached::Gone) {
                    self.clear_stale_sandbox(&project_id).await;
                }
                (project_id, report)
            })
            .buffer_unordered(self.settings.status_concurrency.max(1))
            .collect()
            .await
    }

    async fn clear_stale_sandbox(&self, project_id: &str) {
        match self.store.get(project_id).await {
            Ok(Some(record)) if record.external_sandbox_id.is_some() => {
                info!(
                    "Clearing stale sandbox {:?} for project {}",
                    record.external_sandbox_id, project_id
                );
                self.registry.forget(project_id).await;
                if let Err(e) = self.store.clear_sandbox(project_id).await {
                    warn!("Failed to clear sandbox for {}: {}", project_id, e);
                }
            }
            Ok(_) => {
                self.registry.forget(project_id).await;
            }
            Err(e) => warn!("Failed to read project {}: {}", project_id, e),
        }
    }

    /// Output of the project's running program, one line per entry
    pub async fn logs(&self, project_id: &str) -> String {
        self.logs.text(project_id).await
    }

    pub async fn log_lines(&self, project_id: &str) -> Vec<String> {
        self.logs.snapshot(project_id).await
    }

    /// Kill the project's sandbox and forget everything about it.
    /// Returns false when there was nothing to terminate.
    pub async fn terminate(&self, project_id: &str) -> Result<bool> {
        let handle = self.registry.forget(project_id).await;
        let external_id = match handle {
            Some(handle) => Some(handle.external_id),
            None => self
                .store
                .get(project_id)
                .await?
                .and_then(|r| r.external_sandbox_id),
        };

        let terminated = match external_id {
            Some(id) => match self.provider.kill_sandbox(&id).await {
                Ok(()) => {
                    info!("Terminated sandbox {} for project {}", id, project_id);
                    true
                }
                Err(ProviderError::NotFound(_)) => {
                    info!("Sandbox {} for project {} already gone", id, project_id);
                    false
                }
                Err(e) => return Err(e.into()),
            },
            None => false,
        };

        self.store.clear_sandbox(project_id).await?;
        self.logs.remove(project_id).await;
        self.pipeline.forget(project_id).await;
        Ok(terminated)
    }

    /// Redeploy a project whose program died inside a live sandbox.
    ///
    /// Does nothing unless the project is `port_down`. Concurrent calls for
    /// the same project get `RecoveryInProgress`.
    pub async fn recover(&self, project_id: &str) -> Result<RecoveryReport> {
        let _ticket = self
            .recovery
            .try_begin(project_id)
            .ok_or_else(|| OrchestratorError::RecoveryInProgress(project_id.to_string()))?;

        let status = self.status(project_id, None).await;
        if status.state != SandboxState::PortDown {
            return Ok(RecoveryReport {
                attempted: false,
                state: status.state,
                diagnostics: Vec::new(),
                outcome: None,
            });
        }

        let diagnostics = extract_diagnostics(&self.logs.snapshot(project_id).await);
        warn!(
            "Project {} is port_down, redeploying. Diagnostics:\n{}",
            project_id,
            diagnostics.join("\n")
        );

        let outcome = self.redeploy(project_id).await?;
        Ok(RecoveryReport {
            attempted: true,
            state: status.state,
            diagnostics,
            outcome: Some(outcome),
        })
    }

    pub fn is_recovering(&self, project_id: &str) -> bool {
        self.recovery.is_recovering(project_id)
    }

    pub async fn current_source(&self, project_id: &str) -> Result<Option<String>> {
        Ok(self
            .store
            .get(project_id)
            .await?
            .and_then(|r| r.current_source))
    }

    pub async fn set_source(&self, project_id: &str, source: &str) -> Result<()> {
        Ok(self.store.set_source(project_id, source).await?)
    }

    /// Projects that have a persisted sandbox id
    pub async fn tracked_projects(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .list_with_sandbox()
            .await?
            .into_iter()
            .map(|r| r.project_id)
            .collect())
    }

    /// Forward a webhook payload to the project's running program
    pub async fn forward_webhook(
        &self,
        project_id: &str,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let handle = self
            .registry
            .resolve(project_id, None)
            .await
            .ok_or_else(|| OrchestratorError::SandboxNotFound(project_id.to_string()))?;
        let endpoint = handle.endpoint.ok_or_else(|| {
            OrchestratorError::WebhookForward("sandbox has no public endpoint".to_string())
        })?;

        let response = self
            .prober
            .client()
            .post(format!("{}/webhook", endpoint.trim_end_matches('/')))
            .json(payload)
            .timeout(self.settings.webhook_timeout)
            .send()
            .await
            .map_err(|e| OrchestratorError::WebhookForward(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OrchestratorError::WebhookForward(format!(
                "program answered {}",
                status
            )));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| OrchestratorError::WebhookForward(e.to_string()))
    }
}
