// ABOUTME: Registry of live sandbox handles keyed by project
// ABOUTME: Reconnects to remote sandboxes through persisted external ids after restarts

use crate::providers::{
    BackgroundProcess, ExecResult, Provider, ProviderError, Result as ProviderResult,
};
use crate::store::ProjectStore;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// In-process reference to one remote sandbox
#[derive(Clone)]
pub struct SandboxHandle {
    pub project_id: String,
    pub external_id: String,
    pub endpoint: Option<String>,
    provider: Arc<dyn Provider>,
}

impl fmt::Debug for SandboxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxHandle")
            .field("project_id", &self.project_id)
            .field("external_id", &self.external_id)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl SandboxHandle {
    pub fn new(
        project_id: impl Into<String>,
        external_id: impl Into<String>,
        endpoint: Option<String>,
        provider: Arc<dyn Provider>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            external_id: external_id.into(),
            endpoint,
            provider,
        }
    }

    /// Run a no-op command; any failure or timeout counts as dead
    pub async fn is_alive(&self, timeout: Duration) -> bool {
        match self.exec(&["true"], timeout).await {
            Ok(result) if result.success() => true,
            Ok(result) => {
                debug!(
                    "Liveness check for {} exited with {}",
                    self.external_id, result.exit_code
                );
                false
            }
            Err(e) => {
                debug!("Liveness check for {} failed: {}", self.external_id, e);
                false
            }
        }
    }

    pub async fn exec(&self, command: &[&str], timeout: Duration) -> ProviderResult<ExecResult> {
        let command = command.iter().map(|s| s.to_string()).collect();
        self.provider
            .exec_command(&self.external_id, command, timeout)
            .await
    }

    pub async fn write_file(&self, path: &str, contents: &[u8]) -> ProviderResult<()> {
        self.provider
            .write_file(&self.external_id, path, contents)
            .await
    }

    pub async fn spawn_background(
        &self,
        command: &[&str],
        working_dir: &str,
    ) -> ProviderResult<BackgroundProcess> {
        let command = command.iter().map(|s| s.to_string()).collect();
        self.provider
            .spawn_background(&self.external_id, command, working_dir)
            .await
    }

    pub async fn kill(&self) -> ProviderResult<()> {
        self.provider.kill_sandbox(&self.external_id).await
    }
}

/// Why a project has no usable handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detached {
    /// No external id is known for the project
    NoId,
    /// The provider reports the sandbox missing or not running
    Gone,
    /// The provider could not be asked; the sandbox may still exist
    Unreachable(String),
}

/// Live handles plus the external-id cache in front of the project store
pub struct SandboxRegistry {
    provider: Arc<dyn Provider>,
    store: Arc<dyn ProjectStore>,
    live: RwLock<HashMap<String, SandboxHandle>>,
    external_ids: RwLock<HashMap<String, String>>,
    liveness_timeout: Duration,
}

impl SandboxRegistry {
    pub fn new(
        provider: Arc<dyn Provider>,
        store: Arc<dyn ProjectStore>,
        liveness_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            store,
            live: RwLock::new(HashMap::new()),
            external_ids: RwLock::new(HashMap::new()),
            liveness_timeout,
        }
    }

    /// Find a usable handle for `project_id`, or `None` for any [`Detached`]
    /// reason.
    pub async fn resolve(&self, project_id: &str, hint: Option<&str>) -> Option<SandboxHandle> {
        self.attach(project_id, hint).await.ok()
    }

    /// Find a usable handle for `project_id`.
    ///
    /// A cached handle is verified with a no-op command and evicted if dead.
    /// Otherwise the external id is taken from `hint`, the id cache or the
    /// store, in that order, and the sandbox is attached if the provider
    /// reports it running. Without any id this fails with
    /// [`Detached::NoId`] without touching the provider.
    pub async fn attach(
        &self,
        project_id: &str,
        hint: Option<&str>,
    ) -> Result<SandboxHandle, Detached> {
        let cached = self.live.read().await.get(project_id).cloned();
        if let Some(handle) = cached {
            if handle.is_alive(self.liveness_timeout).await {
                return Ok(handle);
            }
            info!(
                "Evicting stale handle for project {} ({})",
                project_id, handle.external_id
            );
            self.evict(project_id).await;
        }

        let (external_id, persisted_endpoint) = match self.lookup_id(project_id, hint).await {
            Some(found) => found,
            None => {
                debug!("No sandbox id known for project {}", project_id);
                return Err(Detached::NoId);
            }
        };

        let info = match self.provider.get_sandbox_info(&external_id).await {
            Ok(info) => info,
            Err(ProviderError::NotFound(_)) => {
                info!(
                    "Sandbox {} for project {} no longer exists",
                    external_id, project_id
                );
                return Err(Detached::Gone);
            }
            Err(e) => {
                warn!(
                    "Could not attach to sandbox {} for project {}: {}",
                    external_id, project_id, e
                );
                return Err(Detached::Unreachable(e.to_string()));
            }
        };

        if !info.status.is_running() {
            info!(
                "Sandbox {} for project {} is not running ({:?})",
                external_id, project_id, info.status
            );
            return Err(Detached::Gone);
        }

        let endpoint = info.endpoint.or(persisted_endpoint);
        let handle = SandboxHandle::new(
            project_id,
            external_id.clone(),
            endpoint.clone(),
            self.provider.clone(),
        );
        self.install(handle.clone()).await;

        // Keep the durable record in step with what we attached to
        let persisted = self.store.get(project_id).await.ok().flatten();
        let stale = persisted.map_or(true, |r| {
            r.external_sandbox_id.as_deref() != Some(external_id.as_str())
                || r.public_endpoint != endpoint
        });
        if stale {
            if let Err(e) = self
                .store
                .set_sandbox(project_id, &external_id, endpoint.as_deref())
                .await
            {
                warn!("Failed to persist sandbox id for {}: {}", project_id, e);
            }
        }

        info!(
            "Reconnected project {} to sandbox {}",
            project_id, external_id
        );
        Ok(handle)
    }

    async fn lookup_id(
        &self,
        project_id: &str,
        hint: Option<&str>,
    ) -> Option<(String, Option<String>)> {
        if let Some(id) = hint.filter(|h| !h.is_empty()) {
            return Some((id.to_string(), None));
        }

        if let Some(id) = self.external_ids.read().await.get(project_id).cloned() {
            return Some((id, None));
        }

        match self.store.get(project_id).await {
            Ok(Some(record)) => record
                .external_sandbox_id
                .map(|id| (id, record.public_endpoint)),
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to read sandbox id for {}: {}", project_id, e);
                None
            }
        }
    }

    /// Make `handle` the project's live handle and cache its id
    pub async fn install(&self, handle: SandboxHandle) {
        self.external_ids
            .write()
            .await
            .insert(handle.project_id.clone(), handle.external_id.clone());
        self.live
            .write()
            .await
            .insert(handle.project_id.clone(), handle);
    }

    /// Drop the live handle but keep the cached id for reconnecting
    pub async fn evict(&self, project_id: &str) -> Option<SandboxHandle> {
        self.live.write().await.remove(project_id)
    }

    /// Drop both the live handle and the cached id
    pub async fn forget(&self, project_id: &str) -> Option<SandboxHandle> {
        self.external_ids.write().await.remove(project_id);
        self.live.write().await.remove(project_id)
    }

    pub async fn live_handle(&self, project_id: &str) -> Option<SandboxHandle> {
        self.live.read().await.get(project_id).cloned()
    }

    pub async fn cached_id(&self, project_id: &str) -> Option<String> {
        self.external_ids.read().await.get(project_id).cloned()
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }
}
