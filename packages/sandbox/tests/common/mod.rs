// ABOUTME: Shared test helpers for orchestrator integration tests
// ABOUTME: Scriptable in-memory Provider that records every call it receives

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use voxcraft_sandbox::providers::{
    BackgroundProcess, ExecResult, OutputChunk, OutputStream, Provider, ProviderError, Result,
    SandboxConfig, SandboxInfo, SandboxStatus, StreamType,
};
use voxcraft_sandbox::{MemoryProjectStore, Orchestrator, OrchestratorSettings, ProjectStore};

#[derive(Debug, Clone)]
pub struct MockSandbox {
    pub status: SandboxStatus,
    pub endpoint: Option<String>,
    /// Whether commands can run inside the sandbox
    pub alive: bool,
}

#[derive(Default)]
pub struct MockState {
    pub sandboxes: HashMap<String, MockSandbox>,
    pub calls: usize,
    pub execs: Vec<(String, Vec<String>)>,
    pub files: HashMap<(String, String), Vec<u8>>,
    pub spawned: Vec<(String, Vec<String>, String)>,
    pub created: Vec<SandboxConfig>,
    pub killed: Vec<String>,
    pub failing_writes: HashSet<String>,
    pub pkill_exit: i64,
    pub npm_exit: i64,
    pub process_output: Vec<(StreamType, String)>,
    pub next_id: usize,
    pub default_endpoint: Option<String>,
    /// Returned by `get_sandbox_info` for every id while set
    pub info_error: Option<String>,
    /// How long each `npm install` takes
    pub npm_delay: Duration,
    pub npm_running: usize,
    /// Most `npm install` runs seen at once, across all sandboxes
    pub npm_peak: usize,
}

#[derive(Clone)]
pub struct MockProvider {
    state: Arc<Mutex<MockState>>,
}

impl MockProvider {
    /// New sandboxes are published at `endpoint`
    pub fn new(endpoint: Option<String>) -> Self {
        let state = MockState {
            pkill_exit: 1,
            default_endpoint: endpoint,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn with_state<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        let mut state = self.state.lock().expect("mock state poisoned");
        f(&mut state)
    }

    pub fn add_sandbox(&self, id: &str, status: SandboxStatus, endpoint: Option<String>) {
        self.with_state(|s| {
            s.sandboxes.insert(
                id.to_string(),
                MockSandbox {
                    alive: status.is_running(),
                    status,
                    endpoint,
                },
            );
        });
    }

    pub fn set_alive(&self, id: &str, alive: bool) {
        self.with_state(|s| {
            if let Some(sandbox) = s.sandboxes.get_mut(id) {
                sandbox.alive = alive;
            }
        });
    }

    pub fn remove_sandbox(&self, id: &str) {
        self.with_state(|s| {
            s.sandboxes.remove(id);
        });
    }

    pub fn calls(&self) -> usize {
        self.with_state(|s| s.calls)
    }

    pub fn file(&self, id: &str, path: &str) -> Option<String> {
        self.with_state(|s| {
            s.files
                .get(&(id.to_string(), path.to_string()))
                .map(|b| String::from_utf8_lossy(b).to_string())
        })
    }

    /// Commands executed in `id`, joined with spaces
    pub fn commands(&self, id: &str) -> Vec<String> {
        self.with_state(|s| {
            s.execs
                .iter()
                .filter(|(sandbox, _)| sandbox == id)
                .map(|(_, cmd)| cmd.join(" "))
                .collect()
        })
    }

    pub fn set_process_output(&self, lines: &[(StreamType, &str)]) {
        self.with_state(|s| {
            s.process_output = lines
                .iter()
                .map(|(stream, line)| (*stream, format!("{}\n", line)))
                .collect();
        });
    }

    pub fn fail_writes_to(&self, path: &str) {
        self.with_state(|s| {
            s.failing_writes.insert(path.to_string());
        });
    }

    /// Make `get_sandbox_info` fail the way a restarting daemon does
    pub fn set_info_error(&self, error: Option<&str>) {
        self.with_state(|s| s.info_error = error.map(str::to_string));
    }

    pub fn set_npm_delay(&self, delay: Duration) {
        self.with_state(|s| s.npm_delay = delay);
    }

    pub fn npm_peak(&self) -> usize {
        self.with_state(|s| s.npm_peak)
    }

    fn running_sandbox(state: &MockState, id: &str) -> Result<()> {
        match state.sandboxes.get(id) {
            None => Err(ProviderError::NotFound(id.to_string())),
            Some(sandbox) if !sandbox.alive => Err(ProviderError::SandboxError(format!(
                "container {} is not running",
                id
            ))),
            Some(_) => Ok(()),
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn is_available(&self) -> Result<bool> {
        Ok(true)
    }

    async fn create_sandbox(&self, config: &SandboxConfig) -> Result<SandboxInfo> {
        self.with_state(|s| {
            s.calls += 1;
            s.next_id += 1;
            let id = format!("mock-{}", s.next_id);
            s.sandboxes.insert(
                id.clone(),
                MockSandbox {
                    status: SandboxStatus::Running,
                    endpoint: s.default_endpoint.clone(),
                    alive: true,
                },
            );
            s.created.push(config.clone());
            Ok(SandboxInfo {
                id,
                status: SandboxStatus::Running,
                endpoint: s.default_endpoint.clone(),
                created_at: chrono::Utc::now(),
            })
        })
    }

    async fn get_sandbox_info(&self, sandbox_id: &str) -> Result<SandboxInfo> {
        self.with_state(|s| {
            s.calls += 1;
            if let Some(e) = &s.info_error {
                return Err(ProviderError::ConnectionError(e.clone()));
            }
            let sandbox = s
                .sandboxes
                .get(sandbox_id)
                .ok_or_else(|| ProviderError::NotFound(sandbox_id.to_string()))?;
            Ok(SandboxInfo {
                id: sandbox_id.to_string(),
                status: sandbox.status.clone(),
                endpoint: sandbox.endpoint.clone(),
                created_at: chrono::Utc::now(),
            })
        })
    }

    async fn kill_sandbox(&self, sandbox_id: &str) -> Result<()> {
        self.with_state(|s| {
            s.calls += 1;
            s.sandboxes
                .remove(sandbox_id)
                .ok_or_else(|| ProviderError::NotFound(sandbox_id.to_string()))?;
            s.killed.push(sandbox_id.to_string());
            Ok(())
        })
    }

    async fn exec_command(
        &self,
        sandbox_id: &str,
        command: Vec<String>,
        _timeout: Duration,
    ) -> Result<ExecResult> {
        let is_npm = command.first().map(String::as_str) == Some("npm");
        let (result, delay) = self.with_state(|s| {
            s.calls += 1;
            Self::running_sandbox(s, sandbox_id)?;
            s.execs.push((sandbox_id.to_string(), command.clone()));

            let exit_code = match command.first().map(String::as_str) {
                Some("pkill") => s.pkill_exit,
                Some("npm") => s.npm_exit,
                _ => 0,
            };
            if is_npm {
                s.npm_running += 1;
                s.npm_peak = s.npm_peak.max(s.npm_running);
            }
            let result = ExecResult {
                exit_code,
                stdout: Vec::new(),
                stderr: if exit_code > 1 {
                    b"npm ERR! something broke\n".to_vec()
                } else {
                    Vec::new()
                },
            };
            Ok::<_, ProviderError>((result, s.npm_delay))
        })?;

        if is_npm {
            tokio::time::sleep(delay).await;
            self.with_state(|s| s.npm_running -= 1);
        }
        Ok(result)
    }

    async fn write_file(&self, sandbox_id: &str, path: &str, contents: &[u8]) -> Result<()> {
        self.with_state(|s| {
            s.calls += 1;
            Self::running_sandbox(s, sandbox_id)?;
            if s.failing_writes.contains(path) {
                return Err(ProviderError::SandboxError(format!("disk full: {}", path)));
            }
            s.files
                .insert((sandbox_id.to_string(), path.to_string()), contents.to_vec());
            Ok(())
        })
    }

    async fn spawn_background(
        &self,
        sandbox_id: &str,
        command: Vec<String>,
        working_dir: &str,
    ) -> Result<BackgroundProcess> {
        let output = self.with_state(|s| {
            s.calls += 1;
            Self::running_sandbox(s, sandbox_id)?;
            s.spawned
                .push((sandbox_id.to_string(), command, working_dir.to_string()));
            Ok::<_, ProviderError>(s.process_output.clone())
        })?;

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        for (stream, data) in output {
            let _ = tx.send(OutputChunk {
                timestamp: chrono::Utc::now(),
                stream,
                data: data.into_bytes(),
            });
        }

        Ok(BackgroundProcess {
            process_id: format!("proc-{}", sandbox_id),
            output: OutputStream { receiver: rx },
        })
    }
}

/// Settings with delays shrunk for tests
pub fn fast_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        settle_delay: Duration::from_millis(0),
        readiness_attempts: 3,
        readiness_interval: Duration::from_millis(10),
        readiness_attempt_timeout: Duration::from_millis(300),
        status_probe_timeout: Duration::from_millis(300),
        liveness_timeout: Duration::from_secs(1),
        ..OrchestratorSettings::default()
    }
}

pub fn orchestrator(
    provider: &MockProvider,
    store: &Arc<MemoryProjectStore>,
    settings: OrchestratorSettings,
) -> Orchestrator {
    let store: Arc<dyn ProjectStore> = store.clone();
    Orchestrator::new(Arc::new(provider.clone()), store, settings)
}

/// Wait until `condition` holds, polling for up to two seconds
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
