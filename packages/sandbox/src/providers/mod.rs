// ABOUTME: Provider trait for the external sandbox provisioning service
// ABOUTME: Defines the sandbox lifecycle, command execution and background process interface

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

pub mod docker;

pub use docker::DockerProvider;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Sandbox not found: {0}")]
    NotFound(String),

    #[error("Sandbox error: {0}")]
    SandboxError(String),

    #[error("Image error: {0}")]
    ImageError(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Configuration for provisioning a new sandbox
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub name: String,
    pub image: String,
    /// Port the deployed program listens on inside the sandbox
    pub app_port: u16,
    pub working_dir: String,
    /// Provider-side expiry; the sandbox is reclaimed after this long
    pub lifetime: Duration,
    pub env_vars: HashMap<String, String>,
    pub labels: HashMap<String, String>,
}

/// Provider-side view of a sandbox
#[derive(Debug, Clone)]
pub struct SandboxInfo {
    pub id: String,
    pub status: SandboxStatus,
    /// Externally reachable base URL of the app port, if published
    pub endpoint: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SandboxStatus {
    Creating,
    Running,
    Paused,
    Stopped,
    Dead,
    Error(String),
}

impl SandboxStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, SandboxStatus::Running)
    }
}

/// Result of a command run to completion inside a sandbox
#[derive(Debug)]
pub struct ExecResult {
    pub exit_code: i64,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last non-empty lines of combined output, for log messages
    pub fn output_tail(&self, max_lines: usize) -> String {
        let stdout = String::from_utf8_lossy(&self.stdout);
        let stderr = String::from_utf8_lossy(&self.stderr);
        let lines: Vec<&str> = stdout
            .lines()
            .chain(stderr.lines())
            .filter(|l| !l.trim().is_empty())
            .collect();
        let start = lines.len().saturating_sub(max_lines);
        lines[start..].join("\n")
    }
}

/// Stream output from a background process
pub struct OutputStream {
    pub receiver: tokio::sync::mpsc::UnboundedReceiver<OutputChunk>,
}

#[derive(Debug, Clone)]
pub struct OutputChunk {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub stream: StreamType,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Stdout,
    Stderr,
}

/// A detached process running inside a sandbox.
///
/// Returned as soon as the launch is confirmed. Output keeps arriving on
/// `output` until the process exits; the channel closes afterwards.
pub struct BackgroundProcess {
    pub process_id: String,
    pub output: OutputStream,
}

/// Provider trait for sandbox backends
#[async_trait]
pub trait Provider: Send + Sync {
    /// Check if the provider is reachable and configured correctly
    async fn is_available(&self) -> Result<bool>;

    /// Provision and start a new sandbox
    async fn create_sandbox(&self, config: &SandboxConfig) -> Result<SandboxInfo>;

    /// Attach to an existing sandbox by its external id
    async fn get_sandbox_info(&self, sandbox_id: &str) -> Result<SandboxInfo>;

    /// Destroy a sandbox
    async fn kill_sandbox(&self, sandbox_id: &str) -> Result<()>;

    /// Run a command to completion, bounded by `timeout`
    async fn exec_command(
        &self,
        sandbox_id: &str,
        command: Vec<String>,
        timeout: Duration,
    ) -> Result<ExecResult>;

    /// Write a file into the sandbox filesystem, creating parent directories
    async fn write_file(&self, sandbox_id: &str, path: &str, contents: &[u8]) -> Result<()>;

    /// Launch a long-running process without waiting for it to exit
    async fn spawn_background(
        &self,
        sandbox_id: &str,
        command: Vec<String>,
        working_dir: &str,
    ) -> Result<BackgroundProcess>;
}
