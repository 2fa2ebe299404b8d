// ABOUTME: Docker provider implementation for per-project sandboxes
// ABOUTME: Uses bollard to run one container per sandbox with a published app port

use super::{
    BackgroundProcess, ExecResult, OutputChunk, OutputStream, Provider, ProviderError, Result,
    SandboxConfig, SandboxInfo, SandboxStatus, StreamType,
};
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
        UploadToContainerOptions,
    },
    exec::{CreateExecOptions, StartExecResults},
    image::CreateImageOptions,
    Docker,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

const LABEL_PREFIX: &str = "voxcraft.sandbox";

/// Client timeout for exec streams that back long-running servers.
/// The default client timeout would tear the server down with the stream.
const BACKGROUND_STREAM_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24 * 365);

pub struct DockerProvider {
    client: Docker,
    /// Host name under which published ports are reachable
    public_host: String,
    /// Cache of successfully pulled images to avoid redundant pulls
    image_cache: Arc<RwLock<HashMap<String, chrono::DateTime<chrono::Utc>>>>,
    /// Timeout for image pull operations (default: 10 minutes)
    pull_timeout: Duration,
}

impl DockerProvider {
    /// Connect to the local Docker daemon
    pub fn new(public_host: impl Into<String>) -> Result<Self> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;

        Ok(Self::with_client(client, public_host))
    }

    /// Create with a specific Docker connection
    pub fn with_client(client: Docker, public_host: impl Into<String>) -> Self {
        Self {
            client,
            public_host: public_host.into(),
            image_cache: Arc::new(RwLock::new(HashMap::new())),
            pull_timeout: Duration::from_secs(600),
        }
    }

    /// Convert our config to bollard config
    fn to_bollard_config(&self, config: &SandboxConfig) -> Config<String> {
        let mut labels = config.labels.clone();
        labels.insert(format!("{}.managed", LABEL_PREFIX), "true".to_string());
        labels.insert(format!("{}.name", LABEL_PREFIX), config.name.clone());
        labels.insert(
            format!("{}.app_port", LABEL_PREFIX),
            config.app_port.to_string(),
        );

        let container_port = format!("{}/tcp", config.app_port);
        let exposed_ports = HashMap::from([(container_port.clone(), HashMap::new())]);

        // Empty host port lets the daemon pick a free ephemeral port
        let port_bindings = HashMap::from([(
            container_port,
            Some(vec![bollard::models::PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(String::new()),
            }]),
        )]);

        let env: Vec<String> = config
            .env_vars
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let host_config = bollard::models::HostConfig {
            port_bindings: Some(port_bindings),
            extra_hosts: Some(vec!["host.docker.internal:host-gateway".to_string()]),
            ..Default::default()
        };

        // The container only lives as long as this sleep, which gives every
        // sandbox a provider-side expiry independent of the orchestrator.
        let cmd = vec![
            "sleep".to_string(),
            config.lifetime.as_secs().max(1).to_string(),
        ];

        Config {
            image: Some(config.image.clone()),
            cmd: Some(cmd),
            env: Some(env),
            working_dir: Some(config.working_dir.clone()),
            labels: Some(labels),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    /// Convert bollard container status to our status
    fn convert_status(state: &str) -> SandboxStatus {
        match state.to_lowercase().as_str() {
            "created" => SandboxStatus::Creating,
            "running" | "restarting" => SandboxStatus::Running,
            "paused" => SandboxStatus::Paused,
            "exited" | "removing" => SandboxStatus::Stopped,
            "dead" => SandboxStatus::Dead,
            _ => SandboxStatus::Error(format!("Unknown status: {}", state)),
        }
    }

    fn map_error(sandbox_id: &str, e: bollard::errors::Error) -> ProviderError {
        match e {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            } => ProviderError::NotFound(sandbox_id.to_string()),
            other => ProviderError::SandboxError(other.to_string()),
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(ProviderError::ImageError(e.to_string())),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        {
            let cache = self.image_cache.read().await;
            if cache.contains_key(image) && self.image_exists(image).await? {
                debug!("Image {} found in cache, skipping pull", image);
                return Ok(());
            }
        }

        if self.image_exists(image).await? {
            self.image_cache
                .write()
                .await
                .insert(image.to_string(), chrono::Utc::now());
            return Ok(());
        }

        info!("Pulling image: {} (timeout: {:?})", image, self.pull_timeout);

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let stream = self.client.create_image(Some(options), None, None);

        let result = tokio::time::timeout(self.pull_timeout, async {
            let mut stream = stream;
            while let Some(result) = stream.next().await {
                match result {
                    Ok(progress) => {
                        if let Some(error) = progress.error {
                            return Err(ProviderError::ImageError(format!(
                                "Failed to pull image {}: {}",
                                image, error
                            )));
                        }
                    }
                    Err(e) => {
                        return Err(ProviderError::ImageError(format!(
                            "Failed to pull image {}: {}",
                            image, e
                        )));
                    }
                }
            }
            Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => {
                self.image_cache
                    .write()
                    .await
                    .insert(image.to_string(), chrono::Utc::now());
                info!("Pulled image: {}", image);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ProviderError::Timeout(self.pull_timeout)),
        }
    }

    /// Resolve the published host port for the sandbox's app port
    fn endpoint_from_inspect(
        &self,
        inspect: &bollard::models::ContainerInspectResponse,
    ) -> Option<String> {
        let app_port = inspect
            .config
            .as_ref()
            .and_then(|c| c.labels.as_ref())
            .and_then(|labels| labels.get(&format!("{}.app_port", LABEL_PREFIX)))?;

        let host_port = inspect
            .network_settings
            .as_ref()
            .and_then(|ns| ns.ports.as_ref())
            .and_then(|ports| ports.get(&format!("{}/tcp", app_port)))
            .and_then(|bindings| bindings.as_ref())
            .and_then(|bindings| bindings.first())
            .and_then(|binding| binding.host_port.clone())
            .filter(|port| !port.is_empty())?;

        Some(format!("http://{}:{}", self.public_host, host_port))
    }
}

#[async_trait]
impl Provider for DockerProvider {
    async fn is_available(&self) -> Result<bool> {
        match self.client.ping().await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Docker not available: {}", e);
                Ok(false)
            }
        }
    }

    async fn create_sandbox(&self, config: &SandboxConfig) -> Result<SandboxInfo> {
        info!("Creating sandbox container: {}", config.name);

        self.pull_image(&config.image).await?;

        let options = CreateContainerOptions {
            name: config.name.clone(),
            platform: None,
        };

        let container = self
            .client
            .create_container(Some(options), self.to_bollard_config(config))
            .await
            .map_err(|e| ProviderError::SandboxError(e.to_string()))?;

        debug!("Created container: {}", container.id);

        self.client
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| ProviderError::SandboxError(e.to_string()))?;

        self.get_sandbox_info(&container.id).await
    }

    async fn get_sandbox_info(&self, sandbox_id: &str) -> Result<SandboxInfo> {
        let inspect = self
            .client
            .inspect_container(sandbox_id, None)
            .await
            .map_err(|e| Self::map_error(sandbox_id, e))?;

        let status = inspect
            .state
            .as_ref()
            .and_then(|state| state.status.as_ref())
            .map(|s| Self::convert_status(s.as_ref()))
            .unwrap_or_else(|| SandboxStatus::Error("Container has no state".to_string()));

        let created_at = inspect
            .created
            .as_ref()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(chrono::Utc::now);

        Ok(SandboxInfo {
            id: inspect.id.clone().unwrap_or_else(|| sandbox_id.to_string()),
            endpoint: self.endpoint_from_inspect(&inspect),
            status,
            created_at,
        })
    }

    async fn kill_sandbox(&self, sandbox_id: &str) -> Result<()> {
        info!("Removing sandbox container: {}", sandbox_id);

        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        self.client
            .remove_container(sandbox_id, Some(options))
            .await
            .map_err(|e| Self::map_error(sandbox_id, e))
    }

    async fn exec_command(
        &self,
        sandbox_id: &str,
        command: Vec<String>,
        timeout: Duration,
    ) -> Result<ExecResult> {
        debug!("Executing in {}: {:?}", sandbox_id, command);

        let run = async {
            let exec = self
                .client
                .create_exec(
                    sandbox_id,
                    CreateExecOptions {
                        cmd: Some(command),
                        attach_stdout: Some(true),
                        attach_stderr: Some(true),
                        ..Default::default()
                    },
                )
                .await
                .map_err(|e| Self::map_error(sandbox_id, e))?;

            let mut stdout = Vec::new();
            let mut stderr = Vec::new();

            match self
                .client
                .start_exec(&exec.id, None)
                .await
                .map_err(|e| Self::map_error(sandbox_id, e))?
            {
                StartExecResults::Attached { mut output, .. } => {
                    while let Some(msg) = output.next().await {
                        match msg {
                            Ok(LogOutput::StdOut { message }) => {
                                stdout.extend_from_slice(&message)
                            }
                            Ok(LogOutput::StdErr { message }) => {
                                stderr.extend_from_slice(&message)
                            }
                            Ok(LogOutput::Console { message }) => {
                                stdout.extend_from_slice(&message)
                            }
                            Ok(_) => {}
                            Err(e) => return Err(ProviderError::SandboxError(e.to_string())),
                        }
                    }
                }
                StartExecResults::Detached => {
                    return Err(ProviderError::SandboxError(
                        "Exec was detached unexpectedly".to_string(),
                    ))
                }
            }

            let inspect = self
                .client
                .inspect_exec(&exec.id)
                .await
                .map_err(|e| ProviderError::SandboxError(e.to_string()))?;

            Ok(ExecResult {
                exit_code: inspect.exit_code.unwrap_or(0),
                stdout,
                stderr,
            })
        };

        tokio::time::timeout(timeout, run)
            .await
            .map_err(|_| ProviderError::Timeout(timeout))?
    }

    async fn write_file(&self, sandbox_id: &str, path: &str, contents: &[u8]) -> Result<()> {
        let path_obj = std::path::Path::new(path);
        let (parent, file_name) = match (path_obj.parent(), path_obj.file_name()) {
            (Some(parent), Some(name)) if path_obj.is_absolute() => (
                parent.to_string_lossy().to_string(),
                name.to_string_lossy().to_string(),
            ),
            _ => {
                return Err(ProviderError::ConfigError(format!(
                    "Sandbox file path must be absolute: {}",
                    path
                )))
            }
        };

        let mkdir = self
            .exec_command(
                sandbox_id,
                vec!["mkdir".to_string(), "-p".to_string(), parent.clone()],
                Duration::from_secs(10),
            )
            .await?;
        if !mkdir.success() {
            return Err(ProviderError::SandboxError(format!(
                "Failed to create {}: {}",
                parent,
                mkdir.output_tail(5)
            )));
        }

        let tar_data = tar_single_file(&file_name, contents)
            .map_err(|e| ProviderError::InternalError(e.to_string()))?;

        let options = UploadToContainerOptions {
            path: parent,
            ..Default::default()
        };

        self.client
            .upload_to_container(sandbox_id, Some(options), tar_data.into())
            .await
            .map_err(|e| Self::map_error(sandbox_id, e))
    }

    async fn spawn_background(
        &self,
        sandbox_id: &str,
        command: Vec<String>,
        working_dir: &str,
    ) -> Result<BackgroundProcess> {
        info!("Launching background process in {}: {:?}", sandbox_id, command);

        let stream_client = self.client.clone().with_timeout(BACKGROUND_STREAM_TIMEOUT);

        let exec = stream_client
            .create_exec(
                sandbox_id,
                CreateExecOptions {
                    cmd: Some(command),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    working_dir: Some(working_dir.to_string()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Self::map_error(sandbox_id, e))?;

        let output = match stream_client
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| Self::map_error(sandbox_id, e))?
        {
            StartExecResults::Attached { output, .. } => output,
            StartExecResults::Detached => {
                return Err(ProviderError::SandboxError(
                    "Exec was detached unexpectedly".to_string(),
                ))
            }
        };

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let exec_id = exec.id.clone();

        tokio::spawn(async move {
            // Keep the client alive for as long as the stream is read
            let _client = stream_client;
            let mut stream = output;
            while let Some(result) = stream.next().await {
                let (stream_type, data) = match result {
                    Ok(LogOutput::StdOut { message }) => (StreamType::Stdout, message.to_vec()),
                    Ok(LogOutput::StdErr { message }) => (StreamType::Stderr, message.to_vec()),
                    Ok(LogOutput::Console { message }) => (StreamType::Stdout, message.to_vec()),
                    Ok(_) => continue,
                    Err(e) => {
                        error!("Background exec {} stream error: {}", exec_id, e);
                        break;
                    }
                };

                let chunk = OutputChunk {
                    timestamp: chrono::Utc::now(),
                    stream: stream_type,
                    data,
                };

                if tx.send(chunk).is_err() {
                    break; // Receiver dropped
                }
            }
            debug!("Background exec {} output closed", exec_id);
        });

        Ok(BackgroundProcess {
            process_id: exec.id,
            output: OutputStream { receiver: rx },
        })
    }
}

/// Build an in-memory tar archive holding one regular file
fn tar_single_file(name: &str, contents: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);

    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(&mut header, name, contents)?;
    builder.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::API_DEFAULT_VERSION;
    use std::io::Read;

    fn test_config() -> SandboxConfig {
        SandboxConfig {
            name: "voxcraft-test".to_string(),
            image: "node:20-slim".to_string(),
            app_port: 3000,
            working_dir: "/app".to_string(),
            lifetime: Duration::from_secs(3600),
            env_vars: HashMap::from([("PROJECT_ID".to_string(), "p1".to_string())]),
            labels: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_sandbox_config_conversion() {
        let client = Docker::connect_with_http("http://127.0.0.1:1", 2, API_DEFAULT_VERSION)
            .expect("http clients connect lazily");
        let provider = DockerProvider::with_client(client, "127.0.0.1");

        let bollard_config = provider.to_bollard_config(&test_config());

        assert_eq!(bollard_config.image, Some("node:20-slim".to_string()));
        assert_eq!(
            bollard_config.cmd,
            Some(vec!["sleep".to_string(), "3600".to_string()])
        );
        let labels = bollard_config.labels.unwrap();
        assert_eq!(labels.get("voxcraft.sandbox.app_port"), Some(&"3000".to_string()));
        assert_eq!(labels.get("voxcraft.sandbox.managed"), Some(&"true".to_string()));
        assert!(bollard_config
            .exposed_ports
            .unwrap()
            .contains_key("3000/tcp"));
        assert_eq!(bollard_config.env, Some(vec!["PROJECT_ID=p1".to_string()]));
    }

    #[test]
    fn test_convert_status() {
        assert_eq!(DockerProvider::convert_status("running"), SandboxStatus::Running);
        assert_eq!(DockerProvider::convert_status("exited"), SandboxStatus::Stopped);
        assert_eq!(DockerProvider::convert_status("dead"), SandboxStatus::Dead);
        assert!(matches!(
            DockerProvider::convert_status("weird"),
            SandboxStatus::Error(_)
        ));
    }

    #[test]
    fn test_tar_single_file() {
        let data = tar_single_file("server.mjs", b"console.log('hi');").unwrap();
        let mut archive = tar::Archive::new(data.as_slice());
        let mut entries = archive.entries().unwrap();
        let mut entry = entries.next().unwrap().unwrap();

        assert_eq!(entry.path().unwrap().to_str(), Some("server.mjs"));
        let mut body = String::new();
        entry.read_to_string(&mut body).unwrap();
        assert_eq!(body, "console.log('hi');");
        assert!(entries.next().is_none());
    }
}
