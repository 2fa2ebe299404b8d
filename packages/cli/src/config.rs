// ABOUTME: Process configuration for the orchestrator server loaded from the environment
// ABOUTME: Bind address, database location, Docker public host and code generator settings

use std::net::IpAddr;
use std::num::ParseIntError;
use std::time::Duration;
use thiserror::Error;
use voxcraft_config::constants::*;
use voxcraft_config::env::{parse_env, EnvError};

const DEFAULT_PORT: u16 = 4001;
const DEFAULT_DATABASE_URL: &str = "sqlite://voxcraft.db";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid port number: {0}")]
    InvalidPort(#[from] ParseIntError),
    #[error("Port {0} is out of valid range (1-65535)")]
    PortOutOfRange(u16),
    #[error("Invalid bind host: {0}")]
    InvalidHost(String),
    #[error(transparent)]
    Env(#[from] EnvError),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub database_url: String,
    /// Host name published sandbox ports are reachable on
    pub docker_public_host: String,
    pub codegen_url: Option<String>,
    pub codegen_api_key: Option<String>,
    pub codegen_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port_str = std::env::var(VOXCRAFT_API_PORT)
            .or_else(|_| std::env::var(PORT))
            .unwrap_or_else(|_| DEFAULT_PORT.to_string());
        let port = port_str.trim().parse::<u16>()?;
        if port == 0 {
            return Err(ConfigError::PortOutOfRange(port));
        }

        let host_str = non_empty(VOXCRAFT_API_HOST).unwrap_or_else(|| "127.0.0.1".to_string());
        let host = host_str
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::InvalidHost(host_str.clone()))?;

        let database_url =
            non_empty(VOXCRAFT_DATABASE_URL).unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
        let docker_public_host =
            non_empty(VOXCRAFT_DOCKER_PUBLIC_HOST).unwrap_or_else(|| "localhost".to_string());

        let codegen_timeout = parse_env::<u64>(VOXCRAFT_CODEGEN_TIMEOUT_SECS)?
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(120));

        Ok(Config {
            host,
            port,
            database_url,
            docker_public_host,
            codegen_url: non_empty(VOXCRAFT_CODEGEN_URL),
            codegen_api_key: non_empty(VOXCRAFT_CODEGEN_API_KEY),
            codegen_timeout,
        })
    }
}

fn non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;

    const ALL: &[&str] = &[
        VOXCRAFT_API_PORT,
        PORT,
        VOXCRAFT_API_HOST,
        VOXCRAFT_DATABASE_URL,
        VOXCRAFT_DOCKER_PUBLIC_HOST,
        VOXCRAFT_CODEGEN_URL,
        VOXCRAFT_CODEGEN_API_KEY,
        VOXCRAFT_CODEGEN_TIMEOUT_SECS,
    ];

    fn clear() {
        for name in ALL {
            std::env::remove_var(name);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear();
        let config = Config::from_env().expect("defaults are valid");

        assert_eq!(config.port, 4001);
        assert_eq!(config.host.to_string(), "127.0.0.1");
        assert_eq!(config.database_url, "sqlite://voxcraft.db");
        assert_eq!(config.docker_public_host, "localhost");
        assert!(config.codegen_url.is_none());
        assert_eq!(config.codegen_timeout, Duration::from_secs(120));
    }

    #[test]
    #[serial]
    fn test_legacy_port_and_overrides() {
        clear();
        std::env::set_var(PORT, "5050");
        std::env::set_var(VOXCRAFT_API_HOST, "0.0.0.0");
        std::env::set_var(VOXCRAFT_CODEGEN_URL, "http://codegen:8080");
        std::env::set_var(VOXCRAFT_CODEGEN_API_KEY, "  ");

        let config = Config::from_env().expect("valid config");
        assert_eq!(config.port, 5050);
        assert_eq!(config.host.to_string(), "0.0.0.0");
        assert_eq!(config.codegen_url.as_deref(), Some("http://codegen:8080"));
        assert!(config.codegen_api_key.is_none());

        std::env::set_var(VOXCRAFT_API_PORT, "6060");
        assert_eq!(Config::from_env().expect("valid config").port, 6060);
        clear();
    }

    #[test]
    #[serial]
    fn test_invalid_values_rejected() {
        clear();
        std::env::set_var(VOXCRAFT_API_PORT, "0");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::PortOutOfRange(0))
        ));

        std::env::set_var(VOXCRAFT_API_PORT, "http");
        assert!(matches!(Config::from_env(), Err(ConfigError::InvalidPort(_))));

        clear();
        std::env::set_var(VOXCRAFT_API_HOST, "not a host");
        assert!(matches!(Config::from_env(), Err(ConfigError::InvalidHost(_))));

        clear();
        std::env::set_var(VOXCRAFT_CODEGEN_TIMEOUT_SECS, "soon");
        assert!(matches!(Config::from_env(), Err(ConfigError::Env(_))));
        clear();
    }
}
