// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Voxcraft

// Server Configuration
pub const VOXCRAFT_API_PORT: &str = "VOXCRAFT_API_PORT";
pub const VOXCRAFT_API_HOST: &str = "VOXCRAFT_API_HOST";
pub const PORT: &str = "PORT"; // Legacy
pub const VOXCRAFT_DATABASE_URL: &str = "VOXCRAFT_DATABASE_URL";

// Sandbox Provisioning
pub const VOXCRAFT_SANDBOX_IMAGE: &str = "VOXCRAFT_SANDBOX_IMAGE";
pub const VOXCRAFT_SANDBOX_LIFETIME_SECS: &str = "VOXCRAFT_SANDBOX_LIFETIME_SECS";
pub const VOXCRAFT_DOCKER_PUBLIC_HOST: &str = "VOXCRAFT_DOCKER_PUBLIC_HOST";

// Deployed Program Layout
pub const VOXCRAFT_APP_PORT: &str = "VOXCRAFT_APP_PORT";
pub const VOXCRAFT_APP_DIR: &str = "VOXCRAFT_APP_DIR";
pub const VOXCRAFT_GENERATION_PROXY_URL: &str = "VOXCRAFT_GENERATION_PROXY_URL";

// Deployment Timeouts
pub const VOXCRAFT_INSTALL_TIMEOUT_SECS: &str = "VOXCRAFT_INSTALL_TIMEOUT_SECS";
pub const VOXCRAFT_LIVENESS_TIMEOUT_SECS: &str = "VOXCRAFT_LIVENESS_TIMEOUT_SECS";
pub const VOXCRAFT_READINESS_ATTEMPTS: &str = "VOXCRAFT_READINESS_ATTEMPTS";
pub const VOXCRAFT_READINESS_INTERVAL_MS: &str = "VOXCRAFT_READINESS_INTERVAL_MS";
pub const VOXCRAFT_SETTLE_DELAY_MS: &str = "VOXCRAFT_SETTLE_DELAY_MS";

// Logs and Health
pub const VOXCRAFT_LOG_CAPACITY: &str = "VOXCRAFT_LOG_CAPACITY";
pub const VOXCRAFT_STATUS_CONCURRENCY: &str = "VOXCRAFT_STATUS_CONCURRENCY";
pub const VOXCRAFT_HEALTH_INTERVAL_SECS: &str = "VOXCRAFT_HEALTH_INTERVAL_SECS";
pub const VOXCRAFT_AUTO_RECOVER: &str = "VOXCRAFT_AUTO_RECOVER";

// Code Generation Service
pub const VOXCRAFT_CODEGEN_URL: &str = "VOXCRAFT_CODEGEN_URL";
pub const VOXCRAFT_CODEGEN_API_KEY: &str = "VOXCRAFT_CODEGEN_API_KEY";
pub const VOXCRAFT_CODEGEN_TIMEOUT_SECS: &str = "VOXCRAFT_CODEGEN_TIMEOUT_SECS";

// Logging
pub const RUST_LOG: &str = "RUST_LOG";
