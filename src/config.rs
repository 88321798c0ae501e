//! Configuration management for the agent runtime
//!
//! Loads configuration from environment variables (via `.env` + `std::env`).

use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

/// Tool execution isolation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolExecutionMode {
    /// Call the in-process function directly
    #[default]
    Local,
    /// Spawn an ephemeral Podman/Docker container per call
    PodmanSidecar,
}

impl std::str::FromStr for ToolExecutionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "local" => Ok(ToolExecutionMode::Local),
            "podman_sidecar" | "sidecar" | "container" => Ok(ToolExecutionMode::PodmanSidecar),
            _ => Err(Error::Config(format!(
                        "Invalid TOOL_EXECUTION_MODE: {s}. Valid options: local, podman_sidecar"
            ))),
        }
    }
}

/// PostgreSQL database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database connection URL
    pub url: SecretString,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
}

/// Tool sidecar (container) execution configuration
#[derive(Debug, Clone)]
pub struct SidecarConfig {
    /// Execution mode selector
    pub mode: ToolExecutionMode,
    /// Podman/Docker socket, e.g. `unix:///run/podman/podman.sock`
    pub podman_host: String,
    /// Per-call timeout
    pub timeout: Duration,
    /// Container network mode: `none`, `bridge`, `host`, or a named network
    pub network: String,
    /// Image the sidecar container runs (same image as the service, by default)
    pub image: String,
    /// Memory limit passed to the container, e.g. `512m`
    pub memory_limit: String,
}

/// Default LLM call settings that apply when an `LlmConfig` record omits them
#[derive(Debug, Clone)]
pub struct LlmDefaultsConfig {
    /// Default per-call HTTP timeout
    pub timeout: Duration,
    /// Default maximum recursions per task
    pub max_iteration: i32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level filter (passed to `tracing_subscriber::EnvFilter`)
    pub level: String,
    /// Log format: `pretty` or `json`
    pub format: String,
}

/// Auth configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// JWT signing secret
    pub secret_key: SecretString,
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,
    /// Bind port
    pub port: u16,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub sidecar: SidecarConfig,
    pub llm_defaults: LlmDefaultsConfig,
    pub auth: AuthConfig,
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Config {
                server: ServerConfig {
                    host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                    port: std::env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|_| Error::Config("PORT must be a valid u16".to_string()))?,
                },
                database: DatabaseConfig {
                    url: SecretString::from(
                        std::env::var("DATABASE_URL")
                        .unwrap_or_else(|_| "postgres://localhost/agentrun".to_string()),
                    ),
                    max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                    connect_timeout_secs: std::env::var("DATABASE_CONNECT_TIMEOUT")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
                },
                sidecar: SidecarConfig {
                    mode: std::env::var("TOOL_EXECUTION_MODE")
                    .unwrap_or_else(|_| "local".to_string())
                    .parse()?,
                    podman_host: std::env::var("PODMAN_HOST")
                    .unwrap_or_else(|_| "unix:///run/podman/podman.sock".to_string()),
                    timeout: Duration::from_secs(
                        std::env::var("TOOL_SIDECAR_TIMEOUT_SECONDS")
                        .unwrap_or_else(|_| "30".to_string())
                        .parse()
                        .unwrap_or(30),
                    ),
                    network: std::env::var("TOOL_SIDECAR_NETWORK").unwrap_or_else(|_| "none".to_string()),
                    image: std::env::var("TOOL_SIDECAR_IMAGE")
                    .unwrap_or_else(|_| "agentrun-sidecar:latest".to_string()),
                    memory_limit: std::env::var("TOOL_SIDECAR_MEMORY_LIMIT")
                    .unwrap_or_else(|_| "512m".to_string()),
                },
                llm_defaults: LlmDefaultsConfig {
                    timeout: Duration::from_secs(
                        std::env::var("LLM_TIMEOUT_SECONDS")
                        .unwrap_or_else(|_| "90".to_string())
                        .parse()
                        .unwrap_or(90),
                    ),
                    max_iteration: std::env::var("DEFAULT_MAX_ITERATION")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
                },
                auth: AuthConfig {
                    secret_key: SecretString::from(
                        std::env::var("SECRET_KEY").unwrap_or_else(|_| String::new()),
                    ),
                },
                log: LogConfig {
                    level: std::env::var("RUST_LOG")
                    .unwrap_or_else(|_| "info,agentrun=debug".to_string()),
                    format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),
                },
        })
    }

    /// Minimal config for tests and tools that don't need the full environment
    pub fn minimal() -> Self {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: SecretString::from(""),
                max_connections: 5,
                connect_timeout_secs: 30,
            },
            sidecar: SidecarConfig {
                mode: ToolExecutionMode::Local,
                podman_host: "unix:///run/podman/podman.sock".to_string(),
                timeout: Duration::from_secs(30),
                network: "none".to_string(),
                image: "agentrun-sidecar:latest".to_string(),
                memory_limit: "512m".to_string(),
            },
            llm_defaults: LlmDefaultsConfig {
                timeout: Duration::from_secs(90),
                max_iteration: 30,
            },
            auth: AuthConfig {
                secret_key: SecretString::from(""),
            },
            log: LogConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    /// Validate that all required configuration is present. Fatal at startup.
    pub fn validate(&self) -> Result<()> {
        if self.database.url.expose_secret().is_empty() {
            return Err(Error::Config("DATABASE_URL is required".to_string()));
        }
        if self.auth.secret_key.expose_secret().is_empty() {
            return Err(Error::Config("SECRET_KEY is required".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_mode_parsing() {
        assert_eq!(
            "local".parse::<ToolExecutionMode>().unwrap(),
            ToolExecutionMode::Local
        );
        assert_eq!(
            "podman_sidecar".parse::<ToolExecutionMode>().unwrap(),
            ToolExecutionMode::PodmanSidecar
        );
        assert!("nonsense".parse::<ToolExecutionMode>().is_err());
    }

    #[test]
    fn minimal_config_fails_validation() {
        let config = Config::minimal();
        assert!(config.validate().is_err());
    }
}
