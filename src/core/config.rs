//! Configuration management for the MCP server.
//!
//! This module provides a centralized configuration structure populated
//! from defaults and `MCP_*` environment variables (a `.env` file is read
//! first when present).

use super::transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

/// Main configuration structure for the MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server identification and metadata.
    pub server: ServerConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Transport configuration.
    pub transport: TransportConfig,

    /// Where tool definitions come from.
    pub catalog: CatalogConfig,

    /// External backends the tools rely on.
    pub dependencies: DependenciesConfig,
}

/// Server identification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The name of the server as reported to clients.
    pub name: String,

    /// The version of the server.
    pub version: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "trace").
    pub level: String,

    /// Whether to include timestamps in log output.
    pub with_timestamps: bool,
}

/// Tool catalog configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// YAML file replacing the built-in tool definitions.
    pub definitions_path: Option<PathBuf>,
}

/// External dependency configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependenciesConfig {
    /// Command running the atomistic backend. When unset, tools requiring
    /// `ase` answer with `dependency_unavailable`.
    pub energy_command: Option<String>,
    /// Seconds one backend request may take before the process is killed.
    pub backend_timeout_secs: u64,
}

impl Default for DependenciesConfig {
    fn default() -> Self {
        Self {
            energy_command: None,
            backend_timeout_secs: 300,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                name: "mof-tools".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                with_timestamps: true,
            },
            transport: TransportConfig::default(),
            catalog: CatalogConfig::default(),
            dependencies: DependenciesConfig::default(),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables are expected to be prefixed with `MCP_`.
    /// For example: `MCP_SERVER_NAME`, `MCP_LOG_LEVEL`.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Some(name) = non_empty_var("MCP_SERVER_NAME") {
            config.server.name = name;
        }

        if let Some(level) = non_empty_var("MCP_LOG_LEVEL") {
            config.logging.level = level;
        }

        if let Some(timestamps) = non_empty_var("MCP_LOG_TIMESTAMPS") {
            config.logging.with_timestamps = timestamps.parse().unwrap_or(true);
        }

        // Load transport configuration from environment
        config.transport = TransportConfig::from_env();

        if let Some(path) = non_empty_var("MCP_TOOL_DEFINITIONS") {
            info!("Tool definitions will be read from {}", path);
            config.catalog.definitions_path = Some(PathBuf::from(path));
        }

        if let Some(command) = non_empty_var("MCP_ENERGY_COMMAND") {
            info!("Energy backend configured: {}", command);
            config.dependencies.energy_command = Some(command);
        } else {
            warn!(
                "MCP_ENERGY_COMMAND not set - energy calculations will report \
                 the 'ase' dependency as unavailable"
            );
        }

        if let Some(timeout) = non_empty_var("MCP_BACKEND_TIMEOUT") {
            match timeout.parse::<u64>() {
                Ok(secs) if secs > 0 => config.dependencies.backend_timeout_secs = secs,
                _ => warn!("Ignoring invalid MCP_BACKEND_TIMEOUT '{}'", timeout),
            }
        }

        config
    }
}
