//! Configuration for the Opflow Server
//!
//! This module contains the configuration types and loading functionality.

use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

use crate::error::{ServerError, ServerResult};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Host to bind to
    #[serde(default = "default_host")]
    pub bind_address: String,

    /// Shared secret the authoring tool must present on uploads
    #[serde(default)]
    pub upload_access_secret: Option<String>,

    /// Wall-clock bound per flow invocation, seconds
    #[serde(default = "default_flow_timeout_secs")]
    pub flow_timeout_secs: u64,

    /// Domain entities exposed to flows through the repository registry
    #[serde(default = "default_entities")]
    pub entities: Vec<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_port() -> u16 {
    8080
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_flow_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_entities() -> Vec<String> {
    [
        "user",
        "company",
        "department",
        "role",
        "customer",
        "customerFollow",
        "material",
        "order",
        "orderMaterial",
        "payment",
        "project",
        "file",
        "dict",
        "log",
    ]
    .iter()
    .map(|name| name.to_string())
    .collect()
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn load() -> ServerResult<Self> {
        // Start with defaults
        let mut config = Self::default();

        // Override from environment variables
        if let Ok(port) = env::var("SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                config.port = port;
            } else {
                warn!("Invalid SERVER_PORT value: {}", port);
            }
        }

        if let Ok(host) = env::var("SERVER_HOST") {
            config.bind_address = host;
        }

        if let Ok(secret) = env::var("UPLOAD_ACCESS_SECRET") {
            config.upload_access_secret = Some(secret);
        }

        if let Ok(timeout) = env::var("FLOW_TIMEOUT_SECS") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                if timeout == 0 {
                    return Err(ServerError::ConfigError(
                        "FLOW_TIMEOUT_SECS must be greater than zero".to_string(),
                    ));
                }
                config.flow_timeout_secs = timeout;
            } else {
                warn!("Invalid FLOW_TIMEOUT_SECS value: {}", timeout);
            }
        }

        if let Ok(entities) = env::var("FLOW_ENTITIES") {
            let parsed: Vec<String> = entities
                .split(',')
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect();
            if parsed.is_empty() {
                warn!("FLOW_ENTITIES is set but empty; keeping defaults");
            } else {
                config.entities = parsed;
            }
        }

        if let Ok(log_level) = env::var("LOG_LEVEL") {
            config.log_level = log_level;
        }

        // Add warnings for missing optional fields
        if config.upload_access_secret.is_none() {
            warn!("No UPLOAD_ACCESS_SECRET provided - the upload endpoint will reject all requests!");
        }

        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_host(),
            upload_access_secret: None,
            flow_timeout_secs: default_flow_timeout_secs(),
            entities: default_entities(),
            log_level: default_log_level(),
        }
    }
}
