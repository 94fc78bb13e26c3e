mod database;
mod heartbeat;
mod worker;

pub use database::DatabaseConfig;
pub use heartbeat::HeartbeatConfig;
pub use worker::WorkerConfig;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::cluster::NodeId;
use crate::error::{Result, TribuneError};

/// Root configuration for a Tribune node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TribuneConfig {
    /// Node identity.
    #[serde(default)]
    pub node: NodeConfig,

    /// Database configuration.
    pub database: DatabaseConfig,

    /// Worker configuration.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Lifesign configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TribuneConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| TribuneError::Config(format!("Failed to read config file: {}", e)))?;

        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content);

        toml::from_str(&content)
            .map_err(|e| TribuneError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration with defaults.
    pub fn default_with_database_url(url: &str) -> Self {
        Self {
            node: NodeConfig::default(),
            database: DatabaseConfig {
                url: url.to_string(),
                ..Default::default()
            },
            worker: WorkerConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Node identity configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Fixed node ID. A random one is generated when absent.
    pub id: Option<uuid::Uuid>,
}

impl NodeConfig {
    /// The configured node ID, or a fresh one.
    pub fn node_id(&self) -> NodeId {
        self.id.map(NodeId::from_uuid).unwrap_or_default()
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output JSON format.
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Substitute environment variables in the format ${VAR_NAME}.
fn substitute_env_vars(content: &str) -> String {
    let mut result = content.to_string();
    let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static pattern");

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}
