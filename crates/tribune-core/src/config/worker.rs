use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TribuneError};

/// Worker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Interval between broadcasts while speaking, in milliseconds.
    #[serde(default = "default_message_interval")]
    pub message_interval_ms: u64,

    /// Topic the speaker broadcasts on and listeners subscribe to.
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Key of the durable list collecting payloads whose handling failed.
    #[serde(default = "default_error_list")]
    pub error_list: String,

    /// Key of the shared election counter.
    #[serde(default = "default_beacon_key")]
    pub beacon_key: String,

    /// Time-to-live applied to the beacon after a successful claim, in seconds.
    #[serde(default = "default_beacon_ttl")]
    pub beacon_ttl_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            message_interval_ms: default_message_interval(),
            topic: default_topic(),
            error_list: default_error_list(),
            beacon_key: default_beacon_key(),
            beacon_ttl_secs: default_beacon_ttl(),
        }
    }
}

impl WorkerConfig {
    pub fn message_interval(&self) -> Duration {
        Duration::from_millis(self.message_interval_ms)
    }

    pub fn beacon_ttl(&self) -> Duration {
        Duration::from_secs(self.beacon_ttl_secs)
    }

    /// Set a single option by name.
    ///
    /// Returns `Ok(false)` for unrecognized names, which are ignored.
    /// `-` and `_` are interchangeable in names.
    pub fn set(&mut self, name: &str, value: &str) -> Result<bool> {
        match name.replace('-', "_").as_str() {
            "message_interval" | "message_interval_ms" => {
                let ms = parse_u64(name, value)?;
                if ms == 0 {
                    return Err(TribuneError::Config(format!(
                        "{} must be greater than zero",
                        name
                    )));
                }
                self.message_interval_ms = ms;
            }
            "topic" => self.topic = non_empty(name, value)?,
            "errorlist" | "error_list" => self.error_list = non_empty(name, value)?,
            "beacon_key" => self.beacon_key = non_empty(name, value)?,
            "beacon_ttl" | "beacon_ttl_secs" => self.beacon_ttl_secs = parse_u64(name, value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

fn parse_u64(name: &str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| {
        TribuneError::Config(format!("Invalid value for {}: {:?}", name, value))
    })
}

fn non_empty(name: &str, value: &str) -> Result<String> {
    if value.is_empty() {
        return Err(TribuneError::Config(format!("{} cannot be empty", name)));
    }
    Ok(value.to_string())
}

fn default_message_interval() -> u64 {
    500
}

fn default_topic() -> String {
    "speech".to_string()
}

fn default_error_list() -> String {
    "errors-list".to_string()
}

fn default_beacon_key() -> String {
    "speaker-tribune".to_string()
}

fn default_beacon_ttl() -> u64 {
    10
}
