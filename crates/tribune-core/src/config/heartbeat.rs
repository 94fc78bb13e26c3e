use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lifesign configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Name of the signal advertised by the speaker.
    #[serde(default = "default_signal_name")]
    pub signal_name: String,

    /// How often the speaker signals and listeners check, in milliseconds.
    #[serde(default = "default_interval")]
    pub interval_ms: u64,

    /// Age after which a signal no longer counts as alive, in milliseconds.
    #[serde(default = "default_dead_threshold")]
    pub dead_threshold_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            signal_name: default_signal_name(),
            interval_ms: default_interval(),
            dead_threshold_ms: default_dead_threshold(),
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn dead_threshold(&self) -> Duration {
        Duration::from_millis(self.dead_threshold_ms)
    }
}

fn default_signal_name() -> String {
    "speaker-lifesign".to_string()
}

fn default_interval() -> u64 {
    1000
}

fn default_dead_threshold() -> u64 {
    3000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_heartbeat_config() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.signal_name, "speaker-lifesign");
        assert_eq!(config.interval(), Duration::from_secs(1));
        assert_eq!(config.dead_threshold(), Duration::from_secs(3));
    }

    #[test]
    fn test_parse_heartbeat_config() {
        let toml = r#"
            signal_name = "news-lifesign"
            interval_ms = 250
        "#;

        let config: HeartbeatConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.signal_name, "news-lifesign");
        assert_eq!(config.interval_ms, 250);
        assert_eq!(config.dead_threshold_ms, 3000);
    }
}
