//! State machine configuration

use serde::Deserialize;
use std::time::Duration;

/// Timing and behaviour of the observation states
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StateMachineConfig {
    /// Interval between hardware status polls (default: 1 second)
    pub poll_interval_ms: u64,
    /// Time allowed for a slew to reach tracking (default: 10 minutes)
    pub slew_timeout_secs: u64,
    /// Time allowed for the mount to report parked (default: 10 minutes)
    pub park_timeout_secs: u64,
    /// Run a blocking autofocus when pointing at a new target
    pub autofocus_on_pointing: bool,
    /// Precede that autofocus with a coarse pass
    pub autofocus_coarse: bool,
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            slew_timeout_secs: 600,
            park_timeout_secs: 600,
            autofocus_on_pointing: false,
            autofocus_coarse: false,
        }
    }
}

impl StateMachineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn slew_timeout(&self) -> Duration {
        Duration::from_secs(self.slew_timeout_secs)
    }

    pub fn park_timeout(&self) -> Duration {
        Duration::from_secs(self.park_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StateMachineConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.slew_timeout(), Duration::from_secs(600));
        assert!(!config.autofocus_on_pointing);
    }

    #[test]
    fn test_partial_json() {
        let config: StateMachineConfig =
            serde_json::from_str(r#"{"poll_interval_ms": 250, "autofocus_on_pointing": true}"#).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.park_timeout_secs, 600);
        assert!(config.autofocus_on_pointing);
    }
}
