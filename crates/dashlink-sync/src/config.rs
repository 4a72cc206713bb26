//! Synchronizer configuration.

use dashlink_core::SyncModes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Global sync switch at startup.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Flush tick for batched operations (~60 fps).
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// How often a `SyncStats` event is emitted.
    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,
    /// Mode flags for charts registered without explicit flags.
    #[serde(default)]
    pub default_modes: SyncModes,
}

fn default_enabled() -> bool {
    true
}

fn default_flush_interval_ms() -> u64 {
    16
}

fn default_stats_interval_ms() -> u64 {
    5_000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            flush_interval_ms: default_flush_interval_ms(),
            stats_interval_ms: default_stats_interval_ms(),
            default_modes: SyncModes::default(),
        }
    }
}

impl SyncConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    /// Describe the first invalid setting, if any.
    pub fn validation_error(&self) -> Option<String> {
        if self.flush_interval_ms == 0 {
            return Some("sync.flush_interval_ms must be positive".to_string());
        }
        if self.stats_interval_ms == 0 {
            return Some("sync.stats_interval_ms must be positive".to_string());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert!(config.enabled);
        assert_eq!(config.flush_interval(), Duration::from_millis(16));
        assert!(!config.default_modes.data_range);
        assert!(config.validation_error().is_none());
    }

    #[test]
    fn test_partial_deserialize() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"enabled": false, "default_modes": {"crosshair": false}}"#)
                .unwrap();
        assert!(!config.enabled);
        assert_eq!(config.flush_interval_ms, 16);
        assert!(!config.default_modes.crosshair);
        assert!(config.default_modes.time);
    }
}
