//! Application configuration.

use crate::error::{AppError, AppResult};
use dashlink_core::{Channel, StreamKey};
use dashlink_stream::StreamConfig;
use dashlink_sync::SyncConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// One configured feed; every target gets a live chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamTarget {
    /// Provider instrument id (e.g. "BTC-USDT").
    pub symbol: String,
    /// Wire channel name (e.g. "tickers", "candle1m").
    pub channel: Channel,
}

impl StreamTarget {
    pub fn stream_key(&self) -> StreamKey {
        StreamKey::new(self.symbol.clone(), self.channel.clone())
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    /// Width of the window a live chart keeps visible, ending at the
    /// latest update.
    #[serde(default = "default_live_window_ms")]
    pub live_window_ms: i64,
    /// How often multiplexer stats are logged and exported.
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
    #[serde(default)]
    pub streams: Vec<StreamTarget>,
}

fn default_live_window_ms() -> i64 {
    15 * 60 * 1000
}

fn default_stats_interval_secs() -> u64 {
    30
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            sync: SyncConfig::default(),
            live_window_ms: default_live_window_ms(),
            stats_interval_secs: default_stats_interval_secs(),
            streams: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config file: {e}")))?;
        Self::from_toml(&content)
    }

    /// Like [`from_file`](Self::from_file), but a missing file yields the
    /// defaults.
    pub fn load(path: &str) -> AppResult<Self> {
        if !Path::new(path).exists() {
            warn!(path, "Config file not found, using defaults");
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }
        Self::from_file(path)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if let Some(error) = self.stream.validation_error() {
            return Err(AppError::Config(error));
        }
        if let Some(error) = self.sync.validation_error() {
            return Err(AppError::Config(error));
        }
        if self.live_window_ms <= 0 {
            return Err(AppError::Config(
                "live_window_ms must be positive".to_string(),
            ));
        }
        if self.stats_interval_secs == 0 {
            return Err(AppError::Config(
                "stats_interval_secs must be positive".to_string(),
            ));
        }
        if let Some(target) = self.streams.iter().find(|t| t.symbol.trim().is_empty()) {
            return Err(AppError::Config(format!(
                "stream target with channel {} has an empty symbol",
                target.channel
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashlink_core::CandleInterval;

    #[test]
    fn test_parse_full_config() {
        let config = AppConfig::from_toml(
            r#"
            live_window_ms = 60000

            [stream]
            url = "ws://localhost:9000"
            batch_size = 5

            [sync]
            flush_interval_ms = 20

            [[streams]]
            symbol = "BTC-USDT"
            channel = "tickers"

            [[streams]]
            symbol = "ETH-USDT"
            channel = "candle1m"
            "#,
        )
        .unwrap();

        assert_eq!(config.stream.url, "ws://localhost:9000");
        assert_eq!(config.stream.batch_size, 5);
        assert_eq!(config.sync.flush_interval_ms, 20);
        assert_eq!(config.live_window_ms, 60_000);
        assert_eq!(config.stats_interval_secs, 30);
        assert_eq!(config.streams.len(), 2);
        assert_eq!(config.streams[0].stream_key().to_string(), "BTC-USDT:tickers");
        assert_eq!(
            config.streams[1].channel,
            Channel::Candle(CandleInterval::OneMinute)
        );
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.stream.flush_interval_ms, 100);
        assert_eq!(config.sync.flush_interval_ms, 16);
        assert!(config.streams.is_empty());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = AppConfig::from_toml("[stream]\nbatch_size = 0\n").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));

        let err = AppConfig::from_toml("live_window_ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("live_window_ms"));

        let err = AppConfig::from_toml("[[streams]]\nsymbol = \" \"\nchannel = \"tickers\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("empty symbol"));
    }

    #[test]
    fn test_shipped_default_config_parses() {
        let config = AppConfig::from_toml(include_str!("../../../config/default.toml")).unwrap();
        assert_eq!(config.streams.len(), 3);
        assert!(!config.sync.default_modes.data_range);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = AppConfig::load("/nonexistent/dashlink.toml").unwrap();
        assert!(config.streams.is_empty());

        let err = AppConfig::from_file("/nonexistent/dashlink.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
