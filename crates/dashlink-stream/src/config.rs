//! Stream multiplexer configuration.

use dashlink_core::InstType;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection, cache and batching settings for the stream layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// WebSocket URL of the market-data provider.
    #[serde(default = "default_url")]
    pub url: String,
    /// Instrument type sent with every subscription.
    #[serde(default)]
    pub inst_type: InstType,
    /// Failed attempts tolerated before giving up.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential backoff (`base × 2^attempt`).
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    /// Cache entries idle longer than this are evicted.
    #[serde(default = "default_cache_timeout_ms")]
    pub cache_timeout_ms: u64,
    /// How often the cache is swept.
    #[serde(default = "default_cache_sweep_interval_ms")]
    pub cache_sweep_interval_ms: u64,
    /// Pending updates kept per stream between flushes.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Flush tick for delivering batched updates.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Idle time before a keep-alive ping is sent.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// A ping without pong for this long fails the session.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    /// Outbound frame buffer.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

fn default_url() -> String {
    "wss://ws.okx.com:8443/ws/v5/public".to_string()
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}

fn default_cache_timeout_ms() -> u64 {
    300_000
}

fn default_cache_sweep_interval_ms() -> u64 {
    60_000
}

fn default_batch_size() -> usize {
    10
}

fn default_flush_interval_ms() -> u64 {
    100
}

fn default_heartbeat_interval_ms() -> u64 {
    25_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

fn default_outbound_buffer() -> usize {
    256
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            inst_type: InstType::default(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            cache_timeout_ms: default_cache_timeout_ms(),
            cache_sweep_interval_ms: default_cache_sweep_interval_ms(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

impl StreamConfig {
    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn cache_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_timeout_ms)
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.cache_sweep_interval_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Describe the first invalid setting, if any.
    pub fn validation_error(&self) -> Option<String> {
        if self.url.trim().is_empty() {
            return Some("stream.url must not be empty".to_string());
        }
        if self.batch_size == 0 {
            return Some("stream.batch_size must be at least 1".to_string());
        }
        if self.flush_interval_ms == 0 {
            return Some("stream.flush_interval_ms must be positive".to_string());
        }
        if self.cache_sweep_interval_ms == 0 {
            return Some("stream.cache_sweep_interval_ms must be positive".to_string());
        }
        if self.heartbeat_interval_ms == 0 {
            return Some("stream.heartbeat_interval_ms must be positive".to_string());
        }
        None
    }
}
