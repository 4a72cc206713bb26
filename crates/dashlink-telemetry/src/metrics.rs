//! Prometheus metrics for dashlink.
//!
//! Covers:
//! - Stream connection state and reconnects
//! - Inbound messages, errors and processing latency
//! - Consumer deliveries
//! - Chart sync fan-out
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A failure means a duplicate metric
//! name, which is a startup bug; it only happens during static
//! initialization, never at runtime.

use crate::error::{TelemetryError, TelemetryResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec, register_int_gauge,
    Counter, CounterVec, Encoder, Gauge, GaugeVec, IntGauge, TextEncoder,
};

/// Stream connection state (1 = connected, 0 = disconnected).
pub static WS_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "dashlink_ws_connected",
        "Stream connection state (1=connected)"
    )
    .unwrap()
});

/// Connection state machine current state.
/// Labels: state (disconnected/connecting/connected/reconnecting)
pub static WS_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "dashlink_ws_state",
        "Connection state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Total reconnection attempts.
pub static WS_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dashlink_ws_reconnect_total",
        "Total stream reconnection attempts",
        &["reason"]
    )
    .unwrap()
});

/// Times the reconnect budget ran out.
pub static WS_RECONNECT_EXHAUSTED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "dashlink_ws_reconnect_exhausted_total",
        "Times the reconnect attempt budget was exhausted"
    )
    .unwrap()
});

/// Data messages accepted per channel.
pub static MESSAGES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dashlink_messages_total",
        "Data messages accepted",
        &["channel"]
    )
    .unwrap()
});

/// Message errors.
/// Labels: kind (malformed/provider)
pub static MESSAGE_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dashlink_message_errors_total",
        "Malformed frames and provider error events",
        &["kind"]
    )
    .unwrap()
});

/// Moving average of message processing time in milliseconds.
pub static PROCESSING_LATENCY_MS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "dashlink_processing_latency_ms",
        "Exponential moving average of message processing time in milliseconds"
    )
    .unwrap()
});

/// Updates delivered to consumers per channel.
pub static DELIVERIES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dashlink_deliveries_total",
        "Updates delivered to consumers",
        &["channel"]
    )
    .unwrap()
});

/// Consumer update failures.
pub static DELIVERY_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dashlink_delivery_errors_total",
        "Consumer update failures",
        &["consumer"]
    )
    .unwrap()
});

/// Active stream subscriptions.
pub static ACTIVE_SUBSCRIPTIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "dashlink_active_subscriptions",
        "Active stream subscriptions"
    )
    .unwrap()
});

/// Sync operations applied to target charts, per mode.
pub static SYNC_OPERATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dashlink_sync_operations_total",
        "Sync operations applied to target charts",
        &["mode"]
    )
    .unwrap()
});

/// Chart setter failures, per mode.
pub static SYNC_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dashlink_sync_errors_total",
        "Chart setter failures during sync",
        &["mode"]
    )
    .unwrap()
});

/// Crosshair fan-outs.
pub static CROSSHAIR_SYNCS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "dashlink_crosshair_syncs_total",
        "Immediate crosshair fan-outs"
    )
    .unwrap()
});

/// Registered charts.
pub static SYNC_CHARTS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("dashlink_sync_charts", "Registered charts").unwrap()
});

const WS_STATES: [&str; 4] = ["disconnected", "connecting", "connected", "reconnecting"];

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    pub fn ws_connected() {
        WS_CONNECTED.set(1.0);
    }

    pub fn ws_disconnected() {
        WS_CONNECTED.set(0.0);
    }

    /// Set the active connection state; all others go to 0.
    pub fn ws_state_set(state: &str) {
        for s in WS_STATES {
            WS_STATE.with_label_values(&[s]).set(0.0);
        }
        WS_STATE.with_label_values(&[state]).set(1.0);
    }

    pub fn ws_reconnect(reason: &str) {
        WS_RECONNECT_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn ws_reconnect_exhausted() {
        WS_RECONNECT_EXHAUSTED_TOTAL.inc();
    }

    pub fn message_received(channel: &str) {
        MESSAGES_TOTAL.with_label_values(&[channel]).inc();
    }

    pub fn message_error(kind: &str) {
        MESSAGE_ERRORS_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn processing_latency(latency_ms: f64) {
        PROCESSING_LATENCY_MS.set(latency_ms);
    }

    pub fn delivery(channel: &str) {
        DELIVERIES_TOTAL.with_label_values(&[channel]).inc();
    }

    pub fn delivery_error(consumer: &str) {
        DELIVERY_ERRORS_TOTAL.with_label_values(&[consumer]).inc();
    }

    pub fn active_subscriptions(count: usize) {
        ACTIVE_SUBSCRIPTIONS.set(count as i64);
    }

    pub fn sync_applied(mode: &str, targets: usize) {
        SYNC_OPERATIONS_TOTAL
            .with_label_values(&[mode])
            .inc_by(targets as f64);
    }

    pub fn sync_error(mode: &str) {
        SYNC_ERRORS_TOTAL.with_label_values(&[mode]).inc();
    }

    pub fn crosshair_synced() {
        CROSSHAIR_SYNCS_TOTAL.inc();
    }

    pub fn sync_charts(count: usize) {
        SYNC_CHARTS.set(count as i64);
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn encode() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}
