//! Event bridge: stream and sync events to logs and Prometheus metrics.

use dashlink_stream::{MultiplexerStats, StreamEvent};
use dashlink_sync::SyncEvent;
use dashlink_telemetry::Metrics;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Record one multiplexer event.
pub fn record_stream_event(event: &StreamEvent) {
    match event {
        StreamEvent::Connecting => {
            Metrics::ws_state_set("connecting");
            debug!("Connecting to stream provider");
        }
        StreamEvent::Connected { resubscribed } => {
            Metrics::ws_connected();
            Metrics::ws_state_set("connected");
            info!(resubscribed, "Stream connected");
        }
        StreamEvent::Disconnected {
            clean,
            code,
            reason,
        } => {
            Metrics::ws_disconnected();
            Metrics::ws_state_set("disconnected");
            if *clean {
                info!(?code, reason = %reason, "Stream closed");
            } else {
                warn!(?code, reason = %reason, "Stream closed unexpectedly");
            }
        }
        StreamEvent::ConnectionError { message } => {
            Metrics::ws_disconnected();
            warn!(error = %message, "Stream connection error");
        }
        StreamEvent::Reconnecting { attempt, delay_ms } => {
            Metrics::ws_reconnect("retry");
            Metrics::ws_state_set("reconnecting");
            info!(attempt, delay_ms, "Reconnect scheduled");
        }
        StreamEvent::MaxReconnectAttemptsReached { attempts } => {
            Metrics::ws_reconnect_exhausted();
            Metrics::ws_state_set("disconnected");
            error!(attempts, "Reconnect attempts exhausted, waiting for manual reconnect");
        }
        StreamEvent::SubscriptionConfirmed { key } => {
            debug!(key = %key, "Subscription confirmed");
        }
        StreamEvent::ProviderError { code, message } => {
            Metrics::message_error("provider");
            warn!(?code, message = %message, "Provider error");
        }
        StreamEvent::DataReceived { key, .. } => {
            Metrics::message_received(&key.channel.wire_name());
        }
        StreamEvent::ChartUpdated { key, .. } => {
            Metrics::delivery(&key.channel.wire_name());
        }
        StreamEvent::ChartUpdateError {
            consumer_id,
            key,
            error,
        } => {
            Metrics::delivery_error(consumer_id.as_str());
            warn!(consumer = %consumer_id, key = %key, error = %error, "Consumer update failed");
        }
        StreamEvent::MessageError { key, error } => {
            Metrics::message_error("malformed");
            debug!(key = ?key.as_ref().map(ToString::to_string), error = %error, "Message dropped");
        }
    }
}

/// Record one synchronizer event.
pub fn record_sync_event(event: &SyncEvent) {
    match event {
        SyncEvent::ChartRegistered {
            chart_id,
            group_id,
            is_master,
        } => {
            debug!(chart = %chart_id, group = %group_id, master = is_master, "Chart joined group");
        }
        SyncEvent::ChartUnregistered { chart_id, group_id } => {
            debug!(chart = %chart_id, group = %group_id, "Chart left group");
        }
        SyncEvent::CrosshairSynced { targets, .. } => {
            Metrics::crosshair_synced();
            trace!(targets, "Crosshair synced");
        }
        SyncEvent::OperationApplied { mode, targets, .. } => {
            Metrics::sync_applied(mode.as_str(), *targets);
        }
        SyncEvent::SyncError {
            operation,
            chart_id,
            error,
        } => {
            Metrics::sync_error(operation.as_str());
            warn!(chart = %chart_id, operation = %operation, error = %error, "Chart sync failed");
        }
        SyncEvent::MasterChartChanged {
            group_id,
            previous,
            master,
        } => {
            info!(group = %group_id, ?previous, ?master, "Master chart changed");
        }
        SyncEvent::SyncStats(stats) => {
            Metrics::sync_charts(stats.charts);
            debug!(
                flushes = stats.flushes,
                applied = stats.operations_applied,
                skipped = stats.operations_skipped,
                errors = stats.errors,
                crosshair = stats.crosshair_syncs,
                groups = stats.groups,
                "Sync stats"
            );
        }
    }
}

/// Export the gauges derived from a multiplexer snapshot.
pub fn record_multiplexer_stats(stats: &MultiplexerStats) {
    Metrics::active_subscriptions(stats.subscriptions);
    Metrics::processing_latency(stats.avg_latency_ms);
}

/// Forward both buses until `token` is cancelled or both close.
pub async fn run_event_bridge(
    mut stream_rx: broadcast::Receiver<StreamEvent>,
    mut sync_rx: broadcast::Receiver<SyncEvent>,
    token: CancellationToken,
) {
    let mut stream_open = true;
    let mut sync_open = true;

    while stream_open || sync_open {
        tokio::select! {
            () = token.cancelled() => break,
            result = stream_rx.recv(), if stream_open => match result {
                Ok(event) => record_stream_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event bridge lagged behind stream events");
                }
                Err(RecvError::Closed) => stream_open = false,
            },
            result = sync_rx.recv(), if sync_open => match result {
                Ok(event) => record_sync_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event bridge lagged behind sync events");
                }
                Err(RecvError::Closed) => sync_open = false,
            },
        }
    }
    debug!("Event bridge stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashlink_core::{Channel, ChartId, ConsumerId, StreamKey, SyncMode};
    use dashlink_stream::ConsumerError;
    use dashlink_telemetry::metrics::{
        DELIVERY_ERRORS_TOTAL, MESSAGES_TOTAL, SYNC_ERRORS_TOTAL, WS_RECONNECT_EXHAUSTED_TOTAL,
    };
    use std::time::Duration;

    #[test]
    fn test_stream_events_feed_metrics() {
        let key = StreamKey::new("SOL-USDT", Channel::Other("bridge-test".to_string()));
        let before = MESSAGES_TOTAL.with_label_values(&["bridge-test"]).get();
        record_stream_event(&StreamEvent::DataReceived {
            key: key.clone(),
            update_count: 1,
        });
        assert_eq!(
            MESSAGES_TOTAL.with_label_values(&["bridge-test"]).get(),
            before + 1.0
        );

        let before = DELIVERY_ERRORS_TOTAL.with_label_values(&["bridge-consumer"]).get();
        record_stream_event(&StreamEvent::ChartUpdateError {
            consumer_id: ConsumerId::new("bridge-consumer"),
            key,
            error: ConsumerError::Unavailable,
        });
        assert_eq!(
            DELIVERY_ERRORS_TOTAL
                .with_label_values(&["bridge-consumer"])
                .get(),
            before + 1.0
        );

        let before = WS_RECONNECT_EXHAUSTED_TOTAL.get();
        record_stream_event(&StreamEvent::MaxReconnectAttemptsReached { attempts: 3 });
        assert!(WS_RECONNECT_EXHAUSTED_TOTAL.get() >= before + 1.0);
    }

    #[test]
    fn test_sync_error_feeds_metrics() {
        let before = SYNC_ERRORS_TOTAL.with_label_values(&["selection"]).get();
        record_sync_event(&SyncEvent::SyncError {
            operation: SyncMode::Selection,
            chart_id: ChartId::new("c1"),
            error: "boom".to_string(),
        });
        assert!(SYNC_ERRORS_TOTAL.with_label_values(&["selection"]).get() >= before + 1.0);
    }

    #[tokio::test]
    async fn test_bridge_stops_on_cancel() {
        let (stream_tx, stream_rx) = broadcast::channel::<StreamEvent>(8);
        let (_sync_tx, sync_rx) = broadcast::channel::<SyncEvent>(8);
        let token = CancellationToken::new();
        let task = tokio::spawn(run_event_bridge(stream_rx, sync_rx, token.clone()));

        stream_tx.send(StreamEvent::Connecting).unwrap();
        token.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("bridge must stop on cancel")
            .unwrap();
    }

    #[tokio::test]
    async fn test_bridge_stops_when_buses_close() {
        let (stream_tx, stream_rx) = broadcast::channel::<StreamEvent>(8);
        let (sync_tx, sync_rx) = broadcast::channel::<SyncEvent>(8);
        let task = tokio::spawn(run_event_bridge(
            stream_rx,
            sync_rx,
            CancellationToken::new(),
        ));

        drop(stream_tx);
        drop(sync_tx);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("bridge must stop once both buses close")
            .unwrap();
    }
}
