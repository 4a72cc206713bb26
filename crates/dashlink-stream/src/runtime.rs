//! Async drivers for the multiplexer.
//!
//! Three tasks share one cancellation token:
//! - connection loop: session → reconnect decision → backoff
//! - flush loop: delivers batched updates every `flush_interval_ms`
//! - sweep loop: evicts idle cache entries every `cache_sweep_interval_ms`

use crate::config::StreamConfig;
use crate::connection::ConnectionManager;
use crate::multiplexer::StreamMultiplexer;
use crate::reconnect::ReconnectDecision;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Handle to a running stream stack.
pub struct StreamHandle {
    pub multiplexer: Arc<StreamMultiplexer>,
    pub connection: Arc<ConnectionManager>,
    tasks: Vec<JoinHandle<()>>,
}

impl StreamHandle {
    /// Stop every loop and close the session.
    pub fn shutdown(&self) {
        self.connection.shutdown();
    }

    /// Wait for every loop to exit.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Stream task ended abnormally");
            }
        }
    }
}

/// Build the multiplexer over a fresh connection and spawn its loops.
pub fn spawn_stream(config: StreamConfig) -> StreamHandle {
    let connection = Arc::new(ConnectionManager::new(&config));
    let multiplexer = Arc::new(StreamMultiplexer::new(
        config.clone(),
        Arc::new(connection.transport()),
    ));
    let token = connection.shutdown_token();

    let tasks = vec![
        tokio::spawn(run_connection_loop(multiplexer.clone(), connection.clone())),
        tokio::spawn(run_flush_loop(
            multiplexer.clone(),
            config.flush_interval(),
            token.clone(),
        )),
        tokio::spawn(run_sweep_loop(
            multiplexer.clone(),
            config.cache_sweep_interval(),
            token,
        )),
    ];

    info!(url = %connection.url(), "Stream runtime started");
    StreamHandle {
        multiplexer,
        connection,
        tasks,
    }
}

/// Connect, run sessions and apply reconnect decisions until shutdown.
pub async fn run_connection_loop(mux: Arc<StreamMultiplexer>, connection: Arc<ConnectionManager>) {
    let token = connection.shutdown_token();

    loop {
        if connection.is_shutdown() {
            break;
        }

        if !mux.begin_connect() {
            if !wait_for_reconnect(&mux, &token).await {
                break;
            }
            continue;
        }

        let end = connection.run_session(|event| mux.handle_event(event)).await;
        let decision = mux.handle_session_end(end);

        if connection.is_shutdown() {
            break;
        }

        match decision {
            Some(ReconnectDecision::Retry { delay, .. }) => {
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = token.cancelled() => {
                        info!("Shutdown requested during backoff, exiting");
                        break;
                    }
                }
            }
            // Clean close, terminal give-up or already halted: idle until
            // an explicit reconnect.
            Some(ReconnectDecision::GiveUp { .. } | ReconnectDecision::Halted) | None => {
                if !wait_for_reconnect(&mux, &token).await {
                    break;
                }
            }
        }
    }

    info!("Connection loop stopped");
}

/// Returns false when shutdown won the race.
async fn wait_for_reconnect(mux: &StreamMultiplexer, token: &CancellationToken) -> bool {
    debug!("Waiting for explicit reconnect");
    tokio::select! {
        () = mux.reconnect_requested() => true,
        () = token.cancelled() => false,
    }
}

/// Deliver batched updates on every tick.
pub async fn run_flush_loop(mux: Arc<StreamMultiplexer>, period: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {
                let report = mux.flush();
                if report.keys > 0 {
                    trace!(keys = report.keys, delivered = report.delivered, failed = report.failed, "Flushed");
                }
            }
        }
    }
    debug!("Flush loop stopped");
}

/// Evict idle cache entries on every tick.
pub async fn run_sweep_loop(mux: Arc<StreamMultiplexer>, period: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately; nothing can be idle yet.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {
                mux.sweep_cache(Utc::now());
            }
        }
    }
    debug!("Sweep loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{ConsumerError, StreamUpdate};
    use crate::events::StreamEvent;
    use dashlink_core::{Channel, StreamKey};

    #[tokio::test]
    async fn test_shutdown_stops_all_loops() {
        let config = StreamConfig {
            url: "ws://127.0.0.1:1".to_string(),
            reconnect_base_delay_ms: 10_000,
            ..Default::default()
        };
        let handle = spawn_stream(config);
        let mut events = handle.multiplexer.subscribe_events();

        // Wait for the first failed attempt to be scheduled.
        let scheduled = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Ok(StreamEvent::Reconnecting { attempt, .. }) => return attempt,
                    Ok(_) => continue,
                    Err(e) => panic!("event channel failed: {e}"),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(scheduled, 1);

        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .expect("loops must stop on shutdown");
    }

    #[tokio::test]
    async fn test_flush_loop_delivers() {
        let config = StreamConfig::default();
        let connection = ConnectionManager::new(&config);
        let mux = Arc::new(StreamMultiplexer::new(
            config,
            Arc::new(connection.transport()),
        ));
        let key = StreamKey::new("BTC", Channel::Other("status".to_string()));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let consumer = move |update: &StreamUpdate| -> Result<(), ConsumerError> {
            tx.send(update.payload.clone()).map_err(|_| ConsumerError::Unavailable)
        };
        mux.bind("c1".into(), Arc::new(consumer), key);
        mux.handle_text(r#"{"arg":{"channel":"status","instId":"BTC"},"data":[1]}"#);

        let token = CancellationToken::new();
        let task = tokio::spawn(run_flush_loop(
            mux.clone(),
            Duration::from_millis(10),
            token.clone(),
        ));

        let delivered = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert!(delivered.is_some());

        token.cancel();
        task.await.unwrap();
    }
}
