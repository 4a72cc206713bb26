//! Async drivers for the synchronizer: flush tick and stats tick.

use crate::synchronizer::ChartSynchronizer;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Spawn the flush and stats loops. Both stop when `token` is cancelled.
pub fn spawn_sync(sync: Arc<ChartSynchronizer>, token: CancellationToken) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(run_flush_loop(sync.clone(), token.clone())),
        tokio::spawn(run_stats_loop(sync, token)),
    ]
}

pub async fn run_flush_loop(sync: Arc<ChartSynchronizer>, token: CancellationToken) {
    let mut ticker = tokio::time::interval(sync.config().flush_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {
                let report = sync.flush();
                if report.operations > 0 {
                    trace!(
                        operations = report.operations,
                        applied = report.applied,
                        failed = report.failed,
                        "Sync flushed"
                    );
                }
            }
        }
    }
    debug!("Sync flush loop stopped");
}

pub async fn run_stats_loop(sync: Arc<ChartSynchronizer>, token: CancellationToken) {
    let mut ticker = tokio::time::interval(sync.config().stats_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {
                sync.emit_stats();
            }
        }
    }
    debug!("Sync stats loop stopped");
}
