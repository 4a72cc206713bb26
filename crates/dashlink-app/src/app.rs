//! Main application.

use crate::bridge::{record_multiplexer_stats, run_event_bridge};
use crate::config::AppConfig;
use crate::error::AppResult;
use crate::live_chart::LiveChart;
use dashlink_core::{ChartId, ConsumerId, GroupId};
use dashlink_stream::{spawn_stream, StreamHandle, StreamMultiplexer};
use dashlink_sync::{spawn_sync, ChartSynchronizer, RegisterOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Main application.
pub struct Application {
    config: AppConfig,
}

impl Application {
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Spawn every component and bind one live chart per configured stream.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(&self) -> RunningApp {
        let stream = spawn_stream(self.config.stream.clone());
        let token = stream.connection.shutdown_token();
        let sync = Arc::new(ChartSynchronizer::new(self.config.sync.clone()));

        // Subscribe before binding so registration events reach the bridge.
        let mut tasks = vec![tokio::spawn(run_event_bridge(
            stream.multiplexer.subscribe_events(),
            sync.subscribe_events(),
            token.clone(),
        ))];
        tasks.extend(spawn_sync(sync.clone(), token));

        let group = GroupId::main();
        let mut charts = Vec::with_capacity(self.config.streams.len());
        for (index, target) in self.config.streams.iter().enumerate() {
            let key = target.stream_key();
            let name = format!("chart-{key}");
            let chart = Arc::new(LiveChart::new(
                ChartId::new(name.clone()),
                group.clone(),
                key.clone(),
                self.config.live_window_ms,
                Arc::downgrade(&sync),
            ));

            let options = RegisterOptions {
                is_master: index == 0,
                modes: None,
            };
            sync.register_chart(chart.id().clone(), chart.clone(), group.clone(), options);
            stream
                .multiplexer
                .bind(ConsumerId::new(name), chart.clone(), key);
            charts.push(chart);
        }

        info!(
            charts = charts.len(),
            subscriptions = stream.multiplexer.stats().subscriptions,
            "Application started"
        );

        RunningApp {
            stream,
            sync,
            charts,
            tasks,
        }
    }

    /// Run until Ctrl+C, then shut everything down.
    pub async fn run(self) -> AppResult<()> {
        let running = self.start();
        info!("Application running. Press Ctrl+C to stop.");

        let mut stats_interval =
            tokio::time::interval(Duration::from_secs(self.config.stats_interval_secs));
        // The first tick fires immediately.
        stats_interval.tick().await;

        loop {
            tokio::select! {
                result = signal::ctrl_c() => {
                    result?;
                    info!("Shutdown signal received");
                    break;
                }
                _ = stats_interval.tick() => {
                    running.log_stats();
                }
            }
        }

        running.shutdown().await;
        info!("Application stopped");
        Ok(())
    }
}

/// Handles to a started application.
pub struct RunningApp {
    stream: StreamHandle,
    sync: Arc<ChartSynchronizer>,
    charts: Vec<Arc<LiveChart>>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningApp {
    pub fn multiplexer(&self) -> &Arc<StreamMultiplexer> {
        &self.stream.multiplexer
    }

    pub fn synchronizer(&self) -> &Arc<ChartSynchronizer> {
        &self.sync
    }

    pub fn charts(&self) -> &[Arc<LiveChart>] {
        &self.charts
    }

    pub fn log_stats(&self) {
        let stats = self.stream.multiplexer.stats();
        record_multiplexer_stats(&stats);
        info!(
            state = ?stats.state,
            messages = stats.messages_received,
            errors = stats.message_errors,
            subscriptions = stats.subscriptions,
            confirmed = stats.confirmed_subscriptions,
            cache = stats.cache_entries,
            latency_ms = stats.avg_latency_ms,
            "Stream stats"
        );
    }

    /// Close the connection and wait for every task to exit.
    pub async fn shutdown(self) {
        info!("Initiating graceful shutdown");
        self.stream.shutdown();
        self.stream.join().await;
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamTarget;
    use dashlink_core::Channel;

    fn offline_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.stream.url = "ws://127.0.0.1:1".to_string();
        config.stream.reconnect_base_delay_ms = 10_000;
        config.streams = vec![
            StreamTarget {
                symbol: "BTC-USDT".to_string(),
                channel: Channel::Ticker,
            },
            StreamTarget {
                symbol: "ETH-USDT".to_string(),
                channel: Channel::Ticker,
            },
        ];
        config
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = offline_config();
        config.sync.flush_interval_ms = 0;
        assert!(Application::new(config).is_err());
    }

    #[tokio::test]
    async fn test_start_binds_and_registers_every_stream() {
        let app = Application::new(offline_config()).unwrap();
        let running = app.start();

        assert_eq!(running.charts().len(), 2);
        for chart in running.charts() {
            assert!(running.multiplexer().is_subscribed(chart.key()));
        }
        let master = running.synchronizer().master_of(&GroupId::main());
        assert_eq!(master.as_ref(), Some(running.charts()[0].id()));
        assert_eq!(running.synchronizer().group_members(&GroupId::main()).len(), 2);

        tokio::time::timeout(Duration::from_secs(5), running.shutdown())
            .await
            .expect("shutdown must complete");
    }
}
