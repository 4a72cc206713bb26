//! Headless live chart.
//!
//! Bound to one stream as a consumer and registered with the synchronizer
//! as a chart. Each update moves its visible window so it ends at the
//! update's timestamp. The group master reports that window, the other
//! members follow it through sync.

use dashlink_core::{ChartId, CrosshairPosition, GroupId, StreamKey, SyncMode, TimeRange};
use dashlink_stream::{ConsumerError, StreamConsumer, StreamPayload, StreamUpdate};
use dashlink_sync::{Capabilities, ChartHandle, ChartResult, ChartSynchronizer};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Weak;
use tracing::{debug, trace};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveChartView {
    pub last_price: Option<Decimal>,
    pub last_update_ms: Option<i64>,
    pub updates: u64,
    pub time_range: Option<TimeRange>,
    pub zoom: Option<f64>,
    pub crosshair: Option<CrosshairPosition>,
}

pub struct LiveChart {
    id: ChartId,
    group: GroupId,
    key: StreamKey,
    window_ms: i64,
    sync: Weak<ChartSynchronizer>,
    view: Mutex<LiveChartView>,
}

impl LiveChart {
    pub fn new(
        id: ChartId,
        group: GroupId,
        key: StreamKey,
        window_ms: i64,
        sync: Weak<ChartSynchronizer>,
    ) -> Self {
        Self {
            id,
            group,
            key,
            window_ms,
            sync,
            view: Mutex::new(LiveChartView::default()),
        }
    }

    pub fn id(&self) -> &ChartId {
        &self.id
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    pub fn view(&self) -> LiveChartView {
        self.view.lock().clone()
    }

    fn follow_live(&self, timestamp_ms: i64) {
        let Some(start) = timestamp_ms.checked_sub(self.window_ms) else {
            debug!(chart = %self.id, timestamp_ms, "Live window start out of range");
            return;
        };
        let Ok(range) = TimeRange::new(start, timestamp_ms) else {
            return;
        };
        self.view.lock().time_range = Some(range);

        let Some(sync) = self.sync.upgrade() else {
            return;
        };
        if sync.master_of(&self.group).as_ref() == Some(&self.id) {
            let outcome = sync.report_time_range(&self.id, range);
            trace!(chart = %self.id, ?outcome, "Live window reported");
        }
    }
}

/// Latest event time and price carried by a payload.
fn latest_point(update: &StreamUpdate) -> (i64, Option<Decimal>) {
    match &update.payload {
        StreamPayload::Ticker(ticker) => (ticker.timestamp_ms, Some(ticker.last)),
        StreamPayload::Candle(candle) => (candle.open_time_ms, Some(candle.close)),
        StreamPayload::Trades(trades) => match trades.last() {
            Some(trade) => (trade.timestamp_ms, Some(trade.price)),
            None => (update.timestamp.timestamp_millis(), None),
        },
        StreamPayload::Depth(depth) => (depth.timestamp_ms, depth.mid_price()),
        StreamPayload::Raw(_) => (update.timestamp.timestamp_millis(), None),
    }
}

impl StreamConsumer for LiveChart {
    fn update_data(&self, update: &StreamUpdate) -> Result<(), ConsumerError> {
        if update.key != self.key {
            return Err(ConsumerError::Rejected(format!(
                "chart {} is bound to {}, got {}",
                self.id, self.key, update.key
            )));
        }

        let (timestamp_ms, price) = latest_point(update);
        {
            let mut view = self.view.lock();
            view.updates += 1;
            view.last_update_ms = Some(timestamp_ms);
            if price.is_some() {
                view.last_price = price;
            }
        }
        debug!(chart = %self.id, key = %self.key, price = ?price, "Live chart updated");

        self.follow_live(timestamp_ms);
        Ok(())
    }
}

impl ChartHandle for LiveChart {
    fn capabilities(&self) -> Capabilities {
        Capabilities::of(&[SyncMode::Time, SyncMode::Zoom, SyncMode::Crosshair])
    }

    fn set_time_range(&self, range: TimeRange) -> ChartResult<()> {
        self.view.lock().time_range = Some(range);
        Ok(())
    }

    fn set_zoom(&self, level: f64) -> ChartResult<()> {
        self.view.lock().zoom = Some(level);
        Ok(())
    }

    fn set_crosshair(&self, position: Option<CrosshairPosition>) -> ChartResult<()> {
        self.view.lock().crosshair = position;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dashlink_core::Channel;
    use dashlink_stream::{DepthSnapshot, Level, Ticker};
    use dashlink_sync::{RegisterOptions, SyncConfig};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn ticker(symbol: &str, last: Decimal, ts: i64) -> StreamPayload {
        StreamPayload::Ticker(Ticker {
            symbol: symbol.to_string(),
            last,
            bid: None,
            ask: None,
            open_24h: None,
            high_24h: None,
            low_24h: None,
            volume_24h: None,
            change_24h_pct: None,
            timestamp_ms: ts,
        })
    }

    fn chart(sync: &Arc<ChartSynchronizer>, id: &str, symbol: &str) -> Arc<LiveChart> {
        Arc::new(LiveChart::new(
            ChartId::new(id),
            GroupId::main(),
            StreamKey::new(symbol, Channel::Ticker),
            60_000,
            Arc::downgrade(sync),
        ))
    }

    #[test]
    fn test_master_window_follows_to_members() {
        let sync = Arc::new(ChartSynchronizer::new(SyncConfig::default()));
        let btc = chart(&sync, "btc", "BTC-USDT");
        let eth = chart(&sync, "eth", "ETH-USDT");
        sync.register_chart(btc.id().clone(), btc.clone(), GroupId::main(), RegisterOptions::master());
        sync.register_chart(eth.id().clone(), eth.clone(), GroupId::main(), RegisterOptions::default());

        let update = StreamUpdate {
            key: btc.key().clone(),
            payload: ticker("BTC-USDT", dec!(43000.5), 1_700_000_000_000),
            timestamp: Utc::now(),
        };
        btc.update_data(&update).unwrap();
        let report = sync.flush();

        assert_eq!(report.applied, 1);
        let expected = TimeRange::new(1_699_999_940_000, 1_700_000_000_000).unwrap();
        assert_eq!(btc.view().last_price, Some(dec!(43000.5)));
        assert_eq!(eth.view().time_range, Some(expected));
        assert_eq!(eth.view().last_price, None);
    }

    #[test]
    fn test_member_update_does_not_drive_group() {
        let sync = Arc::new(ChartSynchronizer::new(SyncConfig::default()));
        let btc = chart(&sync, "btc", "BTC-USDT");
        let eth = chart(&sync, "eth", "ETH-USDT");
        sync.register_chart(btc.id().clone(), btc.clone(), GroupId::main(), RegisterOptions::master());
        sync.register_chart(eth.id().clone(), eth.clone(), GroupId::main(), RegisterOptions::default());

        let update = StreamUpdate {
            key: eth.key().clone(),
            payload: ticker("ETH-USDT", dec!(2250), 1_700_000_000_000),
            timestamp: Utc::now(),
        };
        eth.update_data(&update).unwrap();

        assert_eq!(sync.pending_count(), 0);
        assert!(eth.view().time_range.is_some());
        assert!(btc.view().time_range.is_none());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let sync = Arc::new(ChartSynchronizer::new(SyncConfig::default()));
        let btc = chart(&sync, "btc", "BTC-USDT");
        let update = StreamUpdate {
            key: StreamKey::new("ETH-USDT", Channel::Ticker),
            payload: ticker("ETH-USDT", dec!(2250), 1),
            timestamp: Utc::now(),
        };
        assert!(matches!(
            btc.update_data(&update),
            Err(ConsumerError::Rejected(_))
        ));
        assert_eq!(btc.view().updates, 0);
    }

    #[test]
    fn test_crosshair_and_zoom_setters() {
        let sync = Arc::new(ChartSynchronizer::new(SyncConfig::default()));
        let btc = chart(&sync, "btc", "BTC-USDT");
        let position = CrosshairPosition {
            time: 5,
            price: Some(1.5),
        };
        btc.set_crosshair(Some(position)).unwrap();
        btc.set_zoom(2.0).unwrap();
        assert_eq!(btc.view().crosshair, Some(position));
        assert_eq!(btc.view().zoom, Some(2.0));
        assert!(btc.set_pan(dashlink_core::PanOffset { x: 1.0, y: 0.0 }).is_err());
    }

    #[test]
    fn test_extreme_update_keeps_previous_window() {
        let sync = Arc::new(ChartSynchronizer::new(SyncConfig::default()));
        let btc = chart(&sync, "btc", "BTC-USDT");
        sync.register_chart(btc.id().clone(), btc.clone(), GroupId::main(), RegisterOptions::master());

        let update = StreamUpdate {
            key: btc.key().clone(),
            payload: ticker("BTC-USDT", dec!(1), 1_000_000),
            timestamp: Utc::now(),
        };
        btc.update_data(&update).unwrap();
        let window = btc.view().time_range;
        assert!(window.is_some());

        let update = StreamUpdate {
            key: btc.key().clone(),
            payload: ticker("BTC-USDT", dec!(2), i64::MIN),
            timestamp: Utc::now(),
        };
        btc.update_data(&update).unwrap();
        assert_eq!(btc.view().time_range, window);
        assert_eq!(btc.view().last_price, Some(dec!(2)));
    }

    #[test]
    fn test_overflowing_depth_keeps_last_price() {
        let sync = Arc::new(ChartSynchronizer::new(SyncConfig::default()));
        let key = StreamKey::new("BTC-USDT", Channel::Depth);
        let chart = LiveChart::new(
            ChartId::new("depth"),
            GroupId::main(),
            key.clone(),
            60_000,
            Arc::downgrade(&sync),
        );
        let level = Level {
            price: Decimal::MAX,
            size: dec!(1),
        };
        let update = StreamUpdate {
            key,
            payload: StreamPayload::Depth(DepthSnapshot {
                bids: vec![level],
                asks: vec![level],
                timestamp_ms: 5_000_000,
            }),
            timestamp: Utc::now(),
        };
        chart.update_data(&update).unwrap();
        assert_eq!(chart.view().last_price, None);
        assert_eq!(chart.view().updates, 1);
    }
}
