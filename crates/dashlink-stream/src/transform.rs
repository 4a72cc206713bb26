//! Per-channel payload transforms.
//!
//! Converts the raw `data` array of an inbound frame into the canonical shape
//! delivered to consumers. Transforms are pure; channels without a dedicated
//! transform pass through as [`StreamPayload::Raw`].

use crate::error::{WsError, WsResult};
use dashlink_core::Channel;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;

/// Canonical payload delivered to stream consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum StreamPayload {
    Ticker(Ticker),
    Depth(DepthSnapshot),
    Trades(Vec<Trade>),
    Candle(Candle),
    /// Untransformed data for channels without a transform.
    Raw(Vec<Value>),
}

/// Last price and 24h statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    pub symbol: String,
    pub last: Decimal,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub open_24h: Option<Decimal>,
    pub high_24h: Option<Decimal>,
    pub low_24h: Option<Decimal>,
    pub volume_24h: Option<Decimal>,
    /// Percent change versus `open_24h`.
    pub change_24h_pct: Option<Decimal>,
    pub timestamp_ms: i64,
}

/// One price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Level {
    pub price: Decimal,
    pub size: Decimal,
}

/// Order book snapshot, best level first on both sides.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthSnapshot {
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
    pub timestamp_ms: i64,
}

impl DepthSnapshot {
    pub fn best_bid(&self) -> Option<Level> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<Level> {
        self.asks.first().copied()
    }

    /// Midpoint of the best bid and ask. `None` when a side is empty or the
    /// sum overflows.
    pub fn mid_price(&self) -> Option<Decimal> {
        let (bid, ask) = (self.best_bid()?, self.best_ask()?);
        bid.price.checked_add(ask.price)?.checked_div(Decimal::TWO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// One public trade.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub trade_id: String,
    pub price: Decimal,
    pub size: Decimal,
    pub side: TradeSide,
    pub timestamp_ms: i64,
}

/// OHLCV candle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    pub open_time_ms: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    /// Whether the candle interval has closed.
    pub confirmed: bool,
}

/// Transform the `data` array of a frame for `channel`.
pub fn transform(channel: &Channel, data: &[Value]) -> WsResult<StreamPayload> {
    match channel {
        Channel::Ticker => transform_ticker(first(data)?).map(StreamPayload::Ticker),
        Channel::Depth => transform_depth(first(data)?).map(StreamPayload::Depth),
        Channel::Trades => data
            .iter()
            .map(transform_trade)
            .collect::<WsResult<Vec<_>>>()
            .map(StreamPayload::Trades),
        Channel::Candle(_) => transform_candle(first(data)?).map(StreamPayload::Candle),
        Channel::Other(_) => Ok(StreamPayload::Raw(data.to_vec())),
    }
}

fn first(data: &[Value]) -> WsResult<&Value> {
    data.first()
        .ok_or_else(|| WsError::ParseError("empty data array".to_string()))
}

fn transform_ticker(item: &Value) -> WsResult<Ticker> {
    let last = decimal_field(item, "last")?;
    let open_24h = opt_decimal_field(item, "open24h")?;
    let change_24h_pct = open_24h.and_then(|open| change_pct(last, open));

    Ok(Ticker {
        symbol: string_field(item, "instId")?,
        last,
        bid: opt_decimal_field(item, "bidPx")?,
        ask: opt_decimal_field(item, "askPx")?,
        open_24h,
        high_24h: opt_decimal_field(item, "high24h")?,
        low_24h: opt_decimal_field(item, "low24h")?,
        volume_24h: opt_decimal_field(item, "vol24h")?,
        change_24h_pct,
        timestamp_ms: timestamp_field(item, "ts")?,
    })
}

/// Percent change from `open` to `last`; `None` for a zero open or when the
/// result does not fit a `Decimal`.
fn change_pct(last: Decimal, open: Decimal) -> Option<Decimal> {
    if open.is_zero() {
        return None;
    }
    last.checked_sub(open)?
        .checked_div(open)?
        .checked_mul(Decimal::ONE_HUNDRED)
        .map(|pct| pct.round_dp(4))
}

fn transform_depth(item: &Value) -> WsResult<DepthSnapshot> {
    Ok(DepthSnapshot {
        bids: levels(item, "bids")?,
        asks: levels(item, "asks")?,
        timestamp_ms: timestamp_field(item, "ts")?,
    })
}

fn levels(item: &Value, side: &str) -> WsResult<Vec<Level>> {
    let Some(rows) = item.get(side).and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    rows.iter()
        .map(|row| {
            let cells = row
                .as_array()
                .ok_or_else(|| WsError::ParseError(format!("{side}: level is not an array")))?;
            match cells.as_slice() {
                [price, size, ..] => Ok(Level {
                    price: parse_decimal(price, side)?,
                    size: parse_decimal(size, side)?,
                }),
                _ => Err(WsError::ParseError(format!("{side}: level too short"))),
            }
        })
        .collect()
}

fn transform_trade(item: &Value) -> WsResult<Trade> {
    let side = match item.get("side").and_then(Value::as_str) {
        Some("buy") => TradeSide::Buy,
        Some("sell") => TradeSide::Sell,
        other => {
            return Err(WsError::ParseError(format!("invalid trade side: {other:?}")));
        }
    };
    Ok(Trade {
        trade_id: string_field(item, "tradeId")?,
        price: decimal_field(item, "px")?,
        size: decimal_field(item, "sz")?,
        side,
        timestamp_ms: timestamp_field(item, "ts")?,
    })
}

fn transform_candle(item: &Value) -> WsResult<Candle> {
    let cells = item
        .as_array()
        .ok_or_else(|| WsError::ParseError("candle is not an array".to_string()))?;
    let [ts, open, high, low, close, volume, rest @ ..] = cells.as_slice() else {
        return Err(WsError::ParseError(format!(
            "candle has {} fields, expected at least 6",
            cells.len()
        )));
    };
    // The confirm flag is the last field when present ("1" = closed).
    let confirmed = rest
        .last()
        .and_then(Value::as_str)
        .is_some_and(|flag| flag == "1");

    Ok(Candle {
        open_time_ms: parse_timestamp(ts, "candle ts")?,
        open: parse_decimal(open, "open")?,
        high: parse_decimal(high, "high")?,
        low: parse_decimal(low, "low")?,
        close: parse_decimal(close, "close")?,
        volume: parse_decimal(volume, "volume")?,
        confirmed,
    })
}

// ============================================================================
// Field helpers
// ============================================================================

fn string_field(item: &Value, name: &str) -> WsResult<String> {
    item.get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| WsError::ParseError(format!("missing field: {name}")))
}

fn decimal_field(item: &Value, name: &str) -> WsResult<Decimal> {
    let value = item
        .get(name)
        .ok_or_else(|| WsError::ParseError(format!("missing field: {name}")))?;
    parse_decimal(value, name)
}

/// Missing fields and empty strings map to `None`.
fn opt_decimal_field(item: &Value, name: &str) -> WsResult<Option<Decimal>> {
    match item.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(value) => parse_decimal(value, name).map(Some),
    }
}

fn timestamp_field(item: &Value, name: &str) -> WsResult<i64> {
    let value = item
        .get(name)
        .ok_or_else(|| WsError::ParseError(format!("missing field: {name}")))?;
    parse_timestamp(value, name)
}

fn parse_decimal(value: &Value, name: &str) -> WsResult<Decimal> {
    let parsed = match value {
        Value::String(s) => Decimal::from_str(s),
        Value::Number(n) => Decimal::from_str(&n.to_string()),
        _ => {
            return Err(WsError::ParseError(format!(
                "{name}: expected number, got {value}"
            )))
        }
    };
    parsed.map_err(|e| WsError::ParseError(format!("{name}: {e}")))
}

fn parse_timestamp(value: &Value, name: &str) -> WsResult<i64> {
    match value {
        Value::String(s) => s
            .parse::<i64>()
            .map_err(|e| WsError::ParseError(format!("{name}: {e}"))),
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| WsError::ParseError(format!("{name}: not an integer"))),
        _ => Err(WsError::ParseError(format!(
            "{name}: expected timestamp, got {value}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashlink_core::CandleInterval;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_ticker_transform() {
        let data = vec![json!({
            "instId": "BTC-USDT",
            "last": "43250.5",
            "bidPx": "43250.4",
            "askPx": "43250.6",
            "open24h": "42000",
            "high24h": "43500",
            "low24h": "41800",
            "vol24h": "1234.5",
            "ts": "1700000000000"
        })];

        let StreamPayload::Ticker(ticker) = transform(&Channel::Ticker, &data).unwrap() else {
            panic!("expected ticker");
        };
        assert_eq!(ticker.symbol, "BTC-USDT");
        assert_eq!(ticker.last, dec!(43250.5));
        assert_eq!(ticker.bid, Some(dec!(43250.4)));
        assert_eq!(ticker.change_24h_pct, Some(dec!(2.9774)));
        assert_eq!(ticker.timestamp_ms, 1_700_000_000_000);
    }

    #[test]
    fn test_ticker_optional_fields() {
        let data = vec![json!({"instId": "X", "last": "1", "bidPx": "", "ts": 5})];
        let StreamPayload::Ticker(ticker) = transform(&Channel::Ticker, &data).unwrap() else {
            panic!("expected ticker");
        };
        assert_eq!(ticker.bid, None);
        assert_eq!(ticker.change_24h_pct, None);
        assert_eq!(ticker.timestamp_ms, 5);
    }

    #[test]
    fn test_depth_transform() {
        let data = vec![json!({
            "asks": [["101.5", "2", "0", "1"], ["102", "1", "0", "1"]],
            "bids": [["100.5", "3", "0", "2"]],
            "ts": "1700000000001"
        })];
        let StreamPayload::Depth(depth) = transform(&Channel::Depth, &data).unwrap() else {
            panic!("expected depth");
        };
        assert_eq!(depth.asks.len(), 2);
        assert_eq!(depth.best_bid().unwrap().price, dec!(100.5));
        assert_eq!(depth.best_ask().unwrap().size, dec!(2));
        assert_eq!(depth.mid_price(), Some(dec!(101)));
    }

    #[test]
    fn test_extreme_ticker_values_do_not_overflow() {
        let data = vec![json!({
            "instId": "X",
            "last": "79228162514264337593543950335",
            "open24h": "0.0001",
            "ts": "1"
        })];
        let StreamPayload::Ticker(ticker) = transform(&Channel::Ticker, &data).unwrap() else {
            panic!("expected ticker");
        };
        assert_eq!(ticker.last, Decimal::MAX);
        assert_eq!(ticker.change_24h_pct, None);

        let data = vec![json!({
            "instId": "X",
            "last": "-79228162514264337593543950335",
            "open24h": "79228162514264337593543950335",
            "ts": "1"
        })];
        let StreamPayload::Ticker(ticker) = transform(&Channel::Ticker, &data).unwrap() else {
            panic!("expected ticker");
        };
        assert_eq!(ticker.change_24h_pct, None);
    }

    #[test]
    fn test_extreme_depth_mid_price_is_none() {
        let data = vec![json!({
            "asks": [["79228162514264337593543950335", "1"]],
            "bids": [["79228162514264337593543950335", "1"]],
            "ts": "1"
        })];
        let StreamPayload::Depth(depth) = transform(&Channel::Depth, &data).unwrap() else {
            panic!("expected depth");
        };
        assert_eq!(depth.mid_price(), None);

        let one_sided = DepthSnapshot {
            bids: vec![],
            asks: depth.asks.clone(),
            timestamp_ms: 1,
        };
        assert_eq!(one_sided.mid_price(), None);
    }

    #[test]
    fn test_trades_transform() {
        let data = vec![
            json!({"tradeId": "1", "px": "10", "sz": "0.5", "side": "buy", "ts": "1"}),
            json!({"tradeId": "2", "px": "11", "sz": "0.1", "side": "sell", "ts": "2"}),
        ];
        let StreamPayload::Trades(trades) = transform(&Channel::Trades, &data).unwrap() else {
            panic!("expected trades");
        };
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[1].side, TradeSide::Sell);
        assert_eq!(trades[0].price, dec!(10));
    }

    #[test]
    fn test_candle_transform() {
        let data = vec![json!([
            "1700000000000", "10", "12", "9", "11", "100", "1000", "1000", "1"
        ])];
        let channel = Channel::Candle(CandleInterval::OneMinute);
        let StreamPayload::Candle(candle) = transform(&channel, &data).unwrap() else {
            panic!("expected candle");
        };
        assert_eq!(candle.high, dec!(12));
        assert_eq!(candle.close, dec!(11));
        assert!(candle.confirmed);
    }

    #[test]
    fn test_unknown_channel_passes_through() {
        let data = vec![json!({"anything": true})];
        let payload = transform(&Channel::Other("status".to_string()), &data).unwrap();
        assert_eq!(payload, StreamPayload::Raw(data));
    }

    #[test]
    fn test_malformed_payloads_rejected() {
        assert!(transform(&Channel::Ticker, &[]).is_err());
        assert!(transform(&Channel::Ticker, &[json!({"last": "abc", "instId": "X", "ts": "1"})]).is_err());
        assert!(transform(&Channel::Trades, &[json!({"tradeId": "1", "px": "1", "sz": "1", "side": "hold", "ts": "1"})]).is_err());
        assert!(transform(&Channel::Candle(CandleInterval::OneDay), &[json!(["1", "2"])]).is_err());
    }
}
