//! Stream identification types.
//!
//! A stream is one logical feed on the shared connection, identified by the
//! instrument symbol and the provider channel name (e.g. `BTC-USDT:tickers`).

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Instrument type sent with every subscription request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstType {
    #[default]
    Spot,
    Margin,
    Swap,
    Futures,
    Option,
}

impl InstType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spot => "SPOT",
            Self::Margin => "MARGIN",
            Self::Swap => "SWAP",
            Self::Futures => "FUTURES",
            Self::Option => "OPTION",
        }
    }
}

impl fmt::Display for InstType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SPOT" => Ok(Self::Spot),
            "MARGIN" => Ok(Self::Margin),
            "SWAP" => Ok(Self::Swap),
            "FUTURES" => Ok(Self::Futures),
            "OPTION" => Ok(Self::Option),
            other => Err(CoreError::InvalidInstType(other.to_string())),
        }
    }
}

/// Candle interval for candle channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandleInterval {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    OneHour,
    FourHours,
    OneDay,
}

impl CandleInterval {
    /// Suffix used in the provider channel name (`candle1m`, `candle1H`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::OneHour => "1H",
            Self::FourHours => "4H",
            Self::OneDay => "1D",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Self::OneMinute),
            "5m" => Some(Self::FiveMinutes),
            "15m" => Some(Self::FifteenMinutes),
            "1H" => Some(Self::OneHour),
            "4H" => Some(Self::FourHours),
            "1D" => Some(Self::OneDay),
            _ => None,
        }
    }

    /// Interval length in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        match self {
            Self::OneMinute => 60_000,
            Self::FiveMinutes => 300_000,
            Self::FifteenMinutes => 900_000,
            Self::OneHour => 3_600_000,
            Self::FourHours => 14_400_000,
            Self::OneDay => 86_400_000,
        }
    }
}

/// Provider channel, i.e. the update-type tag of a stream.
///
/// Channels the transform layer does not know are kept verbatim in `Other`
/// and their payloads pass through untransformed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Channel {
    /// Last price / 24h statistics (`tickers`).
    Ticker,
    /// Order book depth (`books`).
    Depth,
    /// Public trades (`trades`).
    Trades,
    /// OHLCV candles (`candle<interval>`).
    Candle(CandleInterval),
    /// Any channel without a dedicated transform.
    Other(String),
}

impl Channel {
    /// Parse a wire channel name.
    pub fn from_wire(name: &str) -> Self {
        match name {
            "tickers" => Self::Ticker,
            "books" => Self::Depth,
            "trades" => Self::Trades,
            _ => name
                .strip_prefix("candle")
                .and_then(CandleInterval::parse)
                .map(Self::Candle)
                .unwrap_or_else(|| Self::Other(name.to_string())),
        }
    }

    /// Wire channel name.
    pub fn wire_name(&self) -> String {
        match self {
            Self::Ticker => "tickers".to_string(),
            Self::Depth => "books".to_string(),
            Self::Trades => "trades".to_string(),
            Self::Candle(interval) => format!("candle{}", interval.as_str()),
            Self::Other(name) => name.clone(),
        }
    }

    /// Target update frequency in milliseconds.
    ///
    /// Informational only; surfaced in diagnostics.
    pub fn target_frequency_ms(&self) -> u64 {
        match self {
            Self::Ticker => 100,
            Self::Depth => 100,
            Self::Trades => 50,
            Self::Candle(_) => 500,
            Self::Other(_) => 1000,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.wire_name())
    }
}

impl From<String> for Channel {
    fn from(name: String) -> Self {
        Self::from_wire(&name)
    }
}

impl From<Channel> for String {
    fn from(channel: Channel) -> Self {
        channel.wire_name()
    }
}

/// Unique identifier of one logical feed: `(symbol, channel)`.
///
/// Format: `{symbol}:{channel}` (e.g. "BTC-USDT:tickers").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamKey {
    pub symbol: String,
    pub channel: Channel,
}

impl StreamKey {
    pub fn new(symbol: impl Into<String>, channel: Channel) -> Self {
        Self {
            symbol: symbol.into(),
            channel,
        }
    }

    /// Build a key from the wire fields of an inbound message.
    pub fn from_wire(inst_id: &str, channel: &str) -> Self {
        Self::new(inst_id, Channel::from_wire(channel))
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.symbol, self.channel)
    }
}

impl FromStr for StreamKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        // Symbols never contain ':' on the wire, channels never do either.
        let (symbol, channel) = s
            .split_once(':')
            .ok_or_else(|| CoreError::InvalidStreamKey(s.to_string()))?;
        if symbol.is_empty() || channel.is_empty() {
            return Err(CoreError::InvalidStreamKey(s.to_string()));
        }
        Ok(Self::from_wire(symbol, channel))
    }
}
