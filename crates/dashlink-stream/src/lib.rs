//! Market-data stream multiplexer.
//!
//! Multiplexes many `(symbol, channel)` subscriptions over a single
//! WebSocket connection:
//! - Reference-counted subscriptions, resent on every reconnect
//! - Per-stream latest-value cache with idle eviction
//! - Batched delivery to bound consumers on a fixed flush tick
//! - Bounded exponential backoff with one terminal event
//! - Text ping/pong heartbeat

pub mod cache;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod message;
pub mod multiplexer;
pub mod reconnect;
pub mod runtime;
pub mod subscription;
pub mod transform;
pub mod transport;

pub use cache::{CacheEntry, PendingUpdate};
pub use config::StreamConfig;
pub use connection::{ConnectionManager, SessionEnd, TransportEvent};
pub use consumer::{ConsumerError, StreamConsumer, StreamUpdate};
pub use error::{WsError, WsResult};
pub use events::StreamEvent;
pub use message::{SubscriptionArg, WsMessage, WsRequest};
pub use multiplexer::{BindingHandle, ConsumerStats, FlushReport, MultiplexerStats, StreamMultiplexer};
pub use reconnect::{ConnectionState, ReconnectDecision};
pub use runtime::{spawn_stream, StreamHandle};
pub use transform::{Candle, DepthSnapshot, Level, StreamPayload, Ticker, Trade, TradeSide};
pub use transport::{ChannelTransport, Transport, WsOutbound};
