//! Core domain types for dashlink.
//!
//! This crate provides the vocabulary shared by the stream multiplexer and the
//! chart synchronizer:
//! - `StreamKey`, `Channel`, `InstType`: identify one logical market-data feed
//! - `ConsumerId`, `ChartId`, `GroupId`: identify bound consumers and sync groups
//! - `SyncMode`, `SyncModes`, `SyncOperation`: cross-chart state changes
//! - `EventBus`: typed fan-out of lifecycle events to independent listeners

pub mod error;
pub mod events;
pub mod ids;
pub mod stream;
pub mod sync;

pub use error::{CoreError, Result};
pub use events::EventBus;
pub use ids::{ChartId, ConsumerId, GroupId};
pub use stream::{CandleInterval, Channel, InstType, StreamKey};
pub use sync::{
    CrosshairPosition, DataRange, PanOffset, Selection, SyncMode, SyncModes, SyncOperation,
    TimeRange,
};
