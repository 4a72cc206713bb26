//! Cross-chart synchronization.
//!
//! Charts register into groups with a master and per-chart mode flags.
//! Interactions reported by one chart are applied to the other members:
//! batched per `(chart, mode)` and flushed on a fixed tick, except crosshair
//! moves which fan out immediately.

pub mod batch;
pub mod chart;
pub mod config;
pub mod error;
pub mod events;
pub mod group;
pub mod runtime;
pub mod state;
pub mod synchronizer;

pub use chart::{apply_operation, Capabilities, ChartHandle};
pub use config::SyncConfig;
pub use error::{ChartError, ChartResult, SyncError, SyncResult};
pub use events::{SyncEvent, SyncStats};
pub use runtime::spawn_sync;
pub use state::ChartSyncState;
pub use synchronizer::{
    ChartRegistration, ChartSynchronizer, RegisterOptions, ReportOutcome, SyncReport,
};
