//! Synchronizer error types.

use dashlink_core::{ChartId, GroupId};
use thiserror::Error;

/// Error returned by a chart setter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChartError {
    /// The chart does not implement this setter.
    #[error("Operation not supported")]
    Unsupported,
    #[error("Chart rejected operation: {0}")]
    Rejected(String),
}

pub type ChartResult<T> = Result<T, ChartError>;

/// Synchronizer API errors.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Chart not registered: {0}")]
    UnknownChart(ChartId),
    #[error("Group not found: {0}")]
    UnknownGroup(GroupId),
    #[error("Chart {chart} is not a member of group {group}")]
    NotAMember { group: GroupId, chart: ChartId },
}

pub type SyncResult<T> = Result<T, SyncError>;
