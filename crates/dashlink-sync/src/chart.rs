//! Chart consumer contract.
//!
//! Charts declare what they can apply through [`Capabilities`]. The
//! synchronizer checks the set before dispatch, so an unsupported mode is
//! skipped rather than reported as an error. Every setter defaults to
//! [`ChartError::Unsupported`].

use crate::error::{ChartError, ChartResult};
use dashlink_core::{
    CrosshairPosition, DataRange, PanOffset, Selection, SyncMode, SyncModes, SyncOperation,
    TimeRange,
};

/// Set of sync modes a chart can apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    supported: SyncModes,
}

impl Capabilities {
    pub fn all() -> Self {
        Self {
            supported: SyncModes::all(),
        }
    }

    pub fn none() -> Self {
        Self {
            supported: SyncModes::none(),
        }
    }

    pub fn of(modes: &[SyncMode]) -> Self {
        Self {
            supported: SyncModes::only(modes),
        }
    }

    pub fn supports(&self, mode: SyncMode) -> bool {
        self.supported.is_enabled(mode)
    }
}

/// A chart taking part in synchronization.
#[cfg_attr(test, mockall::automock)]
pub trait ChartHandle: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    fn set_time_range(&self, _range: TimeRange) -> ChartResult<()> {
        Err(ChartError::Unsupported)
    }

    fn set_zoom(&self, _level: f64) -> ChartResult<()> {
        Err(ChartError::Unsupported)
    }

    fn set_pan(&self, _offset: PanOffset) -> ChartResult<()> {
        Err(ChartError::Unsupported)
    }

    /// `None` hides the crosshair.
    fn set_crosshair(&self, _position: Option<CrosshairPosition>) -> ChartResult<()> {
        Err(ChartError::Unsupported)
    }

    /// `None` clears the selection.
    fn set_selection(&self, _selection: Option<Selection>) -> ChartResult<()> {
        Err(ChartError::Unsupported)
    }

    fn set_data_range(&self, _range: DataRange) -> ChartResult<()> {
        Err(ChartError::Unsupported)
    }
}

/// Dispatch `operation` to the matching setter.
pub fn apply_operation(chart: &dyn ChartHandle, operation: &SyncOperation) -> ChartResult<()> {
    match *operation {
        SyncOperation::TimeRange(range) => chart.set_time_range(range),
        SyncOperation::Zoom(level) => chart.set_zoom(level),
        SyncOperation::Pan(offset) => chart.set_pan(offset),
        SyncOperation::Crosshair(position) => chart.set_crosshair(position),
        SyncOperation::Selection(selection) => chart.set_selection(selection),
        SyncOperation::DataRange(range) => chart.set_data_range(range),
    }
}
