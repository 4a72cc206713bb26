//! Last known sync state of a chart.

use dashlink_core::{
    CrosshairPosition, DataRange, PanOffset, Selection, SyncMode, SyncOperation, TimeRange,
};
use serde::Serialize;

/// Updated whenever the chart reports a change or has one applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChartSyncState {
    pub time_range: Option<TimeRange>,
    pub zoom: Option<f64>,
    pub pan: Option<PanOffset>,
    pub crosshair: Option<CrosshairPosition>,
    pub selection: Option<Selection>,
    pub data_range: Option<DataRange>,
}

impl ChartSyncState {
    pub fn apply(&mut self, operation: &SyncOperation) {
        match *operation {
            SyncOperation::TimeRange(range) => self.time_range = Some(range),
            SyncOperation::Zoom(level) => self.zoom = Some(level),
            SyncOperation::Pan(offset) => self.pan = Some(offset),
            SyncOperation::Crosshair(position) => self.crosshair = position,
            SyncOperation::Selection(selection) => self.selection = selection,
            SyncOperation::DataRange(range) => self.data_range = Some(range),
        }
    }

    /// The last known value for `mode` as an operation.
    ///
    /// Cleared crosshair and selection have no value to replay.
    pub fn operation(&self, mode: SyncMode) -> Option<SyncOperation> {
        match mode {
            SyncMode::Time => self.time_range.map(SyncOperation::TimeRange),
            SyncMode::Zoom => self.zoom.map(SyncOperation::Zoom),
            SyncMode::Pan => self.pan.map(SyncOperation::Pan),
            SyncMode::Crosshair => self.crosshair.map(|p| SyncOperation::Crosshair(Some(p))),
            SyncMode::Selection => self.selection.map(|s| SyncOperation::Selection(Some(s))),
            SyncMode::DataRange => self.data_range.map(SyncOperation::DataRange),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_and_read_back() {
        let mut state = ChartSyncState::default();
        assert!(state.operation(SyncMode::Time).is_none());

        let op = SyncOperation::TimeRange(TimeRange { start: 1, end: 9 });
        state.apply(&op);
        state.apply(&SyncOperation::Zoom(1.5));
        assert_eq!(state.operation(SyncMode::Time), Some(op));
        assert_eq!(state.zoom, Some(1.5));
    }

    #[test]
    fn test_clearing_crosshair() {
        let mut state = ChartSyncState::default();
        state.apply(&SyncOperation::Crosshair(Some(CrosshairPosition {
            time: 5,
            price: None,
        })));
        assert!(state.crosshair.is_some());
        state.apply(&SyncOperation::Crosshair(None));
        assert!(state.operation(SyncMode::Crosshair).is_none());
    }
}
