//! Synchronizer events.

use dashlink_core::{ChartId, CrosshairPosition, GroupId, SyncMode};
use serde::Serialize;

/// Counters published with [`SyncEvent::SyncStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub flushes: u64,
    pub operations_applied: u64,
    /// Targets skipped for lack of capability.
    pub operations_skipped: u64,
    pub errors: u64,
    pub crosshair_syncs: u64,
    pub resyncs: u64,
    pub pending: usize,
    pub groups: usize,
    pub charts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    ChartRegistered {
        chart_id: ChartId,
        group_id: GroupId,
        is_master: bool,
    },
    ChartUnregistered {
        chart_id: ChartId,
        group_id: GroupId,
    },
    /// A crosshair move was fanned out to `targets` charts.
    CrosshairSynced {
        source: ChartId,
        position: Option<CrosshairPosition>,
        targets: usize,
    },
    /// An operation was applied to `targets` charts during a flush or resync.
    OperationApplied {
        source: ChartId,
        mode: SyncMode,
        targets: usize,
    },
    SyncError {
        operation: SyncMode,
        chart_id: ChartId,
        error: String,
    },
    MasterChartChanged {
        group_id: GroupId,
        previous: Option<ChartId>,
        master: Option<ChartId>,
    },
    SyncStats(SyncStats),
}
