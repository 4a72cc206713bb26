//! Chart synchronizer.
//!
//! Charts report their own interactions; the synchronizer fans them out to
//! the other members of the reporting chart's group:
//! - time range, zoom, pan, selection and data range are queued and applied
//!   on the flush tick, latest report per `(chart, mode)` only
//! - crosshair moves are applied immediately
//! - a full resync pushes each master's time range, zoom and pan to the rest
//!   of its group
//!
//! While a fan-out runs, the `sync_in_progress` flag is held and every
//! report is ignored, so a setter that reports its own change back cannot
//! loop. A resync requested while the flag is held is deferred and run at
//! the end of the next flush. No lock is held while chart setters run.

use crate::batch::{PendingSync, PushOutcome, SyncBatchQueue};
use crate::chart::{apply_operation, ChartHandle};
use crate::config::SyncConfig;
use crate::error::{ChartError, SyncError, SyncResult};
use crate::events::{SyncEvent, SyncStats};
use crate::group::SyncGroupRegistry;
use crate::state::ChartSyncState;
use chrono::{DateTime, Utc};
use dashlink_core::{
    ChartId, CrosshairPosition, DataRange, EventBus, GroupId, PanOffset, Selection, SyncMode,
    SyncModes, SyncOperation, TimeRange,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

/// Registration flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterOptions {
    pub is_master: bool,
    /// Mode flags; the configured defaults when `None`.
    pub modes: Option<SyncModes>,
}

impl RegisterOptions {
    pub fn master() -> Self {
        Self {
            is_master: true,
            modes: None,
        }
    }

    pub fn with_modes(mut self, modes: SyncModes) -> Self {
        self.modes = Some(modes);
        self
    }
}

/// Stored record of a registered chart.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartRegistration {
    pub chart_id: ChartId,
    pub group_id: GroupId,
    pub is_master: bool,
    pub modes: SyncModes,
    pub registered_at: DateTime<Utc>,
}

/// What happened to a reported interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// Queued for the next flush.
    Queued,
    /// Applied immediately (crosshair) to this many charts.
    Broadcast { targets: usize },
    /// Dropped: sync disabled, fan-out in progress, unknown chart or mode off.
    Ignored,
}

/// Outcome of a flush or resync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub operations: usize,
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SyncReport {
    fn absorb(&mut self, other: SyncReport) {
        self.operations += other.operations;
        self.applied += other.applied;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Groups a resync covers.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ResyncScope {
    All,
    Groups(HashSet<GroupId>),
}

impl ResyncScope {
    fn of(only: Option<&GroupId>) -> Self {
        match only {
            Some(group_id) => Self::Groups(HashSet::from([group_id.clone()])),
            None => Self::All,
        }
    }

    fn includes(&self, group_id: &GroupId) -> bool {
        match self {
            Self::All => true,
            Self::Groups(ids) => ids.contains(group_id),
        }
    }

    fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Groups(mut ids), Self::Groups(more)) => {
                ids.extend(more);
                Self::Groups(ids)
            }
            _ => Self::All,
        }
    }
}

struct ChartEntry {
    chart: Arc<dyn ChartHandle>,
    registered_at: DateTime<Utc>,
    state: ChartSyncState,
    sync_count: u64,
    last_synced: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct SyncInner {
    groups: SyncGroupRegistry,
    charts: HashMap<ChartId, ChartEntry>,
}

#[derive(Default)]
struct Counters {
    flushes: u64,
    applied: u64,
    skipped: u64,
    errors: u64,
    crosshair_syncs: u64,
    resyncs: u64,
}

/// Held for the duration of a fan-out.
struct SyncGuard<'a>(&'a AtomicBool);

impl<'a> SyncGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One planned setter call.
struct Dispatch {
    source: ChartId,
    operation: SyncOperation,
    targets: Vec<(ChartId, Arc<dyn ChartHandle>)>,
}

pub struct ChartSynchronizer {
    config: SyncConfig,
    inner: RwLock<SyncInner>,
    queue: Mutex<SyncBatchQueue>,
    enabled: AtomicBool,
    sync_in_progress: AtomicBool,
    /// Resync requested while a fan-out held the guard.
    deferred_resync: Mutex<Option<ResyncScope>>,
    counters: Mutex<Counters>,
    events: EventBus<SyncEvent>,
}

impl ChartSynchronizer {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            enabled: AtomicBool::new(config.enabled),
            config,
            inner: RwLock::new(SyncInner::default()),
            queue: Mutex::new(SyncBatchQueue::new()),
            sync_in_progress: AtomicBool::new(false),
            deferred_resync: Mutex::new(None),
            counters: Mutex::new(Counters::default()),
            events: EventBus::default(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register `chart` in `group`, creating the group if needed.
    ///
    /// Re-registering an id replaces the previous registration.
    pub fn register_chart(
        &self,
        chart_id: ChartId,
        chart: Arc<dyn ChartHandle>,
        group_id: GroupId,
        options: RegisterOptions,
    ) -> ChartRegistration {
        if self.inner.read().charts.contains_key(&chart_id) {
            debug!(chart = %chart_id, "Chart re-registered, replacing");
            self.unregister_chart(&chart_id);
        }

        let modes = options.modes.unwrap_or(self.config.default_modes);
        let registered_at = Utc::now();
        let joined = {
            let mut inner = self.inner.write();
            let joined = inner
                .groups
                .add_member(&group_id, &chart_id, modes, options.is_master);
            inner.charts.insert(
                chart_id.clone(),
                ChartEntry {
                    chart,
                    registered_at,
                    state: ChartSyncState::default(),
                    sync_count: 0,
                    last_synced: None,
                },
            );
            joined
        };

        info!(chart = %chart_id, group = %group_id, master = joined.is_master, "Chart registered");
        self.events.emit(SyncEvent::ChartRegistered {
            chart_id: chart_id.clone(),
            group_id: group_id.clone(),
            is_master: joined.is_master,
        });
        if joined.is_master {
            self.events.emit(SyncEvent::MasterChartChanged {
                group_id: group_id.clone(),
                previous: joined.replaced_master,
                master: Some(chart_id.clone()),
            });
        }

        ChartRegistration {
            chart_id,
            group_id,
            is_master: joined.is_master,
            modes,
            registered_at,
        }
    }

    /// Remove `chart_id` from its group and drop its pending operations.
    pub fn unregister_chart(&self, chart_id: &ChartId) -> bool {
        let left = {
            let mut inner = self.inner.write();
            if inner.charts.remove(chart_id).is_none() {
                return false;
            }
            inner.groups.remove_member(chart_id)
        };
        self.queue.lock().remove_source(chart_id);

        let Some(left) = left else {
            return true;
        };
        info!(chart = %chart_id, group = %left.group, "Chart unregistered");
        self.events.emit(SyncEvent::ChartUnregistered {
            chart_id: chart_id.clone(),
            group_id: left.group.clone(),
        });
        if left.was_master {
            self.events.emit(SyncEvent::MasterChartChanged {
                group_id: left.group,
                previous: Some(chart_id.clone()),
                master: left.new_master,
            });
        }
        true
    }

    /// Make `chart_id` master of `group_id` and push its state to the group.
    /// Returns false when the chart is not a member.
    ///
    /// When another fan-out is running, the push happens at the end of the
    /// next flush.
    pub fn change_master_chart(&self, group_id: &GroupId, chart_id: &ChartId) -> bool {
        match self.try_change_master_chart(group_id, chart_id) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Master change rejected");
                false
            }
        }
    }

    pub fn try_change_master_chart(&self, group_id: &GroupId, chart_id: &ChartId) -> SyncResult<()> {
        let previous = {
            let mut inner = self.inner.write();
            if inner.groups.get(group_id).is_none() {
                return Err(SyncError::UnknownGroup(group_id.clone()));
            }
            inner
                .groups
                .set_master(group_id, chart_id)
                .ok_or_else(|| SyncError::NotAMember {
                    group: group_id.clone(),
                    chart: chart_id.clone(),
                })?
        };

        info!(group = %group_id, master = %chart_id, "Master chart changed");
        self.events.emit(SyncEvent::MasterChartChanged {
            group_id: group_id.clone(),
            previous,
            master: Some(chart_id.clone()),
        });
        self.resync_groups(Some(group_id));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reports
    // ------------------------------------------------------------------

    /// Record an interaction reported by `chart_id`.
    pub fn report(&self, chart_id: &ChartId, operation: SyncOperation) -> ReportOutcome {
        if self.is_sync_in_progress() {
            trace!(chart = %chart_id, mode = %operation.mode(), "Report during sync ignored");
            return ReportOutcome::Ignored;
        }

        let mode = operation.mode();
        let mode_enabled = {
            let mut inner = self.inner.write();
            let Some(entry) = inner.charts.get_mut(chart_id) else {
                trace!(chart = %chart_id, "Report from unregistered chart ignored");
                return ReportOutcome::Ignored;
            };
            entry.state.apply(&operation);
            inner
                .groups
                .modes(chart_id)
                .is_some_and(|modes| modes.is_enabled(mode))
        };

        if !self.is_sync_enabled() || !mode_enabled {
            return ReportOutcome::Ignored;
        }

        if let SyncOperation::Crosshair(position) = operation {
            return self.broadcast_crosshair(chart_id, position);
        }

        match self.queue.lock().push(chart_id, operation, Utc::now()) {
            PushOutcome::Added | PushOutcome::Replaced => ReportOutcome::Queued,
            PushOutcome::Stale => {
                trace!(chart = %chart_id, %mode, "Report older than pending one ignored");
                ReportOutcome::Ignored
            }
        }
    }

    pub fn report_time_range(&self, chart_id: &ChartId, range: TimeRange) -> ReportOutcome {
        self.report(chart_id, SyncOperation::TimeRange(range))
    }

    pub fn report_zoom(&self, chart_id: &ChartId, level: f64) -> ReportOutcome {
        self.report(chart_id, SyncOperation::Zoom(level))
    }

    pub fn report_pan(&self, chart_id: &ChartId, offset: PanOffset) -> ReportOutcome {
        self.report(chart_id, SyncOperation::Pan(offset))
    }

    pub fn report_crosshair(
        &self,
        chart_id: &ChartId,
        position: Option<CrosshairPosition>,
    ) -> ReportOutcome {
        self.report(chart_id, SyncOperation::Crosshair(position))
    }

    pub fn report_selection(&self, chart_id: &ChartId, selection: Option<Selection>) -> ReportOutcome {
        self.report(chart_id, SyncOperation::Selection(selection))
    }

    pub fn report_data_range(&self, chart_id: &ChartId, range: DataRange) -> ReportOutcome {
        self.report(chart_id, SyncOperation::DataRange(range))
    }

    fn broadcast_crosshair(
        &self,
        source: &ChartId,
        position: Option<CrosshairPosition>,
    ) -> ReportOutcome {
        let Some(_guard) = SyncGuard::acquire(&self.sync_in_progress) else {
            return ReportOutcome::Ignored;
        };

        let operation = SyncOperation::Crosshair(position);
        let (dispatch, skipped) = {
            let inner = self.inner.read();
            Self::plan(&inner, source, operation, inner.groups.targets(source, SyncMode::Crosshair))
        };
        let mut report = SyncReport {
            operations: 1,
            skipped,
            ..Default::default()
        };
        let applied = self.execute(&dispatch, &mut report);
        self.record_applied(&dispatch.operation, &applied);

        {
            let mut counters = self.counters.lock();
            counters.crosshair_syncs += 1;
            counters.applied += report.applied as u64;
            counters.skipped += report.skipped as u64;
            counters.errors += report.failed as u64;
        }
        self.events.emit(SyncEvent::CrosshairSynced {
            source: source.clone(),
            position,
            targets: report.applied,
        });
        ReportOutcome::Broadcast {
            targets: report.applied,
        }
    }

    // ------------------------------------------------------------------
    // Flush and resync
    // ------------------------------------------------------------------

    /// Apply every pending operation to its targets, then any deferred
    /// resync.
    pub fn flush(&self) -> SyncReport {
        let Some(_guard) = SyncGuard::acquire(&self.sync_in_progress) else {
            return SyncReport::default();
        };

        let mut report = self.flush_pending();

        let deferred = self.deferred_resync.lock().take();
        if let Some(scope) = deferred {
            debug!(?scope, "Running deferred resync");
            report.absorb(self.resync_scope(&scope));
        }
        report
    }

    /// Caller holds the sync guard.
    fn flush_pending(&self) -> SyncReport {
        let pending = self.queue.lock().drain();
        if pending.is_empty() {
            return SyncReport::default();
        }
        if !self.is_sync_enabled() {
            debug!(dropped = pending.len(), "Sync disabled, pending operations dropped");
            return SyncReport::default();
        }

        let mut report = SyncReport::default();
        let dispatches: Vec<Dispatch> = {
            let inner = self.inner.read();
            pending
                .into_iter()
                .map(|PendingSync { source, operation, .. }| {
                    let targets = inner.groups.targets(&source, operation.mode());
                    let (dispatch, skipped) = Self::plan(&inner, &source, operation, targets);
                    report.skipped += skipped;
                    dispatch
                })
                .collect()
        };

        self.run(dispatches, &mut report);
        self.counters.lock().flushes += 1;
        report
    }

    /// Push every master's time range, zoom and pan to its group.
    pub fn full_resync(&self) -> SyncReport {
        self.resync_groups(None)
    }

    /// The dashboard window regained focus.
    pub fn on_window_focus(&self) -> SyncReport {
        debug!("Window focus, resyncing all groups");
        self.full_resync()
    }

    /// Whether a resync is waiting for the next flush.
    pub fn has_deferred_resync(&self) -> bool {
        self.deferred_resync.lock().is_some()
    }

    fn resync_groups(&self, only: Option<&GroupId>) -> SyncReport {
        let scope = ResyncScope::of(only);
        let Some(_guard) = SyncGuard::acquire(&self.sync_in_progress) else {
            debug!(?scope, "Sync in progress, resync deferred to the next flush");
            let mut deferred = self.deferred_resync.lock();
            let merged = match deferred.take() {
                Some(existing) => existing.merge(scope),
                None => scope,
            };
            *deferred = Some(merged);
            return SyncReport::default();
        };
        self.resync_scope(&scope)
    }

    /// Caller holds the sync guard.
    fn resync_scope(&self, scope: &ResyncScope) -> SyncReport {
        let mut report = SyncReport::default();
        let dispatches: Vec<Dispatch> = {
            let inner = self.inner.read();
            let mut dispatches = Vec::new();
            for group in inner.groups.groups() {
                if !scope.includes(&group.id) {
                    continue;
                }
                let Some(master) = group.master.as_ref() else {
                    continue;
                };
                let Some(state) = inner.charts.get(master).map(|e| e.state.clone()) else {
                    continue;
                };
                for mode in SyncMode::DURABLE {
                    let Some(operation) = state.operation(mode) else {
                        continue;
                    };
                    let targets = inner.groups.targets(master, mode);
                    let (dispatch, skipped) = Self::plan(&inner, master, operation, targets);
                    report.skipped += skipped;
                    dispatches.push(dispatch);
                }
            }
            dispatches
        };

        self.run(dispatches, &mut report);
        self.counters.lock().resyncs += 1;
        report
    }

    /// Resolve target handles, skipping charts without the capability.
    fn plan(
        inner: &SyncInner,
        source: &ChartId,
        operation: SyncOperation,
        target_ids: Vec<ChartId>,
    ) -> (Dispatch, usize) {
        let mode = operation.mode();
        let mut skipped = 0;
        let targets = target_ids
            .into_iter()
            .filter_map(|id| {
                let entry = inner.charts.get(&id)?;
                if entry.chart.capabilities().supports(mode) {
                    Some((id, entry.chart.clone()))
                } else {
                    skipped += 1;
                    None
                }
            })
            .collect();
        (
            Dispatch {
                source: source.clone(),
                operation,
                targets,
            },
            skipped,
        )
    }

    fn run(&self, dispatches: Vec<Dispatch>, report: &mut SyncReport) {
        for dispatch in &dispatches {
            report.operations += 1;
            let applied = self.execute(dispatch, report);
            self.record_applied(&dispatch.operation, &applied);
            if !applied.is_empty() {
                self.events.emit(SyncEvent::OperationApplied {
                    source: dispatch.source.clone(),
                    mode: dispatch.operation.mode(),
                    targets: applied.len(),
                });
            }
        }

        let mut counters = self.counters.lock();
        counters.applied += report.applied as u64;
        counters.skipped += report.skipped as u64;
        counters.errors += report.failed as u64;
    }

    /// Call the setter on every target. Returns the charts that accepted it.
    fn execute(&self, dispatch: &Dispatch, report: &mut SyncReport) -> Vec<ChartId> {
        let mode = dispatch.operation.mode();
        let mut applied = Vec::with_capacity(dispatch.targets.len());
        for (chart_id, chart) in &dispatch.targets {
            match apply_operation(chart.as_ref(), &dispatch.operation) {
                Ok(()) => {
                    report.applied += 1;
                    applied.push(chart_id.clone());
                }
                Err(ChartError::Unsupported) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(chart = %chart_id, operation = %mode, error = %e, "Sync operation failed");
                    self.events.emit(SyncEvent::SyncError {
                        operation: mode,
                        chart_id: chart_id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        applied
    }

    fn record_applied(&self, operation: &SyncOperation, applied: &[ChartId]) {
        if applied.is_empty() {
            return;
        }
        let now = Utc::now();
        let mut inner = self.inner.write();
        for chart_id in applied {
            // Unregistered during dispatch.
            if let Some(entry) = inner.charts.get_mut(chart_id) {
                entry.state.apply(operation);
                entry.sync_count += 1;
                entry.last_synced = Some(now);
            }
        }
    }

    // ------------------------------------------------------------------
    // Controls and queries
    // ------------------------------------------------------------------

    pub fn set_sync_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        if !enabled {
            self.queue.lock().clear();
        }
        info!(enabled, "Chart sync toggled");
    }

    pub fn is_sync_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn is_sync_in_progress(&self) -> bool {
        self.sync_in_progress.load(Ordering::Acquire)
    }

    /// Toggle one mode for one chart.
    pub fn set_chart_sync_mode(&self, chart_id: &ChartId, mode: SyncMode, enabled: bool) -> SyncResult<()> {
        if !self.inner.write().groups.set_mode(chart_id, mode, enabled) {
            return Err(SyncError::UnknownChart(chart_id.clone()));
        }
        debug!(chart = %chart_id, %mode, enabled, "Chart sync mode changed");
        Ok(())
    }

    pub fn chart_modes(&self, chart_id: &ChartId) -> Option<SyncModes> {
        self.inner.read().groups.modes(chart_id)
    }

    pub fn registration(&self, chart_id: &ChartId) -> Option<ChartRegistration> {
        let inner = self.inner.read();
        let entry = inner.charts.get(chart_id)?;
        let group_id = inner.groups.group_of(chart_id)?.clone();
        let is_master = inner
            .groups
            .get(&group_id)
            .is_some_and(|g| g.is_master(chart_id));
        Some(ChartRegistration {
            chart_id: chart_id.clone(),
            modes: inner.groups.modes(chart_id)?,
            group_id,
            is_master,
            registered_at: entry.registered_at,
        })
    }

    /// Last known state of `chart_id`.
    pub fn sync_state(&self, chart_id: &ChartId) -> Option<ChartSyncState> {
        self.inner.read().charts.get(chart_id).map(|e| e.state.clone())
    }

    /// Number of operations applied to `chart_id` by other charts.
    pub fn sync_count(&self, chart_id: &ChartId) -> Option<u64> {
        self.inner.read().charts.get(chart_id).map(|e| e.sync_count)
    }

    pub fn group_members(&self, group_id: &GroupId) -> Vec<ChartId> {
        self.inner
            .read()
            .groups
            .get(group_id)
            .map(|g| g.members.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn master_of(&self, group_id: &GroupId) -> Option<ChartId> {
        self.inner.read().groups.get(group_id)?.master.clone()
    }

    pub fn group_of(&self, chart_id: &ChartId) -> Option<GroupId> {
        self.inner.read().groups.group_of(chart_id).cloned()
    }

    pub fn pending_count(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn stats(&self) -> SyncStats {
        let (groups, charts) = {
            let inner = self.inner.read();
            (inner.groups.len(), inner.groups.chart_count())
        };
        let pending = self.pending_count();
        let counters = self.counters.lock();
        SyncStats {
            flushes: counters.flushes,
            operations_applied: counters.applied,
            operations_skipped: counters.skipped,
            errors: counters.errors,
            crosshair_syncs: counters.crosshair_syncs,
            resyncs: counters.resyncs,
            pending,
            groups,
            charts,
        }
    }

    /// Publish current stats as a [`SyncEvent::SyncStats`] event.
    pub fn emit_stats(&self) -> SyncStats {
        let stats = self.stats();
        self.events.emit(SyncEvent::SyncStats(stats.clone()));
        stats
    }
}
