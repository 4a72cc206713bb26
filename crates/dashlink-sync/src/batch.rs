//! Pending sync operations.
//!
//! Keyed by `(source chart, mode)`: a newer report for the same key replaces
//! the pending one, so a flush applies at most one operation per key.

use chrono::{DateTime, Utc};
use dashlink_core::{ChartId, SyncMode, SyncOperation};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct PendingSync {
    pub source: ChartId,
    pub operation: SyncOperation,
    pub timestamp: DateTime<Utc>,
    sequence: u64,
}

/// What [`SyncBatchQueue::push`] did with a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// No entry was pending for the key.
    Added,
    /// A pending entry for the key was replaced.
    Replaced,
    /// Older than the pending entry; dropped.
    Stale,
}

#[derive(Debug, Default)]
pub struct SyncBatchQueue {
    pending: HashMap<(ChartId, SyncMode), PendingSync>,
    next_sequence: u64,
}

impl SyncBatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `operation` from `source`.
    ///
    /// An entry older than the pending one is ignored.
    pub fn push(
        &mut self,
        source: &ChartId,
        operation: SyncOperation,
        timestamp: DateTime<Utc>,
    ) -> PushOutcome {
        let key = (source.clone(), operation.mode());
        if self
            .pending
            .get(&key)
            .is_some_and(|existing| existing.timestamp > timestamp)
        {
            return PushOutcome::Stale;
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let replaced = self
            .pending
            .insert(
                key,
                PendingSync {
                    source: source.clone(),
                    operation,
                    timestamp,
                    sequence,
                },
            )
            .is_some();
        if replaced {
            PushOutcome::Replaced
        } else {
            PushOutcome::Added
        }
    }

    /// Take every pending entry, oldest first.
    pub fn drain(&mut self) -> Vec<PendingSync> {
        let mut entries: Vec<PendingSync> = self.pending.drain().map(|(_, v)| v).collect();
        entries.sort_by_key(|e| (e.timestamp, e.sequence));
        entries
    }

    pub fn get(&self, source: &ChartId, mode: SyncMode) -> Option<&PendingSync> {
        self.pending.get(&(source.clone(), mode))
    }

    /// Drop everything reported by `source`.
    pub fn remove_source(&mut self, source: &ChartId) -> usize {
        let before = self.pending.len();
        self.pending.retain(|(id, _), _| id != source);
        before - self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
