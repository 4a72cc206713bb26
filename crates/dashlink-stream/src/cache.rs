//! Data cache and batching queue.
//!
//! The cache keeps the latest transformed payload per stream key. The batch
//! queue accumulates updates between flush ticks; each key keeps at most
//! `capacity` entries (oldest dropped first) and a flush delivers only the
//! newest one.

use crate::transform::StreamPayload;
use chrono::{DateTime, Utc};
use dashlink_core::StreamKey;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::debug;

/// Latest known payload for one stream.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: StreamPayload,
    pub last_update: DateTime<Utc>,
    /// Number of payloads stored for this key since the entry was created.
    pub update_count: u64,
}

/// Per-stream latest-value cache.
#[derive(Debug, Default)]
pub struct DataCache {
    entries: HashMap<StreamKey, CacheEntry>,
}

impl DataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `payload` as the latest value for `key`; returns the new update count.
    pub fn store(&mut self, key: &StreamKey, payload: StreamPayload, now: DateTime<Utc>) -> u64 {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.payload = payload;
                entry.last_update = now;
                entry.update_count += 1;
                entry.update_count
            }
            None => {
                self.entries.insert(
                    key.clone(),
                    CacheEntry {
                        payload,
                        last_update: now,
                        update_count: 1,
                    },
                );
                1
            }
        }
    }

    pub fn get(&self, key: &StreamKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &StreamKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Evict entries idle for longer than `timeout`. Returns the evicted keys.
    pub fn sweep(&mut self, now: DateTime<Utc>, timeout: Duration) -> Vec<StreamKey> {
        let expired: Vec<StreamKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| {
                (now - entry.last_update)
                    .to_std()
                    .map(|idle| idle > timeout)
                    .unwrap_or(false)
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.entries.remove(key);
        }
        if !expired.is_empty() {
            debug!(evicted = expired.len(), "Cache sweep evicted idle entries");
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Update waiting for the next flush tick.
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    pub payload: StreamPayload,
    pub timestamp: DateTime<Utc>,
    /// Arrival order; breaks timestamp ties.
    pub sequence: u64,
}

/// Bounded per-key queue of pending updates.
#[derive(Debug)]
pub struct BatchQueue {
    capacity: usize,
    pending: HashMap<StreamKey, VecDeque<PendingUpdate>>,
    next_sequence: u64,
}

impl BatchQueue {
    /// `capacity` is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            pending: HashMap::new(),
            next_sequence: 0,
        }
    }

    /// Append an update for `key`, dropping the oldest entry when full.
    pub fn push(&mut self, key: &StreamKey, payload: StreamPayload, timestamp: DateTime<Utc>) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let queue = self.pending.entry(key.clone()).or_default();
        while queue.len() >= self.capacity {
            queue.pop_front();
        }
        queue.push_back(PendingUpdate {
            payload,
            timestamp,
            sequence,
        });
    }

    /// Pending entries for `key`, oldest first.
    pub fn pending(&self, key: &StreamKey) -> Option<&VecDeque<PendingUpdate>> {
        self.pending.get(key)
    }

    /// Take the newest pending update of every key and clear the queue.
    pub fn drain_latest(&mut self) -> Vec<(StreamKey, PendingUpdate)> {
        self.pending
            .drain()
            .filter_map(|(key, queue)| {
                queue
                    .into_iter()
                    .max_by_key(|update| (update.timestamp, update.sequence))
                    .map(|latest| (key, latest))
            })
            .collect()
    }

    /// Drop everything pending for `key`.
    pub fn discard(&mut self, key: &StreamKey) {
        self.pending.remove(key);
    }

    /// Total pending entries across all keys.
    pub fn len(&self) -> usize {
        self.pending.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.values().all(VecDeque::is_empty)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use dashlink_core::Channel;
    use serde_json::json;

    fn key(symbol: &str) -> StreamKey {
        StreamKey::new(symbol, Channel::Other("status".to_string()))
    }

    fn raw(n: i64) -> StreamPayload {
        StreamPayload::Raw(vec![json!(n)])
    }

    #[test]
    fn test_cache_store_counts_updates() {
        let mut cache = DataCache::new();
        let now = Utc::now();
        assert_eq!(cache.store(&key("BTC"), raw(1), now), 1);
        assert_eq!(cache.store(&key("BTC"), raw(2), now), 2);
        assert_eq!(cache.get(&key("BTC")).unwrap().payload, raw(2));
    }

    #[test]
    fn test_cache_sweep_evicts_idle() {
        let mut cache = DataCache::new();
        let now = Utc::now();
        cache.store(&key("OLD"), raw(1), now - ChronoDuration::seconds(120));
        cache.store(&key("NEW"), raw(2), now - ChronoDuration::seconds(5));

        let evicted = cache.sweep(now, Duration::from_secs(60));
        assert_eq!(evicted, vec![key("OLD")]);
        assert!(cache.get(&key("OLD")).is_none());
        assert!(cache.get(&key("NEW")).is_some());
    }

    #[test]
    fn test_batch_latest_wins() {
        let mut queue = BatchQueue::new(10);
        let t1 = Utc::now();
        let t2 = t1 + ChronoDuration::milliseconds(10);
        queue.push(&key("BTC"), raw(1), t1);
        queue.push(&key("BTC"), raw(2), t2);

        let drained = queue.drain_latest();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].1.payload, raw(2));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_batch_latest_by_timestamp_not_arrival() {
        let mut queue = BatchQueue::new(10);
        let t1 = Utc::now();
        let t2 = t1 + ChronoDuration::milliseconds(10);
        queue.push(&key("BTC"), raw(2), t2);
        queue.push(&key("BTC"), raw(1), t1);

        let drained = queue.drain_latest();
        assert_eq!(drained[0].1.payload, raw(2));
    }

    #[test]
    fn test_batch_is_bounded() {
        let mut queue = BatchQueue::new(3);
        let now = Utc::now();
        for n in 0..10 {
            queue.push(&key("BTC"), raw(n), now);
        }
        let pending = queue.pending(&key("BTC")).unwrap();
        assert_eq!(pending.len(), 3);
        assert_eq!(pending.front().unwrap().payload, raw(7));
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_batch_discard() {
        let mut queue = BatchQueue::new(3);
        queue.push(&key("BTC"), raw(1), Utc::now());
        queue.push(&key("ETH"), raw(1), Utc::now());
        queue.discard(&key("BTC"));
        assert_eq!(queue.drain_latest().len(), 1);
    }
}
