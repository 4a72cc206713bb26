//! Subscription registry.
//!
//! Maps each stream key to the set of consumers requesting it. A subscription
//! exists exactly as long as its subscriber set is non-empty: the first
//! subscriber creates it and the last one to leave removes it. The caller
//! turns `Created` / `Removed` outcomes into subscribe / unsubscribe frames.

use chrono::{DateTime, Utc};
use dashlink_core::{ConsumerId, StreamKey};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// One active stream subscription.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub key: StreamKey,
    pub subscribers: HashSet<ConsumerId>,
    /// Set when the provider acknowledged the subscribe request.
    pub confirmed: bool,
    /// Informational; see `Channel::target_frequency_ms`.
    pub target_frequency_ms: u64,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl Subscription {
    fn new(key: StreamKey) -> Self {
        Self {
            target_frequency_ms: key.channel.target_frequency_ms(),
            key,
            subscribers: HashSet::new(),
            confirmed: false,
            created_at: Utc::now(),
            confirmed_at: None,
        }
    }
}

/// Result of adding a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// First subscriber; a subscribe frame must be sent.
    Created,
    /// Joined an existing subscription.
    Joined,
    /// The consumer was already subscribed.
    AlreadySubscribed,
}

/// Result of removing a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    /// Last subscriber left; the subscription is gone and an unsubscribe
    /// frame must be sent.
    Removed,
    /// Other subscribers remain.
    Left,
    /// The consumer was not subscribed to this key.
    NotSubscribed,
}

/// Reference-counted subscription registry.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subscriptions: HashMap<StreamKey, Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `consumer` to the subscribers of `key`.
    pub fn subscribe(&mut self, key: &StreamKey, consumer: &ConsumerId) -> SubscribeOutcome {
        let created = !self.subscriptions.contains_key(key);
        let subscription = self
            .subscriptions
            .entry(key.clone())
            .or_insert_with(|| Subscription::new(key.clone()));

        if !subscription.subscribers.insert(consumer.clone()) {
            return SubscribeOutcome::AlreadySubscribed;
        }

        debug!(
            key = %key,
            consumer = %consumer,
            subscribers = subscription.subscribers.len(),
            "Subscriber added"
        );

        if created {
            SubscribeOutcome::Created
        } else {
            SubscribeOutcome::Joined
        }
    }

    /// Remove `consumer` from the subscribers of `key`.
    pub fn unsubscribe(&mut self, key: &StreamKey, consumer: &ConsumerId) -> UnsubscribeOutcome {
        let Some(subscription) = self.subscriptions.get_mut(key) else {
            return UnsubscribeOutcome::NotSubscribed;
        };

        if !subscription.subscribers.remove(consumer) {
            return UnsubscribeOutcome::NotSubscribed;
        }

        if subscription.subscribers.is_empty() {
            self.subscriptions.remove(key);
            debug!(key = %key, "Last subscriber left, subscription removed");
            UnsubscribeOutcome::Removed
        } else {
            UnsubscribeOutcome::Left
        }
    }

    pub fn get(&self, key: &StreamKey) -> Option<&Subscription> {
        self.subscriptions.get(key)
    }

    pub fn contains(&self, key: &StreamKey) -> bool {
        self.subscriptions.contains_key(key)
    }

    /// Current subscribers of `key` (empty if not subscribed).
    pub fn subscribers(&self, key: &StreamKey) -> Vec<ConsumerId> {
        self.subscriptions
            .get(key)
            .map(|s| s.subscribers.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Record the provider's subscribe ack. Returns false for unknown keys.
    pub fn mark_confirmed(&mut self, key: &StreamKey) -> bool {
        match self.subscriptions.get_mut(key) {
            Some(subscription) => {
                subscription.confirmed = true;
                subscription.confirmed_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    /// Clear every confirmation (called when the connection drops).
    pub fn reset_confirmations(&mut self) {
        for subscription in self.subscriptions.values_mut() {
            subscription.confirmed = false;
            subscription.confirmed_at = None;
        }
    }

    /// Keys of all active subscriptions.
    pub fn active_keys(&self) -> Vec<StreamKey> {
        self.subscriptions.keys().cloned().collect()
    }

    pub fn confirmed_count(&self) -> usize {
        self.subscriptions.values().filter(|s| s.confirmed).count()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashlink_core::Channel;

    fn key(symbol: &str) -> StreamKey {
        StreamKey::new(symbol, Channel::Ticker)
    }

    #[test]
    fn test_first_subscriber_creates() {
        let mut registry = SubscriptionRegistry::new();
        let c1 = ConsumerId::from("c1");
        let c2 = ConsumerId::from("c2");

        assert_eq!(registry.subscribe(&key("BTC"), &c1), SubscribeOutcome::Created);
        assert_eq!(registry.subscribe(&key("BTC"), &c2), SubscribeOutcome::Joined);
        assert_eq!(
            registry.subscribe(&key("BTC"), &c1),
            SubscribeOutcome::AlreadySubscribed
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.subscribers(&key("BTC")).len(), 2);
    }

    #[test]
    fn test_last_subscriber_removes() {
        let mut registry = SubscriptionRegistry::new();
        let c1 = ConsumerId::from("c1");
        let c2 = ConsumerId::from("c2");
        registry.subscribe(&key("BTC"), &c1);
        registry.subscribe(&key("BTC"), &c2);

        assert_eq!(registry.unsubscribe(&key("BTC"), &c1), UnsubscribeOutcome::Left);
        assert!(registry.contains(&key("BTC")));
        assert_eq!(registry.unsubscribe(&key("BTC"), &c2), UnsubscribeOutcome::Removed);
        assert!(!registry.contains(&key("BTC")));
        assert_eq!(
            registry.unsubscribe(&key("BTC"), &c2),
            UnsubscribeOutcome::NotSubscribed
        );
    }

    #[test]
    fn test_exists_iff_subscribers_non_empty() {
        let mut registry = SubscriptionRegistry::new();
        let consumers: Vec<ConsumerId> = (0..4).map(|i| ConsumerId::new(format!("c{i}"))).collect();
        let keys = [key("BTC"), key("ETH"), key("SOL")];

        // Deterministic interleaving of binds and unbinds.
        for step in 0..200usize {
            let k = &keys[step % keys.len()];
            let c = &consumers[(step * 7 + step / 3) % consumers.len()];
            if (step * 13) % 5 < 3 {
                registry.subscribe(k, c);
            } else {
                registry.unsubscribe(k, c);
            }

            for k in &keys {
                let exists = registry.contains(k);
                let has_subscribers = !registry.subscribers(k).is_empty();
                assert_eq!(exists, has_subscribers, "invariant broken at step {step}");
            }
        }
    }

    #[test]
    fn test_confirmation_tracking() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(&key("BTC"), &ConsumerId::from("c1"));

        assert!(registry.mark_confirmed(&key("BTC")));
        assert!(!registry.mark_confirmed(&key("ETH")));
        assert_eq!(registry.confirmed_count(), 1);

        registry.reset_confirmations();
        assert_eq!(registry.confirmed_count(), 0);
        assert!(!registry.get(&key("BTC")).unwrap().confirmed);
    }
}
