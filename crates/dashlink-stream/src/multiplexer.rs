//! Stream multiplexer.
//!
//! Composes the subscription registry, data cache, batch queue and
//! reconnection controller behind one `&self` API. Consumers bind to stream
//! keys; inbound frames are transformed, cached and queued; the flush tick
//! delivers the newest pending payload of each key to every bound consumer.
//!
//! All bookkeeping lives behind one mutex. The lock is never held while a
//! consumer callback runs or a frame is queued on the transport, so
//! consumers may call back into the multiplexer from `update_data`.

use crate::cache::{BatchQueue, CacheEntry, DataCache, PendingUpdate};
use crate::config::StreamConfig;
use crate::connection::{SessionEnd, TransportEvent};
use crate::consumer::{ConsumerError, StreamConsumer, StreamUpdate};
use crate::events::StreamEvent;
use crate::message::{pong_reply, SubscriptionArg, WsMessage, WsRequest};
use crate::reconnect::{ConnectionState, ReconnectController, ReconnectDecision};
use crate::subscription::{SubscribeOutcome, SubscriptionRegistry, UnsubscribeOutcome};
use crate::transform::transform;
use crate::error::WsResult;
use crate::transport::Transport;
use chrono::{DateTime, Utc};
use dashlink_core::{ConsumerId, EventBus, StreamKey};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info, trace, warn};

/// Weight of the newest sample in the latency moving average.
const LATENCY_EMA_ALPHA: f64 = 0.1;

/// Most subscription args sent in one resubscribe frame.
const RESUBSCRIBE_CHUNK: usize = 50;

/// Record of one consumer's bindings, returned by [`StreamMultiplexer::bind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingHandle {
    pub consumer_id: ConsumerId,
    pub streams: Vec<StreamKey>,
}

struct ConsumerBinding {
    consumer: Arc<dyn StreamConsumer>,
    streams: HashSet<StreamKey>,
    last_delivered: Option<DateTime<Utc>>,
    delivery_count: u64,
    error_count: u64,
}

impl ConsumerBinding {
    fn handle(&self, consumer_id: &ConsumerId) -> BindingHandle {
        let mut streams: Vec<StreamKey> = self.streams.iter().cloned().collect();
        streams.sort_by_key(|k| k.to_string());
        BindingHandle {
            consumer_id: consumer_id.clone(),
            streams,
        }
    }
}

/// Delivery counters of one consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub streams: usize,
    pub delivery_count: u64,
    pub error_count: u64,
    pub last_delivered: Option<DateTime<Utc>>,
}

/// Snapshot of multiplexer health.
#[derive(Debug, Clone, Serialize)]
pub struct MultiplexerStats {
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub messages_received: u64,
    pub message_errors: u64,
    pub avg_latency_ms: f64,
    pub subscriptions: usize,
    pub confirmed_subscriptions: usize,
    pub cache_entries: usize,
    pub pending_updates: usize,
    pub consumers: usize,
}

/// Outcome of one flush tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Stream keys that had pending updates.
    pub keys: usize,
    pub delivered: usize,
    pub failed: usize,
}

struct MultiplexerInner {
    registry: SubscriptionRegistry,
    cache: DataCache,
    batch: BatchQueue,
    reconnect: ReconnectController,
    bindings: HashMap<ConsumerId, ConsumerBinding>,
    messages_received: u64,
    message_errors: u64,
    avg_latency_ms: f64,
}

/// Stream multiplexer over a single transport.
pub struct StreamMultiplexer {
    config: StreamConfig,
    transport: Arc<dyn Transport>,
    inner: Mutex<MultiplexerInner>,
    events: EventBus<StreamEvent>,
    reconnect_notify: Notify,
}

impl StreamMultiplexer {
    pub fn new(config: StreamConfig, transport: Arc<dyn Transport>) -> Self {
        let inner = MultiplexerInner {
            registry: SubscriptionRegistry::new(),
            cache: DataCache::new(),
            batch: BatchQueue::new(config.batch_size),
            reconnect: ReconnectController::new(
                config.reconnect_base_delay(),
                config.max_reconnect_attempts,
            ),
            bindings: HashMap::new(),
            messages_received: 0,
            message_errors: 0,
            avg_latency_ms: 0.0,
        };
        Self {
            config,
            transport,
            inner: Mutex::new(inner),
            events: EventBus::default(),
            reconnect_notify: Notify::new(),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Listen to multiplexer events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------
    // Consumer binding
    // ------------------------------------------------------------------

    /// Bind `consumer` to `key`.
    ///
    /// Creates the subscription if absent and sends subscribe when connected.
    /// Binding the same consumer again is idempotent and merges stream keys;
    /// the latest consumer reference replaces the stored one.
    pub fn bind(
        &self,
        consumer_id: ConsumerId,
        consumer: Arc<dyn StreamConsumer>,
        key: StreamKey,
    ) -> BindingHandle {
        let (outcome, connected, handle) = {
            let mut inner = self.inner.lock();
            let outcome = inner.registry.subscribe(&key, &consumer_id);
            let binding = inner
                .bindings
                .entry(consumer_id.clone())
                .or_insert_with(|| ConsumerBinding {
                    consumer: consumer.clone(),
                    streams: HashSet::new(),
                    last_delivered: None,
                    delivery_count: 0,
                    error_count: 0,
                });
            binding.consumer = consumer;
            binding.streams.insert(key.clone());
            let handle = binding.handle(&consumer_id);
            let connected = inner.reconnect.state() == ConnectionState::Connected;
            (outcome, connected, handle)
        };

        match outcome {
            SubscribeOutcome::Created => {
                info!(key = %key, consumer = %consumer_id, "Stream subscription created");
                if connected {
                    self.send_request(WsRequest::subscribe(vec![self.arg(&key)]));
                }
            }
            SubscribeOutcome::Joined => {
                debug!(key = %key, consumer = %consumer_id, "Consumer joined stream");
            }
            SubscribeOutcome::AlreadySubscribed => {
                trace!(key = %key, consumer = %consumer_id, "Duplicate bind ignored");
            }
        }
        handle
    }

    /// Release every stream held by `consumer_id`. Returns the keys whose
    /// subscription was removed.
    pub fn unbind(&self, consumer_id: &ConsumerId) -> Vec<StreamKey> {
        let (removed, connected) = {
            let mut inner = self.inner.lock();
            let Some(binding) = inner.bindings.remove(consumer_id) else {
                return Vec::new();
            };
            let mut removed = Vec::new();
            for key in binding.streams {
                if Self::release(&mut inner, &key, consumer_id) {
                    removed.push(key);
                }
            }
            let connected = inner.reconnect.state() == ConnectionState::Connected;
            (removed, connected)
        };

        info!(consumer = %consumer_id, released = removed.len(), "Consumer unbound");
        if connected && !removed.is_empty() {
            for key in &removed {
                self.send_request(WsRequest::unsubscribe(vec![self.arg(key)]));
            }
        }
        removed
    }

    /// Release a single stream held by `consumer_id`. Returns true when the
    /// subscription itself was removed.
    pub fn unbind_stream(&self, consumer_id: &ConsumerId, key: &StreamKey) -> bool {
        let (removed, connected) = {
            let mut inner = self.inner.lock();
            let Some(binding) = inner.bindings.get_mut(consumer_id) else {
                return false;
            };
            if !binding.streams.remove(key) {
                return false;
            }
            if binding.streams.is_empty() {
                inner.bindings.remove(consumer_id);
            }
            let removed = Self::release(&mut inner, key, consumer_id);
            let connected = inner.reconnect.state() == ConnectionState::Connected;
            (removed, connected)
        };

        if removed && connected {
            self.send_request(WsRequest::unsubscribe(vec![self.arg(key)]));
        }
        removed
    }

    /// Drop `consumer_id` from `key`; clears cached and pending data when the
    /// subscription goes away.
    fn release(inner: &mut MultiplexerInner, key: &StreamKey, consumer_id: &ConsumerId) -> bool {
        match inner.registry.unsubscribe(key, consumer_id) {
            UnsubscribeOutcome::Removed => {
                inner.cache.remove(key);
                inner.batch.discard(key);
                info!(key = %key, "Stream subscription removed");
                true
            }
            UnsubscribeOutcome::Left | UnsubscribeOutcome::NotSubscribed => false,
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Latest payload for `key`, if any.
    pub fn get_cached(&self, key: &StreamKey) -> Option<CacheEntry> {
        self.inner.lock().cache.get(key).cloned()
    }

    /// Pending updates for `key`, oldest first.
    pub fn pending(&self, key: &StreamKey) -> Vec<PendingUpdate> {
        self.inner
            .lock()
            .batch
            .pending(key)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, key: &StreamKey) -> bool {
        self.inner.lock().registry.contains(key)
    }

    pub fn is_confirmed(&self, key: &StreamKey) -> bool {
        self.inner
            .lock()
            .registry
            .get(key)
            .is_some_and(|s| s.confirmed)
    }

    pub fn subscribers(&self, key: &StreamKey) -> Vec<ConsumerId> {
        self.inner.lock().registry.subscribers(key)
    }

    pub fn consumer_stats(&self, consumer_id: &ConsumerId) -> Option<ConsumerStats> {
        self.inner.lock().bindings.get(consumer_id).map(|b| ConsumerStats {
            streams: b.streams.len(),
            delivery_count: b.delivery_count,
            error_count: b.error_count,
            last_delivered: b.last_delivered,
        })
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.lock().reconnect.state()
    }

    /// Connected and the transport reports open.
    pub fn is_healthy(&self) -> bool {
        self.connection_state() == ConnectionState::Connected && self.transport.is_open()
    }

    pub fn stats(&self) -> MultiplexerStats {
        let inner = self.inner.lock();
        MultiplexerStats {
            state: inner.reconnect.state(),
            reconnect_attempts: inner.reconnect.attempts(),
            messages_received: inner.messages_received,
            message_errors: inner.message_errors,
            avg_latency_ms: inner.avg_latency_ms,
            subscriptions: inner.registry.len(),
            confirmed_subscriptions: inner.registry.confirmed_count(),
            cache_entries: inner.cache.len(),
            pending_updates: inner.batch.len(),
            consumers: inner.bindings.len(),
        }
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Enter `Connecting`. Returns false once the reconnect budget is
    /// exhausted; [`StreamMultiplexer::reconnect`] clears it.
    pub fn begin_connect(&self) -> bool {
        let allowed = self.inner.lock().reconnect.begin_connect();
        if allowed {
            self.events.emit(StreamEvent::Connecting);
        }
        allowed
    }

    /// Feed a notification from the running session.
    pub fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => self.on_opened(),
            TransportEvent::Message {
                message,
                received_at,
            } => self.handle_message(message, received_at),
            TransportEvent::Malformed(e) => self.record_message_error(None, e.to_string()),
        }
    }

    /// Parse and handle one inbound text frame.
    pub fn handle_text(&self, text: &str) {
        let received_at = Instant::now();
        match WsMessage::parse(text) {
            Ok(message) => self.handle_message(message, received_at),
            Err(e) => self.record_message_error(None, e.to_string()),
        }
    }

    /// Ask the running session to close cleanly. The connection loop then
    /// idles until [`StreamMultiplexer::reconnect`].
    pub fn disconnect(&self) -> WsResult<()> {
        info!("Local disconnect requested");
        self.transport.close()
    }

    fn on_opened(&self) {
        let keys = {
            let mut inner = self.inner.lock();
            inner.reconnect.on_connected();
            inner.registry.active_keys()
        };

        // The session drains the outbound queue only after this returns, so
        // keys go out in a few multi-arg frames. Acks are not awaited.
        let resubscribed: usize = keys
            .chunks(RESUBSCRIBE_CHUNK)
            .filter_map(|chunk| {
                let args = chunk.iter().map(|key| self.arg(key)).collect();
                self.send_request(WsRequest::subscribe(args))
                    .then_some(chunk.len())
            })
            .sum();

        info!(resubscribed, "Stream connected");
        self.events.emit(StreamEvent::Connected { resubscribed });
    }

    fn handle_message(&self, message: WsMessage, received_at: Instant) {
        match message {
            WsMessage::Ping(payload) => {
                if let Err(e) = self.transport.send_text(pong_reply(payload.as_ref())) {
                    warn!(error = %e, "Failed to answer ping");
                }
            }
            WsMessage::Pong => trace!("Pong received"),
            WsMessage::Event(event) => {
                if event.is_subscribe_ack() {
                    let Some(key) = event.arg.as_ref().map(SubscriptionArg::stream_key) else {
                        return;
                    };
                    if self.inner.lock().registry.mark_confirmed(&key) {
                        debug!(key = %key, "Subscription confirmed");
                        self.events.emit(StreamEvent::SubscriptionConfirmed { key });
                    }
                } else if event.is_unsubscribe_ack() {
                    debug!(arg = ?event.arg, "Unsubscribe acknowledged");
                } else if event.is_error() {
                    let message = event.msg.unwrap_or_default();
                    warn!(code = ?event.code, %message, "Provider error event");
                    self.events.emit(StreamEvent::ProviderError {
                        code: event.code,
                        message,
                    });
                } else {
                    trace!(event = %event.event, "Control event");
                }
            }
            WsMessage::Data(data) => {
                let key = data.stream_key();
                if !self.inner.lock().registry.contains(&key) {
                    trace!(key = %key, "Data for unsubscribed stream dropped");
                    return;
                }

                let payload = match transform(&key.channel, &data.data) {
                    Ok(payload) => payload,
                    Err(e) => {
                        self.record_message_error(Some(key), e.to_string());
                        return;
                    }
                };

                let now = Utc::now();
                let update_count = {
                    let mut inner = self.inner.lock();
                    // Unbound while transforming.
                    if !inner.registry.contains(&key) {
                        return;
                    }
                    let update_count = inner.cache.store(&key, payload.clone(), now);
                    inner.batch.push(&key, payload, now);
                    inner.messages_received += 1;
                    let sample_ms = received_at.elapsed().as_secs_f64() * 1000.0;
                    inner.avg_latency_ms = inner.avg_latency_ms * (1.0 - LATENCY_EMA_ALPHA)
                        + sample_ms * LATENCY_EMA_ALPHA;
                    update_count
                };

                self.events
                    .emit(StreamEvent::DataReceived { key, update_count });
            }
        }
    }

    fn record_message_error(&self, key: Option<StreamKey>, error: String) {
        self.inner.lock().message_errors += 1;
        warn!(key = ?key.as_ref().map(ToString::to_string), %error, "Message error");
        self.events.emit(StreamEvent::MessageError { key, error });
    }

    /// Apply the end of a session to the connection state.
    ///
    /// Returns `None` after a clean close or shutdown (nothing scheduled),
    /// otherwise the reconnect decision.
    pub fn handle_session_end(&self, end: SessionEnd) -> Option<ReconnectDecision> {
        let mut inner = self.inner.lock();
        inner.registry.reset_confirmations();

        let (code, reason) = match end {
            SessionEnd::Clean { code, reason } => {
                inner.reconnect.on_clean_close();
                drop(inner);
                info!(code, %reason, "Stream disconnected cleanly");
                self.events.emit(StreamEvent::Disconnected {
                    clean: true,
                    code: Some(code),
                    reason,
                });
                return None;
            }
            SessionEnd::Shutdown => {
                inner.reconnect.on_clean_close();
                drop(inner);
                self.events.emit(StreamEvent::Disconnected {
                    clean: true,
                    code: None,
                    reason: "shutdown".to_string(),
                });
                return None;
            }
            SessionEnd::Closed { code, reason } => (Some(code), reason),
            SessionEnd::Failed(e) => (None, e.to_string()),
        };

        let decision = inner.reconnect.on_failure();
        drop(inner);

        match code {
            Some(code) => self.events.emit(StreamEvent::Disconnected {
                clean: false,
                code: Some(code),
                reason,
            }),
            None => self
                .events
                .emit(StreamEvent::ConnectionError { message: reason }),
        };

        match decision {
            ReconnectDecision::Retry { attempt, delay } => {
                info!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");
                self.events.emit(StreamEvent::Reconnecting {
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                });
            }
            ReconnectDecision::GiveUp { attempts } => {
                warn!(attempts, "Max reconnect attempts reached, giving up");
                self.events
                    .emit(StreamEvent::MaxReconnectAttemptsReached { attempts });
            }
            ReconnectDecision::Halted => {}
        }
        Some(decision)
    }

    /// Clear the reconnect budget and wake the connection loop.
    pub fn reconnect(&self) {
        self.inner.lock().reconnect.reset();
        info!("Explicit reconnect requested");
        self.reconnect_notify.notify_one();
    }

    /// Resolves when [`StreamMultiplexer::reconnect`] is called.
    pub async fn reconnect_requested(&self) {
        self.reconnect_notify.notified().await;
    }

    // ------------------------------------------------------------------
    // Periodic work
    // ------------------------------------------------------------------

    /// Deliver the newest pending update of every key to its consumers.
    pub fn flush(&self) -> FlushReport {
        let deliveries = {
            let mut inner = self.inner.lock();
            let drained = inner.batch.drain_latest();
            drained
                .into_iter()
                .map(|(key, pending)| {
                    let targets: Vec<(ConsumerId, Arc<dyn StreamConsumer>)> = inner
                        .registry
                        .subscribers(&key)
                        .into_iter()
                        .filter_map(|id| {
                            let consumer = inner.bindings.get(&id)?.consumer.clone();
                            Some((id, consumer))
                        })
                        .collect();
                    let update = StreamUpdate {
                        key,
                        payload: pending.payload,
                        timestamp: pending.timestamp,
                    };
                    (update, targets)
                })
                .collect::<Vec<_>>()
        };

        let mut report = FlushReport {
            keys: deliveries.len(),
            ..Default::default()
        };
        let mut outcomes: Vec<(ConsumerId, Result<(), ConsumerError>)> = Vec::new();

        for (update, targets) in &deliveries {
            for (consumer_id, consumer) in targets {
                let result = consumer.update_data(update);
                match &result {
                    Ok(()) => {
                        report.delivered += 1;
                        self.events.emit(StreamEvent::ChartUpdated {
                            consumer_id: consumer_id.clone(),
                            key: update.key.clone(),
                        });
                    }
                    Err(e) => {
                        report.failed += 1;
                        warn!(consumer = %consumer_id, key = %update.key, error = %e, "Consumer update failed");
                        self.events.emit(StreamEvent::ChartUpdateError {
                            consumer_id: consumer_id.clone(),
                            key: update.key.clone(),
                            error: e.clone(),
                        });
                    }
                }
                outcomes.push((consumer_id.clone(), result));
            }
        }

        if !outcomes.is_empty() {
            let now = Utc::now();
            let mut inner = self.inner.lock();
            for (consumer_id, result) in outcomes {
                // The consumer may have unbound during delivery.
                let Some(binding) = inner.bindings.get_mut(&consumer_id) else {
                    continue;
                };
                match result {
                    Ok(()) => {
                        binding.delivery_count += 1;
                        binding.last_delivered = Some(now);
                    }
                    Err(_) => binding.error_count += 1,
                }
            }
        }

        report
    }

    /// Evict cache entries idle for longer than the cache timeout.
    pub fn sweep_cache(&self, now: DateTime<Utc>) -> Vec<StreamKey> {
        self.inner
            .lock()
            .cache
            .sweep(now, self.config.cache_timeout())
    }

    // ------------------------------------------------------------------
    // Wire helpers
    // ------------------------------------------------------------------

    fn arg(&self, key: &StreamKey) -> SubscriptionArg {
        SubscriptionArg::new(self.config.inst_type, key)
    }

    fn send_request(&self, request: WsRequest) -> bool {
        let text = match request.to_text() {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, op = %request.op, "Failed to encode request");
                return false;
            }
        };
        match self.transport.send_text(text) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, op = %request.op, "Failed to send request");
                false
            }
        }
    }
}
