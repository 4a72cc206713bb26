//! Multiplexer lifecycle and data events.

use crate::consumer::ConsumerError;
use dashlink_core::{ConsumerId, StreamKey};
use serde::Serialize;

/// Events published on the multiplexer's event bus.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    Connecting,
    /// Socket open; `resubscribed` stream keys were sent in subscribe frames.
    Connected { resubscribed: usize },
    Disconnected {
        clean: bool,
        code: Option<u16>,
        reason: String,
    },
    ConnectionError { message: String },
    Reconnecting { attempt: u32, delay_ms: u64 },
    /// Emitted once when the reconnect budget runs out.
    MaxReconnectAttemptsReached { attempts: u32 },
    SubscriptionConfirmed { key: StreamKey },
    /// Error event sent by the provider.
    ProviderError {
        code: Option<String>,
        message: String,
    },
    DataReceived { key: StreamKey, update_count: u64 },
    ChartUpdated {
        consumer_id: ConsumerId,
        key: StreamKey,
    },
    ChartUpdateError {
        consumer_id: ConsumerId,
        key: StreamKey,
        #[serde(serialize_with = "serialize_display")]
        error: ConsumerError,
    },
    /// A frame could not be parsed or transformed.
    MessageError {
        key: Option<StreamKey>,
        error: String,
    },
}

impl StreamEvent {
    /// Short name, used as a metric label.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected { .. } => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::ConnectionError { .. } => "connection_error",
            Self::Reconnecting { .. } => "reconnecting",
            Self::MaxReconnectAttemptsReached { .. } => "max_reconnect_attempts_reached",
            Self::SubscriptionConfirmed { .. } => "subscription_confirmed",
            Self::ProviderError { .. } => "provider_error",
            Self::DataReceived { .. } => "data_received",
            Self::ChartUpdated { .. } => "chart_updated",
            Self::ChartUpdateError { .. } => "chart_update_error",
            Self::MessageError { .. } => "message_error",
        }
    }
}

fn serialize_display<S: serde::Serializer>(
    error: &ConsumerError,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}
