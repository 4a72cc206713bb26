//! Consumer contract.
//!
//! A consumer is anything that renders stream data (typically a chart).
//! Delivery happens on the flush tick with the newest payload of each
//! stream the consumer is bound to.

use crate::transform::StreamPayload;
use chrono::{DateTime, Utc};
use dashlink_core::StreamKey;
use thiserror::Error;

/// One delivered update.
#[derive(Debug, Clone)]
pub struct StreamUpdate {
    pub key: StreamKey,
    pub payload: StreamPayload,
    /// When the originating frame was received.
    pub timestamp: DateTime<Utc>,
}

/// Failure reported by a consumer. Isolated to that consumer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsumerError {
    #[error("Update rejected: {0}")]
    Rejected(String),
    #[error("Consumer unavailable")]
    Unavailable,
}

/// Receives stream updates.
pub trait StreamConsumer: Send + Sync {
    fn update_data(&self, update: &StreamUpdate) -> Result<(), ConsumerError>;
}

impl<F> StreamConsumer for F
where
    F: Fn(&StreamUpdate) -> Result<(), ConsumerError> + Send + Sync,
{
    fn update_data(&self, update: &StreamUpdate) -> Result<(), ConsumerError> {
        self(update)
    }
}
