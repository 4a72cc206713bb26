//! Reconnection controller.
//!
//! Connection state machine:
//!
//! ```text
//! Disconnected ──▶ Connecting ──▶ Connected ──(clean close)──▶ Disconnected
//!                      ▲              │
//!                      │        (error / unclean close)
//!                      │              ▼
//!                      └───────── Reconnecting
//! ```
//!
//! Failed attempts back off exponentially (`base × 2^attempt`). Once
//! `max_attempts` failures accumulate the controller is exhausted and stays
//! idle until [`ReconnectController::reset`] is called.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do after a failed or dropped connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Reconnect after `delay`. `attempt` counts from 1.
    Retry { attempt: u32, delay: Duration },
    /// The attempt budget just ran out. Returned exactly once.
    GiveUp { attempts: u32 },
    /// Already exhausted; nothing is scheduled.
    Halted,
}

/// Tracks connection state and the reconnect attempt budget.
#[derive(Debug, Clone)]
pub struct ReconnectController {
    state: ConnectionState,
    attempts: u32,
    base_delay: Duration,
    max_attempts: u32,
    exhausted: bool,
}

impl ReconnectController {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            base_delay,
            max_attempts,
            exhausted: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Delay before reconnect attempt number `attempt` (zero based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Enter `Connecting`. Returns false when exhausted.
    pub fn begin_connect(&mut self) -> bool {
        if self.exhausted {
            debug!("Reconnect budget exhausted, not connecting");
            return false;
        }
        self.state = ConnectionState::Connecting;
        true
    }

    /// Connection established: the attempt counter resets.
    pub fn on_connected(&mut self) {
        if self.attempts > 0 {
            info!(attempts = self.attempts, "Reconnected");
        }
        self.state = ConnectionState::Connected;
        self.attempts = 0;
    }

    /// Clean close: no reconnect is scheduled.
    pub fn on_clean_close(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    /// Error or unclean close.
    pub fn on_failure(&mut self) -> ReconnectDecision {
        if self.exhausted {
            return ReconnectDecision::Halted;
        }

        if self.attempts < self.max_attempts {
            let delay = self.backoff_delay(self.attempts);
            self.attempts += 1;
            self.state = ConnectionState::Reconnecting;
            debug!(
                attempt = self.attempts,
                delay_ms = delay.as_millis() as u64,
                "Reconnect scheduled"
            );
            ReconnectDecision::Retry {
                attempt: self.attempts,
                delay,
            }
        } else {
            self.exhausted = true;
            self.state = ConnectionState::Disconnected;
            warn!(attempts = self.attempts, "Max reconnection attempts reached");
            ReconnectDecision::GiveUp {
                attempts: self.attempts,
            }
        }
    }

    /// Clear the attempt budget so an explicit reconnect can proceed.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.exhausted = false;
        self.state = ConnectionState::Disconnected;
    }
}
