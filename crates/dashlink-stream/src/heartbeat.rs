//! Keep-alive tracking for a WebSocket session.
//!
//! A `ping` is due once the connection has been silent for the configured
//! interval; the session is considered dead when no `pong` follows within
//! the timeout.

use std::time::{Duration, Instant};
use tracing::debug;

/// Per-session heartbeat state.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    timeout: Duration,
    last_message: Instant,
    ping_sent_at: Option<Instant>,
    last_rtt: Option<Duration>,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            last_message: Instant::now(),
            ping_sent_at: None,
            last_rtt: None,
        }
    }

    /// Any inbound frame counts as activity.
    pub fn record_message(&mut self) {
        self.last_message = Instant::now();
    }

    pub fn record_ping(&mut self) {
        self.ping_sent_at = Some(Instant::now());
    }

    pub fn record_pong(&mut self) {
        if let Some(sent) = self.ping_sent_at.take() {
            let rtt = sent.elapsed();
            self.last_rtt = Some(rtt);
            debug!(rtt_ms = rtt.as_millis() as u64, "Received pong");
        }
    }

    pub fn waiting_for_pong(&self) -> bool {
        self.ping_sent_at.is_some()
    }

    /// True when a ping went unanswered for longer than the timeout.
    pub fn is_timed_out(&self) -> bool {
        self.ping_sent_at
            .is_some_and(|sent| sent.elapsed() > self.timeout)
    }

    /// True when the session has been idle for the interval and no ping is outstanding.
    pub fn should_send_ping(&self) -> bool {
        !self.waiting_for_pong() && self.last_message.elapsed() >= self.interval
    }

    /// How often the session loop should evaluate the heartbeat.
    pub fn check_period(&self) -> Duration {
        (self.interval / 2).max(Duration::from_millis(10))
    }

    pub fn last_rtt(&self) -> Option<Duration> {
        self.last_rtt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let hb = HeartbeatMonitor::new(Duration::from_secs(25), Duration::from_secs(10));
        assert!(!hb.is_timed_out());
        assert!(!hb.waiting_for_pong());
        assert!(!hb.should_send_ping());
    }

    #[test]
    fn test_ping_pong_cycle() {
        let mut hb = HeartbeatMonitor::new(Duration::ZERO, Duration::from_secs(10));
        assert!(hb.should_send_ping());

        hb.record_ping();
        assert!(hb.waiting_for_pong());
        assert!(!hb.should_send_ping());

        hb.record_pong();
        assert!(!hb.waiting_for_pong());
        assert!(hb.last_rtt().is_some());
    }

    #[test]
    fn test_timeout_after_unanswered_ping() {
        let mut hb = HeartbeatMonitor::new(Duration::ZERO, Duration::ZERO);
        hb.record_ping();
        std::thread::sleep(Duration::from_millis(2));
        assert!(hb.is_timed_out());
    }
}
