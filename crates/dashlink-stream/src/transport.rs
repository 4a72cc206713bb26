//! Transport seam between the multiplexer and the socket.
//!
//! The multiplexer only needs to push text frames, request a clean close and
//! know whether the socket is open. [`ChannelTransport`] implements this over the outbound
//! queue drained by the connection session, so sends never block and are
//! safe across reconnects.

use crate::error::{WsError, WsResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Outbound frame to be written by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsOutbound {
    /// Text frame (subscriptions, pong replies).
    Text(String),
    /// Close the session cleanly.
    Close,
}

/// Minimal transport contract used by the multiplexer.
pub trait Transport: Send + Sync {
    /// Queue a text frame. Fails with [`WsError::NotConnected`] while closed;
    /// frames are never buffered across a disconnect.
    fn send_text(&self, text: String) -> WsResult<()>;

    /// Ask the session to close cleanly. Fails with
    /// [`WsError::NotConnected`] while closed.
    fn close(&self) -> WsResult<()>;

    /// Whether the underlying socket is currently open.
    fn is_open(&self) -> bool;
}

/// Channel-backed transport handle.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<WsOutbound>,
    open: Arc<AtomicBool>,
}

impl ChannelTransport {
    pub fn new(tx: mpsc::Sender<WsOutbound>, open: Arc<AtomicBool>) -> Self {
        Self { tx, open }
    }

    fn enqueue(&self, frame: WsOutbound) -> WsResult<()> {
        if !self.is_open() {
            return Err(WsError::NotConnected);
        }
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => WsError::SendFailed("outbound buffer full".to_string()),
            TrySendError::Closed(_) => WsError::NotConnected,
        })
    }
}

impl Transport for ChannelTransport {
    fn send_text(&self, text: String) -> WsResult<()> {
        self.enqueue(WsOutbound::Text(text))
    }

    fn close(&self) -> WsResult<()> {
        self.enqueue(WsOutbound::Close)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_rejected_while_closed() {
        let (tx, mut rx) = mpsc::channel(4);
        let open = Arc::new(AtomicBool::new(false));
        let transport = ChannelTransport::new(tx, open.clone());

        assert!(matches!(
            transport.send_text("x".to_string()),
            Err(WsError::NotConnected)
        ));
        assert!(rx.try_recv().is_err(), "nothing may be queued while closed");

        open.store(true, Ordering::Release);
        transport.send_text("hello".to_string()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), WsOutbound::Text("hello".to_string()));
    }

    #[test]
    fn test_full_buffer_reports_send_failed() {
        let (tx, _rx) = mpsc::channel(1);
        let transport = ChannelTransport::new(tx, Arc::new(AtomicBool::new(true)));

        transport.send_text("a".to_string()).unwrap();
        assert!(matches!(
            transport.send_text("b".to_string()),
            Err(WsError::SendFailed(_))
        ));
    }

    #[test]
    fn test_close_queues_close_frame() {
        let (tx, mut rx) = mpsc::channel(4);
        let open = Arc::new(AtomicBool::new(false));
        let transport = ChannelTransport::new(tx, open.clone());
        assert!(matches!(transport.close(), Err(WsError::NotConnected)));

        open.store(true, Ordering::Release);
        transport.close().unwrap();
        assert_eq!(rx.try_recv().unwrap(), WsOutbound::Close);
    }
}
