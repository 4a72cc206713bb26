//! WebSocket connection manager.
//!
//! Owns the single socket. One call to [`ConnectionManager::run_session`]
//! connects, pumps frames until the session ends and reports how it ended.
//! Reconnect policy is not decided here; the caller feeds the
//! [`SessionEnd`] to the multiplexer's reconnection controller.

use crate::config::StreamConfig;
use crate::error::WsError;
use crate::heartbeat::HeartbeatMonitor;
use crate::message::{pong_reply, WsMessage, PING_TEXT};
use crate::transport::{ChannelTransport, WsOutbound};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Close code of a normal closure.
const NORMAL_CLOSE: u16 = 1000;

/// Notification raised by a running session.
#[derive(Debug)]
pub enum TransportEvent {
    /// Socket is open and ready to carry subscriptions.
    Opened,
    /// A parsed non-keep-alive frame.
    Message {
        message: WsMessage,
        received_at: Instant,
    },
    /// A text frame that could not be parsed.
    Malformed(WsError),
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// Normal closure (close code 1000 or a locally requested close).
    Clean { code: u16, reason: String },
    /// Closed by the peer with an abnormal code.
    Closed { code: u16, reason: String },
    /// Connect failure, read/write error, stream end or heartbeat timeout.
    Failed(WsError),
    /// Shutdown was requested.
    Shutdown,
}

impl SessionEnd {
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean { .. } | Self::Shutdown)
    }
}

/// WebSocket connection manager.
pub struct ConnectionManager {
    url: String,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    open: Arc<AtomicBool>,
    outbound_tx: mpsc::Sender<WsOutbound>,
    outbound_rx: TokioMutex<mpsc::Receiver<WsOutbound>>,
    shutdown_token: CancellationToken,
}

impl ConnectionManager {
    pub fn new(config: &StreamConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_buffer.max(1));
        Self {
            url: config.url.clone(),
            heartbeat_interval: config.heartbeat_interval(),
            heartbeat_timeout: config.heartbeat_timeout(),
            open: Arc::new(AtomicBool::new(false)),
            outbound_tx,
            outbound_rx: TokioMutex::new(outbound_rx),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Transport handle for the multiplexer.
    pub fn transport(&self) -> ChannelTransport {
        ChannelTransport::new(self.outbound_tx.clone(), self.open.clone())
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Signal graceful shutdown of the running session and every loop
    /// watching [`ConnectionManager::shutdown_token`].
    pub fn shutdown(&self) {
        info!("ConnectionManager shutdown requested");
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Connect and run one session until it ends.
    ///
    /// `on_event` is called synchronously for every session notification.
    /// Keep-alive frames are answered here and never reach `on_event`.
    pub async fn run_session<F>(&self, mut on_event: F) -> SessionEnd
    where
        F: FnMut(TransportEvent),
    {
        info!(url = %self.url, "Connecting to WebSocket");

        let connected = tokio::select! {
            result = connect_async(self.url.as_str()) => result,
            () = self.shutdown_token.cancelled() => return SessionEnd::Shutdown,
        };
        let ws_stream = match connected {
            Ok((ws_stream, _response)) => ws_stream,
            Err(e) => {
                error!(error = %e, "WebSocket connect failed");
                return SessionEnd::Failed(WsError::ConnectionFailed(e.to_string()));
            }
        };
        let (mut write, mut read) = ws_stream.split();

        let mut outbound = self.outbound_rx.lock().await;
        // Frames queued by the previous session are stale.
        while outbound.try_recv().is_ok() {}

        let mut heartbeat = HeartbeatMonitor::new(self.heartbeat_interval, self.heartbeat_timeout);
        let mut check = tokio::time::interval(heartbeat.check_period());
        check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        self.open.store(true, Ordering::Release);
        info!("WebSocket connected");
        on_event(TransportEvent::Opened);

        let end = loop {
            tokio::select! {
                biased;

                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received in message loop");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!(error = %e, "Failed to send Close frame during shutdown");
                    }
                    break SessionEnd::Shutdown;
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let received_at = Instant::now();
                            heartbeat.record_message();
                            match WsMessage::parse(&text) {
                                Ok(WsMessage::Pong) => heartbeat.record_pong(),
                                Ok(WsMessage::Ping(payload)) => {
                                    let reply = pong_reply(payload.as_ref());
                                    if let Err(e) = write.send(Message::Text(reply)).await {
                                        break SessionEnd::Failed(e.into());
                                    }
                                }
                                Ok(message) => on_event(TransportEvent::Message { message, received_at }),
                                Err(e) => on_event(TransportEvent::Malformed(e)),
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            heartbeat.record_message();
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                break SessionEnd::Failed(e.into());
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            heartbeat.record_message();
                            heartbeat.record_pong();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (u16::from(f.code), f.reason.to_string()))
                                .unwrap_or((NORMAL_CLOSE, "Normal close".to_string()));
                            if code == NORMAL_CLOSE {
                                info!(code, %reason, "WebSocket closed by server");
                                break SessionEnd::Clean { code, reason };
                            }
                            warn!(code, %reason, "WebSocket closed abnormally by server");
                            break SessionEnd::Closed { code, reason };
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket read error");
                            break SessionEnd::Failed(e.into());
                        }
                        None => {
                            warn!("WebSocket stream ended");
                            break SessionEnd::Failed(WsError::ConnectionClosed {
                                code: 1006,
                                reason: "Stream ended without close frame".to_string(),
                            });
                        }
                        Some(Ok(_)) => {}
                    }
                }

                frame = outbound.recv() => {
                    match frame {
                        Some(WsOutbound::Text(text)) => {
                            if let Err(e) = write.send(Message::Text(text)).await {
                                error!(error = %e, "WebSocket write error");
                                break SessionEnd::Failed(e.into());
                            }
                        }
                        Some(WsOutbound::Close) => {
                            if let Err(e) = write.send(Message::Close(None)).await {
                                warn!(error = %e, "Failed to send Close frame");
                            }
                            break SessionEnd::Clean {
                                code: NORMAL_CLOSE,
                                reason: "Closed locally".to_string(),
                            };
                        }
                        // The manager itself holds a sender, so this only
                        // happens while it is being dropped.
                        None => break SessionEnd::Shutdown,
                    }
                }

                _ = check.tick() => {
                    if heartbeat.is_timed_out() {
                        error!("Heartbeat timeout");
                        break SessionEnd::Failed(WsError::HeartbeatTimeout);
                    }
                    if heartbeat.should_send_ping() {
                        if let Err(e) = write.send(Message::Text(PING_TEXT.to_string())).await {
                            break SessionEnd::Failed(e.into());
                        }
                        heartbeat.record_ping();
                        debug!("Sent heartbeat ping");
                    }
                }
            }
        };

        self.open.store(false, Ordering::Release);
        end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;

    #[test]
    fn test_transport_closed_before_session() {
        let manager = ConnectionManager::new(&StreamConfig::default());
        assert!(!manager.is_open());
        assert!(matches!(
            manager.transport().send_text("x".to_string()),
            Err(WsError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_before_connect() {
        let config = StreamConfig {
            url: "ws://127.0.0.1:9".to_string(),
            ..Default::default()
        };
        let manager = ConnectionManager::new(&config);
        manager.shutdown();
        assert!(manager.is_shutdown());
        assert_eq!(manager.url(), "ws://127.0.0.1:9");

        let end = manager.run_session(|_| {}).await;
        assert!(matches!(end, SessionEnd::Shutdown));
        assert!(end.is_clean());
    }

    #[tokio::test]
    async fn test_connect_failure_reported() {
        let config = StreamConfig {
            url: "ws://127.0.0.1:1".to_string(),
            ..Default::default()
        };
        let manager = ConnectionManager::new(&config);
        let mut events = 0;

        let end = manager.run_session(|_| events += 1).await;
        assert!(matches!(end, SessionEnd::Failed(WsError::ConnectionFailed(_))));
        assert!(!end.is_clean());
        assert_eq!(events, 0);
    }
}
