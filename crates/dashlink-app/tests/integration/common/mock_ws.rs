//! Mock market-data provider for integration tests.
//!
//! Provides a simple WebSocket server that can:
//! - Accept connections
//! - Acknowledge subscribe/unsubscribe requests
//! - Push one ticker frame for every `tickers` subscription
//! - Answer text pings, or swallow them to stall the keep-alive
//! - Drop every open connection on demand
//! - Record received messages

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Last price pushed for every ticker subscription.
pub const TICKER_LAST: &str = "43000.5";
/// Event time pushed for every ticker subscription.
pub const TICKER_TS: i64 = 1_700_000_000_000;

/// A mock WebSocket provider for testing.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    kick_tx: broadcast::Sender<()>,
    messages: Arc<Mutex<VecDeque<String>>>,
    connections: Arc<Mutex<u32>>,
}

impl MockWsServer {
    /// Start a new mock server on an available port.
    pub async fn start() -> Self {
        Self::start_with(true).await
    }

    /// Start a server that records text pings but never answers them.
    pub async fn start_without_pongs() -> Self {
        Self::start_with(false).await
    }

    async fn start_with(answer_pings: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let messages: Arc<Mutex<VecDeque<String>>> = Arc::new(Mutex::new(VecDeque::new()));
        let connections: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (kick_tx, _) = broadcast::channel::<()>(4);

        let messages_clone = messages.clone();
        let connections_clone = connections.clone();
        let kick_clone = kick_tx.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        let messages = messages_clone.clone();
                        let connections = connections_clone.clone();
                        let kick_rx = kick_clone.subscribe();
                        tokio::spawn(handle_connection(
                            stream,
                            messages,
                            connections,
                            kick_rx,
                            answer_pings,
                        ));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            kick_tx,
            messages,
            connections,
        }
    }

    /// Get the server's WebSocket URL.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Get the number of connections received.
    pub async fn connection_count(&self) -> u32 {
        *self.connections.lock().await
    }

    /// Get all received messages.
    pub async fn received_messages(&self) -> Vec<String> {
        self.messages.lock().await.iter().cloned().collect()
    }

    /// Count received requests with the given `op`.
    pub async fn request_count(&self, op: &str) -> usize {
        self.received_messages()
            .await
            .iter()
            .filter_map(|text| serde_json::from_str::<Value>(text).ok())
            .filter(|value| value.get("op") == Some(&json!(op)))
            .count()
    }

    /// Count subscription args across every received request with `op`.
    pub async fn request_arg_count(&self, op: &str) -> usize {
        self.received_messages()
            .await
            .iter()
            .filter_map(|text| serde_json::from_str::<Value>(text).ok())
            .filter(|value| value.get("op") == Some(&json!(op)))
            .filter_map(|value| value.get("args").and_then(Value::as_array).map(Vec::len))
            .sum()
    }

    /// Count received text pings.
    pub async fn ping_count(&self) -> usize {
        self.received_messages()
            .await
            .iter()
            .filter(|text| *text == "ping")
            .count()
    }

    /// Close every open connection with an abnormal close code.
    pub fn kick_all(&self) {
        let _ = self.kick_tx.send(());
    }

    /// Shutdown the server.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

fn ticker_frame(arg: &Value) -> Value {
    json!({
        "arg": arg,
        "data": [{
            "instId": arg.get("instId").cloned().unwrap_or(Value::Null),
            "last": TICKER_LAST,
            "bidPx": "43000.4",
            "askPx": "43000.6",
            "open24h": "42000",
            "ts": TICKER_TS.to_string()
        }]
    })
}

async fn handle_connection(
    stream: TcpStream,
    messages: Arc<Mutex<VecDeque<String>>>,
    connections: Arc<Mutex<u32>>,
    mut kick_rx: broadcast::Receiver<()>,
    answer_pings: bool,
) {
    {
        let mut count = connections.lock().await;
        *count += 1;
    }

    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();

    loop {
        let msg = tokio::select! {
            msg = read.next() => msg,
            _ = kick_rx.recv() => {
                let frame = CloseFrame {
                    code: CloseCode::Error,
                    reason: "kicked".into(),
                };
                let _ = write.send(Message::Close(Some(frame))).await;
                break;
            }
        };

        match msg {
            Some(Ok(Message::Text(text))) => {
                {
                    let mut msgs = messages.lock().await;
                    msgs.push_back(text.clone());
                }

                if text == "ping" {
                    if answer_pings {
                        let _ = write.send(Message::Text("pong".to_string())).await;
                    }
                    continue;
                }

                let Ok(parsed) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                let Some(op) = parsed.get("op").and_then(Value::as_str) else {
                    continue;
                };
                let args = parsed
                    .get("args")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();

                for arg in &args {
                    let ack = json!({ "event": op, "arg": arg, "connId": "mock" });
                    let _ = write.send(Message::Text(ack.to_string())).await;

                    if op == "subscribe" && arg.get("channel") == Some(&json!("tickers")) {
                        let _ = write.send(Message::Text(ticker_frame(arg).to_string())).await;
                    }
                }
            }
            Some(Ok(Message::Ping(data))) => {
                let _ = write.send(Message::Pong(data)).await;
            }
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
            _ => {}
        }
    }
}
