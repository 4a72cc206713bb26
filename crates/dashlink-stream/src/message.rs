//! WebSocket message types.
//!
//! Outbound requests: `{"op": "subscribe", "args": [{"instType", "channel", "instId"}]}`.
//! Inbound frames are one of: data (`{"arg": {...}, "data": [...]}`), events
//! (`{"event": "subscribe" | "unsubscribe" | "error", ...}`), or keep-alive
//! (`pong` text, `{"ping": x}` / `{"pong": x}` objects).

use crate::error::{WsError, WsResult};
use dashlink_core::{InstType, StreamKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Outbound
// ============================================================================

/// One subscription argument, as sent and as echoed back in acks and data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionArg {
    #[serde(rename = "instType", default, skip_serializing_if = "Option::is_none")]
    pub inst_type: Option<InstType>,
    pub channel: String,
    #[serde(rename = "instId")]
    pub inst_id: String,
}

impl SubscriptionArg {
    pub fn new(inst_type: InstType, key: &StreamKey) -> Self {
        Self {
            inst_type: Some(inst_type),
            channel: key.channel.wire_name(),
            inst_id: key.symbol.clone(),
        }
    }

    /// The stream key this argument refers to.
    pub fn stream_key(&self) -> StreamKey {
        StreamKey::from_wire(&self.inst_id, &self.channel)
    }
}

/// Outgoing subscription request.
#[derive(Debug, Clone, Serialize)]
pub struct WsRequest {
    pub op: String,
    pub args: Vec<SubscriptionArg>,
}

impl WsRequest {
    /// Create a subscribe request.
    pub fn subscribe(args: Vec<SubscriptionArg>) -> Self {
        Self {
            op: "subscribe".to_string(),
            args,
        }
    }

    /// Create an unsubscribe request.
    pub fn unsubscribe(args: Vec<SubscriptionArg>) -> Self {
        Self {
            op: "unsubscribe".to_string(),
            args,
        }
    }

    /// Serialize to a text frame.
    pub fn to_text(&self) -> WsResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Text frame sent as the keep-alive ping.
pub const PING_TEXT: &str = "ping";

/// Build the reply to an inbound ping.
pub fn pong_reply(ping: Option<&Value>) -> String {
    match ping {
        Some(value) => serde_json::json!({ "pong": value }).to_string(),
        None => "pong".to_string(),
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// Event frame (subscribe/unsubscribe ack or error).
#[derive(Debug, Clone, Deserialize)]
pub struct EventMessage {
    pub event: String,
    #[serde(default)]
    pub arg: Option<SubscriptionArg>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
}

impl EventMessage {
    pub fn is_subscribe_ack(&self) -> bool {
        self.event == "subscribe"
    }

    pub fn is_unsubscribe_ack(&self) -> bool {
        self.event == "unsubscribe"
    }

    pub fn is_error(&self) -> bool {
        self.event == "error"
    }
}

/// Data frame for one stream.
#[derive(Debug, Clone, Deserialize)]
pub struct DataMessage {
    pub arg: SubscriptionArg,
    pub data: Vec<Value>,
}

impl DataMessage {
    pub fn stream_key(&self) -> StreamKey {
        self.arg.stream_key()
    }
}

/// Parsed inbound frame.
#[derive(Debug, Clone)]
pub enum WsMessage {
    /// Keep-alive answer (text `pong` or `{"pong": ...}`).
    Pong,
    /// Keep-alive ping from the provider. `None` for a bare text `ping`.
    Ping(Option<Value>),
    /// Subscription ack or error event.
    Event(EventMessage),
    /// Market data for one stream.
    Data(DataMessage),
}

impl WsMessage {
    /// Parse a text frame.
    pub fn parse(text: &str) -> WsResult<Self> {
        match text.trim() {
            "pong" => return Ok(Self::Pong),
            "ping" => return Ok(Self::Ping(None)),
            _ => {}
        }

        let value: Value = serde_json::from_str(text)?;
        let Some(object) = value.as_object() else {
            return Err(WsError::ParseError(format!(
                "expected JSON object, got: {}",
                truncate(text)
            )));
        };

        if object.contains_key("event") {
            return Ok(Self::Event(serde_json::from_value(value)?));
        }
        if object.contains_key("pong") {
            return Ok(Self::Pong);
        }
        if let Some(ping) = object.get("ping") {
            return Ok(Self::Ping(Some(ping.clone())));
        }
        if object.contains_key("arg") && object.contains_key("data") {
            return Ok(Self::Data(serde_json::from_value(value)?));
        }

        Err(WsError::ParseError(format!(
            "unrecognized message: {}",
            truncate(text)
        )))
    }
}

fn truncate(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(120)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());
    &text[..end]
}
