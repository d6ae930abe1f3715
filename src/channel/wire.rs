//! Socket.IO v4 packets carried over the Engine.IO v4 WebSocket transport.
//!
//! Every WebSocket text message is one Engine.IO packet: a single digit type
//! followed by its payload. Engine.IO `message` packets (`4`) wrap a Socket.IO
//! packet, which is again a digit type, an optional `/namespace,` prefix, an
//! optional ack id and a JSON payload. So an event on the default namespace
//! reads `42["update_poll",{...}]`.
//!
//! Binary packets and acknowledgements are never requested by this client and
//! are reported as unsupported.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("empty packet")]
    Empty,

    #[error("unknown packet type {0:?}")]
    UnknownPacket(char),

    #[error("unsupported packet: {0}")]
    Unsupported(&'static str),

    #[error("malformed packet: {0}")]
    Malformed(&'static str),

    #[error("invalid packet payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Engine.IO `open` payload sent by the server right after the upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    // Engine.IO level
    Open(Handshake),
    Close,
    Ping,
    Pong,
    Noop,
    // Socket.IO level (inside an Engine.IO message)
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, data: Value },
    ConnectError(Value),
}

impl Frame {
    pub fn event(name: &str, data: Value) -> Self {
        Frame::Event {
            name: name.to_string(),
            data,
        }
    }

    pub fn encode(&self) -> Result<String, WireError> {
        let text = match self {
            Frame::Open(handshake) => format!("0{}", serde_json::to_string(handshake)?),
            Frame::Close => "1".to_string(),
            Frame::Ping => "2".to_string(),
            Frame::Pong => "3".to_string(),
            Frame::Noop => "6".to_string(),
            Frame::Connect(None) => "40".to_string(),
            Frame::Connect(Some(data)) => format!("40{}", data),
            Frame::Disconnect => "41".to_string(),
            Frame::Event { name, data } => format!("42{}", json!([name, data])),
            Frame::ConnectError(data) => format!("44{}", data),
        };
        Ok(text)
    }

    pub fn decode(text: &str) -> Result<Frame, WireError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(WireError::Empty)?;
        let rest = chars.as_str();

        match kind {
            '0' => Ok(Frame::Open(serde_json::from_str(rest)?)),
            '1' => Ok(Frame::Close),
            // a ping may carry a "probe" payload, which only matters for transport upgrades
            '2' => Ok(Frame::Ping),
            '3' => Ok(Frame::Pong),
            '4' => decode_packet(rest),
            '5' | '6' => Ok(Frame::Noop),
            other => Err(WireError::UnknownPacket(other)),
        }
    }
}

fn decode_packet(body: &str) -> Result<Frame, WireError> {
    let mut chars = body.chars();
    let kind = chars.next().ok_or(WireError::Empty)?;
    let mut rest = chars.as_str();

    // the default namespace omits the prefix
    if rest.starts_with('/') {
        rest = match rest.find(',') {
            Some(idx) => &rest[idx + 1..],
            None => "",
        };
    }
    let payload = rest.trim_start_matches(|c: char| c.is_ascii_digit());

    match kind {
        '0' => Ok(Frame::Connect(optional_json(payload)?)),
        '1' => Ok(Frame::Disconnect),
        '2' => decode_event(payload),
        '3' => Err(WireError::Unsupported("ack")),
        '4' => Ok(Frame::ConnectError(optional_json(payload)?.unwrap_or(Value::Null))),
        '5' | '6' => Err(WireError::Unsupported("binary")),
        other => Err(WireError::UnknownPacket(other)),
    }
}

fn optional_json(payload: &str) -> Result<Option<Value>, WireError> {
    if payload.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(payload)?))
}

fn decode_event(payload: &str) -> Result<Frame, WireError> {
    let items: Vec<Value> = serde_json::from_str(payload)?;
    let mut items = items.into_iter();
    let name = match items.next() {
        Some(Value::String(name)) => name,
        _ => return Err(WireError::Malformed("event without a name")),
    };
    // extra arguments are ignored, every event here carries a single payload
    let data = items.next().unwrap_or(Value::Null);
    Ok(Frame::Event { name, data })
}
