use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Utf8Bytes;

use crate::bus::Envelope;
use crate::identity::{ClientTag, ConnectionId, RoomId};

/// Malformed client input. Always ends the connection.
#[derive(Debug, Error)]
pub enum ProtocolViolation {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid join command: {0:?}")]
    Join(Vec<Value>),

    #[error("invalid setTag command: {0:?}")]
    SetTag(Vec<Value>),

    #[error("invalid signal command: {0:?}")]
    Signal(Vec<Value>),
}

/// One event on the wire, in either direction: `{"event": ..., "args": [...]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Frame {
    pub fn new(event: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            event: event.into(),
            args,
        }
    }

    pub fn to_outbound(&self) -> OutboundMessage {
        let json = serde_json::to_string(self).expect("Frame serialization should never fail");
        OutboundMessage::from(json)
    }
}

impl From<&Envelope> for Frame {
    fn from(envelope: &Envelope) -> Self {
        Self::new(envelope.command.clone(), envelope.args.clone())
    }
}

/// Validated client event
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Join { code: RoomId, tag: ClientTag },
    SetTag { tag: ClientTag },
    LeaveRoom,
    /// `data` is opaque and forwarded untouched
    Signal { data: Value, to: ConnectionId },
}

impl ClientEvent {
    /// Parse a text frame. `Ok(None)` for event names we don't handle.
    pub fn parse(text: &str) -> Result<Option<Self>, ProtocolViolation> {
        let frame: Frame = serde_json::from_str(text)?;
        Self::from_frame(frame)
    }

    pub fn from_frame(frame: Frame) -> Result<Option<Self>, ProtocolViolation> {
        let args = frame.args;
        let event = match frame.event.as_str() {
            "join" => match (args.first(), args.get(1)) {
                // room codes may not collide with connection ids on the bus
                (Some(Value::String(code)), Some(tag))
                    if !code.is_empty() && !ConnectionId::is_connection_id(code) =>
                {
                    match tag.as_i64() {
                        Some(tag) => ClientEvent::Join {
                            code: RoomId::from(code.as_str()),
                            tag,
                        },
                        None => return Err(ProtocolViolation::Join(args)),
                    }
                }
                _ => return Err(ProtocolViolation::Join(args)),
            },
            // "id" is what older clients send
            "setTag" | "id" => match args.first().and_then(Value::as_i64) {
                Some(tag) => ClientEvent::SetTag { tag },
                None => return Err(ProtocolViolation::SetTag(args)),
            },
            "leaveRoom" | "leave" => ClientEvent::LeaveRoom,
            "signal" => match parse_signal(args.first()) {
                Some(event) => event,
                None => return Err(ProtocolViolation::Signal(args)),
            },
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

fn parse_signal(payload: Option<&Value>) -> Option<ClientEvent> {
    let payload = payload?.as_object()?;
    let to = payload.get("to")?.as_str().filter(|to| !to.is_empty())?;
    let data = payload.get("data").filter(|data| is_present(data))?;
    Some(ClientEvent::Signal {
        data: data.clone(),
        to: ConnectionId::from(to),
    })
}

/// null, false, 0 and "" count as missing signal data
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Wrapper for outbound WebSocket messages using tungstenite's Utf8Bytes.
#[derive(Debug, Clone)]
pub struct OutboundMessage(Utf8Bytes);

impl OutboundMessage {
    /// Get the inner Utf8Bytes for tungstenite Message::Text
    pub fn into_inner(self) -> Utf8Bytes {
        self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<String> for OutboundMessage {
    fn from(s: String) -> Self {
        Self(Utf8Bytes::from(s))
    }
}
