//! ntfy WebSocket wire format: event classification and message decoding.

use serde::Deserialize;

use crate::types::{DecodeError, Notification};

// ---------------------------------------------------------------------------
// Event names
// ---------------------------------------------------------------------------

pub mod event {
    pub const OPEN: &str = "open";
    pub const KEEPALIVE: &str = "keepalive";
    pub const MESSAGE: &str = "message";
    pub const POLL_REQUEST: &str = "poll_request";
}

/// One inbound text frame, classified by its `event` field.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Subscription confirmed. `topic` may list several topics, comma separated.
    Open { topic: Option<String> },
    Keepalive,
    Message(Notification),
    /// Any event this client does not act on (e.g. `poll_request`).
    Other { event: String },
}

// ---------------------------------------------------------------------------
// Wire envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default, alias = "timestamp")]
    time: Option<i64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    priority: Option<u8>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    click: Option<String>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Decode helpers
// ---------------------------------------------------------------------------

/// Classify a raw text frame.
///
/// Frames without an `event` field are treated as messages.
pub fn decode_frame(raw: &str) -> Result<Frame, DecodeError> {
    let envelope: Envelope = serde_json::from_str(raw)?;
    match envelope.event.as_deref() {
        Some(event::OPEN) => Ok(Frame::Open {
            topic: envelope.topic,
        }),
        Some(event::KEEPALIVE) => Ok(Frame::Keepalive),
        None | Some(event::MESSAGE) => into_notification(envelope).map(Frame::Message),
        Some(other) => Ok(Frame::Other {
            event: other.to_string(),
        }),
    }
}

/// Decode a message frame into a [`Notification`].
///
/// Fails when `id` or `topic` is missing, or when the frame carries a
/// non-message event such as `keepalive`.
pub fn decode(raw: &str) -> Result<Notification, DecodeError> {
    match decode_frame(raw)? {
        Frame::Message(notification) => Ok(notification),
        Frame::Open { .. } => Err(DecodeError::NotAMessage(event::OPEN.to_string())),
        Frame::Keepalive => Err(DecodeError::NotAMessage(event::KEEPALIVE.to_string())),
        Frame::Other { event } => Err(DecodeError::NotAMessage(event)),
    }
}

fn into_notification(envelope: Envelope) -> Result<Notification, DecodeError> {
    // ntfy IDs are strings; integers are accepted for servers that number events.
    let id = match envelope.id {
        Some(serde_json::Value::String(s)) if !s.is_empty() => s,
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => return Err(DecodeError::MissingField("id")),
    };
    let topic = envelope
        .topic
        .filter(|t| !t.is_empty())
        .ok_or(DecodeError::MissingField("topic"))?;

    Ok(Notification {
        id,
        topic,
        message: envelope.message.unwrap_or_default(),
        title: envelope.title,
        timestamp: envelope.time,
        priority: envelope.priority,
        tags: envelope.tags.unwrap_or_default(),
        click: envelope.click,
        extra: envelope.extra,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
