//! Realtime wire model and codecs for the support-chat transport.
//!
//! This crate owns the wire representation used by the session engine and by
//! any host embedding it. Envelope payloads stay flexible
//! (`serde_json::Value`), but inbound application events are decoded here into
//! [`Inbound`] so nothing past this boundary sees legacy field names.
//!
//! CODECS
//! ======
//! - [`Codec::Json`]: one text frame per event, `{"event": <name>, "data": <payload>}`.
//!   Frames without an `event` key are treated as a bare `receive_message`
//!   payload, which is what the plain-WebSocket backends push.
//! - [`Codec::SocketIo`]: Engine.IO v4 text packets carrying Socket.IO events
//!   (`0` open, `2`/`3` ping/pong, `40` connect, `41` disconnect, `42` event,
//!   `44` connect error). Binary packets are rejected.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const SEND_MESSAGE: &str = "send_message";
pub const JOIN_ROOM: &str = "join_room";
pub const AUTHENTICATE: &str = "authenticate";
pub const RECEIVE_MESSAGE: &str = "receive_message";
pub const TICKET_CLOSED: &str = "ticket_closed";
pub const TYPING: &str = "typing";
pub const STOP_TYPING: &str = "stop_typing";

/// Content keys of a `receive_message` payload, in priority order.
const CONTENT_KEYS: [&str; 3] = ["message", "text", "content"];

/// Error returned by [`Codec::decode`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame (or the JSON tail of a packet) is not valid JSON.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    /// The frame was empty.
    #[error("empty packet")]
    Empty,
    /// The leading packet type is not one this codec knows.
    #[error("unknown packet type: {0}")]
    UnknownPacket(String),
    /// An event packet whose body is not `[name, data?]`.
    #[error("malformed event packet")]
    MalformedEvent,
    /// Socket.IO binary events/acks.
    #[error("binary packets are not supported")]
    Binary,
}

/// Text framing used on the realtime socket.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Codec {
    #[default]
    Json,
    SocketIo {
        /// Socket.IO namespace, `"/"` for the default namespace.
        namespace: String,
    },
}

impl Codec {
    /// Socket.IO codec on the default namespace.
    #[must_use]
    pub fn socket_io() -> Self {
        Self::SocketIo { namespace: "/".to_owned() }
    }

    /// Encode an outbound application event as one text frame.
    #[must_use]
    pub fn encode(&self, event: &Outbound) -> String {
        match self {
            Self::Json => {
                let mut envelope = Map::new();
                envelope.insert("event".to_owned(), Value::String(event.name().to_owned()));
                envelope.insert("data".to_owned(), event.payload());
                Value::Object(envelope).to_string()
            }
            Self::SocketIo { namespace } => {
                let body = Value::Array(vec![Value::String(event.name().to_owned()), event.payload()]);
                format!("42{}{body}", namespace_prefix(namespace))
            }
        }
    }

    /// Packet sent right after the socket opens, if this codec has one.
    ///
    /// For Socket.IO this is the namespace connect. `credentials` rides along
    /// as its auth object when auth happens at connect time; pass `None` when
    /// the credentials follow in an `authenticate` event instead.
    #[must_use]
    pub fn connect_packet(&self, credentials: Option<&Credentials>) -> Option<String> {
        match self {
            Self::Json => None,
            Self::SocketIo { namespace } => {
                let prefix = namespace_prefix(namespace);
                let auth = credentials
                    .and_then(|credentials| serde_json::to_value(credentials).ok())
                    .map(|auth| auth.to_string())
                    .unwrap_or_default();
                Some(format!("40{prefix}{auth}"))
            }
        }
    }

    /// Reply to a server heartbeat ping.
    #[must_use]
    pub fn pong(&self) -> Option<String> {
        match self {
            Self::Json => None,
            Self::SocketIo { .. } => Some("3".to_owned()),
        }
    }

    /// Whether the server must acknowledge the namespace connect before the
    /// connection counts as open.
    #[must_use]
    pub fn awaits_connect_ack(&self) -> bool {
        matches!(self, Self::SocketIo { .. })
    }

    /// Decode one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] for frames that are empty, not JSON where JSON is
    /// expected, or use packet types this codec does not support.
    pub fn decode(&self, text: &str) -> Result<Packet, CodecError> {
        match self {
            Self::Json => decode_json(text),
            Self::SocketIo { .. } => decode_socket_io(text),
        }
    }
}

impl std::str::FromStr for Codec {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" | "websocket" => Ok(Self::Json),
            "socketio" | "socket.io" | "socket-io" => Ok(Self::socket_io()),
            other => Err(format!("unknown codec '{other}' (expected 'json' or 'socketio')")),
        }
    }
}

fn namespace_prefix(namespace: &str) -> String {
    if namespace.is_empty() || namespace == "/" {
        String::new()
    } else {
        format!("{namespace},")
    }
}

/// Credentials presented when a connection opens.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub api_key: String,
    pub user_id: String,
}

/// Payload of a `send_message` event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub message: String,
    pub sender_id: String,
    pub ticket_id: Option<String>,
    pub organization_id: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Value>,
    /// ISO-8601 creation time.
    pub created_at: String,
}

/// Application event sent to the backend.
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    /// First-message authentication for transports without connection-time auth.
    Authenticate(Credentials),
    JoinRoom { ticket_id: String },
    SendMessage(OutgoingMessage),
}

impl Outbound {
    /// Wire event name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authenticate(_) => AUTHENTICATE,
            Self::JoinRoom { .. } => JOIN_ROOM,
            Self::SendMessage(_) => SEND_MESSAGE,
        }
    }

    /// JSON payload of the event.
    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            Self::Authenticate(credentials) => serde_json::to_value(credentials).unwrap_or(Value::Null),
            Self::JoinRoom { ticket_id } => serde_json::json!({ "ticket_id": ticket_id }),
            Self::SendMessage(message) => serde_json::to_value(message).unwrap_or(Value::Null),
        }
    }
}

/// Message content pushed by an agent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentMessage {
    /// Backend message id when the payload carries one.
    pub id: Option<String>,
    pub text: String,
}

/// Application event received from the backend.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    Message(AgentMessage),
    Typing { active: bool },
    TicketClosed { ticket_id: Option<String> },
    /// A named event with no model here, or a payload with no usable content.
    Other { event: String, data: Value },
}

/// One decoded text frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    Event(Inbound),
    /// Engine.IO handshake.
    Open,
    /// Socket.IO namespace connect acknowledged.
    Connected,
    /// Socket.IO namespace connect refused.
    ConnectError(String),
    Ping,
    Pong,
    /// Server-initiated disconnect or Engine.IO close.
    Disconnect,
    /// Frames that carry nothing for the session (noop, ack, upgrade).
    Noop,
}

/// Decode a named application event into [`Inbound`].
#[must_use]
pub fn decode_event(event: &str, data: Value) -> Inbound {
    match event {
        RECEIVE_MESSAGE => decode_receive_message(&data).unwrap_or(Inbound::Other {
            event: event.to_owned(),
            data,
        }),
        TICKET_CLOSED => Inbound::TicketClosed {
            ticket_id: pick_str(&data, &["ticket_id", "ticketId"]).map(ToOwned::to_owned),
        },
        TYPING => Inbound::Typing { active: typing_flag(&data) },
        STOP_TYPING => Inbound::Typing { active: false },
        _ => Inbound::Other { event: event.to_owned(), data },
    }
}

/// Decode a `receive_message` payload.
///
/// A `"typing"` type wins. Otherwise the payload is content when its type is
/// `"message"` or any content key is present; the text is the first non-empty
/// string among `message`, `text`, `content`. Returns `None` when no usable
/// text exists.
#[must_use]
pub fn decode_receive_message(data: &Value) -> Option<Inbound> {
    if let Some(text) = data.as_str() {
        return non_empty(text).map(|text| {
            Inbound::Message(AgentMessage { id: None, text: text.to_owned() })
        });
    }

    let kind = data.get("type").and_then(Value::as_str);
    match kind {
        Some("typing") => return Some(Inbound::Typing { active: typing_flag(data) }),
        Some("ticket_closed") => {
            return Some(Inbound::TicketClosed {
                ticket_id: pick_str(data, &["ticket_id", "ticketId"]).map(ToOwned::to_owned),
            });
        }
        _ => {}
    }

    let has_content = CONTENT_KEYS.iter().any(|key| data.get(key).is_some());
    if kind != Some("message") && !has_content {
        return None;
    }

    let text = CONTENT_KEYS
        .iter()
        .filter_map(|key| data.get(key).and_then(Value::as_str))
        .find_map(non_empty)?;
    let id = pick_id(data);
    Some(Inbound::Message(AgentMessage { id, text: text.to_owned() }))
}

fn non_empty(text: &str) -> Option<&str> {
    if text.trim().is_empty() { None } else { Some(text) }
}

fn typing_flag(data: &Value) -> bool {
    ["is_typing", "isTyping", "typing"]
        .iter()
        .find_map(|key| data.get(key).and_then(Value::as_bool))
        .unwrap_or(true)
}

fn pick_id(data: &Value) -> Option<String> {
    for key in ["id", "_id"] {
        match data.get(key) {
            Some(Value::String(id)) if !id.is_empty() => return Some(id.clone()),
            Some(Value::Number(id)) => return Some(id.to_string()),
            _ => {}
        }
    }
    None
}

pub(crate) fn pick_str<'a>(data: &'a Value, keys: &[&str]) -> Option<&'a str> {
    for key in keys {
        if let Some(value) = data.get(key).and_then(Value::as_str) {
            return Some(value);
        }
    }
    None
}

fn decode_json(text: &str) -> Result<Packet, CodecError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(CodecError::Empty);
    }
    let value: Value = serde_json::from_str(trimmed)?;
    if let Some(event) = value.get("event").and_then(Value::as_str) {
        let data = value.get("data").cloned().unwrap_or(Value::Null);
        return Ok(Packet::Event(decode_event(event, data)));
    }
    let inbound = decode_receive_message(&value).unwrap_or(Inbound::Other {
        event: RECEIVE_MESSAGE.to_owned(),
        data: value,
    });
    Ok(Packet::Event(inbound))
}

fn decode_socket_io(text: &str) -> Result<Packet, CodecError> {
    let mut chars = text.chars();
    let Some(engine) = chars.next() else {
        return Err(CodecError::Empty);
    };
    let rest = chars.as_str();
    match engine {
        '0' => Ok(Packet::Open),
        '1' => Ok(Packet::Disconnect),
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '4' => decode_socket_io_message(rest),
        '5' | '6' => Ok(Packet::Noop),
        other => Err(CodecError::UnknownPacket(other.to_string())),
    }
}

fn decode_socket_io_message(body: &str) -> Result<Packet, CodecError> {
    let mut chars = body.chars();
    let Some(kind) = chars.next() else {
        return Err(CodecError::Empty);
    };
    let rest = strip_namespace(chars.as_str());
    match kind {
        '0' => Ok(Packet::Connected),
        '1' => Ok(Packet::Disconnect),
        '2' => decode_socket_io_event(rest),
        '3' => Ok(Packet::Noop),
        '4' => {
            let message = serde_json::from_str::<Value>(rest)
                .ok()
                .and_then(|v| pick_str(&v, &["message"]).map(ToOwned::to_owned))
                .unwrap_or_else(|| rest.to_owned());
            Ok(Packet::ConnectError(message))
        }
        '5' | '6' => Err(CodecError::Binary),
        other => Err(CodecError::UnknownPacket(format!("4{other}"))),
    }
}

/// Drop a `/namespace,` prefix if present.
fn strip_namespace(rest: &str) -> &str {
    if rest.starts_with('/') {
        return rest.split_once(',').map_or("", |(_, tail)| tail);
    }
    rest
}

fn decode_socket_io_event(rest: &str) -> Result<Packet, CodecError> {
    // An ack id may precede the JSON array.
    let json = rest.trim_start_matches(|c: char| c.is_ascii_digit());
    let value: Value = serde_json::from_str(json)?;
    let Value::Array(mut items) = value else {
        return Err(CodecError::MalformedEvent);
    };
    if items.is_empty() {
        return Err(CodecError::MalformedEvent);
    }
    let data = if items.len() > 1 { items.swap_remove(1) } else { Value::Null };
    let Value::String(event) = items.swap_remove(0) else {
        return Err(CodecError::MalformedEvent);
    };
    Ok(Packet::Event(decode_event(&event, data)))
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
