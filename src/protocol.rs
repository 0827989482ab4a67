//! SignalR JSON hub protocol: handshake, hub messages, record framing and
//! the negotiate exchange.
//!
//! Every record on the wire is a JSON document followed by the record
//! separator `0x1E`. A single WebSocket frame may carry several records and a
//! record may be split across frames, so incoming text goes through a
//! [`RecordBuffer`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

pub const RECORD_SEPARATOR: char = '\u{1e}';
pub const PROTOCOL_NAME: &str = "json";
pub const PROTOCOL_VERSION: u32 = 1;
pub const NEGOTIATE_VERSION: u32 = 1;
pub const WEBSOCKETS_TRANSPORT: &str = "WebSockets";

const INVOCATION: u8 = 1;
const STREAM_ITEM: u8 = 2;
const COMPLETION: u8 = 3;
const STREAM_INVOCATION: u8 = 4;
const CANCEL_INVOCATION: u8 = 5;
const PING: u8 = 6;
const CLOSE: u8 = 7;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub protocol: String,
    pub version: u32,
}

impl Default for HandshakeRequest {
    fn default() -> Self {
        Self {
            protocol: PROTOCOL_NAME.to_string(),
            version: PROTOCOL_VERSION,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HandshakeResponse {
    #[serde(default)]
    pub error: Option<String>,
}

/// Messages exchanged with the hub after the handshake.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// Remote call. From the hub this is a client event such as `requestStep`.
    Invocation {
        invocation_id: Option<String>,
        target: String,
        arguments: Vec<Value>,
    },
    StreamItem {
        invocation_id: String,
        item: Value,
    },
    Completion {
        invocation_id: String,
        result: Option<Value>,
        error: Option<String>,
    },
    StreamInvocation {
        invocation_id: String,
        target: String,
        arguments: Vec<Value>,
    },
    CancelInvocation {
        invocation_id: String,
    },
    Ping,
    Close {
        error: Option<String>,
        allow_reconnect: Option<bool>,
    },
}

impl HubMessage {
    /// Fire-and-forget invocation: no invocation id, so the hub sends no completion.
    pub fn invocation(target: impl Into<String>, arguments: Vec<Value>) -> Self {
        HubMessage::Invocation {
            invocation_id: None,
            target: target.into(),
            arguments,
        }
    }
}

/// Flat wire shape shared by every message type.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawHubMessage {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    invocation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    arguments: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    item: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    allow_reconnect: Option<bool>,
}

impl From<&HubMessage> for RawHubMessage {
    fn from(msg: &HubMessage) -> Self {
        match msg.clone() {
            HubMessage::Invocation {
                invocation_id,
                target,
                arguments,
            } => RawHubMessage {
                kind: INVOCATION,
                invocation_id,
                target: Some(target),
                arguments: Some(arguments),
                ..Default::default()
            },
            HubMessage::StreamItem {
                invocation_id,
                item,
            } => RawHubMessage {
                kind: STREAM_ITEM,
                invocation_id: Some(invocation_id),
                item: Some(item),
                ..Default::default()
            },
            HubMessage::Completion {
                invocation_id,
                result,
                error,
            } => RawHubMessage {
                kind: COMPLETION,
                invocation_id: Some(invocation_id),
                result,
                error,
                ..Default::default()
            },
            HubMessage::StreamInvocation {
                invocation_id,
                target,
                arguments,
            } => RawHubMessage {
                kind: STREAM_INVOCATION,
                invocation_id: Some(invocation_id),
                target: Some(target),
                arguments: Some(arguments),
                ..Default::default()
            },
            HubMessage::CancelInvocation { invocation_id } => RawHubMessage {
                kind: CANCEL_INVOCATION,
                invocation_id: Some(invocation_id),
                ..Default::default()
            },
            HubMessage::Ping => RawHubMessage {
                kind: PING,
                ..Default::default()
            },
            HubMessage::Close {
                error,
                allow_reconnect,
            } => RawHubMessage {
                kind: CLOSE,
                error,
                allow_reconnect,
                ..Default::default()
            },
        }
    }
}

impl TryFrom<RawHubMessage> for HubMessage {
    type Error = anyhow::Error;

    fn try_from(raw: RawHubMessage) -> anyhow::Result<Self> {
        let kind = raw.kind;
        let invocation_id = || {
            raw.invocation_id
                .clone()
                .ok_or_else(|| anyhow::anyhow!("message type {} without invocationId", kind))
        };
        let target = || {
            raw.target
                .clone()
                .ok_or_else(|| anyhow::anyhow!("message type {} without target", kind))
        };
        let msg = match kind {
            INVOCATION => HubMessage::Invocation {
                invocation_id: raw.invocation_id.clone(),
                target: target()?,
                arguments: raw.arguments.clone().unwrap_or_default(),
            },
            STREAM_ITEM => HubMessage::StreamItem {
                invocation_id: invocation_id()?,
                item: raw.item.clone().unwrap_or(Value::Null),
            },
            COMPLETION => HubMessage::Completion {
                invocation_id: invocation_id()?,
                result: raw.result.clone(),
                error: raw.error.clone(),
            },
            STREAM_INVOCATION => HubMessage::StreamInvocation {
                invocation_id: invocation_id()?,
                target: target()?,
                arguments: raw.arguments.clone().unwrap_or_default(),
            },
            CANCEL_INVOCATION => HubMessage::CancelInvocation {
                invocation_id: invocation_id()?,
            },
            PING => HubMessage::Ping,
            CLOSE => HubMessage::Close {
                error: raw.error.clone(),
                allow_reconnect: raw.allow_reconnect,
            },
            other => return Err(anyhow::anyhow!("unknown hub message type: {}", other)),
        };
        Ok(msg)
    }
}

/// Serialize a value as one record, separator included.
pub fn encode_record<T: Serialize>(value: &T) -> anyhow::Result<String> {
    let mut text =
        serde_json::to_string(value).map_err(|e| anyhow::anyhow!("Serialization error: {}", e))?;
    text.push(RECORD_SEPARATOR);
    Ok(text)
}

pub fn encode_message(msg: &HubMessage) -> anyhow::Result<String> {
    encode_record(&RawHubMessage::from(msg))
}

/// Parse one record (without its separator) into a hub message.
pub fn decode_message(record: &str) -> anyhow::Result<HubMessage> {
    let raw: RawHubMessage = serde_json::from_str(record)
        .map_err(|e| anyhow::anyhow!("Deserialization error: {}", e))?;
    HubMessage::try_from(raw)
}

pub fn decode_handshake_response(record: &str) -> anyhow::Result<HandshakeResponse> {
    serde_json::from_str(record).map_err(|e| anyhow::anyhow!("Invalid handshake response: {}", e))
}

/// Reassembles records from WebSocket text frames.
#[derive(Debug, Default)]
pub struct RecordBuffer {
    pending: String,
}

impl RecordBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, text: &str) {
        self.pending.push_str(text);
    }

    /// Next complete record, separator stripped. Empty records are skipped.
    pub fn next_record(&mut self) -> Option<String> {
        loop {
            let end = self.pending.find(RECORD_SEPARATOR)?;
            let record: String = self.pending.drain(..end).collect();
            self.pending.replace_range(..RECORD_SEPARATOR.len_utf8(), "");
            if !record.trim().is_empty() {
                return Some(record);
            }
        }
    }

    /// True when a partial record is waiting for more data.
    pub fn has_partial(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableTransport {
    pub transport: String,
    #[serde(default)]
    pub transfer_formats: Vec<String>,
}

/// Body of the `POST {hub}/negotiate` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiateResponse {
    #[serde(default)]
    pub negotiate_version: u32,
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub connection_token: Option<String>,
    #[serde(default)]
    pub available_transports: Vec<AvailableTransport>,
    #[serde(default)]
    pub error: Option<String>,
}

impl NegotiateResponse {
    pub fn supports_websockets(&self) -> bool {
        self.available_transports
            .iter()
            .any(|t| t.transport == WEBSOCKETS_TRANSPORT)
    }

    /// The `id` query value for the WebSocket connection. Version 1 servers
    /// hand out a separate token; version 0 servers reuse the connection id.
    pub fn websocket_id(&self) -> anyhow::Result<String> {
        if let Some(err) = &self.error {
            return Err(anyhow::anyhow!("Negotiation rejected: {}", err));
        }
        if !self.supports_websockets() {
            return Err(anyhow::anyhow!(
                "{} transport is not supported by the service",
                WEBSOCKETS_TRANSPORT
            ));
        }
        self.connection_token
            .clone()
            .or_else(|| self.connection_id.clone())
            .ok_or_else(|| anyhow::anyhow!("Negotiate response carries no connection id"))
    }
}

pub fn negotiate_url(hub_url: &str) -> anyhow::Result<Url> {
    let mut url = Url::parse(hub_url).map_err(|e| anyhow::anyhow!("Invalid hub url {}: {}", hub_url, e))?;
    let path = format!("{}/negotiate", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.query_pairs_mut()
        .append_pair("negotiateVersion", &NEGOTIATE_VERSION.to_string());
    Ok(url)
}

/// Hub url with its scheme switched to `ws`/`wss` and the connection id attached.
pub fn websocket_url(hub_url: &str, connection_id: Option<&str>) -> anyhow::Result<Url> {
    let mut url = Url::parse(hub_url).map_err(|e| anyhow::anyhow!("Invalid hub url {}: {}", hub_url, e))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(anyhow::anyhow!("Unsupported url scheme: {}", other)),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow::anyhow!("Cannot switch {} to {}", hub_url, scheme))?;
    if let Some(id) = connection_id {
        url.query_pairs_mut().append_pair("id", id);
    }
    Ok(url)
}
