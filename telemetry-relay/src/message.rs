//! Wire envelope and the codec that moves it on and off the socket.
//!
//! Every message is a JSON object with a string `type`. Viewers send
//! `{"type", "data"}`; some producers put their fields next to `type`
//! instead. The relay only routes on `type` and forwards the text it
//! received, so neither layout loses anything on the way through.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::DecodeError;

pub const FRAME: &str = "frame";
pub const STATS: &str = "stats";
pub const INFO: &str = "info";
pub const ECHO: &str = "echo";

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: String,
    pub data: Value,
    /// Top-level fields other than `type` and `data`.
    pub extra: Map<String, Value>,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            extra: Map::new(),
        }
    }

    /// Builds an envelope from a typed payload such as
    /// [`FramePayload`](crate::telemetry::FramePayload).
    pub fn from_payload<T>(kind: impl Into<String>, payload: &T) -> Result<Self, serde_json::Error>
    where
        T: Serialize,
    {
        Ok(Self::new(kind, serde_json::to_value(payload)?))
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(INFO, Value::String(text.into()))
    }

    /// Wraps a whole decoded message as the payload of an `echo` reply.
    pub fn echo(original: &Envelope) -> Self {
        Self::new(ECHO, original.to_value())
    }

    pub fn to_value(&self) -> Value {
        let mut fields = self.extra.clone();
        fields.insert("type".to_string(), Value::String(self.kind.clone()));
        fields.insert("data".to_string(), self.data.clone());
        Value::Object(fields)
    }
}

/// A decoded message together with the exact text it arrived as.
///
/// Routing reads `envelope`; caching and fan-out use `text`, so numbers,
/// key order and unknown fields reach consumers exactly as sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub envelope: Envelope,
    pub text: String,
}

impl Inbound {
    pub fn decode(text: impl Into<String>) -> Result<Self, DecodeError> {
        let text = text.into();
        let envelope = decode(&text)?;
        Ok(Self { envelope, text })
    }

    pub fn kind(&self) -> &str {
        &self.envelope.kind
    }
}

impl From<Envelope> for Inbound {
    fn from(envelope: Envelope) -> Self {
        let text = encode(&envelope);
        Self { envelope, text }
    }
}

/// Where a cacheable message lives in the latest-value cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheSlot {
    Frame,
    Stats,
}

impl CacheSlot {
    /// Order in which cached state is replayed to a new connection.
    pub const REPLAY_ORDER: [CacheSlot; 2] = [CacheSlot::Frame, CacheSlot::Stats];

    pub fn kind(self) -> &'static str {
        match self {
            CacheSlot::Frame => FRAME,
            CacheSlot::Stats => STATS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification<'a> {
    /// Replayable state: cached, promotes the sender, fanned out.
    Cacheable(CacheSlot),
    /// Anything else: never cached, never fanned out.
    Transient(&'a str),
}

pub fn classify(envelope: &Envelope) -> Classification<'_> {
    match envelope.kind.as_str() {
        FRAME => Classification::Cacheable(CacheSlot::Frame),
        STATS => Classification::Cacheable(CacheSlot::Stats),
        other => Classification::Transient(other),
    }
}

pub fn decode(raw: &str) -> Result<Envelope, DecodeError> {
    let Value::Object(mut fields) = serde_json::from_str::<Value>(raw)? else {
        return Err(DecodeError::NotAnObject);
    };

    let kind = match fields.remove("type") {
        Some(Value::String(kind)) => kind,
        _ => return Err(DecodeError::MissingType),
    };
    let data = fields.remove("data").unwrap_or(Value::Null);

    Ok(Envelope {
        kind,
        data,
        extra: fields,
    })
}

/// Serializes an envelope. Object keys come out sorted, so equal envelopes
/// always encode to identical text.
pub fn encode(envelope: &Envelope) -> String {
    envelope.to_value().to_string()
}
