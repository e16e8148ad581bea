//! Wire messages for the room-presence and volume-relay channels
//!
//! Inbound frames are JSON objects. The server writes some nulls as the text
//! `"null"`, so every top-level field is normalized before delivery.

use super::ChannelError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A decoded inbound frame with nulls normalized
pub(crate) type InboundMessage = Map<String, Value>;

/// Decode a text frame into a normalized JSON object
pub(crate) fn decode_frame(text: &str) -> Result<InboundMessage, ChannelError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ChannelError::Malformed(e.to_string()))?;
    match value {
        Value::Object(map) => Ok(normalize_nulls(map)),
        other => Err(ChannelError::Malformed(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

/// Replace every top-level `"null"` string with a JSON null
pub(crate) fn normalize_nulls(map: Map<String, Value>) -> InboundMessage {
    map.into_iter()
        .map(|(key, value)| match value {
            Value::String(ref s) if s == "null" => (key, Value::Null),
            other => (key, other),
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Messages sent by the client on either channel
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub(crate) enum OutboundMessage {
    /// Heartbeat: `{"action":"ping"}`
    Ping { action: &'static str },
    /// Local loudness sample during capture: `{"value":0.42}`
    Volume { value: f32 },
}

impl OutboundMessage {
    pub(crate) fn ping() -> Self {
        OutboundMessage::Ping { action: "ping" }
    }

    pub(crate) fn volume(value: f32) -> Self {
        OutboundMessage::Volume { value }
    }

    pub(crate) fn to_json(&self) -> Result<String, ChannelError> {
        serde_json::to_string(self).map_err(|e| ChannelError::Malformed(e.to_string()))
    }
}

/// Room-presence push: occupancy and countdown anchor
///
/// The server sends `stay_num` either as a number or as a numeric string.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub(crate) struct PresenceMessage {
    #[serde(default, deserialize_with = "lenient_count")]
    pub stay_num: Option<u32>,
    #[serde(default)]
    pub start_time: Option<String>,
}

/// Volume-relay push: peer-aggregated volume
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub(crate) struct VolumeRelayMessage {
    #[serde(default)]
    pub average: Option<f64>,
}

impl PresenceMessage {
    pub(crate) fn from_inbound(message: &InboundMessage) -> Result<Self, ChannelError> {
        serde_json::from_value(Value::Object(message.clone()))
            .map_err(|e| ChannelError::Malformed(e.to_string()))
    }
}

impl VolumeRelayMessage {
    pub(crate) fn from_inbound(message: &InboundMessage) -> Result<Self, ChannelError> {
        serde_json::from_value(Value::Object(message.clone()))
            .map_err(|e| ChannelError::Malformed(e.to_string()))
    }
}

fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Count {
        Number(u32),
        Text(String),
    }

    match Option::<Count>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Count::Number(n)) => Ok(Some(n)),
        Some(Count::Text(s)) => s
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid stay_num: {:?}", s))),
    }
}
