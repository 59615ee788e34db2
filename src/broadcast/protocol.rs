// Live transport protocol
// JSON envelopes exchanged with dashboard viewers

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::now_millis;

/// Subscription entry matching every topic
pub const WILDCARD: &str = "*";

pub const TOPIC_WELCOME: &str = "welcome";
pub const TOPIC_PONG: &str = "pong";
pub const TOPIC_SUBSCRIBED: &str = "subscribed";
pub const TOPIC_DATA_UPDATED: &str = "data:updated";
pub const TOPIC_ALERTS: &str = "alerts";

/// Outbound frame: `{type, data, timestamp}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub topic: String,
    pub data: Value,
    pub timestamp: i64,
}

impl Envelope {
    pub fn new(topic: impl Into<String>, data: Value) -> Self {
        Self {
            topic: topic.into(),
            data,
            timestamp: now_millis(),
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

/// Inbound viewer request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Ping,
    Subscribe { channels: Vec<String> },
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("unsupported message type '{0}'")]
    UnknownType(String),

    #[error("subscribe without a channel list")]
    MissingChannels,

    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("connection {0} is not registered")]
    UnknownConnection(uuid::Uuid),
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    channels: Option<Vec<String>>,
    #[serde(default)]
    data: Option<Value>,
}

/// Parse an inbound frame. `subscribe` accepts the channel list either at
/// the top level or under `data`.
pub fn parse_client_message(raw: &str) -> Result<ClientMessage, ProtocolError> {
    let frame: RawFrame = serde_json::from_str(raw).map_err(ProtocolError::Malformed)?;

    match frame.kind.as_str() {
        "ping" => Ok(ClientMessage::Ping),
        "subscribe" => {
            let channels = match frame.channels {
                Some(channels) => channels,
                None => frame
                    .data
                    .and_then(|data| data.get("channels").cloned())
                    .ok_or(ProtocolError::MissingChannels)
                    .and_then(|value| serde_json::from_value(value).map_err(ProtocolError::Malformed))?,
            };
            Ok(ClientMessage::Subscribe { channels: dedupe(channels) })
        }
        other => Err(ProtocolError::UnknownType(other.to_string())),
    }
}

fn dedupe(channels: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    channels
        .into_iter()
        .filter(|channel| seen.insert(channel.clone()))
        .collect()
}
