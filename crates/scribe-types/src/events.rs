use serde::{Deserialize, Serialize};

/// The only event type the ingestion pipeline archives.
pub const MESSAGE_CREATE: &str = "MESSAGE_CREATE";

/// A frame sent by the upstream producer over the ingestion WebSocket.
///
/// The producer forwards the arguments of the observed dispatch call as-is,
/// so `data` is an array and only its first element is meaningful.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_type: String,
    #[serde(default)]
    pub data: Vec<EventPayload>,
}

impl EventEnvelope {
    /// The raw message carried by `data[0]`, if any.
    pub fn into_message(self) -> Option<RawMessage> {
        self.data.into_iter().next().and_then(|payload| payload.message)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventPayload {
    #[serde(default)]
    pub message: Option<RawMessage>,
}

/// Upstream message object. Every field is optional here; the normalizer
/// decides which absences are fatal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub author: Option<RawAuthor>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub guild_id: Option<String>,
    /// Left untyped so one malformed entry does not reject the whole
    /// message. See [`RawAttachment::from_value`].
    #[serde(default)]
    pub attachments: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawAuthor {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawAttachment {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl RawAttachment {
    /// `None` when the entry is not an object or a field has the wrong type.
    pub fn from_value(value: serde_json::Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }
}
