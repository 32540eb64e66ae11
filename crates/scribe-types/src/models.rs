use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical archived message. Serialized with `_id` so the archive viewer
/// can keep reading the same documents it always has.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub author: Author,
    pub channel_id: Option<String>,
    pub guild_id: Option<String>,
    /// Ids of successfully archived attachments, in upstream order.
    pub attachments: Vec<String>,
}

/// Author snapshot taken at observation time. Never updated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub username: String,
    pub discriminator: Option<String>,
    pub avatar: Option<String>,
}

/// A downloaded attachment ready for storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub id: String,
    pub message_id: String,
    pub filename: String,
    pub size: u64,
    pub content_type: String,
    /// Standard base64 of the payload.
    pub data: String,
}
