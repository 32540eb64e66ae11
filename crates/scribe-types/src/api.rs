use serde::{Deserialize, Serialize};

use crate::models::Message;

// -- Messages --

/// Raw query string of `GET /messages`. Numbers are kept as strings so that
/// garbage falls back to defaults instead of failing the request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub attachments: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
    pub channel_id: Option<String>,
    pub guild_id: Option<String>,
}

/// Attachment presence filter for message listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AttachmentFilter {
    With,
    Without,
    #[default]
    Any,
}

impl AttachmentFilter {
    /// Unknown values mean "any".
    pub fn parse(value: &str) -> Self {
        match value {
            "with" => Self::With,
            "without" => Self::Without,
            _ => Self::Any,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesPage {
    pub messages: Vec<Message>,
    pub total_pages: u64,
    pub current_page: u32,
}

// -- Attachments --

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentMeta {
    pub id: String,
    pub filename: String,
    pub size: u64,
    pub content_type: String,
}

// -- Health --

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub active_sessions: usize,
}
