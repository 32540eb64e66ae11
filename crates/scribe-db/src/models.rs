//! Database row types, mapping directly to SQLite rows.
//! Conversions to and from the `scribe-types` models live here so the
//! query layer never deals with API shapes.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

use scribe_types::models::{Attachment, Author, Message};

pub struct MessageRow {
    pub id: String,
    pub content: String,
    pub timestamp: String,
    pub author_id: String,
    pub author_username: String,
    pub author_discriminator: Option<String>,
    pub author_avatar: Option<String>,
    pub channel_id: Option<String>,
    pub guild_id: Option<String>,
    pub attachment_ids: Vec<String>,
}

pub struct AttachmentRow {
    pub id: String,
    pub message_id: String,
    pub filename: String,
    pub size: i64,
    pub content_type: String,
    pub data: String,
}

/// Attachment metadata without the payload column.
pub struct AttachmentMetaRow {
    pub id: String,
    pub message_id: String,
    pub filename: String,
    pub size: i64,
    pub content_type: String,
}

/// Timestamps are stored as fixed-width RFC 3339 UTC strings so that
/// `ORDER BY timestamp` is chronological.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl From<&Message> for MessageRow {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            content: message.content.clone(),
            timestamp: format_timestamp(&message.timestamp),
            author_id: message.author.id.clone(),
            author_username: message.author.username.clone(),
            author_discriminator: message.author.discriminator.clone(),
            author_avatar: message.author.avatar.clone(),
            channel_id: message.channel_id.clone(),
            guild_id: message.guild_id.clone(),
            attachment_ids: message.attachments.clone(),
        }
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        let timestamp = DateTime::parse_from_rfc3339(&row.timestamp)
            .with_context(|| format!("corrupt timestamp '{}' on message '{}'", row.timestamp, row.id))?
            .with_timezone(&Utc);

        Ok(Self {
            id: row.id,
            content: row.content,
            timestamp,
            author: Author {
                id: row.author_id,
                username: row.author_username,
                discriminator: row.author_discriminator,
                avatar: row.author_avatar,
            },
            channel_id: row.channel_id,
            guild_id: row.guild_id,
            attachments: row.attachment_ids,
        })
    }
}

impl From<&Attachment> for AttachmentRow {
    fn from(attachment: &Attachment) -> Self {
        Self {
            id: attachment.id.clone(),
            message_id: attachment.message_id.clone(),
            filename: attachment.filename.clone(),
            size: i64::try_from(attachment.size).unwrap_or(i64::MAX),
            content_type: attachment.content_type.clone(),
            data: attachment.data.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamp_format_sorts_lexically() {
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        assert_eq!(format_timestamp(&early), "2024-01-01T09:00:00.000Z");
        assert!(format_timestamp(&early) < format_timestamp(&late));
    }

    #[test]
    fn message_row_conversion_keeps_fields() {
        let message = Message {
            id: "m1".into(),
            content: "hi".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            author: Author {
                id: "u1".into(),
                username: "bob".into(),
                discriminator: Some("0".into()),
                avatar: None,
            },
            channel_id: Some("c1".into()),
            guild_id: None,
            attachments: vec!["a1".into(), "a2".into()],
        };

        let row = MessageRow::from(&message);
        assert_eq!(row.attachment_ids, vec!["a1", "a2"]);

        let back = Message::try_from(row).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn corrupt_timestamp_is_an_error() {
        let row = MessageRow {
            id: "m1".into(),
            content: String::new(),
            timestamp: "yesterday".into(),
            author_id: "u1".into(),
            author_username: "bob".into(),
            author_discriminator: None,
            author_avatar: None,
            channel_id: None,
            guild_id: None,
            attachment_ids: vec![],
        };
        assert!(Message::try_from(row).is_err());
    }
}
