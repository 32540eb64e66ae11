//! Maps raw ingestion frames to canonical messages. Pure: no I/O.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use thiserror::Error;

use scribe_types::events::{EventEnvelope, MESSAGE_CREATE, RawAttachment, RawMessage};
use scribe_types::models::{Author, Message};

/// Result of normalizing one frame.
#[derive(Debug)]
pub enum Normalized {
    /// A message worth archiving, attachments still unresolved.
    Message(PendingMessage),
    /// Expected and frequent: nothing to archive.
    Skip(SkipReason),
    /// The frame is malformed.
    Reject(RejectReason),
}

#[derive(Debug)]
pub struct PendingMessage {
    /// `attachments` is empty until the pipeline resolves `references`.
    pub message: Message,
    pub references: Vec<AttachmentRef>,
    /// Attachment entries without an id or url, or repeating an earlier id.
    pub dropped_references: usize,
}

/// An attachment reference as announced upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentRef {
    pub id: String,
    pub url: String,
    pub filename: Option<String>,
    pub size: Option<u64>,
    pub content_type: Option<String>,
}

#[derive(Error, Debug, PartialEq)]
pub enum SkipReason {
    #[error("unhandled event type {0}")]
    EventType(String),
    #[error("no message payload")]
    NoMessage,
    #[error("bot author")]
    BotAuthor,
}

#[derive(Error, Debug)]
pub enum RejectReason {
    #[error("unparsable frame: {0}")]
    Unparsable(#[from] serde_json::Error),
    #[error("message has no id")]
    MissingId,
    #[error("message {0} has no author")]
    MissingAuthor(String),
    #[error("message {0} has no timestamp")]
    MissingTimestamp(String),
    #[error("message {id} has invalid timestamp {value:?}")]
    BadTimestamp { id: String, value: String },
}

/// Parse and normalize one text frame.
pub fn normalize(frame: &str) -> Normalized {
    match serde_json::from_str::<EventEnvelope>(frame) {
        Ok(envelope) => normalize_envelope(envelope),
        Err(e) => Normalized::Reject(RejectReason::Unparsable(e)),
    }
}

pub fn normalize_envelope(envelope: EventEnvelope) -> Normalized {
    if envelope.event_type != MESSAGE_CREATE {
        return Normalized::Skip(SkipReason::EventType(envelope.event_type));
    }

    let Some(raw) = envelope.into_message() else {
        return Normalized::Skip(SkipReason::NoMessage);
    };

    match normalize_message(raw) {
        Ok(pending) => Normalized::Message(pending),
        Err(outcome) => outcome,
    }
}

fn normalize_message(raw: RawMessage) -> Result<PendingMessage, Normalized> {
    let id = raw
        .id
        .filter(|id| !id.is_empty())
        .ok_or(Normalized::Reject(RejectReason::MissingId))?;

    let Some(author) = raw.author else {
        return Err(Normalized::Reject(RejectReason::MissingAuthor(id)));
    };
    if author.bot == Some(true) {
        return Err(Normalized::Skip(SkipReason::BotAuthor));
    }
    let Some(author_id) = author.id.filter(|a| !a.is_empty()) else {
        return Err(Normalized::Reject(RejectReason::MissingAuthor(id)));
    };

    let Some(raw_timestamp) = raw.timestamp else {
        return Err(Normalized::Reject(RejectReason::MissingTimestamp(id)));
    };
    let timestamp = match DateTime::parse_from_rfc3339(&raw_timestamp) {
        Ok(ts) => ts.with_timezone(&Utc),
        Err(_) => {
            return Err(Normalized::Reject(RejectReason::BadTimestamp {
                id,
                value: raw_timestamp,
            }));
        }
    };

    let (references, dropped_references) = collect_references(raw.attachments.unwrap_or_default());

    Ok(PendingMessage {
        message: Message {
            id,
            content: raw.content.unwrap_or_default(),
            timestamp,
            author: Author {
                id: author_id,
                username: author.username.unwrap_or_default(),
                discriminator: author.discriminator,
                avatar: author.avatar,
            },
            channel_id: raw.channel_id,
            guild_id: raw.guild_id,
            attachments: Vec::new(),
        },
        references,
        dropped_references,
    })
}

fn collect_references(raw: Vec<serde_json::Value>) -> (Vec<AttachmentRef>, usize) {
    let total = raw.len();
    let mut seen = HashSet::new();

    let references: Vec<AttachmentRef> = raw
        .into_iter()
        .filter_map(RawAttachment::from_value)
        .filter_map(|a| {
            let id = a.id.filter(|id| !id.is_empty())?;
            let url = a.url.filter(|url| !url.is_empty())?;
            Some(AttachmentRef {
                id,
                url,
                filename: a.filename,
                size: a.size,
                content_type: a.content_type,
            })
        })
        .filter(|r| seen.insert(r.id.clone()))
        .collect();

    let dropped = total - references.len();
    (references, dropped)
}
