use crate::Database;
use crate::models::{AttachmentMetaRow, AttachmentRow, MessageRow};
use anyhow::Result;
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params_from_iter};
use tracing::warn;

use scribe_types::api::AttachmentFilter;

/// Predicate for message listings. Empty strings are treated as absent.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub attachments: AttachmentFilter,
    /// Case-insensitive substring of the message content.
    pub content: Option<String>,
    /// Case-insensitive substring of the author's username.
    pub author: Option<String>,
    pub channel_id: Option<String>,
    pub guild_id: Option<String>,
}

impl MessageFilter {
    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut clauses: Vec<&str> = Vec::new();
        let mut params: Vec<Value> = Vec::new();

        match self.attachments {
            AttachmentFilter::With => clauses.push("attachment_count > 0"),
            AttachmentFilter::Without => clauses.push("attachment_count = 0"),
            AttachmentFilter::Any => {}
        }

        if let Some(content) = non_empty(&self.content) {
            clauses.push("content LIKE ? ESCAPE '\\'");
            params.push(Value::Text(like_pattern(content)));
        }
        if let Some(author) = non_empty(&self.author) {
            clauses.push("author_username LIKE ? ESCAPE '\\'");
            params.push(Value::Text(like_pattern(author)));
        }
        if let Some(channel_id) = non_empty(&self.channel_id) {
            clauses.push("channel_id = ?");
            params.push(Value::Text(channel_id.to_string()));
        }
        if let Some(guild_id) = non_empty(&self.guild_id) {
            clauses.push("guild_id = ?");
            params.push(Value::Text(guild_id.to_string()));
        }

        if clauses.is_empty() {
            (String::new(), params)
        } else {
            (format!("WHERE {}", clauses.join(" AND ")), params)
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// `%needle%` with LIKE metacharacters escaped, so user input is matched literally.
fn like_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

const MESSAGE_COLUMNS: &str = "id, content, timestamp, author_id, author_username, author_discriminator, \
     author_avatar, channel_id, guild_id, attachment_ids";

impl Database {
    // -- Messages --

    pub fn message_exists(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| message_exists(conn, id))
    }

    /// `INSERT OR IGNORE` keyed by id. Returns false when the id was already stored.
    pub fn insert_message_if_absent(&self, message: &MessageRow) -> Result<bool> {
        self.with_conn(|conn| insert_message(conn, message, &message.attachment_ids))
    }

    /// Store a message and its resolved attachments in one transaction.
    ///
    /// Returns `None` without writing anything if the message id is already
    /// present. Otherwise returns the attachment ids the stored message lists.
    /// Attachments are inserted before the message row, so a visible message
    /// never references an attachment that is missing. An attachment id that
    /// is already stored under a different message stays with that message
    /// and is left out of this one's list.
    pub fn commit_message(
        &self,
        message: &MessageRow,
        attachments: &[AttachmentRow],
    ) -> Result<Option<Vec<String>>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            if message_exists(&tx, &message.id)? {
                return Ok(None);
            }

            let mut foreign: Vec<&str> = Vec::new();
            for attachment in attachments {
                if insert_attachment(&tx, attachment)? {
                    continue;
                }
                let owner = attachment_owner(&tx, &attachment.id)?;
                if owner.as_deref() != Some(message.id.as_str()) {
                    warn!(
                        "Attachment {} already belongs to message {:?}, leaving it off message {}",
                        attachment.id, owner, message.id
                    );
                    foreign.push(&attachment.id);
                }
            }

            let attachment_ids: Vec<String> = message
                .attachment_ids
                .iter()
                .filter(|id| !foreign.contains(&id.as_str()))
                .cloned()
                .collect();
            insert_message(&tx, message, &attachment_ids)?;

            tx.commit()?;
            Ok(Some(attachment_ids))
        })
    }

    /// One page of messages matching `filter`, oldest first, plus the total
    /// number of matches. `page` is 1-based.
    pub fn query_messages(
        &self,
        filter: &MessageFilter,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<MessageRow>, u64)> {
        self.with_conn(|conn| query_messages(conn, filter, page, limit))
    }

    // -- Attachments --

    /// `INSERT OR IGNORE` keyed by id. Returns false when the id was already stored.
    pub fn insert_attachment(&self, attachment: &AttachmentRow) -> Result<bool> {
        self.with_conn(|conn| insert_attachment(conn, attachment))
    }

    pub fn get_attachment_meta(&self, id: &str) -> Result<Option<AttachmentMetaRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, message_id, filename, size, content_type FROM attachments WHERE id = ?1",
                    [id],
                    map_attachment_meta,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn get_attachment(&self, id: &str) -> Result<Option<AttachmentRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, message_id, filename, size, content_type, data FROM attachments WHERE id = ?1",
                    [id],
                    |row| {
                        Ok(AttachmentRow {
                            id: row.get(0)?,
                            message_id: row.get(1)?,
                            filename: row.get(2)?,
                            size: row.get(3)?,
                            content_type: row.get(4)?,
                            data: row.get(5)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn get_attachments_for_message(&self, message_id: &str) -> Result<Vec<AttachmentMetaRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, message_id, filename, size, content_type
                 FROM attachments
                 WHERE message_id = ?1
                 ORDER BY created_at, id",
            )?;
            let rows = stmt
                .query_map([message_id], map_attachment_meta)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn message_exists(conn: &Connection, id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM messages WHERE id = ?1", [id], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

fn insert_message(conn: &Connection, message: &MessageRow, attachment_ids: &[String]) -> Result<bool> {
    let attachment_count = attachment_ids.len() as i64;
    let attachment_ids = serde_json::to_string(attachment_ids)?;
    let changed = conn.execute(
        "INSERT OR IGNORE INTO messages (
            id, content, timestamp, author_id, author_username, author_discriminator,
            author_avatar, channel_id, guild_id, attachment_ids, attachment_count
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        rusqlite::params![
            message.id,
            message.content,
            message.timestamp,
            message.author_id,
            message.author_username,
            message.author_discriminator,
            message.author_avatar,
            message.channel_id,
            message.guild_id,
            attachment_ids,
            attachment_count,
        ],
    )?;
    Ok(changed == 1)
}

fn insert_attachment(conn: &Connection, attachment: &AttachmentRow) -> Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO attachments (id, message_id, filename, size, content_type, data)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            attachment.id,
            attachment.message_id,
            attachment.filename,
            attachment.size,
            attachment.content_type,
            attachment.data,
        ],
    )?;
    Ok(changed == 1)
}

fn attachment_owner(conn: &Connection, id: &str) -> Result<Option<String>> {
    let owner = conn
        .query_row("SELECT message_id FROM attachments WHERE id = ?1", [id], |row| row.get(0))
        .optional()?;
    Ok(owner)
}

fn query_messages(
    conn: &Connection,
    filter: &MessageFilter,
    page: u32,
    limit: u32,
) -> Result<(Vec<MessageRow>, u64)> {
    let (where_clause, mut params) = filter.where_clause();

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM messages {}", where_clause),
        params_from_iter(params.iter()),
        |row| row.get(0),
    )?;

    let offset = i64::from(page.saturating_sub(1)) * i64::from(limit);
    params.push(Value::Integer(i64::from(limit)));
    params.push(Value::Integer(offset));

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM messages {} ORDER BY timestamp ASC, id ASC LIMIT ? OFFSET ?",
        MESSAGE_COLUMNS, where_clause
    ))?;

    let rows = stmt
        .query_map(params_from_iter(params.iter()), map_message)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok((rows, total.max(0) as u64))
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    let attachment_ids: String = row.get(9)?;
    let attachment_ids = serde_json::from_str(&attachment_ids)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))?;

    Ok(MessageRow {
        id: row.get(0)?,
        content: row.get(1)?,
        timestamp: row.get(2)?,
        author_id: row.get(3)?,
        author_username: row.get(4)?,
        author_discriminator: row.get(5)?,
        author_avatar: row.get(6)?,
        channel_id: row.get(7)?,
        guild_id: row.get(8)?,
        attachment_ids,
    })
}

fn map_attachment_meta(row: &Row<'_>) -> rusqlite::Result<AttachmentMetaRow> {
    Ok(AttachmentMetaRow {
        id: row.get(0)?,
        message_id: row.get(1)?,
        filename: row.get(2)?,
        size: row.get(3)?,
        content_type: row.get(4)?,
    })
}
