use std::sync::Arc;

use scribe_db::Database;
use scribe_db::models::{AttachmentRow, MessageRow};
use scribe_types::models::{Attachment, Message};

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyPresent,
}

impl From<bool> for InsertOutcome {
    fn from(inserted: bool) -> Self {
        if inserted { Self::Inserted } else { Self::AlreadyPresent }
    }
}

/// Result of [`Store::commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The message row was written listing these attachment ids.
    Stored { attachment_ids: Vec<String> },
    AlreadyPresent,
}

/// Async gateway over the shared database. Every call runs on the blocking
/// pool so SQLite never stalls the runtime.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        Ok(tokio::task::spawn_blocking(move || f(&db)).await??)
    }

    pub async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.blocking(move |db| db.message_exists(&id)).await
    }

    pub async fn insert_message_if_absent(&self, message: &Message) -> Result<InsertOutcome, StoreError> {
        let row = MessageRow::from(message);
        self.blocking(move |db| db.insert_message_if_absent(&row))
            .await
            .map(InsertOutcome::from)
    }

    pub async fn insert_attachment(&self, attachment: &Attachment) -> Result<InsertOutcome, StoreError> {
        let row = AttachmentRow::from(attachment);
        self.blocking(move |db| db.insert_attachment(&row))
            .await
            .map(InsertOutcome::from)
    }

    /// Attachments and message in one transaction, attachments first. A
    /// message that is already stored wins and nothing is written. Attachment
    /// ids already archived under another message are dropped from the list.
    pub async fn commit(
        &self,
        message: &Message,
        attachments: &[Attachment],
    ) -> Result<CommitOutcome, StoreError> {
        let row = MessageRow::from(message);
        let attachment_rows: Vec<AttachmentRow> = attachments.iter().map(AttachmentRow::from).collect();
        let stored = self
            .blocking(move |db| db.commit_message(&row, &attachment_rows))
            .await?;

        Ok(match stored {
            Some(attachment_ids) => CommitOutcome::Stored { attachment_ids },
            None => CommitOutcome::AlreadyPresent,
        })
    }
}
