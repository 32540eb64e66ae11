use futures_util::{StreamExt, stream};
use tracing::{debug, warn};

use scribe_types::models::Attachment;

use crate::error::StoreError;
use crate::fetcher::Fetch;
use crate::normalizer::{AttachmentRef, PendingMessage};
use crate::store::{CommitOutcome, Store};

/// What happened to one normalized message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    Stored {
        id: String,
        attachments: usize,
        failed_attachments: usize,
    },
    /// The id was already archived (replay or concurrent delivery).
    Duplicate { id: String },
}

/// Dedup check, attachment fan-out and commit for normalized messages.
/// Shared by every session.
pub struct Pipeline<F> {
    store: Store,
    fetcher: F,
    max_fetches_per_message: usize,
}

impl<F: Fetch> Pipeline<F> {
    pub fn new(store: Store, fetcher: F, max_fetches_per_message: usize) -> Self {
        Self {
            store,
            fetcher,
            max_fetches_per_message: max_fetches_per_message.max(1),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Archive a message unless it is already stored.
    ///
    /// Only storage failures are errors. Failed attachment downloads are
    /// logged and left out of the stored message.
    pub async fn process(&self, pending: PendingMessage) -> Result<FrameOutcome, StoreError> {
        let PendingMessage {
            mut message,
            references,
            ..
        } = pending;

        if self.store.exists(&message.id).await? {
            debug!("Message {} already archived, skipping", message.id);
            return Ok(FrameOutcome::Duplicate { id: message.id });
        }

        let attachments = self.resolve_attachments(&message.id, &references).await;
        message.attachments = attachments.iter().map(|a| a.id.clone()).collect();

        match self.store.commit(&message, &attachments).await? {
            CommitOutcome::Stored { attachment_ids } => Ok(FrameOutcome::Stored {
                id: message.id,
                attachments: attachment_ids.len(),
                failed_attachments: references.len() - attachment_ids.len(),
            }),
            CommitOutcome::AlreadyPresent => {
                debug!("Message {} archived concurrently, discarding", message.id);
                Ok(FrameOutcome::Duplicate { id: message.id })
            }
        }
    }

    /// Fetch every reference with bounded concurrency. Successful downloads
    /// come back in reference order regardless of completion order.
    async fn resolve_attachments(&self, message_id: &str, references: &[AttachmentRef]) -> Vec<Attachment> {
        if references.is_empty() {
            return Vec::new();
        }

        // Futures are lazy: building them all up front starts nothing,
        // `buffered` decides how many run at once.
        let fetches: Vec<_> = references
            .iter()
            .map(|reference| self.fetcher.fetch(message_id, reference))
            .collect();

        let outcomes: Vec<_> = stream::iter(fetches)
            .buffered(self.max_fetches_per_message)
            .collect()
            .await;

        outcomes
            .into_iter()
            .filter_map(|outcome| match outcome {
                Ok(attachment) => Some(attachment),
                Err(failure) => {
                    warn!("Message {}: dropping {}", message_id, failure);
                    None
                }
            })
            .collect()
    }
}
