//! Ingestion side of scribe: turns a WebSocket stream of observed chat events
//! into archived messages and attachments.
//!
//! ```text
//! Listener ──► Session ──► normalizer ──► Pipeline ──► Store ──► SQLite
//!                                            │
//!                                            └──► Fetch (one task per attachment)
//! ```
//!
//! Sessions are independent; the only state they share is the [`Pipeline`],
//! which holds the store handle and the attachment fetcher.

pub mod error;
pub mod fetcher;
pub mod listener;
pub mod normalizer;
pub mod pipeline;
pub mod session;
pub mod store;

pub use error::{FetchFailure, FetchFailureReason, StoreError};
pub use fetcher::{Fetch, FetchConfig, FetchOutcome, HttpFetcher};
pub use listener::Listener;
pub use normalizer::{AttachmentRef, Normalized, PendingMessage, RejectReason, SkipReason};
pub use pipeline::{FrameOutcome, Pipeline};
pub use session::{Session, SessionState, SessionStats};
pub use store::{CommitOutcome, InsertOutcome, Store};
