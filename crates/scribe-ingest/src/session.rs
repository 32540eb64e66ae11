use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::fetcher::Fetch;
use crate::normalizer::{Normalized, normalize};
use crate::pipeline::{FrameOutcome, Pipeline};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the session is closed.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Lifecycle of one ingestion connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    /// A frame is being archived; the value is its attachment count.
    Processing(usize),
    Closed,
}

/// Per-session counters, logged when the session closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames: u64,
    pub stored: u64,
    pub duplicates: u64,
    pub skipped: u64,
    pub rejected: u64,
    pub failed: u64,
}

/// Owns one ingestion stream. Frames are handled strictly one at a time in
/// arrival order; a failing frame is logged and never ends the session.
pub struct Session<F> {
    id: Uuid,
    pipeline: Arc<Pipeline<F>>,
    shutdown: CancellationToken,
    state: SessionState,
    stats: SessionStats,
}

impl<F: Fetch> Session<F> {
    pub fn new(id: Uuid, pipeline: Arc<Pipeline<F>>, shutdown: CancellationToken) -> Self {
        Self {
            id,
            pipeline,
            shutdown,
            state: SessionState::Open,
            stats: SessionStats::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Read frames until the peer goes away, the transport fails, the
    /// heartbeat times out or shutdown is signalled. Shutdown is only observed
    /// between frames, so the frame in progress is always finished.
    pub async fn run<Si, St>(mut self, mut sender: Si, mut receiver: St) -> SessionStats
    where
        Si: Sink<Message> + Unpin,
        St: Stream<Item = Result<Message, axum::Error>> + Unpin,
    {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut pong_received = true;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    debug!("Session {} stopping for shutdown", self.id);
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                frame = receiver.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => self.handle_frame(text.as_str()).await,
                        Some(Ok(Message::Binary(data))) => {
                            warn!("Session {} ignoring binary frame ({} bytes)", self.id, data.len());
                        }
                        Some(Ok(Message::Pong(_))) => pong_received = true,
                        Some(Ok(Message::Ping(_))) => {}
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            warn!("Session {} transport error: {}", self.id, e);
                            break;
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    if std::mem::replace(&mut pong_received, false) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Session {} heartbeat timeout (missed {} pongs), closing", self.id, missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }

        self.state = SessionState::Closed;
        info!("Session {} closed: {:?}", self.id, self.stats);
        self.stats
    }

    /// Normalize and archive one text frame. Every outcome is absorbed here.
    pub async fn handle_frame(&mut self, text: &str) {
        self.stats.frames += 1;

        let pending = match normalize(text) {
            Normalized::Message(pending) => pending,
            Normalized::Skip(reason) => {
                self.stats.skipped += 1;
                debug!("Session {} skipped frame: {}", self.id, reason);
                return;
            }
            Normalized::Reject(reason) => {
                self.stats.rejected += 1;
                warn!(
                    "Session {} rejected frame: {} -- raw: {}",
                    self.id,
                    reason,
                    truncate(text, 200)
                );
                return;
            }
        };

        if pending.dropped_references > 0 {
            warn!(
                "Session {} message {}: ignoring {} unusable attachment references",
                self.id, pending.message.id, pending.dropped_references
            );
        }

        self.state = SessionState::Processing(pending.references.len());
        trace!("Session {} state {:?}", self.id, self.state);

        let message_id = pending.message.id.clone();
        match self.pipeline.process(pending).await {
            Ok(FrameOutcome::Stored { id, attachments, failed_attachments }) => {
                self.stats.stored += 1;
                info!(
                    "Session {} archived message {} ({} attachments, {} failed)",
                    self.id, id, attachments, failed_attachments
                );
            }
            Ok(FrameOutcome::Duplicate { .. }) => self.stats.duplicates += 1,
            Err(e) => {
                self.stats.failed += 1;
                error!("Session {} failed to archive message {}: {}", self.id, message_id, e);
            }
        }

        self.state = SessionState::Open;
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_db::{Database, MessageFilter};

    use crate::pipeline::tests::{FakeFetcher, frame};
    use crate::store::Store;

    fn pipeline(fetcher: FakeFetcher) -> Arc<Pipeline<FakeFetcher>> {
        let db = Arc::new(Database::open_in_memory().unwrap());
        Arc::new(Pipeline::new(Store::new(db), fetcher, 4))
    }

    fn text(s: impl Into<String>) -> Result<Message, axum::Error> {
        let s: String = s.into();
        Ok(Message::Text(s.into()))
    }

    #[tokio::test]
    async fn bad_frames_do_not_end_the_session() {
        let pipeline = pipeline(FakeFetcher::serving(&["http://cdn/a"]));
        let bot = frame("m-bot", &[]).replace(r#""bot":false"#, r#""bot":true"#);

        let frames = futures_util::stream::iter(vec![
            text("{ not json"),
            Ok(Message::Binary(Bytes::from_static(b"\x00\x01"))),
            text(bot),
            text(r#"{"eventType":"TYPING_START","data":[]}"#),
            text(frame("m1", &[("A", "http://cdn/a"), ("B", "http://cdn/missing")])),
            text(frame("m1", &[("A", "http://cdn/a")])),
            text(frame("m2", &[])),
        ]);

        let session = Session::new(Uuid::new_v4(), pipeline.clone(), CancellationToken::new());
        let stats = session.run(futures_util::sink::drain(), frames).await;

        assert_eq!(
            stats,
            SessionStats {
                frames: 6,
                stored: 2,
                duplicates: 1,
                skipped: 2,
                rejected: 1,
                failed: 0,
            }
        );

        let (rows, total) = pipeline
            .store()
            .database()
            .query_messages(&MessageFilter::default(), 1, 10)
            .unwrap();
        assert_eq!(total, 2);
        let m1 = rows.iter().find(|r| r.id == "m1").unwrap();
        assert_eq!(m1.attachment_ids, vec!["A"]);
    }

    #[tokio::test]
    async fn transport_error_closes_the_session() {
        let pipeline = pipeline(FakeFetcher::default());
        let frames = futures_util::stream::iter(vec![
            text(frame("m1", &[])),
            Err(axum::Error::new(std::io::Error::other("reset"))),
            text(frame("m2", &[])),
        ]);

        let session = Session::new(Uuid::new_v4(), pipeline.clone(), CancellationToken::new());
        let stats = session.run(futures_util::sink::drain(), frames).await;

        assert_eq!(stats.stored, 1);
        assert!(!pipeline.store().database().message_exists("m2").unwrap());
    }

    #[tokio::test]
    async fn cancelled_session_stops_reading() {
        let pipeline = pipeline(FakeFetcher::default());
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let session = Session::new(Uuid::new_v4(), pipeline, shutdown);
        let stats = session
            .run(futures_util::sink::drain(), futures_util::stream::pending())
            .await;
        assert_eq!(stats, SessionStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_is_closed_after_two_missed_pongs() {
        let pipeline = pipeline(FakeFetcher::default());
        let session = Session::new(Uuid::new_v4(), pipeline, CancellationToken::new());

        let started = tokio::time::Instant::now();
        let stats = session
            .run(futures_util::sink::drain(), futures_util::stream::pending())
            .await;

        // Pings at 15s and 30s go unanswered; the 45s tick closes.
        let elapsed = started.elapsed();
        assert!(elapsed >= HEARTBEAT_INTERVAL * 3, "closed after {:?}", elapsed);
        assert!(elapsed < HEARTBEAT_INTERVAL * 4, "closed after {:?}", elapsed);
        assert_eq!(stats, SessionStats::default());
    }

    #[tokio::test]
    async fn shutdown_finishes_frame_in_progress() {
        let mut fetcher = FakeFetcher::serving(&["http://cdn/a"]);
        fetcher.delay_ms.insert("http://cdn/a".into(), 300);
        let pipeline = pipeline(fetcher);
        let shutdown = CancellationToken::new();

        let frames = futures_util::stream::iter(vec![text(frame("m1", &[("A", "http://cdn/a")]))])
            .chain(futures_util::stream::pending());
        let session = Session::new(Uuid::new_v4(), pipeline.clone(), shutdown.clone());
        let task = tokio::spawn(session.run(futures_util::sink::drain(), frames));

        // Cancel once the attachment download has started and is sleeping.
        while pipeline.fetcher().calls.load(std::sync::atomic::Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.cancel();

        let stats = task.await.unwrap();
        assert_eq!(stats.stored, 1);
        let db = pipeline.store().database();
        assert!(db.message_exists("m1").unwrap());
        assert_eq!(db.get_attachment_meta("A").unwrap().unwrap().message_id, "m1");
    }

    #[tokio::test]
    async fn processing_state_returns_to_open() {
        let pipeline = pipeline(FakeFetcher::serving(&["http://cdn/a"]));
        let mut session = Session::new(Uuid::new_v4(), pipeline, CancellationToken::new());
        assert_eq!(session.state(), SessionState::Open);

        session.handle_frame(&frame("m1", &[("A", "http://cdn/a")])).await;
        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(session.stats.stored, 1);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
