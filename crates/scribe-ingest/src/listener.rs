use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::{DateTime, Utc};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};
use uuid::Uuid;

use crate::fetcher::Fetch;
use crate::pipeline::Pipeline;
use crate::session::{Session, SessionStats};

/// An active ingestion connection.
struct SessionInfo {
    peer: Option<SocketAddr>,
    connected_at: DateTime<Utc>,
}

/// Hands every accepted connection its own [`Session`] and tracks them so
/// shutdown can drain them.
pub struct Listener<F> {
    inner: Arc<ListenerInner<F>>,
}

struct ListenerInner<F> {
    pipeline: Arc<Pipeline<F>>,

    /// Every session runs inside this tracker.
    tracker: TaskTracker,

    /// Parent of every session's token.
    shutdown: CancellationToken,

    /// session_id -> connection info
    sessions: RwLock<HashMap<Uuid, SessionInfo>>,
}

impl<F> Clone for Listener<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F: Fetch> Listener<F> {
    pub fn new(pipeline: Pipeline<F>) -> Self {
        Self {
            inner: Arc::new(ListenerInner {
                pipeline: Arc::new(pipeline),
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline<F>> {
        &self.inner.pipeline
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    pub async fn active_sessions(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    /// Run a session over an upgraded WebSocket until it closes.
    pub async fn accept(&self, mut socket: WebSocket, peer: Option<SocketAddr>) {
        if self.is_shutting_down() {
            info!("Refusing ingestion connection from {:?}: shutting down", peer);
            let _ = SinkExt::close(&mut socket).await;
            return;
        }

        let (sender, receiver) = socket.split();
        self.serve(sender, receiver, peer).await;
    }

    /// Transport-agnostic half of [`Listener::accept`].
    pub async fn serve<Si, St>(&self, sender: Si, receiver: St, peer: Option<SocketAddr>) -> SessionStats
    where
        Si: Sink<Message> + Unpin,
        St: Stream<Item = Result<Message, axum::Error>> + Unpin,
    {
        let session_id = Uuid::new_v4();
        self.register(session_id, peer).await;

        let session = Session::new(
            session_id,
            self.inner.pipeline.clone(),
            self.inner.shutdown.child_token(),
        );
        let stats = self
            .inner
            .tracker
            .track_future(session.run(sender, receiver))
            .await;

        self.unregister(session_id).await;
        stats
    }

    async fn register(&self, session_id: Uuid, peer: Option<SocketAddr>) {
        let mut sessions = self.inner.sessions.write().await;
        sessions.insert(
            session_id,
            SessionInfo {
                peer,
                connected_at: Utc::now(),
            },
        );
        info!(
            "Ingestion session {} opened from {:?} ({} active)",
            session_id,
            peer,
            sessions.len()
        );
    }

    async fn unregister(&self, session_id: Uuid) {
        let mut sessions = self.inner.sessions.write().await;
        if let Some(info) = sessions.remove(&session_id) {
            let lasted = Utc::now() - info.connected_at;
            info!(
                "Ingestion session {} from {:?} ended after {}s ({} active)",
                session_id,
                info.peer,
                lasted.num_seconds(),
                sessions.len()
            );
        }
    }

    /// Stop accepting, tell every session to stop after its current frame and
    /// wait up to `grace` for them. Returns false if some were still running.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        info!("Ingestion listener shutting down");
        self.inner.shutdown.cancel();
        self.inner.tracker.close();

        match tokio::time::timeout(grace, self.inner.tracker.wait()).await {
            Ok(()) => {
                info!("All ingestion sessions drained");
                true
            }
            Err(_) => {
                warn!(
                    "{} ingestion sessions still running after {:?} grace period",
                    self.inner.tracker.len(),
                    grace
                );
                false
            }
        }
    }
}
