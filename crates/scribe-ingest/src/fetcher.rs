use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::Semaphore;
use tracing::trace;

use scribe_types::models::Attachment;

use crate::error::{FetchFailure, FetchFailureReason};
use crate::normalizer::AttachmentRef;

/// Used when neither the reference nor the response names a content type.
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

pub type FetchOutcome = Result<Attachment, FetchFailure>;

/// Retrieves attachment payloads. Implementations must not touch storage and
/// must tolerate concurrent calls for the attachments of one message.
pub trait Fetch: Send + Sync {
    fn fetch(
        &self,
        message_id: &str,
        reference: &AttachmentRef,
    ) -> impl Future<Output = FetchOutcome> + Send;
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Whole-request timeout, body included.
    pub timeout: Duration,
    /// Downloads larger than this are failures.
    pub max_bytes: u64,
    /// Concurrent downloads across all sessions.
    pub max_concurrent: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_bytes: 50 * 1024 * 1024,
            max_concurrent: 32,
        }
    }
}

/// HTTP fetcher. Cheap to clone; clones share the connection pool and the
/// global download limit.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    permits: Arc<Semaphore>,
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("scribe/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            max_bytes: config.max_bytes,
        })
    }

    /// Stop handing out download slots. In-flight downloads finish; queued
    /// ones fail with [`FetchFailureReason::Closed`].
    pub fn close(&self) {
        self.permits.close();
    }

    async fn download(&self, url: &str) -> Result<(Vec<u8>, Option<String>), FetchFailureReason> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FetchFailureReason::Closed)?;

        let resp = self.client.get(url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchFailureReason::Status(status.as_u16()));
        }

        if resp.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(FetchFailureReason::TooLarge { limit: self.max_bytes });
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        // Content-Length may be absent or wrong, so the limit is enforced while reading.
        let mut body = Vec::with_capacity(resp.content_length().unwrap_or(0) as usize);
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if (body.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(FetchFailureReason::TooLarge { limit: self.max_bytes });
            }
            body.extend_from_slice(&chunk);
        }

        Ok((body, content_type))
    }
}

impl Fetch for HttpFetcher {
    async fn fetch(&self, message_id: &str, reference: &AttachmentRef) -> FetchOutcome {
        trace!("Fetching attachment {} for message {}", reference.id, message_id);

        let (body, response_type) = self.download(&reference.url).await.map_err(|reason| FetchFailure {
            id: reference.id.clone(),
            reason,
        })?;

        Ok(build_attachment(message_id, reference, &body, response_type))
    }
}

/// Assemble a storable attachment. Reference metadata wins over what the
/// download reported.
pub fn build_attachment(
    message_id: &str,
    reference: &AttachmentRef,
    body: &[u8],
    response_type: Option<String>,
) -> Attachment {
    Attachment {
        id: reference.id.clone(),
        message_id: message_id.to_string(),
        filename: reference.filename.clone().unwrap_or_else(|| reference.id.clone()),
        size: reference.size.unwrap_or(body.len() as u64),
        content_type: reference
            .content_type
            .clone()
            .or(response_type)
            .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string()),
        data: B64.encode(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::StatusCode, http::header, routing::get};

    async fn serve_fixtures() -> String {
        let app = Router::new()
            .route("/image", get(|| async { ([(header::CONTENT_TYPE, "image/png")], vec![1u8, 2, 3]) }))
            .route("/plain", get(|| async { vec![7u8; 10] }))
            .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
            .route("/big", get(|| async { vec![0u8; 4096] }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(&FetchConfig {
            timeout: Duration::from_millis(500),
            max_bytes: 1024,
            max_concurrent: 4,
        })
        .unwrap()
    }

    fn reference(id: &str, url: String) -> AttachmentRef {
        AttachmentRef {
            id: id.to_string(),
            url,
            filename: None,
            size: None,
            content_type: None,
        }
    }

    #[tokio::test]
    async fn downloads_and_encodes_payload() {
        let base = serve_fixtures().await;
        let attachment = fetcher()
            .fetch("m1", &reference("a1", format!("{}/image", base)))
            .await
            .unwrap();

        assert_eq!(attachment.id, "a1");
        assert_eq!(attachment.message_id, "m1");
        assert_eq!(attachment.filename, "a1");
        assert_eq!(attachment.size, 3);
        assert_eq!(attachment.content_type, "image/png");
        assert_eq!(attachment.data, "AQID");
    }

    #[tokio::test]
    async fn reference_metadata_takes_precedence() {
        let base = serve_fixtures().await;
        let mut r = reference("a2", format!("{}/image", base));
        r.filename = Some("cat.png".into());
        r.size = Some(99);
        r.content_type = Some("image/x-custom".into());

        let attachment = fetcher().fetch("m1", &r).await.unwrap();
        assert_eq!(attachment.filename, "cat.png");
        assert_eq!(attachment.size, 99);
        assert_eq!(attachment.content_type, "image/x-custom");
    }

    #[tokio::test]
    async fn non_success_status_is_a_failure() {
        let base = serve_fixtures().await;
        let failure = fetcher()
            .fetch("m1", &reference("a3", format!("{}/missing", base)))
            .await
            .unwrap_err();
        assert_eq!(failure.id, "a3");
        assert!(matches!(failure.reason, FetchFailureReason::Status(404)));
    }

    #[tokio::test]
    async fn oversized_body_is_a_failure() {
        let base = serve_fixtures().await;
        let failure = fetcher()
            .fetch("m1", &reference("a4", format!("{}/big", base)))
            .await
            .unwrap_err();
        assert!(matches!(failure.reason, FetchFailureReason::TooLarge { limit: 1024 }));
    }

    #[tokio::test]
    async fn slow_upstream_times_out() {
        let base = serve_fixtures().await;
        let failure = fetcher()
            .fetch("m1", &reference("a5", format!("{}/slow", base)))
            .await
            .unwrap_err();
        assert!(matches!(failure.reason, FetchFailureReason::Timeout));
    }

    #[tokio::test]
    async fn closed_fetcher_refuses_new_downloads() {
        let base = serve_fixtures().await;
        let fetcher = fetcher();
        fetcher.close();
        let failure = fetcher
            .fetch("m1", &reference("a6", format!("{}/plain", base)))
            .await
            .unwrap_err();
        assert!(matches!(failure.reason, FetchFailureReason::Closed));
    }

    #[test]
    fn falls_back_to_octet_stream() {
        let attachment = build_attachment("m1", &reference("a7", "http://x".into()), b"hi", None);
        assert_eq!(attachment.content_type, FALLBACK_CONTENT_TYPE);
        assert_eq!(attachment.size, 2);
    }
}
