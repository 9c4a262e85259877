//! Opening the byte stream behind a connection attempt

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use livetail_core::ThreadId;
use reqwest::{header, StatusCode};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Raw body chunks of one open stream
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// 401 or 403
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// 400
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Unexpected status {0}")]
    Status(u16),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl TransportError {
    /// Errors that reconnecting cannot fix
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::Rejected(_) | Self::InvalidUrl(_))
    }
}

/// Opens a stream for a thread with a credential
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, thread_id: &ThreadId, token: &str) -> Result<ByteStream, TransportError>;
}

/// `GET {base}/api/threads/{thread_id}/stream?token=...`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    run_id: Option<String>,
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

impl HttpTransport {
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let base_url = Url::parse(base_url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(TransportError::InvalidUrl(format!("{base_url} cannot be a base URL")));
        }

        // No overall timeout: streams stay open for as long as the run lasts
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            run_id: None,
        })
    }

    /// Also receive the legacy per-run channel
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn stream_url(&self, thread_id: &ThreadId, token: &str) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| TransportError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["api", "threads", thread_id.as_str(), "stream"]);

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("token", token);
            if let Some(run_id) = &self.run_id {
                query.append_pair("run_id", run_id);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, thread_id: &ThreadId, token: &str) -> Result<ByteStream, TransportError> {
        let url = self.stream_url(thread_id, token)?;

        let response = self
            .client
            .get(url)
            .header(header::ACCEPT, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TransportError::Unauthorized(body),
                StatusCode::BAD_REQUEST => TransportError::Rejected(body),
                other => TransportError::Status(other.as_u16()),
            });
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::Stream(e.to_string())))
            .boxed())
    }
}
