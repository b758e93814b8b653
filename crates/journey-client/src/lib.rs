//! HTTP transport to the journey ingest service.
//!
//! Session records are POSTed as JSON to one endpoint per record kind. The
//! service answers `{"data": ...}` on success and `{"err": "..."}` otherwise.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use journey_core::{SessionFlush, SessionHeader, SessionTail, Transport, TransportError};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;
use tracing::debug;

/// Production ingest endpoint.
pub const DEFAULT_BASE_URL: &str = "https://journey3-ingest.artemkv.net:8060";

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const SESSION_HEAD_PATH: &str = "/session_head";
const SESSION_TAIL_PATH: &str = "/session_tail";
const SESSION_FLUSH_PATH: &str = "/session_flush";

/// Client construction errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The base URL is not an absolute http(s) URL.
    #[error("invalid base URL {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    /// Failed to build HTTP client.
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
}

/// Ingest service client.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct IngestClient {
    http: reqwest::Client,
    base_url: String,
}

impl fmt::Debug for IngestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl IngestClient {
    /// Creates a client for the service at `base_url`.
    ///
    /// A trailing slash on `base_url` is ignored.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let url = Url::parse(base_url).map_err(|err| ClientError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: err.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientError::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ClientError::Build)?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Creates a client for the production service.
    pub fn with_defaults() -> Result<Self, ClientError> {
        Self::new(DEFAULT_BASE_URL, DEFAULT_TIMEOUT)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<T: Serialize + Sync>(&self, path: &str, body: &T) -> Result<(), TransportError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        let text = response.text().await.map_err(request_error)?;
        if !status.is_success() {
            let status_text = status.canonical_reason().unwrap_or_default().to_string();
            let message = parse_error_message(&text).unwrap_or_else(|| status_text.clone());
            return Err(TransportError::Api {
                status: status.as_u16(),
                status_text,
                message,
            });
        }

        let envelope: SuccessEnvelope<'_> = serde_json::from_str(&text)
            .map_err(|err| TransportError::InvalidResponse(err.to_string()))?;
        debug!(
            path,
            data = envelope.data.map(RawValue::get),
            "ingest accepted record"
        );
        Ok(())
    }
}

#[async_trait]
impl Transport for IngestClient {
    async fn post_session_header(&self, header: &SessionHeader) -> Result<(), TransportError> {
        self.post(SESSION_HEAD_PATH, header).await
    }

    async fn post_session(&self, tail: &SessionTail) -> Result<(), TransportError> {
        self.post(SESSION_TAIL_PATH, tail).await
    }

    async fn post_session_flush(&self, flush: &SessionFlush) -> Result<(), TransportError> {
        self.post(SESSION_FLUSH_PATH, flush).await
    }
}

#[derive(Debug, Deserialize)]
struct SuccessEnvelope<'a> {
    #[serde(borrow, default)]
    data: Option<&'a RawValue>,
}

fn parse_error_message(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorEnvelope {
        err: String,
    }

    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .map(|envelope| envelope.err)
        .filter(|message| !message.is_empty())
}

fn request_error(err: reqwest::Error) -> TransportError {
    TransportError::Request(Box::new(err))
}
