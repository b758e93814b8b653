//! Capabilities the session controller drives: a single-slot store and a
//! reporting transport.

use async_trait::async_trait;
use thiserror::Error;

use crate::clock::{Clock, IdGenerator};
use crate::decode::DecodeError;
use crate::session::{SessionFlush, SessionHeader, SessionTail};

/// Boxed error from a backend implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage backend failed to read or write.
    #[error("storage backend error: {0}")]
    Backend(#[source] BoxError),
    /// The session could not be serialized.
    #[error("failed to encode session: {0}")]
    Encode(#[from] serde_json::Error),
    /// The stored record was not valid JSON.
    #[error("failed to decode stored session: {0}")]
    Decode(#[from] DecodeError),
}

impl StoreError {
    pub fn backend(err: impl Into<BoxError>) -> Self {
        Self::Backend(err.into())
    }
}

/// Reporting errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The collector answered with a non-success status.
    #[error("API error {status} {status_text}: {message}")]
    Api {
        status: u16,
        status_text: String,
        message: String,
    },
    /// The request never produced a response.
    #[error("request failed: {0}")]
    Request(#[source] BoxError),
    /// The collector answered with an unreadable body.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Durable storage for the most recent session tail.
///
/// Only one record is kept; every save overwrites the previous one.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Loads and tolerantly decodes the stored tail, if any.
    async fn load_last_session(
        &self,
        clock: &dyn Clock,
        ids: &dyn IdGenerator,
    ) -> Result<Option<SessionTail>, StoreError>;

    /// Replaces the stored tail.
    async fn save_session(&self, tail: &SessionTail) -> Result<(), StoreError>;
}

/// Delivery of session records to the remote collector.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_session_header(&self, header: &SessionHeader) -> Result<(), TransportError>;

    async fn post_session(&self, tail: &SessionTail) -> Result<(), TransportError>;

    async fn post_session_flush(&self, flush: &SessionFlush) -> Result<(), TransportError>;
}
