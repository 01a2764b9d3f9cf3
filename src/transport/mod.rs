//! Transport: the synchronous GET-JSON collaborator
//!
//! Every network read in the harvester goes through the `Transport` trait.
//! Implementations never retry on their own; retry policy belongs to the
//! callers (see `ingest::BackfillPolicy`).

mod http;
mod mock;

pub use http::{HttpTransport, DEFAULT_USER_AGENT};
pub use mock::MockTransport;

use serde_json::Value;
use thiserror::Error;

/// A completed HTTP exchange: status code plus the decoded body.
///
/// Bodies that are not valid JSON (HTML error pages, empty 404s) are
/// represented as `Value::Null`.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Value,
}

impl FetchResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }
}

/// Failures below the HTTP layer: no status code was ever observed.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Synchronous JSON fetcher.
///
/// Implementations must be thread-safe so a single transport can be shared
/// between the crawler and the backfill loop.
pub trait Transport: Send + Sync {
    /// GET `url` and return its status and JSON body.
    fn fetch_json(&self, url: &str) -> Result<FetchResponse, TransportError>;
}
