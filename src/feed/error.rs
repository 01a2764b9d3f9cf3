//! Feed errors

use crate::activity::ActivityError;
use crate::transport::TransportError;
use thiserror::Error;

/// Errors raised while loading or walking an activity feed.
///
/// Every variant names the document URL involved so a failed crawl points
/// straight at the upstream page that broke.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("{url}: id {id:?} is missing or not an https URI")]
    InvalidId { url: String, id: Option<String> },

    #[error("{url}: expected type {expected}, found {actual:?}")]
    TypeMismatch {
        url: String,
        expected: &'static str,
        actual: Option<String>,
    },

    #[error("{url}: collection has no `last` page to start from")]
    MissingTerminalPage { url: String },

    #[error("{url}: page has no items")]
    EmptyPage { url: String },

    #[error("{url}: activity #{position} is malformed: {source}")]
    MalformedActivity {
        url: String,
        position: usize,
        #[source]
        source: ActivityError,
    },

    #[error("{url}: server answered HTTP {status}")]
    Status { url: String, status: u16 },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{url}: prev link points back to an already visited page")]
    CyclicChain { url: String },

    #[error("gave up after {limit} pages without reaching the first page")]
    PageLimitExceeded { limit: usize },
}

impl FeedError {
    /// True for errors that mean the upstream document does not have the
    /// expected feed shape. These are never worth retrying.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidId { .. }
                | Self::TypeMismatch { .. }
                | Self::MissingTerminalPage { .. }
                | Self::EmptyPage { .. }
                | Self::MalformedActivity { .. }
        )
    }
}

/// Result type for feed operations
pub type FeedResult<T> = Result<T, FeedError>;
