//! The feed's entry document (an `OrderedCollection`)

use super::document::{fetch_document, link_id, require_secure_id, require_type};
use super::error::{FeedError, FeedResult};
use crate::transport::Transport;
use serde_json::Value;
use tracing::info;

pub const ROOT_TYPE: &str = "OrderedCollection";

/// A validated activity feed entry point.
///
/// Always has a terminal page; a collection without one is rejected when
/// the document is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootCollection {
    pub id: String,
    /// The newest page (`last`), where traversal starts
    pub terminal_page_id: String,
    pub first_page_id: Option<String>,
    /// Advisory activity count published by the server
    pub total: Option<u64>,
}

impl RootCollection {
    /// Validate a root document fetched from `url`.
    ///
    /// Checks run in a fixed order: id, type, then the `last` link.
    pub fn from_document(url: &str, doc: &Value) -> FeedResult<Self> {
        let id = require_secure_id(url, doc)?;
        require_type(url, doc, ROOT_TYPE)?;
        let terminal_page_id = link_id(doc, "last").ok_or_else(|| FeedError::MissingTerminalPage {
            url: url.to_string(),
        })?;

        Ok(Self {
            id,
            terminal_page_id,
            first_page_id: link_id(doc, "first"),
            total: doc.get("totalItems").or_else(|| doc.get("total")).and_then(Value::as_u64),
        })
    }
}

/// Fetch and validate the root collection at `url`.
pub fn load_root(transport: &dyn Transport, url: &str) -> FeedResult<RootCollection> {
    let doc = fetch_document(transport, url)?;
    let root = RootCollection::from_document(url, &doc)?;
    info!(
        url,
        terminal_page = %root.terminal_page_id,
        total = ?root.total,
        "loaded activity collection"
    );
    Ok(root)
}
