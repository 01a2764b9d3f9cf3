//! One page of the backward-linked activity chain

use super::document::{fetch_document, link_id, require_secure_id, require_type};
use super::error::{FeedError, FeedResult};
use crate::transport::Transport;
use serde_json::Value;

pub const PAGE_TYPE: &str = "OrderedCollectionPage";

/// A validated `OrderedCollectionPage`.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionPage {
    pub id: String,
    /// Raw activities, oldest first. Servers publish them newest first;
    /// the order is flipped when the page is read.
    pub items: Vec<Value>,
    /// The next-older page. `None` on the origin page.
    pub previous_page_id: Option<String>,
}

impl CollectionPage {
    /// Validate a page document fetched from `url`.
    ///
    /// Checks run in a fixed order: id, type, then a non-empty item list
    /// (`orderedItems`, falling back to `items`).
    pub fn from_document(url: &str, doc: &Value) -> FeedResult<Self> {
        let id = require_secure_id(url, doc)?;
        require_type(url, doc, PAGE_TYPE)?;

        let mut items = match doc.get("orderedItems").or_else(|| doc.get("items")) {
            Some(Value::Array(items)) if !items.is_empty() => items.clone(),
            _ => {
                return Err(FeedError::EmptyPage {
                    url: url.to_string(),
                })
            }
        };
        items.reverse();

        Ok(Self {
            id,
            items,
            previous_page_id: link_id(doc, "prev"),
        })
    }

    /// The first page of the feed has nothing older to link to.
    pub fn is_origin(&self) -> bool {
        self.previous_page_id.is_none()
    }
}

/// Fetch and validate one page. No retries happen here.
pub fn load_page(transport: &dyn Transport, url: &str) -> FeedResult<CollectionPage> {
    let doc = fetch_document(transport, url)?;
    CollectionPage::from_document(url, &doc)
}
