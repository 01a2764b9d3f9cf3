//! Field-shape checks shared by the root collection and its pages

use super::error::{FeedError, FeedResult};
use crate::transport::Transport;
use serde_json::Value;
use tracing::debug;

pub(crate) const SECURE_SCHEME: &str = "https://";

/// Fetch `url` and return its body, aborting on any non-2xx status.
pub(crate) fn fetch_document(transport: &dyn Transport, url: &str) -> FeedResult<Value> {
    let resp = transport.fetch_json(url)?;
    debug!(url, status = resp.status, "fetched feed document");
    if !resp.is_success() {
        return Err(FeedError::Status {
            url: url.to_string(),
            status: resp.status,
        });
    }
    Ok(resp.body)
}

/// `id` must be present and start with `https://`.
pub(crate) fn require_secure_id(url: &str, doc: &Value) -> FeedResult<String> {
    match doc.get("id").and_then(Value::as_str) {
        Some(id) if id.starts_with(SECURE_SCHEME) => Ok(id.to_string()),
        other => Err(FeedError::InvalidId {
            url: url.to_string(),
            id: other.map(str::to_string),
        }),
    }
}

/// `type` must be present and equal `expected`.
pub(crate) fn require_type(url: &str, doc: &Value, expected: &'static str) -> FeedResult<()> {
    match doc.get("type").and_then(Value::as_str) {
        Some(actual) if actual == expected => Ok(()),
        actual => Err(FeedError::TypeMismatch {
            url: url.to_string(),
            expected,
            actual: actual.map(str::to_string),
        }),
    }
}

/// Resolve a link field to its target id.
///
/// Feeds publish links either as `{"id": "...", "type": "..."}` or as a
/// bare string.
pub(crate) fn link_id(doc: &Value, field: &str) -> Option<String> {
    match doc.get(field)? {
        Value::String(id) => Some(id.clone()),
        Value::Object(link) => link.get("id").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}
