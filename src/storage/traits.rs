//! Storage trait definitions

use crate::activity::ActivityKind;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParse(String),

    #[error("Corrupt record {subject_url}: {reason}")]
    Corrupt { subject_url: String, reason: String },
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// One row per Manifest ever seen in a feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestRecord {
    /// Unique key
    pub subject_url: String,
    /// Tag of the feed the Manifest was first seen in
    pub provider: String,
    pub most_recent_activity: ActivityKind,
    pub most_recent_end_time: Option<DateTime<Utc>>,
    /// Whitelisted Manifest fields, filled in by backfill
    pub content: Option<Map<String, Value>>,
    /// Backfill got a 404: the Manifest is gone upstream
    pub content_empty: bool,
    pub first_seen_at: DateTime<Utc>,
    pub content_updated_at: Option<DateTime<Utc>>,
    /// Backfill fetches that ended in a transient failure
    pub backfill_attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl ManifestRecord {
    /// A fresh record with no content, as written on first sighting.
    pub fn new(
        subject_url: impl Into<String>,
        provider: impl Into<String>,
        most_recent_activity: ActivityKind,
        most_recent_end_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            subject_url: subject_url.into(),
            provider: provider.into(),
            most_recent_activity,
            most_recent_end_time,
            content: None,
            content_empty: false,
            first_seen_at: Utc::now(),
            content_updated_at: None,
            backfill_attempts: 0,
            last_attempt_at: None,
        }
    }

    /// Neither populated nor confirmed gone.
    pub fn awaits_backfill(&self) -> bool {
        self.content.is_none() && !self.content_empty
    }
}

/// What a backfill fetch learned about a Manifest.
#[derive(Debug, Clone, PartialEq)]
pub enum BackfillFields {
    /// Extracted content to store
    Content(Map<String, Value>),
    /// The Manifest answered 404
    Gone,
}

/// Filter criteria for querying manifest records
#[derive(Debug, Clone, Default)]
pub struct ManifestFilter {
    /// Filter by provider tag
    pub provider: Option<String>,
    /// `Some(true)`: only records with no content that are not marked gone,
    /// fewest failed backfill attempts first
    pub awaiting_backfill: Option<bool>,
    /// Filter on the gone marker
    pub content_empty: Option<bool>,
    /// Maximum number of results
    pub limit: Option<usize>,
}

impl ManifestFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Records the backfill sweep still has to visit.
    pub fn awaiting_backfill(mut self) -> Self {
        self.awaiting_backfill = Some(true);
        self
    }

    pub fn with_content_empty(mut self, content_empty: bool) -> Self {
        self.content_empty = Some(content_empty);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Trait for manifest storage backends
///
/// Each write is a single conditional statement, so two harvesters sharing
/// a store cannot double-insert a subject or overwrite fetched content.
pub trait ManifestStore: Send + Sync {
    /// Load a record by subject URL
    fn find_by_key(&self, subject_url: &str) -> StorageResult<Option<ManifestRecord>>;

    /// Insert `record` unless its subject already exists.
    ///
    /// Returns `true` if the record was written.
    fn insert_if_absent(&self, record: &ManifestRecord) -> StorageResult<bool>;

    /// Apply backfill results to a record that has neither content nor the
    /// gone marker. Returns `true` if the record changed.
    fn set_fields_if_unset(&self, subject_url: &str, fields: &BackfillFields) -> StorageResult<bool>;

    /// Count one failed backfill fetch against a record still awaiting
    /// content, moving it behind untried records in the backfill queue.
    /// Returns `true` if the record changed.
    fn note_backfill_attempt(&self, subject_url: &str) -> StorageResult<bool>;

    /// Any one record matching the filter
    fn find_one_matching(&self, filter: &ManifestFilter) -> StorageResult<Option<ManifestRecord>>;

    /// All records matching the filter (honours `limit`)
    fn find_matching(&self, filter: &ManifestFilter) -> StorageResult<Vec<ManifestRecord>>;

    /// Number of records matching the filter (ignores `limit`)
    fn count_matching(&self, filter: &ManifestFilter) -> StorageResult<usize>;

    /// Distinct `label` values among populated records, optionally per provider
    fn distinct_labels(&self, provider: Option<&str>) -> StorageResult<Vec<String>>;

    /// Provider tags with their record counts
    fn count_by_provider(&self) -> StorageResult<Vec<(String, usize)>>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: ManifestStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
