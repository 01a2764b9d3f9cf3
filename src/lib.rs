//! change-discovery: harvester for IIIF-style activity feeds
//!
//! Walks a platform's paginated change feed, normalizes each activity and
//! keeps one record per Manifest in a local store, then lazily backfills
//! the Manifests' descriptive content.
//!
//! # Core Concepts
//!
//! - **Root collection**: the feed's `OrderedCollection`, pointing at its newest (`last`) page
//! - **Pages**: `OrderedCollectionPage`s linked backwards through `prev`
//! - **Activities**: `Create`/`Update`/`Delete`/... events about a Manifest
//! - **Backfill**: a follow-up fetch of each Manifest's own document
//!
//! # Example
//!
//! ```no_run
//! use change_discovery::{crawl_all, load_root, CrawlOptions, HttpTransport};
//!
//! let transport = HttpTransport::with_defaults().unwrap();
//! let root = load_root(&transport, "https://example.org/activity/all-changes").unwrap();
//! let crawl = crawl_all(&transport, &root, &CrawlOptions::default()).unwrap();
//! println!("{} activities", crawl.activities.len());
//! ```

pub mod activity;
pub mod config;
pub mod crawl;
pub mod feed;
pub mod ingest;
pub mod storage;
pub mod transport;

pub use activity::{parse_activity, Activity, ActivityError, ActivityKind, ActivityRecord};
pub use config::{ConfigError, HarvestConfig, ProviderConfig};
pub use crawl::{crawl_all, Crawl, CrawlOptions};
pub use feed::{load_page, load_root, CollectionPage, FeedError, FeedResult, RootCollection};
pub use ingest::{
    extract_content, BackfillOutcome, BackfillPolicy, BackfillSummary, Backoff, Harvester,
    IngestError, IngestSummary, RecordOutcome, StopReason,
};
pub use storage::{
    BackfillFields, ManifestFilter, ManifestRecord, ManifestStore, OpenStore, SqliteStore,
    StorageError, StorageResult,
};
pub use transport::{FetchResponse, HttpTransport, MockTransport, Transport, TransportError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
