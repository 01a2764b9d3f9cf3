//! Storage backends for harvested manifest records
//!
//! Backends implement the `ManifestStore` trait.
//! The primary implementation is `SqliteStore` for persistent storage.

mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{
    BackfillFields, ManifestFilter, ManifestRecord, ManifestStore, OpenStore, StorageError,
    StorageResult,
};
