//! Activity feed documents
//!
//! A feed is an `OrderedCollection` whose `last` link points at the newest
//! `OrderedCollectionPage`; every page links to the next-older one with
//! `prev`. This module fetches and validates those documents. Walking the
//! chain lives in `crawl`.

mod document;
mod error;
mod page;
mod root;

pub use error::{FeedError, FeedResult};
pub use page::{load_page, CollectionPage, PAGE_TYPE};
pub use root::{load_root, RootCollection, ROOT_TYPE};
