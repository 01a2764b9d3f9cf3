//! Shared fixtures for pipeline tests
//!
//! `FeedBuilder` lays out a fake feed on a `MockTransport`: a root
//! collection plus a chain of pages, each listing its activities newest
//! first the way servers publish them.

pub mod feed;

pub use feed::{
    activity, manifest_activity, manifest_body, manifest_url, page_url, FeedBuilder, ROOT_URL,
};
