//! Feed traversal
//!
//! Walks a feed from its terminal (`last`) page back along `prev` links to
//! the origin page, parsing every activity on the way. The walk is an
//! explicit loop over a current page id; stack use does not grow with the
//! length of the chain.
//!
//! Accumulation order: each page's activities are read oldest-first and
//! every parsed activity is pushed to the *front* of the accumulator. For a
//! terminal page publishing `[C, B]` linked to an origin page publishing
//! `[A]`, the result is `[A, C, B]`. Pages are therefore not in time
//! order: a subject on both pages meets its origin-page activity first.

use crate::activity::{parse_activity, Activity, ActivityKind, ActivityRecord};
use crate::feed::{load_page, FeedError, FeedResult, RootCollection};
use crate::transport::Transport;
use std::collections::{BTreeMap, HashSet, VecDeque};
use tracing::{debug, info, info_span};

/// Default upper bound on the number of pages one crawl may visit.
pub const DEFAULT_MAX_PAGES: usize = 10_000;

/// Knobs for a crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlOptions {
    /// Stop with `PageLimitExceeded` after this many pages. `None` = unbounded.
    pub max_pages: Option<usize>,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            max_pages: Some(DEFAULT_MAX_PAGES),
        }
    }
}

impl CrawlOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    pub fn unbounded(mut self) -> Self {
        self.max_pages = None;
        self
    }
}

/// The outcome of a complete crawl.
#[derive(Debug, Clone, Default)]
pub struct Crawl {
    /// Every parsed activity, ignored ones included
    pub activities: Vec<ActivityRecord>,
    /// Page ids in visiting order (terminal page first)
    pub pages_visited: Vec<String>,
}

impl Crawl {
    /// Activities about Manifests, in accumulator order.
    pub fn changes(&self) -> impl Iterator<Item = &Activity> {
        self.activities.iter().filter_map(ActivityRecord::as_change)
    }

    /// How many activities of each kind were seen.
    pub fn kind_counts(&self) -> BTreeMap<ActivityKind, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.activities {
            *counts.entry(record.kind()).or_insert(0) += 1;
        }
        counts
    }

    pub fn ignored_count(&self) -> usize {
        self.activities.iter().filter(|a| a.is_ignored()).count()
    }
}

/// Walk the whole feed starting at `root`'s terminal page.
///
/// Any validation failure aborts the crawl; no partial result is returned.
/// Transient fetch failures are not retried here.
pub fn crawl_all(
    transport: &dyn Transport,
    root: &RootCollection,
    options: &CrawlOptions,
) -> FeedResult<Crawl> {
    let span = info_span!("crawl", root = %root.id);
    let _guard = span.enter();

    let mut accumulator: VecDeque<ActivityRecord> = VecDeque::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut pages_visited: Vec<String> = Vec::new();
    let mut current = root.terminal_page_id.clone();

    loop {
        if let Some(limit) = options.max_pages {
            if pages_visited.len() >= limit {
                return Err(FeedError::PageLimitExceeded { limit });
            }
        }
        if !visited.insert(current.clone()) {
            return Err(FeedError::CyclicChain { url: current });
        }

        let page = load_page(transport, &current)?;
        for (position, raw) in page.items.iter().enumerate() {
            let record = parse_activity(raw).map_err(|source| FeedError::MalformedActivity {
                url: current.clone(),
                position,
                source,
            })?;
            accumulator.push_front(record);
        }
        debug!(page = %current, items = page.items.len(), "crawled page");
        pages_visited.push(current);

        match page.previous_page_id {
            Some(prev) => current = prev,
            None => break,
        }
    }

    let crawl = Crawl {
        activities: accumulator.into(),
        pages_visited,
    };
    info!(
        pages = crawl.pages_visited.len(),
        activities = crawl.activities.len(),
        ignored = crawl.ignored_count(),
        "crawl complete"
    );
    Ok(crawl)
}
