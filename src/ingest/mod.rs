//! Ingestion: recording activities and backfilling Manifest content
//!
//! Two independent operations share one store:
//!
//! 1. `record_activity` writes a record the first time a subject is seen.
//!    Later activities for the same subject leave it untouched, so replaying
//!    a crawl converges to the same store state.
//! 2. `backfill_one` picks any record still waiting for content, fetches
//!    the Manifest and stores a whitelisted subset of it. `run_backfill`
//!    drives it in a bounded loop.

mod backfill;

pub use backfill::{
    Backoff, BackfillPolicy, BackfillSummary, StopReason, DEFAULT_MAX_CONSECUTIVE_FAILURES,
    DEFAULT_PAUSE,
};

use crate::activity::Activity;
use crate::crawl::Crawl;
use crate::storage::{BackfillFields, ManifestFilter, ManifestRecord, ManifestStore, StorageError};
use crate::transport::Transport;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Manifest fields kept by backfill. Anything else in the body is dropped.
pub const CONTENT_FIELDS: &[&str] = &["@context", "label", "metadata", "within"];

/// Errors from ingestion (transient fetch failures are outcomes, not errors).
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result of `record_activity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Inserted,
    /// A record for the subject was already present and was left unchanged
    AlreadyExists,
}

/// Result of one `backfill_one` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackfillOutcome {
    /// Content was fetched and stored
    Populated { subject_url: String },
    /// The Manifest answered 404 and was marked gone
    Gone { subject_url: String },
    /// No record is waiting for content
    NothingToDo,
    /// Fetch failed transiently; content is untouched and the record's
    /// attempt count went up. Wait `after` before the next call.
    Retry {
        subject_url: String,
        status: Option<u16>,
        after: Duration,
    },
}

impl BackfillOutcome {
    /// One more record is done (populated or confirmed gone).
    pub fn is_progress(&self) -> bool {
        matches!(self, Self::Populated { .. } | Self::Gone { .. })
    }
}

/// Totals for ingesting one crawl.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub inserted: usize,
    pub already_present: usize,
    pub ignored: usize,
}

/// Copy the whitelisted fields out of a Manifest body.
pub fn extract_content(body: &Value) -> Map<String, Value> {
    let mut content = Map::new();
    if let Some(fields) = body.as_object() {
        for &key in CONTENT_FIELDS {
            if let Some(value) = fields.get(key) {
                content.insert(key.to_string(), value.clone());
            }
        }
    }
    content
}

/// Records feed activities and backfills Manifest content.
pub struct Harvester {
    store: Arc<dyn ManifestStore>,
    transport: Arc<dyn Transport>,
    policy: BackfillPolicy,
}

impl Harvester {
    pub fn new(store: Arc<dyn ManifestStore>, transport: Arc<dyn Transport>) -> Self {
        Self {
            store,
            transport,
            policy: BackfillPolicy::default(),
        }
    }

    /// Pacing for `backfill_one` retries and the `run_backfill` loop.
    pub fn with_policy(mut self, policy: BackfillPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &BackfillPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn ManifestStore> {
        &self.store
    }

    /// Record the first sighting of an activity's subject.
    pub fn record_activity(
        &self,
        provider: &str,
        activity: &Activity,
    ) -> Result<RecordOutcome, IngestError> {
        if self.store.find_by_key(&activity.subject_url)?.is_some() {
            return Ok(RecordOutcome::AlreadyExists);
        }

        let record = ManifestRecord::new(
            activity.subject_url.clone(),
            provider,
            activity.kind,
            activity.end_time,
        );
        // Another writer may have inserted between the lookup and here.
        if self.store.insert_if_absent(&record)? {
            debug!(subject = %activity.subject_url, provider, kind = %activity.kind, "recorded manifest");
            Ok(RecordOutcome::Inserted)
        } else {
            Ok(RecordOutcome::AlreadyExists)
        }
    }

    /// Record every Manifest activity of a crawl, skipping ignored ones.
    ///
    /// Activities are recorded in crawl order and the first write wins, so a
    /// subject seen on several pages keeps the activity from the origin-most
    /// page; within one page the newest activity is kept.
    pub fn ingest_crawl(&self, provider: &str, crawl: &Crawl) -> Result<IngestSummary, IngestError> {
        let mut summary = IngestSummary::default();
        for record in &crawl.activities {
            let Some(activity) = record.as_change() else {
                summary.ignored += 1;
                continue;
            };
            match self.record_activity(provider, activity)? {
                RecordOutcome::Inserted => summary.inserted += 1,
                RecordOutcome::AlreadyExists => summary.already_present += 1,
            }
        }
        info!(
            provider,
            inserted = summary.inserted,
            already_present = summary.already_present,
            ignored = summary.ignored,
            "ingested crawl"
        );
        Ok(summary)
    }

    /// Backfill one record that has no content yet.
    ///
    /// Records with the fewest failed attempts are picked first, so a
    /// Manifest that keeps failing cannot hold up the rest of the queue. A
    /// record finished by another writer between selection and write is
    /// skipped in favour of the next one.
    pub fn backfill_one(&self) -> Result<BackfillOutcome, IngestError> {
        let pending = ManifestFilter::new().awaiting_backfill();
        loop {
            let Some(record) = self.store.find_one_matching(&pending)? else {
                return Ok(BackfillOutcome::NothingToDo);
            };
            let subject_url = record.subject_url;

            let (fields, outcome) = match self.transport.fetch_json(&subject_url) {
                Ok(response) if response.status == 200 => {
                    if !response.body.is_object() {
                        warn!(subject = %subject_url, "manifest body is not a JSON object; storing empty content");
                    }
                    let content = extract_content(&response.body);
                    let outcome = BackfillOutcome::Populated {
                        subject_url: subject_url.clone(),
                    };
                    (BackfillFields::Content(content), outcome)
                }
                Ok(response) if response.status == 404 => {
                    let outcome = BackfillOutcome::Gone {
                        subject_url: subject_url.clone(),
                    };
                    (BackfillFields::Gone, outcome)
                }
                Ok(response) => {
                    warn!(subject = %subject_url, status = response.status, "transient manifest fetch failure");
                    return self.retry_later(subject_url, Some(response.status));
                }
                Err(e) => {
                    warn!(subject = %subject_url, error = %e, "manifest fetch failed");
                    return self.retry_later(subject_url, None);
                }
            };

            if !self.store.set_fields_if_unset(&subject_url, &fields)? {
                debug!(subject = %subject_url, "record finished by another writer");
                continue;
            }
            match &outcome {
                BackfillOutcome::Gone { .. } => info!(subject = %subject_url, "manifest is gone upstream"),
                _ => debug!(subject = %subject_url, "stored manifest content"),
            }
            return Ok(outcome);
        }
    }

    fn retry_later(&self, subject_url: String, status: Option<u16>) -> Result<BackfillOutcome, IngestError> {
        self.store.note_backfill_attempt(&subject_url)?;
        Ok(BackfillOutcome::Retry {
            subject_url,
            status,
            after: self.policy.delay_for(1),
        })
    }

    /// Call `backfill_one` until the queue drains or the policy says stop.
    ///
    /// `sleep` is invoked after every transient failure with the policy's
    /// delay for the current streak; for a single failure that is exactly
    /// `Retry::after`. Pass `std::thread::sleep` outside tests.
    pub fn run_backfill(&self, mut sleep: impl FnMut(Duration)) -> Result<BackfillSummary, IngestError> {
        let policy = &self.policy;
        let mut populated = 0;
        let mut gone = 0;
        let mut transient_failures = 0;
        let mut consecutive_failures = 0u32;

        let stopped = loop {
            if let Some(max) = policy.max_records {
                if populated + gone >= max {
                    break StopReason::RecordLimit;
                }
            }

            match self.backfill_one()? {
                BackfillOutcome::Populated { .. } => {
                    populated += 1;
                    consecutive_failures = 0;
                }
                BackfillOutcome::Gone { .. } => {
                    gone += 1;
                    consecutive_failures = 0;
                }
                BackfillOutcome::NothingToDo => break StopReason::Drained,
                BackfillOutcome::Retry { .. } => {
                    transient_failures += 1;
                    consecutive_failures += 1;
                    if consecutive_failures >= policy.max_consecutive_failures {
                        break StopReason::TooManyFailures;
                    }
                    sleep(policy.delay_for(consecutive_failures));
                }
            }
        };

        let summary = BackfillSummary {
            populated,
            gone,
            transient_failures,
            stopped,
        };
        info!(
            populated,
            gone,
            transient_failures,
            stopped = ?summary.stopped,
            "backfill run finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityKind;
    use crate::storage::{OpenStore, SqliteStore};
    use crate::transport::{FetchResponse, MockTransport};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    const MANIFEST: &str = "https://example.org/iiif/1/manifest";

    fn harvester(transport: MockTransport) -> (Harvester, Arc<MockTransport>) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let transport = Arc::new(transport);
        (Harvester::new(store, transport.clone()), transport)
    }

    fn activity(kind: ActivityKind, subject: &str) -> Activity {
        Activity {
            kind,
            subject_url: subject.to_string(),
            end_time: Some(Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap()),
        }
    }

    #[test]
    fn record_activity_is_first_write_wins() {
        let (h, _) = harvester(MockTransport::new());

        let first = activity(ActivityKind::Create, MANIFEST);
        assert_eq!(h.record_activity("utk", &first).unwrap(), RecordOutcome::Inserted);
        let after_first = h.store().find_by_key(MANIFEST).unwrap().unwrap();

        assert_eq!(h.record_activity("utk", &first).unwrap(), RecordOutcome::AlreadyExists);
        let mut later = activity(ActivityKind::Delete, MANIFEST);
        later.end_time = None;
        assert_eq!(h.record_activity("other", &later).unwrap(), RecordOutcome::AlreadyExists);

        let stored = h.store().find_by_key(MANIFEST).unwrap().unwrap();
        assert_eq!(stored, after_first);
        assert_eq!(stored.most_recent_activity, ActivityKind::Create);
        assert_eq!(stored.provider, "utk");
    }

    #[test]
    fn extract_content_keeps_only_whitelist() {
        let body = json!({
            "@context": "http://iiif.io/api/presentation/2/context.json",
            "@id": MANIFEST,
            "label": "L",
            "metadata": [],
            "sequences": [{"canvases": []}],
            "within": "https://example.org/collection"
        });
        let content = extract_content(&body);
        let keys: Vec<&str> = content.keys().map(String::as_str).collect();
        assert_eq!(keys.len(), 4);
        for key in CONTENT_FIELDS {
            assert!(keys.contains(key), "missing {key}");
        }
    }

    #[test]
    fn extract_content_of_non_object_is_empty() {
        assert!(extract_content(&json!(["not", "a", "manifest"])).is_empty());
    }

    #[test]
    fn backfill_with_empty_store_has_nothing_to_do() {
        let (h, transport) = harvester(MockTransport::new());
        assert_eq!(h.backfill_one().unwrap(), BackfillOutcome::NothingToDo);
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn backfill_200_stores_whitelisted_fields() {
        let body = json!({
            "@context": "http://iiif.io/api/presentation/2/context.json",
            "label": "L",
            "metadata": [],
            "structures": []
        });
        let (h, _) = harvester(MockTransport::new().with_json(MANIFEST, body));
        h.record_activity("utk", &activity(ActivityKind::Create, MANIFEST)).unwrap();

        let outcome = h.backfill_one().unwrap();
        assert_eq!(outcome, BackfillOutcome::Populated { subject_url: MANIFEST.to_string() });

        let stored = h.store().find_by_key(MANIFEST).unwrap().unwrap();
        assert_eq!(
            Value::Object(stored.content.unwrap()),
            json!({
                "@context": "http://iiif.io/api/presentation/2/context.json",
                "label": "L",
                "metadata": []
            })
        );
        assert!(!stored.content_empty);
        assert_eq!(h.backfill_one().unwrap(), BackfillOutcome::NothingToDo);
    }

    #[test]
    fn backfill_404_marks_gone() {
        let (h, _) = harvester(MockTransport::new().with_status(MANIFEST, 404));
        h.record_activity("utk", &activity(ActivityKind::Delete, MANIFEST)).unwrap();

        assert_eq!(
            h.backfill_one().unwrap(),
            BackfillOutcome::Gone { subject_url: MANIFEST.to_string() }
        );
        let stored = h.store().find_by_key(MANIFEST).unwrap().unwrap();
        assert!(stored.content_empty);
        assert!(stored.content.is_none());
        assert_eq!(h.backfill_one().unwrap(), BackfillOutcome::NothingToDo);
    }

    #[test]
    fn backfill_503_changes_nothing() {
        let (h, _) = harvester(MockTransport::new().with_status(MANIFEST, 503));
        let h = h.with_policy(BackfillPolicy::default().with_pause(Duration::from_secs(9)));
        h.record_activity("utk", &activity(ActivityKind::Update, MANIFEST)).unwrap();
        let before = h.store().find_by_key(MANIFEST).unwrap().unwrap();

        assert_eq!(
            h.backfill_one().unwrap(),
            BackfillOutcome::Retry {
                subject_url: MANIFEST.to_string(),
                status: Some(503),
                after: Duration::from_secs(9),
            }
        );
        let after = h.store().find_by_key(MANIFEST).unwrap().unwrap();
        assert_eq!(after.content, before.content);
        assert_eq!(after.content_empty, before.content_empty);
        assert_eq!(after.content_updated_at, before.content_updated_at);
        assert_eq!(after.most_recent_activity, before.most_recent_activity);
        assert_eq!(after.backfill_attempts, 1);
    }

    #[test]
    fn retry_after_matches_the_loop_sleep() {
        let (h, _) = harvester(MockTransport::new().with_status(MANIFEST, 500));
        let policy = BackfillPolicy::default()
            .with_pause(Duration::from_secs(2))
            .with_max_consecutive_failures(2);
        let h = h.with_policy(policy);
        h.record_activity("utk", &activity(ActivityKind::Create, MANIFEST)).unwrap();

        let after = match h.backfill_one().unwrap() {
            BackfillOutcome::Retry { after, .. } => after,
            other => panic!("unexpected outcome: {other:?}"),
        };
        let mut sleeps = Vec::new();
        h.run_backfill(|d| sleeps.push(d)).unwrap();
        assert_eq!(sleeps, vec![after]);
    }

    #[test]
    fn backfill_transport_error_is_transient() {
        let (h, _) = harvester(MockTransport::new().with_failure(MANIFEST, "connection reset"));
        h.record_activity("utk", &activity(ActivityKind::Update, MANIFEST)).unwrap();

        match h.backfill_one().unwrap() {
            BackfillOutcome::Retry { status, .. } => assert_eq!(status, None),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(h.store().find_by_key(MANIFEST).unwrap().unwrap().awaits_backfill());
    }

    #[test]
    fn run_backfill_recovers_after_transient_failures() {
        let transport = MockTransport::new().with_sequence(
            MANIFEST,
            vec![
                FetchResponse::new(429, Value::Null),
                FetchResponse::new(503, Value::Null),
                FetchResponse::new(200, json!({"label": "L"})),
            ],
        );
        let (h, transport) = harvester(transport);
        let h = h.with_policy(BackfillPolicy::default().with_pause(Duration::from_millis(10)));
        h.record_activity("utk", &activity(ActivityKind::Create, MANIFEST)).unwrap();

        let mut sleeps = Vec::new();
        let summary = h.run_backfill(|d| sleeps.push(d)).unwrap();

        assert_eq!(summary.populated, 1);
        assert_eq!(summary.transient_failures, 2);
        assert_eq!(summary.stopped, StopReason::Drained);
        assert_eq!(sleeps, vec![Duration::from_millis(10); 2]);
        assert_eq!(transport.request_count(MANIFEST), 3);
    }

    #[test]
    fn run_backfill_gives_up_after_consecutive_failures() {
        let (h, transport) = harvester(MockTransport::new().with_status(MANIFEST, 500));
        let h = h.with_policy(BackfillPolicy::default().with_max_consecutive_failures(3));
        h.record_activity("utk", &activity(ActivityKind::Create, MANIFEST)).unwrap();

        let mut sleeps = 0;
        let summary = h.run_backfill(|_| sleeps += 1).unwrap();

        assert_eq!(summary.stopped, StopReason::TooManyFailures);
        assert_eq!(summary.transient_failures, 3);
        assert_eq!(summary.progressed(), 0);
        assert_eq!(sleeps, 2);
        assert_eq!(transport.request_count(MANIFEST), 3);
    }

    #[test]
    fn run_backfill_honours_record_limit() {
        let other = "https://example.org/iiif/2/manifest";
        let transport = MockTransport::new()
            .with_json(MANIFEST, json!({"label": "one"}))
            .with_json(other, json!({"label": "two"}));
        let (h, _) = harvester(transport);
        let h = h.with_policy(BackfillPolicy::default().with_max_records(1));
        h.record_activity("utk", &activity(ActivityKind::Create, MANIFEST)).unwrap();
        h.record_activity("utk", &activity(ActivityKind::Create, other)).unwrap();

        let summary = h.run_backfill(|_| {}).unwrap();

        assert_eq!(summary.stopped, StopReason::RecordLimit);
        assert_eq!(summary.populated, 1);
        let pending = ManifestFilter::new().awaiting_backfill();
        assert_eq!(h.store().count_matching(&pending).unwrap(), 1);
    }
    #[test]
    fn failing_manifest_does_not_starve_the_queue() {
        let stuck = "https://example.org/iiif/0/manifest";
        let healthy = "https://example.org/iiif/z/manifest";
        let transport = MockTransport::new()
            .with_status(stuck, 500)
            .with_json(healthy, json!({"label": "Z"}));
        let (h, transport) = harvester(transport);
        h.record_activity("utk", &activity(ActivityKind::Create, stuck)).unwrap();
        h.record_activity("utk", &activity(ActivityKind::Create, healthy)).unwrap();

        let first = h.run_backfill(|_| {}).unwrap();
        assert_eq!(first.populated, 1);
        assert_eq!(first.stopped, StopReason::TooManyFailures);
        assert_eq!(transport.request_count(healthy), 1);

        let second = h.run_backfill(|_| {}).unwrap();
        assert_eq!(second.populated, 0);
        assert_eq!(transport.request_count(healthy), 1);

        let record = h.store().find_by_key(stuck).unwrap().unwrap();
        assert!(record.awaits_backfill());
        assert_eq!(record.backfill_attempts as usize, transport.request_count(stuck));
    }

    /// Completes the first record it is asked for behind the harvester's back.
    struct CompetingWriter {
        store: Arc<dyn ManifestStore>,
        inner: MockTransport,
        raced: std::sync::Mutex<bool>,
    }

    impl Transport for CompetingWriter {
        fn fetch_json(&self, url: &str) -> Result<FetchResponse, crate::transport::TransportError> {
            let mut raced = self.raced.lock().unwrap();
            if !*raced {
                *raced = true;
                let content = extract_content(&json!({"label": "theirs"}));
                self.store
                    .set_fields_if_unset(url, &BackfillFields::Content(content))
                    .unwrap();
            }
            self.inner.fetch_json(url)
        }
    }

    #[test]
    fn lost_write_moves_on_to_the_next_record() {
        let other = "https://example.org/iiif/2/manifest";
        let store: Arc<dyn ManifestStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let transport = CompetingWriter {
            store: store.clone(),
            inner: MockTransport::new()
                .with_json(MANIFEST, json!({"label": "ours"}))
                .with_json(other, json!({"label": "two"})),
            raced: std::sync::Mutex::new(false),
        };
        let h = Harvester::new(store, Arc::new(transport));
        h.record_activity("utk", &activity(ActivityKind::Create, MANIFEST)).unwrap();
        h.record_activity("utk", &activity(ActivityKind::Create, other)).unwrap();

        assert_eq!(
            h.backfill_one().unwrap(),
            BackfillOutcome::Populated { subject_url: other.to_string() }
        );
        let kept = h.store().find_by_key(MANIFEST).unwrap().unwrap();
        assert_eq!(kept.content.unwrap()["label"], json!("theirs"));

        let summary = h.run_backfill(|_| {}).unwrap();
        assert_eq!(summary.populated, 0);
        assert_eq!(summary.stopped, StopReason::Drained);
    }
}
