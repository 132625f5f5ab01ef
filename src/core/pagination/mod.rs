//! # Pagination Module
//!
//! Drives cursor-based listing until a termination condition holds, streaming
//! every normalized item to an append-only NDJSON file as it arrives.
//!
//! ## Termination
//! Checked in this order after each page has been persisted:
//!
//! | Reason | Condition |
//! |--------|-----------|
//! | `max_items_reached` | The cap was met before this page, or an item on it was refused |
//! | `no_next_page_token` | The response carried no cursor |
//! | `repeated_page_token` | The cursor was already used in this run |
//! | `empty_page_limit` | Too many consecutive empty pages |
//! | `max_pages_reached` | The tier's page ceiling |
//!
//! In picker mode `poll_timeout` ends the run before any page is fetched when
//! the selection is not finished in time (see [`picker`]).
//!
//! Items already on the terminating page are written before the reason is
//! recorded, except those refused by the item cap.
//!
//! ## Per-item work
//! Normalize through [`FieldPaths`], drop repeated ids, update
//! [`CompletenessStats`], offer to the [`ReservoirSampler`] and to a second,
//! smaller reservoir of content URLs, append to the sink.

pub mod completeness;
pub mod normalizer;
pub mod picker;
pub mod reservoir;
pub mod sink;
pub mod source;

pub use completeness::{CompletenessReport, CompletenessStats, FieldCompleteness, MissingSample};
pub use normalizer::{Field, FieldPath, FieldPaths, MediaItemRecord, NormalizedItem};
pub use picker::{PickerSession, PickerSource, PollError, PollOutcome, PollingSummary};
pub use reservoir::ReservoirSampler;
pub use sink::NdjsonSink;
pub use source::{ListingMode, MediaLibrarySource, Page, PageSource};

use crate::core::config::TierConfig;
use crate::core::fetcher::RequestMetrics;
use crate::error::{Result, StorageError};
use crate::events::{null_sender, Event, EventSender, ListingEvent, ListingProgress};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, info};

/// Why an open-ended loop stopped. Never an error by itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    MaxItemsReached,
    NoNextPageToken,
    RepeatedPageToken,
    EmptyPageLimit,
    MaxPagesReached,
    /// The picker selection was not finished within the tier's poll timeout
    PollTimeout,
    /// The run aborted on an unrecovered error
    Error,
    /// The items stream failed its self-check
    NdjsonInvalid,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::MaxItemsReached => "max_items_reached",
            TerminationReason::NoNextPageToken => "no_next_page_token",
            TerminationReason::RepeatedPageToken => "repeated_page_token",
            TerminationReason::EmptyPageLimit => "empty_page_limit",
            TerminationReason::MaxPagesReached => "max_pages_reached",
            TerminationReason::PollTimeout => "poll_timeout",
            TerminationReason::Error => "error",
            TerminationReason::NdjsonInvalid => "ndjson_invalid",
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason code plus structured detail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Termination {
    pub reason: TerminationReason,
    pub detail: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlSample {
    pub id: String,
    pub content_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BaselineEntry<'a> {
    id: &'a str,
    created_at: Option<&'a str>,
}

/// Everything the listing stage produced, available even after an error
#[derive(Debug)]
pub struct ListingOutcome {
    pub termination: Option<Termination>,
    pub pages_fetched: usize,
    pub items_per_page: Vec<usize>,
    pub items_emitted: usize,
    pub duplicate_ids_skipped: usize,
    pub items_without_id: usize,
    pub completeness: CompletenessReport,
    /// Uniform sample of emitted items, candidates for thumbnails
    pub sample: Vec<MediaItemRecord>,
    pub url_sample: Vec<UrlSample>,
    pub items_path: PathBuf,
    pub baseline_path: Option<PathBuf>,
}

/// Sequential listing loop; see the module docs for termination order
pub struct PaginationDriver {
    tier: TierConfig,
    field_paths: FieldPaths,
    items: NdjsonSink,
    baseline: Option<NdjsonSink>,
    events: EventSender,

    pages_fetched: usize,
    items_per_page: Vec<usize>,
    items_emitted: usize,
    duplicate_ids_skipped: usize,
    items_without_id: usize,
    consecutive_empty_pages: usize,
    seen_ids: HashSet<String>,
    seen_tokens: HashSet<String>,
    completeness: CompletenessStats,
    reservoir: ReservoirSampler<MediaItemRecord>,
    url_sampler: ReservoirSampler<UrlSample>,
    termination: Option<Termination>,
}

impl PaginationDriver {
    pub fn new(tier: TierConfig, items: NdjsonSink, reservoir: ReservoirSampler<MediaItemRecord>) -> Self {
        Self {
            tier,
            field_paths: FieldPaths::default(),
            items,
            baseline: None,
            events: null_sender(),
            pages_fetched: 0,
            items_per_page: Vec::new(),
            items_emitted: 0,
            duplicate_ids_skipped: 0,
            items_without_id: 0,
            consecutive_empty_pages: 0,
            seen_ids: HashSet::new(),
            seen_tokens: HashSet::new(),
            completeness: CompletenessStats::new(),
            reservoir,
            url_sampler: ReservoirSampler::new(100),
            termination: None,
        }
    }

    pub fn with_field_paths(mut self, paths: FieldPaths) -> Self {
        self.field_paths = paths;
        self
    }

    /// Also write `{id, createdAt}` per item to `sink`
    pub fn with_baseline(mut self, sink: Option<NdjsonSink>) -> Self {
        self.baseline = sink;
        self
    }

    pub fn with_url_sample_limit(mut self, limit: usize) -> Self {
        self.url_sampler = ReservoirSampler::new(limit);
        self
    }

    pub fn with_url_sampler(mut self, sampler: ReservoirSampler<UrlSample>) -> Self {
        self.url_sampler = sampler;
        self
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = events;
        self
    }

    /// Fetch pages until a termination condition holds.
    ///
    /// Errors abort the loop; whatever was persisted is still reported by
    /// [`PaginationDriver::finish`].
    pub fn run(&mut self, source: &mut dyn PageSource, metrics: &mut RequestMetrics) -> Result<Termination> {
        info!(
            tier = %self.tier.name,
            mode = source.mode().as_str(),
            max_items = self.tier.max_items,
            max_pages = self.tier.max_pages,
            "listing started"
        );
        self.events.send(Event::Listing(ListingEvent::Started {
            tier: self.tier.name.clone(),
            max_items: self.tier.max_items,
        }));

        let mut page_token: Option<String> = None;
        loop {
            let page = source.fetch_page(page_token.as_deref(), metrics)?;
            self.pages_fetched += 1;

            let received = page.items.len();
            let emitted_before_page = self.items_emitted;
            let mut refused_by_cap = 0;
            for (index, raw) in page.items.iter().enumerate() {
                if self.items_emitted >= self.tier.max_items {
                    refused_by_cap = received - index;
                    break;
                }
                self.accept(raw)?;
            }
            self.flush()?;
            self.items_per_page.push(received);

            debug!(
                page = self.pages_fetched,
                received,
                total = self.items_emitted,
                next = if page.next_page_token.is_some() { "[present]" } else { "[none]" },
                "page persisted"
            );
            self.events.send(Event::Listing(ListingEvent::Page(ListingProgress {
                page: self.pages_fetched,
                items_on_page: received,
                total_items: self.items_emitted,
                max_items: self.tier.max_items,
                has_next_token: page.next_page_token.is_some(),
            })));

            let termination = self.check_termination(
                emitted_before_page,
                refused_by_cap,
                received,
                page_token.as_deref(),
                page.next_page_token.as_deref(),
            );
            if let Some(termination) = termination {
                info!(
                    reason = %termination.reason,
                    pages = self.pages_fetched,
                    items = self.items_emitted,
                    "listing terminated"
                );
                self.events.send(Event::Listing(ListingEvent::Terminated {
                    reason: termination.reason.to_string(),
                    total_items: self.items_emitted,
                }));
                self.termination = Some(termination.clone());
                return Ok(termination);
            }

            // check_termination returns early when there is no cursor
            if let Some(next) = page.next_page_token {
                self.seen_tokens.insert(next.clone());
                page_token = Some(next);
            }
        }
    }

    fn check_termination(
        &mut self,
        emitted_before_page: usize,
        refused_by_cap: usize,
        received: usize,
        current: Option<&str>,
        next: Option<&str>,
    ) -> Option<Termination> {
        let pages = self.pages_fetched;
        let terminate = |reason, detail| Some(Termination { reason, detail });

        if refused_by_cap > 0 || emitted_before_page >= self.tier.max_items {
            return terminate(
                TerminationReason::MaxItemsReached,
                json!({
                    "max_items": self.tier.max_items,
                    "items_emitted": self.items_emitted,
                    "items_discarded_on_page": refused_by_cap,
                    "page": pages,
                }),
            );
        }

        let Some(next) = next else {
            return terminate(TerminationReason::NoNextPageToken, json!({ "page": pages }));
        };

        if self.seen_tokens.contains(next) {
            return terminate(
                TerminationReason::RepeatedPageToken,
                json!({ "page": pages, "consecutive": current == Some(next) }),
            );
        }

        if received == 0 {
            self.consecutive_empty_pages += 1;
        } else {
            self.consecutive_empty_pages = 0;
        }
        if self.consecutive_empty_pages >= self.tier.empty_page_limit {
            return terminate(
                TerminationReason::EmptyPageLimit,
                json!({
                    "consecutive_empty_pages": self.consecutive_empty_pages,
                    "empty_page_limit": self.tier.empty_page_limit,
                    "page": pages,
                }),
            );
        }

        if pages >= self.tier.max_pages {
            return terminate(
                TerminationReason::MaxPagesReached,
                json!({ "max_pages": self.tier.max_pages, "page": pages }),
            );
        }

        None
    }

    fn accept(&mut self, raw: &Value) -> std::result::Result<(), StorageError> {
        let normalized = self.field_paths.normalize(raw);
        if let Some(id) = &normalized.id {
            if self.seen_ids.contains(id) {
                self.duplicate_ids_skipped += 1;
                debug!(id = %id, "duplicate id skipped");
                return Ok(());
            }
        }

        if normalized.id.is_none() {
            self.items_without_id += 1;
            return Ok(());
        }
        self.completeness.record(&normalized, raw);
        let Some(record) = normalized.into_record() else {
            return Ok(());
        };
        self.seen_ids.insert(record.id.clone());

        if let Some(url) = &record.content_url {
            self.url_sampler.offer(UrlSample {
                id: record.id.clone(),
                content_url: url.clone(),
            });
        }

        self.items.append(&record)?;
        if let Some(baseline) = self.baseline.as_mut() {
            baseline.append(&BaselineEntry {
                id: &record.id,
                created_at: record.created_at.as_deref(),
            })?;
        }
        self.items_emitted += 1;
        self.reservoir.offer(record);
        Ok(())
    }

    fn flush(&mut self) -> std::result::Result<(), StorageError> {
        self.items.flush()?;
        if let Some(baseline) = self.baseline.as_mut() {
            baseline.flush()?;
        }
        Ok(())
    }

    pub fn items_emitted(&self) -> usize {
        self.items_emitted
    }

    /// Flush the sinks and hand over everything gathered so far
    pub fn finish(mut self) -> ListingOutcome {
        if let Err(err) = self.flush() {
            debug!(error = %err, "final flush failed");
        }
        ListingOutcome {
            termination: self.termination,
            pages_fetched: self.pages_fetched,
            items_per_page: self.items_per_page,
            items_emitted: self.items_emitted,
            duplicate_ids_skipped: self.duplicate_ids_skipped,
            items_without_id: self.items_without_id,
            completeness: self.completeness.finalize(),
            sample: self.reservoir.into_items(),
            url_sample: self.url_sampler.into_items(),
            items_path: self.items.path().to_path_buf(),
            baseline_path: self.baseline.as_ref().map(|sink| sink.path().to_path_buf()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, ScanError};
    use std::collections::VecDeque;
    use tempfile::TempDir;

    /// Serves canned pages and records the cursors it was asked for
    struct MockSource {
        pages: VecDeque<std::result::Result<Page, FetchError>>,
        requested: Vec<Option<String>>,
    }

    impl MockSource {
        fn new(pages: Vec<Page>) -> Self {
            Self {
                pages: pages.into_iter().map(Ok).collect(),
                requested: Vec::new(),
            }
        }
    }

    impl PageSource for MockSource {
        fn mode(&self) -> ListingMode {
            ListingMode::List
        }

        fn fetch_page(&mut self, token: Option<&str>, _: &mut RequestMetrics) -> std::result::Result<Page, FetchError> {
            self.requested.push(token.map(str::to_string));
            self.pages.pop_front().unwrap_or_else(|| {
                Ok(Page {
                    items: Vec::new(),
                    next_page_token: Some("again".to_string()),
                })
            })
        }
    }

    fn items(range: std::ops::Range<usize>) -> Vec<Value> {
        range
            .map(|i| json!({ "id": format!("item-{}", i), "mimeType": "image/jpeg" }))
            .collect()
    }

    fn page(items: Vec<Value>, next: Option<&str>) -> Page {
        Page {
            items,
            next_page_token: next.map(str::to_string),
        }
    }

    fn tier(max_items: usize, max_pages: usize, empty_page_limit: usize) -> TierConfig {
        TierConfig {
            name: "test".to_string(),
            max_items,
            max_pages,
            empty_page_limit,
            poll_timeout_ms: 1_000,
        }
    }

    fn driver(dir: &TempDir, tier: TierConfig) -> PaginationDriver {
        let sink = NdjsonSink::create(dir.path().join("items.ndjson")).unwrap();
        PaginationDriver::new(tier, sink, ReservoirSampler::seeded(25, 7))
    }

    fn lines(path: &std::path::Path) -> Vec<MediaItemRecord> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_tier_stops_at_item_cap_on_third_page() {
        let dir = TempDir::new().unwrap();
        let mut driver = driver(&dir, tier(10, 5, 3));
        let mut source = MockSource::new(vec![
            page(items(0..5), Some("p2")),
            page(items(5..10), Some("p3")),
            page(items(10..12), Some("p4")),
        ]);

        let termination = driver.run(&mut source, &mut RequestMetrics::new()).unwrap();
        let outcome = driver.finish();

        assert_eq!(termination.reason, TerminationReason::MaxItemsReached);
        assert_eq!(outcome.pages_fetched, 3);
        assert_eq!(outcome.items_emitted, 10);
        assert_eq!(lines(&outcome.items_path).len(), 10);
        assert_eq!(outcome.completeness.total_items, 10);
        assert_eq!(outcome.completeness.fields["mimeType"].percent, 100.0);
        assert_eq!(outcome.completeness.fields["width"].count, 0);
        assert_eq!(outcome.sample.len(), 10);
    }

    #[test]
    fn met_cap_stops_before_chasing_empty_pages() {
        let dir = TempDir::new().unwrap();
        let mut driver = driver(&dir, tier(10, 100, 20));
        // Exhausted source keeps answering empty pages with a cursor
        let mut source = MockSource::new(vec![page(items(0..5), Some("p2")), page(items(5..10), Some("p3"))]);

        let termination = driver.run(&mut source, &mut RequestMetrics::new()).unwrap();
        let outcome = driver.finish();

        assert_eq!(termination.reason, TerminationReason::MaxItemsReached);
        assert_eq!(termination.detail["items_discarded_on_page"], 0);
        assert_eq!(outcome.pages_fetched, 3);
        assert_eq!(source.requested.len(), 3);
        assert_eq!(outcome.items_per_page, vec![5, 5, 0]);
        assert_eq!(outcome.items_emitted, 10);
    }

    #[test]
    fn url_sample_reaches_past_the_first_items() {
        let dir = TempDir::new().unwrap();
        let mut driver = driver(&dir, tier(1000, 100, 20)).with_url_sampler(ReservoirSampler::seeded(5, 11));
        let items: Vec<Value> = (0..50)
            .map(|i| json!({ "id": format!("item-{}", i), "baseUrl": format!("https://lh3/{}", i) }))
            .collect();
        let mut source = MockSource::new(vec![page(items, None)]);

        driver.run(&mut source, &mut RequestMetrics::new()).unwrap();
        let outcome = driver.finish();

        assert_eq!(outcome.url_sample.len(), 5);
        let first_five: Vec<String> = (0..5).map(|i| format!("item-{}", i)).collect();
        assert!(
            outcome.url_sample.iter().any(|s| !first_five.contains(&s.id)),
            "{:?}",
            outcome.url_sample
        );
        assert!(outcome
            .url_sample
            .iter()
            .all(|s| s.content_url == format!("https://lh3/{}", &s.id["item-".len()..])));
    }

    #[test]
    fn repeated_cursor_halts() {
        let dir = TempDir::new().unwrap();
        let mut driver = driver(&dir, tier(1000, 100, 20));
        let mut source = MockSource::new(vec![
            page(items(0..2), Some("loop")),
            page(items(2..4), Some("loop")),
        ]);

        let termination = driver.run(&mut source, &mut RequestMetrics::new()).unwrap();

        assert_eq!(termination.reason, TerminationReason::RepeatedPageToken);
        assert_eq!(termination.detail["consecutive"], true);
        assert_eq!(source.requested, vec![None, Some("loop".to_string())]);
        // Items from the terminating page are persisted
        assert_eq!(driver.finish().items_emitted, 4);
    }

    #[test]
    fn non_consecutive_cursor_cycle_halts() {
        let dir = TempDir::new().unwrap();
        let mut driver = driver(&dir, tier(1000, 100, 20));
        let mut source = MockSource::new(vec![
            page(items(0..1), Some("a")),
            page(items(1..2), Some("b")),
            page(items(2..3), Some("a")),
        ]);

        let termination = driver.run(&mut source, &mut RequestMetrics::new()).unwrap();

        assert_eq!(termination.reason, TerminationReason::RepeatedPageToken);
        assert_eq!(termination.detail["consecutive"], false);
    }

    #[test]
    fn stops_when_cursor_missing() {
        let dir = TempDir::new().unwrap();
        let mut driver = driver(&dir, tier(1000, 100, 20));
        let mut source = MockSource::new(vec![page(items(0..3), Some("p2")), page(items(3..5), None)]);

        let termination = driver.run(&mut source, &mut RequestMetrics::new()).unwrap();

        assert_eq!(termination.reason, TerminationReason::NoNextPageToken);
        assert_eq!(driver.finish().items_per_page, vec![3, 2]);
    }

    #[test]
    fn consecutive_empty_pages_hit_limit() {
        let dir = TempDir::new().unwrap();
        let mut driver = driver(&dir, tier(1000, 100, 3));
        let mut source = MockSource::new(vec![
            page(vec![], Some("e1")),
            page(items(0..1), Some("e2")),
            page(vec![], Some("e3")),
            page(vec![], Some("e4")),
            page(vec![], Some("e5")),
        ]);

        let termination = driver.run(&mut source, &mut RequestMetrics::new()).unwrap();

        assert_eq!(termination.reason, TerminationReason::EmptyPageLimit);
        assert_eq!(termination.detail["consecutive_empty_pages"], 3);
        assert_eq!(driver.finish().pages_fetched, 5);
    }

    #[test]
    fn page_ceiling_stops_listing() {
        let dir = TempDir::new().unwrap();
        let mut driver = driver(&dir, tier(1000, 2, 20));
        let mut source = MockSource::new(vec![
            page(items(0..2), Some("p2")),
            page(items(2..4), Some("p3")),
            page(items(4..6), Some("p4")),
        ]);

        let termination = driver.run(&mut source, &mut RequestMetrics::new()).unwrap();

        assert_eq!(termination.reason, TerminationReason::MaxPagesReached);
        assert_eq!(driver.finish().items_emitted, 4);
    }

    #[test]
    fn duplicate_and_idless_items_are_not_emitted() {
        let dir = TempDir::new().unwrap();
        let mut driver = driver(&dir, tier(1000, 100, 20));
        let mut source = MockSource::new(vec![page(
            vec![
                json!({ "id": "a", "baseUrl": "https://lh3/a" }),
                json!({ "id": "a", "baseUrl": "https://lh3/a" }),
                json!({ "filename": "no-id.jpg" }),
                json!({ "id": "b" }),
            ],
            None,
        )]);

        driver.run(&mut source, &mut RequestMetrics::new()).unwrap();
        let outcome = driver.finish();

        assert_eq!(outcome.items_emitted, 2);
        assert_eq!(outcome.duplicate_ids_skipped, 1);
        assert_eq!(outcome.items_without_id, 1);
        // Only emitted records count towards completeness
        assert_eq!(outcome.completeness.total_items, 2);
        assert_eq!(outcome.completeness.fields["contentUrl"].count, 1);
        assert_eq!(
            outcome.url_sample,
            vec![UrlSample {
                id: "a".to_string(),
                content_url: "https://lh3/a".to_string()
            }]
        );
    }

    #[test]
    fn fetch_error_keeps_persisted_items() {
        let dir = TempDir::new().unwrap();
        let mut driver = driver(&dir, tier(1000, 100, 20));
        let mut source = MockSource::new(vec![page(items(0..3), Some("p2"))]);
        source.pages.push_back(Err(FetchError::Client {
            status: 403,
            body: "quota".to_string(),
        }));

        let result = driver.run(&mut source, &mut RequestMetrics::new());
        let outcome = driver.finish();

        assert!(matches!(result, Err(ScanError::Fetch(FetchError::Client { status: 403, .. }))));
        assert!(outcome.termination.is_none());
        assert_eq!(lines(&outcome.items_path).len(), 3);
    }

    #[test]
    fn baseline_records_id_and_creation_time() {
        let dir = TempDir::new().unwrap();
        let baseline = NdjsonSink::create(dir.path().join("baseline.ndjson")).unwrap();
        let mut driver = driver(&dir, tier(1000, 100, 20)).with_baseline(Some(baseline));
        let mut source = MockSource::new(vec![page(
            vec![json!({ "id": "a", "createTime": "2024-01-01T00:00:00Z" })],
            None,
        )]);

        driver.run(&mut source, &mut RequestMetrics::new()).unwrap();
        let outcome = driver.finish();

        let text = std::fs::read_to_string(outcome.baseline_path.unwrap()).unwrap();
        assert_eq!(text, "{\"id\":\"a\",\"createdAt\":\"2024-01-01T00:00:00Z\"}\n");
    }

    #[test]
    fn custom_field_paths_pick_ids_from_other_keys() {
        let dir = TempDir::new().unwrap();
        let mut paths = FieldPaths::default();
        paths.id = vec![FieldPath::parse("media.key"), FieldPath::parse("id")];
        let mut driver = driver(&dir, tier(1000, 100, 20)).with_field_paths(paths);
        let mut source = MockSource::new(vec![page(
            vec![json!({ "media": { "key": "k1" } }), json!({ "id": "plain" }), json!({ "media": {} })],
            None,
        )]);

        driver.run(&mut source, &mut RequestMetrics::new()).unwrap();
        let outcome = driver.finish();

        let ids: Vec<String> = lines(&outcome.items_path).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["k1", "plain"]);
        assert_eq!(outcome.items_without_id, 1);
    }
}
