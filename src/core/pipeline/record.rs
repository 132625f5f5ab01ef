//! The run record: created when a scan starts, updated as each stage
//! completes, finalized and persisted exactly once on every exit path.

use super::similarity::SimilaritySummary;
use crate::core::config::ScanConfig;
use crate::core::fetcher::RequestMetrics;
use crate::core::pagination::{
    CompletenessReport, ListingMode, ListingOutcome, PickerSession, PollingSummary, TerminationReason, UrlSample,
};
use crate::core::probe::UrlProbeReport;
use crate::core::reporter::write_run_report;
use crate::error::{ScanError, StorageError};
use crate::events::{PipelinePhase, RunSummary};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Daily request quota of the media library API
pub const DAILY_QUOTA_REQUESTS: u64 = 10_000;

/// `<timestamp>-<tier>`, optionally prefixed with `<prefix>-`.
///
/// The timestamp is RFC 3339 UTC with millisecond precision; `:` and `.`
/// become `-` so the id is safe in file names.
pub fn build_run_id(tier: &str, prefix: Option<&str>, now: DateTime<Utc>) -> String {
    let timestamp = now
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    match prefix.filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{}-{}-{}", prefix, timestamp, tier),
        None => format!("{}-{}", timestamp, tier),
    }
}

/// Artifact locations for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunPaths {
    pub run_json: PathBuf,
    pub items: PathBuf,
    pub pairs: PathBuf,
    pub baseline: PathBuf,
}

impl RunPaths {
    pub fn new(runs_dir: &Path, run_id: &str) -> Self {
        let path = |suffix: &str| runs_dir.join(format!("{}-{}", run_id, suffix));
        Self {
            run_json: path("run.json"),
            items: path("items.ndjson"),
            pairs: path("pairs.ndjson"),
            baseline: path("baseline-ids.ndjson"),
        }
    }
}

/// Artifacts actually produced
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunArtifacts {
    pub run_json: Option<PathBuf>,
    pub items: Option<PathBuf>,
    pub pairs: Option<PathBuf>,
    pub baseline_ids: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuthSummary {
    pub token_refresh_events: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ListingSummary {
    pub requests_for_list: u64,
    pub pages_fetched: usize,
    pub items_per_page: Vec<usize>,
    pub total_items_seen: usize,
    pub duplicate_ids_skipped: usize,
    pub items_without_id: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QuotaAnalysis {
    pub daily_quota_requests: u64,
    pub requests_per_scan: u64,
    pub scans_per_day_ceiling: u64,
}

impl QuotaAnalysis {
    pub fn from_requests(requests_per_scan: u64) -> Self {
        Self {
            daily_quota_requests: DAILY_QUOTA_REQUESTS,
            requests_per_scan,
            scans_per_day_ceiling: DAILY_QUOTA_REQUESTS.checked_div(requests_per_scan).unwrap_or(0),
        }
    }
}

/// Stage and cause of an aborted run
#[derive(Debug, Clone, Serialize)]
pub struct RunError {
    pub stage: PipelinePhase,
    pub message: String,
}

/// Execution record of one scan
#[derive(Debug, Clone, Serialize)]
pub struct ScanRun {
    pub run_id: String,
    pub mode: ListingMode,
    pub tier: String,
    pub identity: String,
    pub max_items: usize,
    pub max_pages: usize,
    pub empty_page_limit: usize,
    pub sample_size: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub wall_clock_time_seconds: Option<f64>,
    pub artifacts: RunArtifacts,
    pub auth: AuthSummary,
    pub listing: ListingSummary,
    pub avg_items_per_request: f64,
    /// Listing requests only; download requests live in the similarity block
    pub request_metrics: RequestMetrics,
    pub metadata_completeness: Option<CompletenessReport>,
    pub url_samples: Vec<UrlSample>,
    /// Picker mode only
    pub session: Option<PickerSession>,
    /// Picker mode only
    pub polling: Option<PollingSummary>,
    pub url_probe: Option<UrlProbeReport>,
    pub quota_analysis: QuotaAnalysis,
    pub similarity: Option<SimilaritySummary>,
    pub termination_reason: Option<TerminationReason>,
    pub termination_detail: Value,
    pub error: Option<RunError>,
    #[serde(skip)]
    paths: RunPaths,
}

impl ScanRun {
    pub fn new(run_id: String, config: &ScanConfig, mode: ListingMode, started_at: DateTime<Utc>) -> Self {
        let paths = RunPaths::new(&config.runs_dir, &run_id);
        Self {
            run_id,
            mode,
            tier: config.tier.name.clone(),
            identity: config.identity.clone(),
            max_items: config.tier.max_items,
            max_pages: config.tier.max_pages,
            empty_page_limit: config.tier.empty_page_limit,
            sample_size: config.sample_size,
            started_at,
            completed_at: None,
            wall_clock_time_seconds: None,
            artifacts: RunArtifacts::default(),
            auth: AuthSummary::default(),
            listing: ListingSummary::default(),
            avg_items_per_request: 0.0,
            request_metrics: RequestMetrics::new(),
            metadata_completeness: None,
            url_samples: Vec::new(),
            session: None,
            polling: None,
            url_probe: None,
            quota_analysis: QuotaAnalysis::default(),
            similarity: None,
            termination_reason: None,
            termination_detail: Value::Null,
            error: None,
            paths,
        }
    }

    pub fn paths(&self) -> &RunPaths {
        &self.paths
    }

    pub fn is_finalized(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn listing_started(&mut self, at: DateTime<Utc>) {
        self.listing.started_at = Some(at);
    }

    /// Record what listing produced, including after a failed listing
    pub fn complete_listing(&mut self, outcome: &ListingOutcome, metrics: &RequestMetrics, at: DateTime<Utc>) {
        self.listing.requests_for_list = metrics.total_requests;
        self.listing.pages_fetched = outcome.pages_fetched;
        self.listing.items_per_page = outcome.items_per_page.clone();
        self.listing.total_items_seen = outcome.items_emitted;
        self.listing.duplicate_ids_skipped = outcome.duplicate_ids_skipped;
        self.listing.items_without_id = outcome.items_without_id;
        self.listing.completed_at = Some(at);
        self.listing.duration_seconds = self.listing.started_at.map(|start| seconds_between(start, at));

        self.request_metrics = metrics.clone();
        self.auth.token_refresh_events += metrics.token_refresh_events;
        self.metadata_completeness = Some(outcome.completeness.clone());
        self.url_samples = outcome.url_sample.clone();
        self.artifacts.items = Some(outcome.items_path.clone());
        self.artifacts.baseline_ids = outcome.baseline_path.clone();

        if let Some(termination) = &outcome.termination {
            self.termination_reason = Some(termination.reason);
            self.termination_detail = termination.detail.clone();
        }
    }

    /// Record the picker session and how polling went. A timed-out poll
    /// ends the run with `poll_timeout`.
    pub fn complete_polling(&mut self, session: PickerSession, polling: PollingSummary, timed_out: bool, timeout_ms: u64) {
        if timed_out {
            self.termination_reason = Some(TerminationReason::PollTimeout);
            self.termination_detail = serde_json::json!({
                "poll_timeout_ms": timeout_ms,
                "poll_requests_count": polling.poll_requests_count,
            });
        }
        self.session = Some(session);
        self.polling = Some(polling);
    }

    pub fn complete_probe(&mut self, report: UrlProbeReport) {
        self.url_probe = Some(report);
    }

    pub fn complete_similarity(&mut self, summary: SimilaritySummary) {
        self.auth.token_refresh_events += summary.download_requests.token_refresh_events;
        if summary.pairs_written.is_some() {
            self.artifacts.pairs = Some(self.paths.pairs.clone());
        }
        self.similarity = Some(summary);
    }

    /// Record an unrecovered error. The reason overrides any listing termination.
    pub fn fail(&mut self, stage: PipelinePhase, error: &ScanError) {
        let reason = match error {
            ScanError::Storage(StorageError::Integrity { .. }) => TerminationReason::NdjsonInvalid,
            _ => TerminationReason::Error,
        };
        if let Some(previous) = self.termination_reason.replace(reason) {
            self.termination_detail = serde_json::json!({
                "stage": stage,
                "listing_termination": previous,
                "listing_detail": self.termination_detail.take(),
            });
        } else {
            self.termination_detail = serde_json::json!({ "stage": stage });
        }
        self.error = Some(RunError {
            stage,
            message: error.to_string(),
        });
    }

    /// Stamp completion time and derived metrics. Idempotent.
    pub fn finalize(&mut self, at: DateTime<Utc>) {
        if self.is_finalized() {
            return;
        }
        self.completed_at = Some(at);
        self.wall_clock_time_seconds = Some(seconds_between(self.started_at, at));
        let requests = self.request_metrics.total_requests;
        self.avg_items_per_request = if requests == 0 {
            0.0
        } else {
            round2(self.listing.total_items_seen as f64 / requests as f64)
        };
        self.quota_analysis = QuotaAnalysis::from_requests(requests);
    }

    /// Write the run record to `<run_id>-run.json`
    pub fn persist(&mut self) -> Result<(), StorageError> {
        self.artifacts.run_json = Some(self.paths.run_json.clone());
        write_run_report(&self.paths.run_json, self)
    }

    pub fn summary(&self) -> RunSummary {
        let similarity = self.similarity.as_ref();
        RunSummary {
            run_id: self.run_id.clone(),
            items_listed: self.listing.total_items_seen,
            termination_reason: self
                .termination_reason
                .map(|reason| reason.as_str().to_string())
                .unwrap_or_default(),
            fingerprints: similarity.map(|s| s.items_hashed).unwrap_or(0),
            clusters: similarity.map(|s| s.clusters.len()).unwrap_or(0),
            duration_ms: self
                .wall_clock_time_seconds
                .map(|seconds| (seconds * 1000.0).round() as u64)
                .unwrap_or(0),
        }
    }
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
