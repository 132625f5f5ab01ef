//! Similarity stage: thumbnails, fingerprints, clusters, pairs export.

use crate::core::comparator::{Cluster, SimilarityClusterer, SimilarityPair};
use crate::core::config::ScanConfig;
use crate::core::fetcher::{RequestMetrics, ResilientFetcher, TokenProvider};
use crate::core::hasher::{Fingerprint, PerceptualHasher};
use crate::core::pagination::MediaItemRecord;
use crate::core::reporter::{export_pairs, pairs_to_export};
use crate::core::thumbnails::{DownloadMetrics, ThumbnailFetcher};
use crate::error::StorageError;
use crate::events::{null_sender, Event, EventSender, PipelineEvent, PipelinePhase, SimilarityEvent};
use rayon::prelude::*;
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

/// Edge length of the requested rendition
pub const IMAGE_SIZE: &str = "256x256";

/// Why clustering was not attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The sample held no image items
    NoCandidates,
    /// Fewer than two items were fingerprinted
    InsufficientFingerprints,
    /// More candidates than the clustering ceiling
    TooManyItems,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NoCandidates => "no_candidates",
            SkipReason::InsufficientFingerprints => "insufficient_fingerprints",
            SkipReason::TooManyItems => "too_many_items",
        }
    }
}

/// One item that was excluded from hashing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub id: String,
    pub error: String,
}

/// Wall time of each stage phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageTiming {
    pub download_ms: u64,
    pub hash_ms: u64,
    pub compare_ms: u64,
}

/// Similarity block of the run report
#[derive(Debug, Clone, Serialize)]
pub struct SimilaritySummary {
    pub algorithm: String,
    pub hash_bits: u32,
    pub image_size: String,
    pub candidates: usize,
    pub items_hashed: usize,
    pub near_match_threshold: u32,
    pub pairs_evaluated: usize,
    pub top_pairs: Vec<SimilarityPair>,
    pub clusters: Vec<Cluster>,
    pub failures: Vec<ItemFailure>,
    pub timing: StageTiming,
    pub download_metrics: DownloadMetrics,
    pub download_requests: RequestMetrics,
    /// Lines in the pairs export, when one was written
    pub pairs_written: Option<usize>,
    pub skipped: bool,
    pub skip_reason: Option<SkipReason>,
}

/// Downloads, hashes and clusters the listing sample
pub struct SimilarityStage {
    hasher: PerceptualHasher,
    thumbnails: ThumbnailFetcher,
    clusterer: SimilarityClusterer,
    max_items: usize,
    write_all_pairs_limit: usize,
    events: EventSender,
}

impl SimilarityStage {
    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            hasher: PerceptualHasher::new(),
            thumbnails: ThumbnailFetcher::new(config.download_workers),
            clusterer: SimilarityClusterer::new(config.similarity_threshold)
                .with_drop_singletons(config.drop_singletons)
                .with_top_n(config.top_pairs),
            max_items: config.max_cluster_items,
            write_all_pairs_limit: config.write_all_pairs_limit,
            events: null_sender(),
        }
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.thumbnails = self.thumbnails.with_events(events.clone());
        self.clusterer = self.clusterer.with_events(events.clone());
        self.events = events;
        self
    }

    /// Run the stage over `sample`.
    ///
    /// Per-item problems end up in `failures`; only writing the pairs export
    /// can fail the stage.
    pub fn run<F, P>(
        &self,
        sample: &[MediaItemRecord],
        fetcher: &mut ResilientFetcher,
        make_tokens: F,
        pairs_path: &Path,
    ) -> Result<SimilaritySummary, StorageError>
    where
        F: Fn() -> P + Sync,
        P: TokenProvider,
    {
        let mut summary = self.empty_summary(sample.len());

        if !sample.iter().any(MediaItemRecord::is_image) {
            return Ok(self.skip(summary, SkipReason::NoCandidates));
        }
        if sample.len() > self.max_items {
            return Ok(self.skip(summary, SkipReason::TooManyItems));
        }

        self.phase(PipelinePhase::Downloading);
        let started = Instant::now();
        let batch = self.thumbnails.fetch_all(sample, fetcher, make_tokens);
        summary.timing.download_ms = started.elapsed().as_millis() as u64;
        summary.failures.extend(batch.failures().map(|(id, failure)| ItemFailure {
            id: id.to_string(),
            error: failure.code(),
        }));

        self.phase(PipelinePhase::Hashing);
        let started = Instant::now();
        let thumbnails: Vec<_> = batch.thumbnails().collect();
        let results: Vec<_> = thumbnails
            .par_iter()
            .map(|thumb| {
                self.hasher
                    .fingerprint_bytes(&thumb.item_id, &thumb.bytes, &thumb.mime_type)
                    .map_err(|err| (thumb.item_id.clone(), err))
            })
            .collect();
        summary.timing.hash_ms = started.elapsed().as_millis() as u64;

        let mut fingerprints: Vec<Fingerprint> = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(fingerprint) => fingerprints.push(fingerprint),
                Err((id, err)) => {
                    warn!(item = %id, error = %err, "could not fingerprint thumbnail");
                    summary.failures.push(ItemFailure {
                        id,
                        error: "decode_failed".to_string(),
                    });
                }
            }
        }
        summary.items_hashed = fingerprints.len();
        summary.download_metrics = batch.metrics;
        summary.download_requests = batch.requests;

        if fingerprints.len() < 2 {
            return Ok(self.skip(summary, SkipReason::InsufficientFingerprints));
        }

        self.phase(PipelinePhase::Clustering);
        let started = Instant::now();
        let outcome = self.clusterer.cluster(&fingerprints);
        summary.timing.compare_ms = started.elapsed().as_millis() as u64;

        let exported = pairs_to_export(&outcome, fingerprints.len(), self.write_all_pairs_limit);
        summary.pairs_written = Some(export_pairs(pairs_path, exported)?);

        info!(
            hashed = summary.items_hashed,
            pairs = outcome.pairs_evaluated(),
            clusters = outcome.clusters.len(),
            failures = summary.failures.len(),
            "similarity stage complete"
        );
        summary.pairs_evaluated = outcome.pairs_evaluated();
        summary.top_pairs = outcome.top_pairs;
        summary.clusters = outcome.clusters;
        Ok(summary)
    }

    fn empty_summary(&self, candidates: usize) -> SimilaritySummary {
        SimilaritySummary {
            algorithm: self.hasher.algorithm_name().to_string(),
            hash_bits: self.hasher.bit_width(),
            image_size: IMAGE_SIZE.to_string(),
            candidates,
            items_hashed: 0,
            near_match_threshold: self.clusterer.threshold(),
            pairs_evaluated: 0,
            top_pairs: Vec::new(),
            clusters: Vec::new(),
            failures: Vec::new(),
            timing: StageTiming::default(),
            download_metrics: DownloadMetrics::default(),
            download_requests: RequestMetrics::new(),
            pairs_written: None,
            skipped: false,
            skip_reason: None,
        }
    }

    fn skip(&self, mut summary: SimilaritySummary, reason: SkipReason) -> SimilaritySummary {
        info!(reason = reason.as_str(), candidates = summary.candidates, "clustering skipped");
        self.events.send(Event::Similarity(SimilarityEvent::Skipped {
            reason: reason.as_str().to_string(),
        }));
        summary.skipped = true;
        summary.skip_reason = Some(reason);
        summary
    }

    fn phase(&self, phase: PipelinePhase) {
        self.events.send(Event::Pipeline(PipelineEvent::PhaseChanged { phase }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fetcher::testing::{RecordingSleeper, ScriptedTransport};
    use crate::core::fetcher::{HttpRequest, HttpResponse, HttpTransport, StaticToken, TransportError};
    use crate::core::hasher::decode::fixtures::{encode, gradient, mirrored_gradient};
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Serves fixed bodies keyed by URL
    struct ImageServer {
        bodies: HashMap<String, HttpResponse>,
    }

    impl HttpTransport for ImageServer {
        fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            Ok(self
                .bodies
                .get(&request.url)
                .cloned()
                .unwrap_or_else(|| HttpResponse::new(404, "missing")))
        }
    }

    fn item(id: &str, mime: &str) -> MediaItemRecord {
        MediaItemRecord {
            id: id.to_string(),
            filename: Some(format!("{id}.jpg")),
            mime_type: Some(mime.to_string()),
            content_url: Some(format!("https://media.test/{id}")),
            created_at: None,
            width: None,
            height: None,
        }
    }

    fn stage(config: ScanConfig) -> SimilarityStage {
        SimilarityStage::from_config(&config)
    }

    fn fetcher(transport: Arc<dyn HttpTransport>) -> ResilientFetcher {
        ResilientFetcher::new(transport)
            .with_sleeper(Arc::new(RecordingSleeper::default()))
            .with_max_retries(0)
            .with_seed(7)
    }

    fn served(entries: Vec<(&str, Vec<u8>)>) -> Arc<ImageServer> {
        let bodies = entries
            .into_iter()
            .map(|(id, body)| (format!("https://media.test/{id}=w256-h256"), HttpResponse::new(206, body)))
            .collect();
        Arc::new(ImageServer { bodies })
    }

    #[test]
    fn clusters_sampled_thumbnails() {
        let dir = TempDir::new().unwrap();
        let pairs_path = dir.path().join("r-pairs.ndjson");
        let grad = encode(&gradient(64, 48), image::ImageFormat::Png);
        let transport = served(vec![
            ("a", grad.clone()),
            ("b", grad),
            ("c", encode(&mirrored_gradient(64, 48), image::ImageFormat::Png)),
            ("broken", b"not an image".to_vec()),
        ]);
        let sample = vec![
            item("a", "image/png"),
            item("b", "image/png"),
            item("c", "image/png"),
            item("broken", "image/png"),
            item("clip", "video/mp4"),
            item("gone", "image/jpeg"),
        ];

        let summary = stage(ScanConfig::default())
            .run(&sample, &mut fetcher(transport), || StaticToken("t".into()), &pairs_path)
            .unwrap();

        assert!(!summary.skipped);
        assert_eq!(summary.algorithm, "dHash");
        assert_eq!(summary.hash_bits, 64);
        assert_eq!(summary.items_hashed, 3);
        assert_eq!(summary.pairs_evaluated, 3);
        assert_eq!(summary.pairs_written, Some(3));
        assert_eq!(summary.clusters.len(), 1);
        assert_eq!(summary.clusters[0].members, vec!["a".to_string(), "b".to_string()]);

        let mut codes: Vec<_> = summary.failures.iter().map(|f| (f.id.as_str(), f.error.as_str())).collect();
        codes.sort();
        assert_eq!(
            codes,
            vec![
                ("broken", "decode_failed"),
                ("clip", "unsupported_mime_type"),
                ("gone", "download_failed_404"),
            ]
        );
        assert_eq!(std::fs::read_to_string(&pairs_path).unwrap().lines().count(), 3);
    }

    /// Serves one image per request after a fixed delay
    struct SlowServer {
        body: Vec<u8>,
        delay: std::time::Duration,
    }

    impl HttpTransport for SlowServer {
        fn execute(&self, _request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            std::thread::sleep(self.delay);
            Ok(HttpResponse::new(206, self.body.clone()))
        }
    }

    #[test]
    fn download_time_is_stage_wall_time() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(SlowServer {
            body: encode(&gradient(32, 32), image::ImageFormat::Png),
            delay: std::time::Duration::from_millis(40),
        });
        let sample: Vec<_> = (0..6).map(|i| item(&format!("i{i}"), "image/png")).collect();
        let config = ScanConfig::builder().download_workers(6).build().unwrap();

        let summary = stage(config)
            .run(&sample, &mut fetcher(transport), || StaticToken("t".into()), &dir.path().join("p.ndjson"))
            .unwrap();

        assert_eq!(summary.download_metrics.succeeded, 6);
        assert!(summary.timing.download_ms >= 40);
        // Workers overlap, so the stage takes less than the summed downloads
        assert!(
            summary.timing.download_ms < summary.download_metrics.download_ms,
            "stage {}ms, summed {}ms",
            summary.timing.download_ms,
            summary.download_metrics.download_ms
        );
    }

    #[test]
    fn skips_without_image_candidates() {
        let dir = TempDir::new().unwrap();
        let transport = ScriptedTransport::new(Vec::new());

        let summary = stage(ScanConfig::default())
            .run(
                &[item("clip", "video/mp4")],
                &mut fetcher(transport.clone()),
                || StaticToken("t".into()),
                &dir.path().join("p.ndjson"),
            )
            .unwrap();

        assert_eq!(summary.skip_reason, Some(SkipReason::NoCandidates));
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn skips_above_item_ceiling() {
        let dir = TempDir::new().unwrap();
        let transport = ScriptedTransport::new(Vec::new());
        let config = ScanConfig::builder().max_cluster_items(2).build().unwrap();
        let sample: Vec<_> = (0..3).map(|i| item(&format!("i{i}"), "image/jpeg")).collect();

        let summary = stage(config)
            .run(&sample, &mut fetcher(transport.clone()), || StaticToken("t".into()), &dir.path().join("p.ndjson"))
            .unwrap();

        assert!(summary.skipped);
        assert_eq!(summary.skip_reason, Some(SkipReason::TooManyItems));
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn skips_with_one_fingerprint() {
        let dir = TempDir::new().unwrap();
        let pairs_path = dir.path().join("p.ndjson");
        let transport = served(vec![("a", encode(&gradient(32, 32), image::ImageFormat::Png))]);

        let summary = stage(ScanConfig::default())
            .run(
                &[item("a", "image/png"), item("b", "image/png")],
                &mut fetcher(transport),
                || StaticToken("t".into()),
                &pairs_path,
            )
            .unwrap();

        assert_eq!(summary.skip_reason, Some(SkipReason::InsufficientFingerprints));
        assert_eq!(summary.items_hashed, 1);
        assert_eq!(summary.download_metrics.succeeded, 1);
        assert_eq!(summary.pairs_written, None);
        assert!(!pairs_path.exists());
    }

    #[test]
    fn skip_reasons_serialize_snake_case() {
        let json = serde_json::to_value(SkipReason::InsufficientFingerprints).unwrap();
        assert_eq!(json, "insufficient_fingerprints");
    }
}
