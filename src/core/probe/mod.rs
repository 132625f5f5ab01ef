//! # Probe Module
//!
//! One-byte range requests against the sampled content URLs, to see whether
//! they still resolve and what they serve.
//!
//! Each URL gets a single unauthenticated `GET` with `Range: bytes=0-0`. No
//! retries: the status seen on the first attempt is what gets recorded.
//! Transport failures land in the `error` bucket of the status histogram.

use crate::core::fetcher::{HttpRequest, HttpTransport};
use crate::core::pagination::UrlSample;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub const PROBE_RANGE: &str = "bytes=0-0";

/// Result for one probed URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub id: String,
    pub status: Option<u16>,
    pub ok: bool,
    pub content_type: String,
    pub latency_ms: u64,
    pub error: Option<String>,
}

/// `url_probe` block of the run record
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UrlProbeReport {
    pub sample_size: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub status_histogram: BTreeMap<String, usize>,
    pub content_type_histogram: BTreeMap<String, usize>,
    pub avg_latency_ms: u64,
    pub sample_results: Vec<ProbeResult>,
}

/// Lower-cased media type without parameters, `unknown` when absent
pub fn normalize_content_type(value: Option<&str>) -> String {
    value
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

pub struct UrlProber {
    transport: Arc<dyn HttpTransport>,
}

impl UrlProber {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    /// Probe every sample in order
    pub fn probe(&self, samples: &[UrlSample]) -> UrlProbeReport {
        let mut report = UrlProbeReport {
            sample_size: samples.len(),
            ..UrlProbeReport::default()
        };
        let mut total_latency_ms = 0u64;

        for sample in samples {
            let result = self.probe_one(sample);
            total_latency_ms += result.latency_ms;

            let status_key = result
                .status
                .map(|status| status.to_string())
                .unwrap_or_else(|| "error".to_string());
            *report.status_histogram.entry(status_key).or_insert(0) += 1;
            *report
                .content_type_histogram
                .entry(result.content_type.clone())
                .or_insert(0) += 1;
            if result.ok {
                report.success_count += 1;
            } else {
                report.failure_count += 1;
            }
            report.sample_results.push(result);
        }

        if !samples.is_empty() {
            report.avg_latency_ms = (total_latency_ms as f64 / samples.len() as f64).round() as u64;
        }
        info!(
            probed = report.sample_size,
            ok = report.success_count,
            failed = report.failure_count,
            "url probe complete"
        );
        report
    }

    fn probe_one(&self, sample: &UrlSample) -> ProbeResult {
        let request = HttpRequest::get(sample.content_url.as_str()).header("Range", PROBE_RANGE);
        let started = Instant::now();
        let outcome = self.transport.execute(&request);
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(response) => {
                debug!(id = %sample.id, status = response.status, latency_ms, "url probed");
                ProbeResult {
                    id: sample.id.clone(),
                    status: Some(response.status),
                    ok: response.is_success(),
                    content_type: normalize_content_type(response.header("content-type")),
                    latency_ms,
                    error: None,
                }
            }
            Err(err) => {
                debug!(id = %sample.id, error = %err, "url probe failed");
                ProbeResult {
                    id: sample.id.clone(),
                    status: None,
                    ok: false,
                    content_type: normalize_content_type(None),
                    latency_ms,
                    error: Some(err.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fetcher::testing::ScriptedTransport;
    use crate::core::fetcher::{HttpResponse, TransportError};

    fn sample(id: &str) -> UrlSample {
        UrlSample {
            id: id.to_string(),
            content_url: format!("https://lh3.test/{id}"),
        }
    }

    #[test]
    fn content_type_drops_parameters() {
        assert_eq!(normalize_content_type(Some("Image/JPEG; charset=binary")), "image/jpeg");
        assert_eq!(normalize_content_type(Some("  ")), "unknown");
        assert_eq!(normalize_content_type(None), "unknown");
    }

    #[test]
    fn histograms_cover_statuses_and_types() {
        let transport = ScriptedTransport::new(vec![
            Ok(HttpResponse::new(206, vec![0xff]).with_header("Content-Type", "image/jpeg")),
            Ok(HttpResponse::new(206, vec![0x89]).with_header("Content-Type", "image/png")),
            Ok(HttpResponse::new(403, "expired")),
            Err(TransportError::timeout("read timed out")),
        ]);
        let prober = UrlProber::new(transport.clone());

        let report = prober.probe(&[sample("a"), sample("b"), sample("c"), sample("d")]);

        assert_eq!(report.sample_size, 4);
        assert_eq!(report.success_count, 2);
        assert_eq!(report.failure_count, 2);
        assert_eq!(report.status_histogram["206"], 2);
        assert_eq!(report.status_histogram["403"], 1);
        assert_eq!(report.status_histogram["error"], 1);
        assert_eq!(report.content_type_histogram["image/jpeg"], 1);
        assert_eq!(report.content_type_histogram["unknown"], 2);
        assert!(report.sample_results[3].error.as_deref().unwrap().contains("timed out"));
        assert_eq!(report.sample_results[2].status, Some(403));

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests.len(), 4);
        assert_eq!(requests[0].url, "https://lh3.test/a");
        assert!(requests[0]
            .headers
            .iter()
            .any(|(name, value)| name == "Range" && value == "bytes=0-0"));
        assert!(requests[0].headers.iter().all(|(name, _)| name != "Authorization"));
    }

    #[test]
    fn empty_sample_reports_zero_latency() {
        let report = UrlProber::new(ScriptedTransport::new(vec![])).probe(&[]);
        assert_eq!(report.sample_size, 0);
        assert_eq!(report.avg_latency_ms, 0);
        assert!(report.status_histogram.is_empty());
    }
}
