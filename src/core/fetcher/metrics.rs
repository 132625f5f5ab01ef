//! Aggregated request metrics for a run.

use crate::error::FailureKind;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Rate-limit observations
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RateLimitEvents {
    pub count: u64,
    /// Keyed by status code (429, 503)
    pub by_status: BTreeMap<u16, u64>,
    pub retry_after_seconds: Vec<f64>,
}

/// Failures by category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FailureCounts {
    pub network: u64,
    pub auth: u64,
    pub quota: u64,
    pub server: u64,
    pub other: u64,
}

/// Metrics sink updated by the resilient fetcher on every attempt
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequestMetrics {
    pub total_requests: u64,
    pub rate_limit_events: RateLimitEvents,
    pub retry_count: u64,
    pub total_backoff_wait_seconds: f64,
    pub token_refresh_events: u64,
    pub failures_by_type: FailureCounts,
}

impl RequestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&mut self) {
        self.total_requests += 1;
    }

    pub fn record_rate_limit(&mut self, status: u16, retry_after: Option<Duration>) {
        self.rate_limit_events.count += 1;
        *self.rate_limit_events.by_status.entry(status).or_insert(0) += 1;
        if let Some(delay) = retry_after {
            self.rate_limit_events
                .retry_after_seconds
                .push(delay.as_secs_f64());
        }
    }

    /// A retry was scheduled after waiting `delay`
    pub fn record_retry(&mut self, delay: Duration) {
        self.retry_count += 1;
        self.total_backoff_wait_seconds += delay.as_secs_f64();
    }

    pub fn record_failure(&mut self, kind: FailureKind) {
        let counts = &mut self.failures_by_type;
        match kind {
            FailureKind::Network => counts.network += 1,
            FailureKind::Auth => counts.auth += 1,
            FailureKind::Quota => counts.quota += 1,
            FailureKind::Server => counts.server += 1,
            FailureKind::Other => counts.other += 1,
        }
    }

    pub fn record_refresh(&mut self) {
        self.token_refresh_events += 1;
    }

    /// Fold metrics gathered elsewhere (e.g. by a worker) into this one
    pub fn merge(&mut self, other: &RequestMetrics) {
        self.total_requests += other.total_requests;
        self.rate_limit_events.count += other.rate_limit_events.count;
        for (status, count) in &other.rate_limit_events.by_status {
            *self.rate_limit_events.by_status.entry(*status).or_insert(0) += count;
        }
        self.rate_limit_events
            .retry_after_seconds
            .extend_from_slice(&other.rate_limit_events.retry_after_seconds);
        self.retry_count += other.retry_count;
        self.total_backoff_wait_seconds += other.total_backoff_wait_seconds;
        self.token_refresh_events += other.token_refresh_events;
        let (mine, theirs) = (&mut self.failures_by_type, &other.failures_by_type);
        mine.network += theirs.network;
        mine.auth += theirs.auth;
        mine.quota += theirs.quota;
        mine.server += theirs.server;
        mine.other += theirs.other;
    }
}
