//! Picker sessions.
//!
//! The user selects items in a hosted picker. A session is created, polled
//! until the selection is final (`mediaItemsSet`), then its items are paged
//! through like any other listing.
//!
//! Poll delays double from 1s up to 10s. Time already scheduled for sleeping
//! counts against the tier's poll timeout even if the sleeper returns early.

use super::source::{ListingMode, Page, PageSource};
use crate::core::fetcher::{HttpRequest, RequestMetrics, ResilientFetcher, TokenProvider};
use crate::error::FetchError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const POLL_BASE_DELAY: Duration = Duration::from_secs(1);
pub const POLL_MAX_DELAY: Duration = Duration::from_secs(10);

/// Delay after the `attempt`-th poll (1-based)
pub fn poll_delay(attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    POLL_BASE_DELAY.saturating_mul(factor).min(POLL_MAX_DELAY)
}

/// Session state as last seen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickerSession {
    pub id: String,
    pub picker_uri: Option<String>,
    pub expire_time: Option<String>,
    pub media_items_set: bool,
}

impl PickerSession {
    fn from_response(body: &Value) -> Result<Self, FetchError> {
        let text = |key: &str| body.get(key).and_then(Value::as_str).map(str::to_string);
        let id = text("id")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| FetchError::InvalidJson("session response carried no id".to_string()))?;
        Ok(Self {
            id,
            picker_uri: text("pickerUri"),
            expire_time: text("expireTime"),
            media_items_set: media_items_set(body),
        })
    }
}

fn media_items_set(body: &Value) -> bool {
    body.get("mediaItemsSet").and_then(Value::as_bool).unwrap_or(false)
}

/// A poll that failed; polling carries on
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollError {
    pub message: String,
    pub at: DateTime<Utc>,
}

/// `polling` block of the run record
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PollingSummary {
    pub poll_requests_count: u64,
    pub errors: Vec<PollError>,
    pub time_to_complete_seconds: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The user finished picking
    Ready,
    /// The tier's poll timeout elapsed first
    TimedOut,
}

/// Creates and polls a picker session, then serves its items as pages
pub struct PickerSource<P: TokenProvider> {
    fetcher: ResilientFetcher,
    tokens: P,
    api_base: String,
    page_size: usize,
    session_id: Option<String>,
}

impl<P: TokenProvider> PickerSource<P> {
    pub fn new(fetcher: ResilientFetcher, tokens: P, api_base: impl Into<String>, page_size: usize) -> Self {
        Self {
            fetcher,
            tokens,
            api_base: api_base.into(),
            page_size,
            session_id: None,
        }
    }

    pub fn into_parts(self) -> (ResilientFetcher, P) {
        (self.fetcher, self.tokens)
    }

    fn base(&self) -> &str {
        self.api_base.trim_end_matches('/')
    }

    /// `POST sessions`, asking the picker to cap the selection at `max_items`
    pub fn create_session(&mut self, max_items: usize, metrics: &mut RequestMetrics) -> Result<PickerSession, FetchError> {
        let body = json!({ "pickingConfig": { "maxItemCount": max_items.to_string() } });
        let request = HttpRequest::post_json(format!("{}/sessions", self.base()), body);
        let response = self.fetcher.request_json(&request, &mut self.tokens, metrics)?;
        let session = PickerSession::from_response(&response)?;
        info!(session = %session.id, "picker session created");
        self.session_id = Some(session.id.clone());
        Ok(session)
    }

    /// Poll `GET sessions/{id}` until the selection is set or `timeout` runs out
    pub fn poll_until_set(
        &mut self,
        session: &mut PickerSession,
        timeout: Duration,
        polling: &mut PollingSummary,
        metrics: &mut RequestMetrics,
    ) -> PollOutcome {
        let sleeper = self.fetcher.sleeper();
        let request = HttpRequest::get(format!("{}/sessions/{}", self.base(), urlencoding::encode(&session.id)));
        let started = Instant::now();
        let mut scheduled = Duration::ZERO;
        let mut attempt = 0u32;

        while started.elapsed().max(scheduled) < timeout {
            attempt += 1;
            polling.poll_requests_count += 1;

            match self.fetcher.request_json(&request, &mut self.tokens, metrics) {
                Ok(body) => {
                    session.media_items_set = media_items_set(&body);
                    if session.media_items_set {
                        let waited = started.elapsed().max(scheduled).as_secs_f64();
                        polling.time_to_complete_seconds = Some((waited * 100.0).round() / 100.0);
                        info!(session = %session.id, polls = attempt, "picker selection complete");
                        return PollOutcome::Ready;
                    }
                    debug!(session = %session.id, attempt, "selection not set yet");
                }
                Err(err) => {
                    warn!(session = %session.id, attempt, error = %err, "session poll failed");
                    polling.errors.push(PollError {
                        message: err.to_string(),
                        at: Utc::now(),
                    });
                }
            }

            let delay = poll_delay(attempt);
            scheduled += delay;
            sleeper.sleep(delay);
        }

        warn!(session = %session.id, polls = attempt, ?timeout, "picker session poll timed out");
        PollOutcome::TimedOut
    }
}

impl<P: TokenProvider> PageSource for PickerSource<P> {
    fn mode(&self) -> ListingMode {
        ListingMode::Picker
    }

    fn fetch_page(&mut self, page_token: Option<&str>, metrics: &mut RequestMetrics) -> Result<Page, FetchError> {
        let session_id = self
            .session_id
            .clone()
            .ok_or_else(|| FetchError::InvalidJson("no picker session was created".to_string()))?;
        let mut url = format!(
            "{}/mediaItems?sessionId={}&pageSize={}",
            self.base(),
            urlencoding::encode(&session_id),
            self.page_size
        );
        if let Some(token) = page_token {
            url.push_str("&pageToken=");
            url.push_str(&urlencoding::encode(token));
        }
        let body = self.fetcher.request_json(&HttpRequest::get(url), &mut self.tokens, metrics)?;
        Ok(Page::from_response(&body))
    }
}
