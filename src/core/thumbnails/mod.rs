//! # Thumbnails Module
//!
//! Bounded-concurrency partial downloads of size-constrained renditions.
//!
//! ## Design
//! A fixed pool of worker threads pulls tasks from a bounded crossbeam queue.
//! The queue holds at most one task per worker, so the producer blocks until
//! a worker frees up. Each worker owns a forked [`ResilientFetcher`] and its
//! own [`RequestMetrics`]; the metrics are merged once the pool drains.
//!
//! Failures are recorded per item and never abort the batch.
//!
//! | Failure | Code |
//! |---------|------|
//! | Not an `image/*` mime type | `unsupported_mime_type` |
//! | No content URL | `missing_base_url` |
//! | Non-2xx after retries | `download_failed_<status>` |
//! | Transport failure after retries | `network_error` |
//! | Token provider failure | `auth_error` |

use crate::core::fetcher::{HttpRequest, RequestMetrics, ResilientFetcher, TokenProvider};
use crate::core::pagination::MediaItemRecord;
use crate::error::FetchError;
use crate::events::{null_sender, DownloadEvent, DownloadProgress, Event, EventSender};
use crossbeam_channel::{bounded, unbounded};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Appended to the content URL to request a small rendition
pub const RENDITION_SUFFIX: &str = "=w256-h256";
/// Only the head of each rendition is fetched
pub const RANGE_HEADER: &str = "bytes=0-65535";
pub const DEFAULT_WORKERS: usize = 6;
/// Retry ceiling per rendition; the listing fetcher's lower setting wins
pub const DEFAULT_THUMBNAIL_RETRIES: u32 = 2;

/// Why one item produced no thumbnail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadFailure {
    UnsupportedMimeType,
    MissingBaseUrl,
    Http { status: u16 },
    Network { message: String },
    Auth { message: String },
}

impl DownloadFailure {
    pub fn code(&self) -> String {
        match self {
            DownloadFailure::UnsupportedMimeType => "unsupported_mime_type".to_string(),
            DownloadFailure::MissingBaseUrl => "missing_base_url".to_string(),
            DownloadFailure::Http { status } => format!("download_failed_{}", status),
            DownloadFailure::Network { .. } => "network_error".to_string(),
            DownloadFailure::Auth { .. } => "auth_error".to_string(),
        }
    }

    fn from_fetch_error(error: &FetchError) -> Self {
        match error {
            FetchError::Network { message, .. } => DownloadFailure::Network {
                message: message.clone(),
            },
            FetchError::InvalidJson(message) => DownloadFailure::Network {
                message: message.clone(),
            },
            FetchError::RateLimited { status, .. }
            | FetchError::Server { status, .. }
            | FetchError::Client { status, .. } => DownloadFailure::Http { status: *status },
            FetchError::Unauthorized { .. } => DownloadFailure::Http { status: 401 },
            FetchError::Token(err) => DownloadFailure::Auth {
                message: err.to_string(),
            },
        }
    }
}

/// A downloaded rendition
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub item_id: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub elapsed: Duration,
}

impl Thumbnail {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

#[derive(Debug, Clone)]
pub enum DownloadOutcome {
    Success(Thumbnail),
    Failure {
        item_id: String,
        failure: DownloadFailure,
    },
}

impl DownloadOutcome {
    pub fn item_id(&self) -> &str {
        match self {
            DownloadOutcome::Success(thumbnail) => &thumbnail.item_id,
            DownloadOutcome::Failure { item_id, .. } => item_id,
        }
    }
}

/// Download counters for the run report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadMetrics {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub bytes: u64,
    /// Sum of per-download wall time across workers
    pub download_ms: u64,
}

/// Outcomes in input order plus aggregated metrics
#[derive(Debug)]
pub struct DownloadBatch {
    pub outcomes: Vec<DownloadOutcome>,
    pub metrics: DownloadMetrics,
    pub requests: RequestMetrics,
}

impl DownloadBatch {
    pub fn thumbnails(&self) -> impl Iterator<Item = &Thumbnail> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            DownloadOutcome::Success(thumbnail) => Some(thumbnail),
            DownloadOutcome::Failure { .. } => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &DownloadFailure)> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            DownloadOutcome::Failure { item_id, failure } => Some((item_id.as_str(), failure)),
            DownloadOutcome::Success(_) => None,
        })
    }
}

struct Task {
    index: usize,
    item_id: String,
    mime_type: String,
    url: String,
}

/// Rendition URL for an item, or the reason it cannot be downloaded
pub fn rendition_url(item: &MediaItemRecord) -> Result<String, DownloadFailure> {
    if !item.is_image() {
        return Err(DownloadFailure::UnsupportedMimeType);
    }
    match item.content_url.as_deref() {
        Some(url) if !url.is_empty() => Ok(format!("{}{}", url, RENDITION_SUFFIX)),
        _ => Err(DownloadFailure::MissingBaseUrl),
    }
}

/// Fixed-size download pool
pub struct ThumbnailFetcher {
    workers: usize,
    max_retries: u32,
    events: EventSender,
}

impl ThumbnailFetcher {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            max_retries: DEFAULT_THUMBNAIL_RETRIES,
            events: null_sender(),
        }
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = events;
        self
    }

    /// Download renditions for `items`.
    ///
    /// `make_tokens` is called once per worker to give each thread its own
    /// token provider.
    pub fn fetch_all<F, P>(&self, items: &[MediaItemRecord], fetcher: &mut ResilientFetcher, make_tokens: F) -> DownloadBatch
    where
        F: Fn() -> P + Sync,
        P: TokenProvider,
    {
        let mut slots: Vec<Option<DownloadOutcome>> = vec![None; items.len()];
        let mut tasks = Vec::new();
        for (index, item) in items.iter().enumerate() {
            match rendition_url(item) {
                Ok(url) => tasks.push(Task {
                    index,
                    item_id: item.id.clone(),
                    mime_type: item.mime_type.clone().unwrap_or_default(),
                    url,
                }),
                Err(failure) => {
                    debug!(item = %item.id, code = %failure.code(), "skipping download");
                    slots[index] = Some(DownloadOutcome::Failure {
                        item_id: item.id.clone(),
                        failure,
                    });
                }
            }
        }

        let total = items.len();
        let workers = self.workers.min(tasks.len()).max(1);
        info!(total, downloads = tasks.len(), workers, "downloading thumbnails");
        self.events.send(Event::Download(DownloadEvent::Started { total }));

        let mut metrics = DownloadMetrics {
            attempted: tasks.len(),
            ..Default::default()
        };
        let mut requests = RequestMetrics::new();
        let mut completed = total - tasks.len();
        let mut failed = completed;
        for outcome in slots.iter().flatten() {
            if let DownloadOutcome::Failure { item_id, failure } = outcome {
                self.events.send(Event::Download(DownloadEvent::Failed {
                    item_id: item_id.clone(),
                    code: failure.code(),
                }));
            }
        }

        let retries = self.max_retries.min(fetcher.max_retries());
        let forks: Vec<ResilientFetcher> = (0..workers)
            .map(|_| fetcher.fork().with_max_retries(retries))
            .collect();
        let (task_tx, task_rx) = bounded::<Task>(workers);
        let (result_tx, result_rx) = unbounded::<(usize, DownloadOutcome)>();

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            for mut worker_fetcher in forks {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                let make_tokens = &make_tokens;
                handles.push(scope.spawn(move || {
                    let mut tokens = make_tokens();
                    let mut worker_requests = RequestMetrics::new();
                    for task in task_rx.iter() {
                        let outcome = download(&mut worker_fetcher, &mut tokens, &mut worker_requests, &task);
                        if result_tx.send((task.index, outcome)).is_err() {
                            break;
                        }
                    }
                    worker_requests
                }));
            }
            drop(task_rx);
            drop(result_tx);

            // Producer: blocks once every worker is busy and the queue is full
            scope.spawn(move || {
                for task in tasks {
                    if task_tx.send(task).is_err() {
                        break;
                    }
                }
            });

            for (index, outcome) in result_rx.iter() {
                completed += 1;
                match &outcome {
                    DownloadOutcome::Success(thumbnail) => {
                        metrics.succeeded += 1;
                        metrics.bytes += thumbnail.size() as u64;
                        metrics.download_ms += thumbnail.elapsed.as_millis() as u64;
                    }
                    DownloadOutcome::Failure { item_id, failure } => {
                        failed += 1;
                        metrics.failed += 1;
                        warn!(item = %item_id, code = %failure.code(), "thumbnail download failed");
                        self.events.send(Event::Download(DownloadEvent::Failed {
                            item_id: item_id.clone(),
                            code: failure.code(),
                        }));
                    }
                }
                self.events.send(Event::Download(DownloadEvent::Progress(DownloadProgress {
                    completed,
                    total,
                    failed,
                })));
                slots[index] = Some(outcome);
            }

            for handle in handles {
                match handle.join() {
                    Ok(worker_requests) => requests.merge(&worker_requests),
                    Err(_) => warn!("download worker panicked"),
                }
            }
        });

        let outcomes: Vec<DownloadOutcome> = slots.into_iter().flatten().collect();
        self.events.send(Event::Download(DownloadEvent::Completed {
            succeeded: metrics.succeeded,
            failed: outcomes.len() - metrics.succeeded,
            bytes: metrics.bytes,
        }));
        DownloadBatch {
            outcomes,
            metrics,
            requests,
        }
    }
}

impl Default for ThumbnailFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

fn download<P: TokenProvider>(
    fetcher: &mut ResilientFetcher,
    tokens: &mut P,
    metrics: &mut RequestMetrics,
    task: &Task,
) -> DownloadOutcome {
    let request = HttpRequest::get(task.url.clone()).header("Range", RANGE_HEADER);
    let started = Instant::now();
    match fetcher.request(&request, tokens, metrics) {
        Ok(response) => DownloadOutcome::Success(Thumbnail {
            item_id: task.item_id.clone(),
            mime_type: task.mime_type.clone(),
            bytes: response.body,
            elapsed: started.elapsed(),
        }),
        Err(error) => DownloadOutcome::Failure {
            item_id: task.item_id.clone(),
            failure: DownloadFailure::from_fetch_error(&error),
        },
    }
}
