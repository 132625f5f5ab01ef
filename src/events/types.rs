//! Event type definitions for progress reporting.

use serde::{Deserialize, Serialize};

/// All events emitted by a scan run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// Paginated listing events
    Listing(ListingEvent),
    /// Thumbnail download events
    Download(DownloadEvent),
    /// Fingerprinting and clustering events
    Similarity(SimilarityEvent),
    /// Pipeline-level events
    Pipeline(PipelineEvent),
}

/// Events during the listing phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ListingEvent {
    /// A picker session is waiting for the user's selection
    SessionCreated { picker_uri: Option<String> },
    /// Listing has started
    Started { tier: String, max_items: usize },
    /// A page was received and persisted
    Page(ListingProgress),
    /// Listing stopped
    Terminated { reason: String, total_items: usize },
}

/// Progress information after each page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingProgress {
    /// 1-based page number
    pub page: usize,
    pub items_on_page: usize,
    /// Items persisted so far in this run
    pub total_items: usize,
    pub max_items: usize,
    pub has_next_token: bool,
}

/// Events during thumbnail downloads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DownloadEvent {
    Started { total: usize },
    Progress(DownloadProgress),
    /// A single item failed; the batch continues
    Failed { item_id: String, code: String },
    Completed {
        succeeded: usize,
        failed: usize,
        bytes: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub completed: usize,
    pub total: usize,
    pub failed: usize,
}

/// Events during fingerprinting and clustering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SimilarityEvent {
    Started { fingerprints: usize },
    /// Clustering was not attempted
    Skipped { reason: String },
    ClusterFound {
        cluster_id: String,
        member_count: usize,
    },
    Completed {
        pairs_evaluated: usize,
        clusters: usize,
    },
}

/// Pipeline-level events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    Started { run_id: String },
    /// Moving to a new phase
    PhaseChanged { phase: PipelinePhase },
    Completed { summary: RunSummary },
    /// Run aborted; the run record is still written
    Error { message: String },
}

/// Phases of a scan run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelinePhase {
    Listing,
    Downloading,
    Hashing,
    Clustering,
    Reporting,
}

/// Summary of a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub items_listed: usize,
    pub termination_reason: String,
    pub fingerprints: usize,
    pub clusters: usize,
    pub duration_ms: u64,
}

impl std::fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelinePhase::Listing => write!(f, "Listing"),
            PipelinePhase::Downloading => write!(f, "Downloading"),
            PipelinePhase::Hashing => write!(f, "Hashing"),
            PipelinePhase::Clustering => write!(f, "Clustering"),
            PipelinePhase::Reporting => write!(f, "Reporting"),
        }
    }
}
