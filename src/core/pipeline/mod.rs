//! # Pipeline Module
//!
//! Orchestrates a full scan run.
//!
//! ## Pipeline Stages
//! 1. **Listing** - Page through the library, streaming items to NDJSON
//! 2. **Downloading** - Fetch thumbnails for the reservoir sample
//! 3. **Hashing** - Decode and fingerprint thumbnails (rayon)
//! 4. **Clustering** - Compare fingerprints and group near-duplicates
//! 5. **Reporting** - Write the run record
//!
//! The [`ScanRun`] record is owned by the orchestrator for the whole run and
//! updated through stage-completion calls. It is finalized and written on
//! every exit path, including errors.

mod executor;
mod record;
mod similarity;

pub use executor::ScanPipeline;
pub use record::{
    build_run_id, AuthSummary, ListingSummary, QuotaAnalysis, RunArtifacts, RunError, RunPaths, ScanRun,
    DAILY_QUOTA_REQUESTS,
};
pub use similarity::{ItemFailure, SimilarityStage, SimilaritySummary, SkipReason, StageTiming, IMAGE_SIZE};
