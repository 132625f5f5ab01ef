//! # Core Module
//!
//! The UI-agnostic scanning engine.
//!
//! ## Modules
//! - `config` - Client credentials, tiers and scan configuration
//! - `auth` - OAuth authorization and encrypted token storage
//! - `fetcher` - HTTP with retry, backoff and refresh-on-401
//! - `pagination` - Cursor-driven listing and picker sessions, with termination policies
//! - `probe` - Range-request checks of sampled content URLs
//! - `thumbnails` - Bounded-concurrency rendition downloads
//! - `hasher` - Image decoding and dHash fingerprints
//! - `comparator` - Pairwise similarity and transitive clustering
//! - `pipeline` - Orchestrates a full run
//! - `reporter` - Run record and pairs export

pub mod auth;
pub mod comparator;
pub mod config;
pub mod fetcher;
pub mod hasher;
pub mod pagination;
pub mod pipeline;
pub mod probe;
pub mod reporter;
pub mod thumbnails;

// Re-export commonly used types
pub use comparator::{Cluster, SimilarityClusterer, SimilarityPair};
pub use hasher::{Fingerprint, PerceptualHasher};
pub use pagination::{MediaItemRecord, PaginationDriver, TerminationReason};
pub use pipeline::{ScanPipeline, ScanRun};
