//! # Photo Library Scan
//!
//! Scans a remote photo library that is large, rate limited and occasionally
//! misbehaving, then looks for near-duplicate images in a sample of it.
//!
//! ## What a run does
//! - Authorizes with OAuth + PKCE and keeps tokens encrypted at rest
//! - Pages through the library, or a user-picked selection, with retry, backoff
//!   and several stop conditions
//! - Streams every normalized item to NDJSON as pages arrive
//! - Downloads a bounded sample of thumbnails through a fixed worker pool
//! - Fingerprints them with a 64-bit difference hash and clusters near-duplicates
//! - Writes a run record on every exit path, errors included
//!
//! ## Architecture
//! - `core` - The scanning engine
//! - `events` - Event-driven progress reporting
//! - `error` - Error taxonomy, one enum per stage

pub mod core;
pub mod error;
pub mod events;

// Re-export commonly used types at the crate root
pub use error::{Result, ScanError};

/// Initialize tracing for the library
///
/// This should be called by the application entry point. Filtering follows
/// `RUST_LOG`.
pub fn init_tracing() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set global default tracing subscriber");
}
