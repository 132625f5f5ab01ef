//! Similarity pairs export.
//!
//! One `{id_a, id_b, hamming_distance, similarity_percent}` object per line.

use crate::core::comparator::{ClusterOutcome, SimilarityPair};
use crate::core::pagination::NdjsonSink;
use crate::error::StorageError;
use std::path::Path;

/// Pairs worth writing: every pair for small runs, otherwise only the top-N
pub fn pairs_to_export(outcome: &ClusterOutcome, fingerprinted: usize, write_all_limit: usize) -> &[SimilarityPair] {
    if fingerprinted <= write_all_limit {
        &outcome.pairs
    } else {
        &outcome.top_pairs
    }
}

/// Write `pairs` as NDJSON, returning the number of lines written
pub fn export_pairs(path: &Path, pairs: &[SimilarityPair]) -> Result<usize, StorageError> {
    let mut sink = NdjsonSink::create(path)?;
    for pair in pairs {
        sink.append(pair)?;
    }
    sink.flush()?;
    Ok(sink.lines_written())
}
