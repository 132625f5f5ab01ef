//! # Reporter Module
//!
//! Writes the artifacts a run leaves behind.
//!
//! ## Artifacts
//! | File | Content |
//! |------|---------|
//! | `<run_id>-run.json` | The run record: limits, metrics, completeness, similarity summary |
//! | `<run_id>-pairs.ndjson` | Similarity pairs, all of them for small runs, else the top-N |
//!
//! The items stream (`-items.ndjson`) is written by the pagination driver as
//! pages arrive.

mod export;
mod run_report;

pub use export::{export_pairs, pairs_to_export};
pub use run_report::write_run_report;
