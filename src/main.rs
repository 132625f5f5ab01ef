//! # photo-scan CLI
//!
//! Command-line interface for the photo library scanner.
//!
//! ## Usage
//! ```bash
//! photo-scan auth --token-id personal
//! photo-scan scan --tier small --token-id personal
//! ```

mod cli;

use console::style;
use std::process::ExitCode;

fn main() -> ExitCode {
    photo_library_scan::init_tracing();

    match cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {}", style("error:").red().bold(), err);
            ExitCode::FAILURE
        }
    }
}
