//! # CLI Module
//!
//! Command-line interface for the photo library scanner.
//!
//! ## Usage
//! ```bash
//! # Authorize an identity once (opens a local callback listener)
//! photo-scan auth --token-id personal
//!
//! # Small diagnostic scan
//! photo-scan scan --tier test --token-id personal
//!
//! # Search a date range, keep a baseline id file
//! photo-scan scan --tier medium --search-since 2024-01-01 --save-baseline
//!
//! # Listing only, machine-readable output
//! photo-scan scan --tier small --skip-similarity --output json
//! ```
//!
//! `CLIENT_ID`, `CLIENT_SECRET` and `REDIRECT_URI` must be set; `TOKEN_PASSWORD`
//! skips the passphrase prompt.

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use photo_library_scan::core::auth::{default_token_dir, Authorization, CredentialStore};
use photo_library_scan::core::config::{ClientConfig, DateFilter, ScanConfig, TierConfig};
use photo_library_scan::core::fetcher::{ResilientFetcher, UreqTransport};
use photo_library_scan::core::pipeline::{ScanPipeline, ScanRun};
use photo_library_scan::error::{Result, StorageError};
use photo_library_scan::events::{DownloadEvent, Event, EventChannel, ListingEvent, PipelineEvent, SimilarityEvent};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

/// Photo Library Scan - sample a remote library and find near-duplicates
#[derive(Parser, Debug)]
#[command(name = "photo-scan")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Authorize an identity and store its encrypted tokens
    Auth {
        /// Identity whose tokens are stored
        #[arg(long, default_value = "default")]
        token_id: String,

        /// Directory holding encrypted token files
        #[arg(long)]
        token_dir: Option<PathBuf>,

        /// Run the consent flow even when tokens are already stored
        #[arg(long)]
        force: bool,
    },

    /// List the library, sample thumbnails and cluster near-duplicates
    Scan {
        /// Scan tier: test, small, medium or large
        #[arg(short, long, default_value = "test")]
        tier: String,

        /// Override the tier's item cap
        #[arg(long)]
        max_items: Option<usize>,

        /// Override the tier's page ceiling
        #[arg(long)]
        max_pages: Option<usize>,

        /// Override the consecutive empty page limit
        #[arg(long)]
        empty_page_limit: Option<usize>,

        /// Identity whose tokens are used
        #[arg(long, default_value = "default")]
        token_id: String,

        /// Directory holding encrypted token files
        #[arg(long)]
        token_dir: Option<PathBuf>,

        /// Prefix for the run id and artifact names
        #[arg(long)]
        output_prefix: Option<String>,

        /// Directory receiving run artifacts
        #[arg(long, default_value = "runs")]
        runs_dir: PathBuf,

        /// Search items created since this date (YYYY-MM-DD)
        #[arg(long, conflicts_with = "picker")]
        search_since: Option<String>,

        /// List only the items picked in a new picker session
        #[arg(long)]
        picker: bool,

        /// Check each sampled content URL with a one-byte range request
        #[arg(long)]
        probe_urls: bool,

        /// Number of items sampled for thumbnails
        #[arg(long, default_value = "25")]
        sample_size: usize,

        /// Similarity threshold in percent (0-100)
        #[arg(long, default_value = "70")]
        threshold: u32,

        /// Report single-member clusters too
        #[arg(long)]
        keep_singletons: bool,

        /// Also write `{id, createdAt}` per item
        #[arg(long)]
        save_baseline: bool,

        /// Stop after listing
        #[arg(long)]
        skip_similarity: bool,

        /// Output format
        #[arg(short, long, default_value = "pretty")]
        output: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable output with colors
    Pretty,
    /// The run record as JSON
    Json,
}

/// Run the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Auth {
            token_id,
            token_dir,
            force,
        } => run_auth(token_id, token_dir, force),
        Commands::Scan {
            tier,
            max_items,
            max_pages,
            empty_page_limit,
            token_id,
            token_dir,
            output_prefix,
            runs_dir,
            search_since,
            picker,
            probe_urls,
            sample_size,
            threshold,
            keep_singletons,
            save_baseline,
            skip_similarity,
            output,
        } => {
            let tier = TierConfig::named(&tier)?.with_overrides(max_items, max_pages, empty_page_limit)?;
            let date_filter = search_since
                .map(|since| DateFilter::since(&since, Utc::now().date_naive()))
                .transpose()?;
            let config = ScanConfig::builder()
                .tier(tier)
                .identity(token_id)
                .output_prefix(output_prefix)
                .runs_dir(runs_dir)
                .sample_size(sample_size)
                .similarity_threshold(threshold)
                .keep_singletons(keep_singletons)
                .date_filter(date_filter)
                .picker(picker)
                .probe_urls(probe_urls)
                .save_baseline(save_baseline)
                .skip_similarity(skip_similarity)
                .build()?;
            run_scan(config, token_dir, output)
        }
    }
}

fn open_store(token_dir: Option<PathBuf>, transport: Arc<UreqTransport>) -> Result<CredentialStore> {
    let client = ClientConfig::from_env()?;
    Ok(CredentialStore::new(
        token_dir.unwrap_or_else(default_token_dir),
        client,
        transport,
    ))
}

fn run_auth(token_id: String, token_dir: Option<PathBuf>, force: bool) -> Result<()> {
    let term = Term::stderr();
    let store = open_store(token_dir, Arc::new(UreqTransport::default()))?;

    let show_url = |url: &str| {
        term.write_line(&format!("{}", style("Open this URL to authorize:").bold())).ok();
        term.write_line(url).ok();
        term.write_line(&format!("{}", style("Waiting for the callback...").dim())).ok();
    };
    let outcome = if force {
        store.reauthorize(&token_id, show_url)?
    } else {
        store.authorize(&token_id, show_url)?
    };

    let message = match outcome {
        Authorization::Existing => "already stored in",
        Authorization::Completed => "stored in",
    };
    term.write_line(&format!(
        "{} Tokens for {} {} {}",
        style("✓").green().bold(),
        style(&token_id).cyan(),
        message,
        store.dir().display()
    ))
    .ok();
    if outcome == Authorization::Existing {
        term.write_line(&format!("{}", style("Pass --force to authorize again").dim())).ok();
    }
    Ok(())
}

fn run_scan(config: ScanConfig, token_dir: Option<PathBuf>, output: OutputFormat) -> Result<()> {
    let term = Term::stderr();
    let transport = Arc::new(UreqTransport::default());
    let store = open_store(token_dir, Arc::clone(&transport))?;
    let fetcher = ResilientFetcher::new(transport);

    if matches!(output, OutputFormat::Pretty) {
        term.write_line(&format!(
            "{} {}",
            style("Photo Library Scan").bold().cyan(),
            style(format!("v{}", env!("CARGO_PKG_VERSION"))).dim()
        ))
        .ok();
        term.write_line("").ok();
    }

    let (sender, receiver) = EventChannel::new();

    let progress = if matches!(output, OutputFormat::Pretty) {
        let pb = ProgressBar::new(config.tier.max_items as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓░"),
        );
        Some(pb)
    } else {
        None
    };

    let progress_clone = progress.clone();

    // Render events on a separate thread
    let event_thread = thread::spawn(move || {
        let Some(pb) = progress_clone else {
            // The picker URL is needed even when stdout carries JSON
            for event in receiver.iter() {
                if let Event::Listing(ListingEvent::SessionCreated { picker_uri }) = event {
                    Term::stderr()
                        .write_line(&format!("Open picker URL: {}", picker_uri.unwrap_or_default()))
                        .ok();
                }
            }
            return;
        };
        for event in receiver.iter() {
            match event {
                Event::Listing(ListingEvent::SessionCreated { picker_uri }) => {
                    pb.println(format!(
                        "  {} {}",
                        style("Open picker URL:").bold(),
                        picker_uri.unwrap_or_default()
                    ));
                    pb.set_message("Waiting for the selection...");
                }
                Event::Pipeline(PipelineEvent::PhaseChanged { phase }) => {
                    pb.set_message(format!("{}", phase));
                }
                Event::Listing(ListingEvent::Page(p)) => {
                    pb.set_position(p.total_items as u64);
                    pb.set_message(format!("Listing page {}", p.page));
                }
                Event::Listing(ListingEvent::Terminated { reason, total_items }) => {
                    pb.println(format!("  listed {} items ({})", total_items, reason));
                }
                Event::Download(DownloadEvent::Started { total }) => {
                    pb.set_length(total as u64);
                    pb.set_position(0);
                }
                Event::Download(DownloadEvent::Progress(p)) => {
                    pb.set_position(p.completed as u64);
                    pb.set_message(format!("Downloading ({} failed)", p.failed));
                }
                Event::Similarity(SimilarityEvent::Skipped { reason }) => {
                    pb.println(format!("  clustering skipped: {}", reason));
                }
                Event::Pipeline(PipelineEvent::Completed { .. }) | Event::Pipeline(PipelineEvent::Error { .. }) => {
                    pb.finish_and_clear();
                }
                _ => {}
            }
        }
    });

    let result = ScanPipeline::new(config, &store, fetcher)
        .with_events(sender)
        .run();

    // The pipeline owned the sender; the event thread ends once it is dropped
    event_thread.join().ok();
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    let run = result?;
    match output {
        OutputFormat::Pretty => print_pretty_results(&term, &run),
        OutputFormat::Json => print_json_results(&run)?,
    }
    Ok(())
}

fn print_pretty_results(term: &Term, run: &ScanRun) {
    term.write_line(&format!("{} Scan Complete", style("✓").green().bold())).ok();
    term.write_line("").ok();

    term.write_line(&format!(
        "  {} items listed in {:.1}s ({} requests, {:.2} items/request)",
        style(run.listing.total_items_seen).cyan(),
        run.wall_clock_time_seconds.unwrap_or_default(),
        run.request_metrics.total_requests,
        run.avg_items_per_request
    ))
    .ok();
    if let Some(reason) = run.termination_reason {
        term.write_line(&format!("  stopped: {}", style(reason).yellow())).ok();
    }
    if run.request_metrics.retry_count > 0 {
        term.write_line(&format!(
            "  {} retries, {:.1}s backoff",
            style(run.request_metrics.retry_count).dim(),
            run.request_metrics.total_backoff_wait_seconds
        ))
        .ok();
    }

    if let Some(polling) = &run.polling {
        term.write_line(&format!(
            "  {} session polls, {} errors",
            style(polling.poll_requests_count).dim(),
            polling.errors.len()
        ))
        .ok();
    }
    if let Some(probe) = &run.url_probe {
        term.write_line(&format!(
            "  {}/{} sampled URLs reachable, {}ms average",
            style(probe.success_count).cyan(),
            probe.sample_size,
            probe.avg_latency_ms
        ))
        .ok();
    }

    if let Some(similarity) = &run.similarity {
        term.write_line("").ok();
        match similarity.skip_reason {
            Some(reason) => {
                term.write_line(&format!("  similarity skipped: {}", style(reason.as_str()).yellow())).ok();
            }
            None => {
                term.write_line(&format!(
                    "  {} fingerprints, {} pairs, {} clusters",
                    style(similarity.items_hashed).cyan(),
                    similarity.pairs_evaluated,
                    style(similarity.clusters.len()).cyan()
                ))
                .ok();
                for (i, cluster) in similarity.clusters.iter().enumerate() {
                    term.write_line(&format!(
                        "    {} {} members, representative {}",
                        style(format!("Cluster {}:", i + 1)).bold(),
                        cluster.members.len(),
                        style(&cluster.representative_id).green()
                    ))
                    .ok();
                }
            }
        }
        if !similarity.failures.is_empty() {
            term.write_line(&format!(
                "  {} items could not be fingerprinted",
                style(similarity.failures.len()).dim()
            ))
            .ok();
        }
    }

    term.write_line("").ok();
    term.write_line(&format!(
        "{}",
        style(format!("Run record: {}", run.paths().run_json.display())).dim()
    ))
    .ok();
}

fn print_json_results(run: &ScanRun) -> Result<()> {
    let json = serde_json::to_string_pretty(run).map_err(|e| StorageError::Serialize {
        what: "run record".to_string(),
        reason: e.to_string(),
    })?;
    println!("{}", json);
    Ok(())
}
