//! Pipeline execution implementation.

use super::record::{build_run_id, ScanRun};
use super::similarity::SimilarityStage;
use crate::core::auth::CredentialStore;
use crate::core::config::ScanConfig;
use crate::core::auth::IdentityTokens;
use crate::core::fetcher::{RequestMetrics, ResilientFetcher};
use crate::core::pagination::{
    ListingMode, MediaLibrarySource, NdjsonSink, PaginationDriver, PickerSource, PollOutcome, PollingSummary,
    ReservoirSampler,
};
use crate::core::probe::UrlProber;
use crate::error::{Result, StorageError};
use crate::events::{null_sender, Event, EventSender, ListingEvent, PipelineEvent, PipelinePhase};
use chrono::{DateTime, Utc};
use std::fs;
use tracing::{error, info, warn};

/// Listing followed by the similarity stage, with the run record persisted
/// however the run ends.
pub struct ScanPipeline<'a> {
    config: ScanConfig,
    store: &'a CredentialStore,
    fetcher: ResilientFetcher,
    events: EventSender,
    clock: fn() -> DateTime<Utc>,
}

impl<'a> ScanPipeline<'a> {
    pub fn new(config: ScanConfig, store: &'a CredentialStore, fetcher: ResilientFetcher) -> Self {
        Self {
            config,
            store,
            fetcher,
            events: null_sender(),
            clock: Utc::now,
        }
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = events;
        self
    }

    /// Replace the wall clock used for run ids and timestamps
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Run the scan.
    ///
    /// On error the run record still carries the error, the termination
    /// reason and whatever the finished stages produced; it is written before
    /// the error is returned.
    pub fn run(mut self) -> Result<ScanRun> {
        let now = (self.clock)();
        let run_id = build_run_id(&self.config.tier.name, self.config.output_prefix.as_deref(), now);
        let mode = self.config.listing_mode();
        let mut run = ScanRun::new(run_id, &self.config, mode, now);

        info!(run_id = %run.run_id, tier = %run.tier, mode = mode.as_str(), "scan started");
        self.events.send(Event::Pipeline(PipelineEvent::Started {
            run_id: run.run_id.clone(),
        }));

        let mut stage = PipelinePhase::Listing;
        let result = self.execute(&mut run, &mut stage);

        if let Err(err) = &result {
            error!(stage = %stage, error = %err, "scan failed");
            run.fail(stage, err);
            self.events.send(Event::Pipeline(PipelineEvent::Error {
                message: format!("{} stage failed: {}", stage, err),
            }));
        }

        run.finalize((self.clock)());
        let persisted = run.persist();

        match (result, persisted) {
            (Ok(()), Ok(())) => {
                info!(
                    run_id = %run.run_id,
                    path = %run.paths().run_json.display(),
                    "run record written"
                );
                self.events.send(Event::Pipeline(PipelineEvent::Completed {
                    summary: run.summary(),
                }));
                Ok(run)
            }
            (Ok(()), Err(err)) => Err(err.into()),
            (Err(err), persisted) => {
                if let Err(write_err) = persisted {
                    warn!(error = %write_err, "run record could not be written after failure");
                }
                Err(err)
            }
        }
    }

    fn execute(&mut self, run: &mut ScanRun, stage: &mut PipelinePhase) -> Result<()> {
        let paths = run.paths().clone();
        fs::create_dir_all(&self.config.runs_dir).map_err(|e| StorageError::io(&self.config.runs_dir, e))?;

        // Listing
        *stage = PipelinePhase::Listing;
        self.events.send(Event::Pipeline(PipelineEvent::PhaseChanged { phase: *stage }));

        let items = NdjsonSink::create(&paths.items)?;
        let baseline = if self.config.save_baseline {
            Some(NdjsonSink::create(&paths.baseline)?)
        } else {
            None
        };
        let mut driver = PaginationDriver::new(
            self.config.tier.clone(),
            items,
            ReservoirSampler::new(self.config.sample_size),
        )
        .with_baseline(baseline)
        .with_url_sample_limit(self.config.url_sample_limit)
        .with_events(self.events.clone());

        let identity = self.config.identity.as_str();
        let tokens = self.store.tokens_for(identity);
        let mut metrics = RequestMetrics::new();
        let (mut fetcher, listed) = match self.config.listing_mode() {
            ListingMode::Picker => {
                let mut source = PickerSource::new(
                    self.fetcher.fork(),
                    tokens,
                    self.store.client().picker_api_base.clone(),
                    self.config.page_size,
                );
                if !self.await_selection(&mut source, run)? {
                    run.complete_listing(&driver.finish(), &metrics, (self.clock)());
                    return Ok(());
                }
                run.listing_started((self.clock)());
                let listed = driver.run(&mut source, &mut metrics);
                (source.into_parts().0, listed)
            }
            ListingMode::List | ListingMode::Search => {
                let mut source = MediaLibrarySource::new(
                    self.fetcher.fork(),
                    tokens,
                    self.store.client().api_base.clone(),
                    self.config.page_size,
                )
                .with_date_filter(self.config.date_filter);
                run.listing_started((self.clock)());
                let listed = driver.run(&mut source, &mut metrics);
                (source.into_parts().0, listed)
            }
        };
        if listed.is_err() {
            warn!(items = driver.items_emitted(), "listing aborted after persisting partial progress");
        }
        let outcome = driver.finish();
        run.complete_listing(&outcome, &metrics, (self.clock)());
        listed?;

        if self.config.probe_urls {
            run.complete_probe(UrlProber::new(fetcher.transport()).probe(&outcome.url_sample));
        }

        if self.config.skip_similarity {
            info!("similarity stage disabled");
            return Ok(());
        }

        // Downloading, hashing and clustering report their own phase changes
        *stage = PipelinePhase::Downloading;
        let similarity = SimilarityStage::from_config(&self.config).with_events(self.events.clone());
        let summary = similarity.run(
            &outcome.sample,
            &mut fetcher,
            || self.store.tokens_for(identity),
            &paths.pairs,
        )?;
        run.complete_similarity(summary);

        *stage = PipelinePhase::Reporting;
        self.events.send(Event::Pipeline(PipelineEvent::PhaseChanged { phase: *stage }));
        Ok(())
    }

    /// Create a picker session and poll it. `false` when the poll timed out;
    /// the run record then carries `poll_timeout`.
    fn await_selection(&self, source: &mut PickerSource<IdentityTokens<'_>>, run: &mut ScanRun) -> Result<bool> {
        let mut session_metrics = RequestMetrics::new();
        let mut session = source.create_session(self.config.tier.max_items, &mut session_metrics)?;
        self.events.send(Event::Listing(ListingEvent::SessionCreated {
            picker_uri: session.picker_uri.clone(),
        }));

        let mut polling = PollingSummary::default();
        let outcome = if session.media_items_set {
            PollOutcome::Ready
        } else {
            source.poll_until_set(&mut session, self.config.tier.poll_timeout(), &mut polling, &mut session_metrics)
        };
        run.auth.token_refresh_events += session_metrics.token_refresh_events;

        let timed_out = outcome == PollOutcome::TimedOut;
        if timed_out {
            self.events.send(Event::Listing(ListingEvent::Terminated {
                reason: "poll_timeout".to_string(),
                total_items: 0,
            }));
        }
        run.complete_polling(session, polling, timed_out, self.config.tier.poll_timeout_ms);
        Ok(!timed_out)
    }
}
