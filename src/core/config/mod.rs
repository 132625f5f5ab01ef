//! # Config Module
//!
//! Client credentials from the environment, tier limits, and the scan
//! configuration builder.

use crate::core::pagination::ListingMode;
use crate::error::ConfigError;
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use zeroize::Zeroizing;

pub const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
pub const API_BASE: &str = "https://photoslibrary.googleapis.com/v1";
pub const PICKER_API_BASE: &str = "https://photospicker.googleapis.com/v1";
pub const OAUTH_SCOPE: &str = "https://www.googleapis.com/auth/photoslibrary.readonly";

/// OAuth client registration and remote endpoints
#[derive(Clone)]
pub struct ClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub auth_endpoint: String,
    pub token_endpoint: String,
    pub api_base: String,
    /// Root of the picker session API
    pub picker_api_base: String,
    pub scope: String,
    /// Passphrase supplied through the environment, if any
    pub passphrase: Option<Zeroizing<String>>,
}

impl ClientConfig {
    /// Read `CLIENT_ID`, `CLIENT_SECRET`, `REDIRECT_URI` and the optional
    /// `TOKEN_PASSWORD` from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnv {
                    name: name.to_string(),
                })
        };

        Ok(Self {
            client_id: require("CLIENT_ID")?,
            client_secret: require("CLIENT_SECRET")?,
            redirect_uri: require("REDIRECT_URI")?,
            auth_endpoint: AUTH_ENDPOINT.to_string(),
            token_endpoint: TOKEN_ENDPOINT.to_string(),
            api_base: API_BASE.to_string(),
            picker_api_base: PICKER_API_BASE.to_string(),
            scope: OAUTH_SCOPE.to_string(),
            passphrase: lookup("TOKEN_PASSWORD")
                .filter(|value| !value.is_empty())
                .map(Zeroizing::new),
        })
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("api_base", &self.api_base)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "[set]"))
            .finish()
    }
}

pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 5 * 60 * 1000;

/// Limits attached to a named scan tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierConfig {
    pub name: String,
    /// Stop once this many items have been emitted
    pub max_items: usize,
    /// Hard ceiling on pages fetched
    pub max_pages: usize,
    /// Consecutive empty pages tolerated before stopping
    pub empty_page_limit: usize,
    /// How long a picker session is polled before giving up
    pub poll_timeout_ms: u64,
}

impl TierConfig {
    /// Look up a tier by name. Every tier polls picker sessions for up to
    /// five minutes.
    ///
    /// | Tier   | Items  | Pages | Empty pages |
    /// |--------|--------|-------|-------------|
    /// | test   | 10     | 5     | 3           |
    /// | small  | 200    | 50    | 20          |
    /// | medium | 10000  | 500   | 20          |
    /// | large  | 50000  | 2000  | 20          |
    pub fn named(tier: &str) -> Result<Self, ConfigError> {
        let (max_items, max_pages, empty_page_limit) = match tier {
            "test" => (10, 5, 3),
            "small" => (200, 50, 20),
            "medium" => (10_000, 500, 20),
            "large" => (50_000, 2_000, 20),
            other => {
                return Err(ConfigError::UnknownTier {
                    tier: other.to_string(),
                })
            }
        };
        Ok(Self {
            name: tier.to_string(),
            max_items,
            max_pages,
            empty_page_limit,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
        })
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Apply command-line overrides
    pub fn with_overrides(
        mut self,
        max_items: Option<usize>,
        max_pages: Option<usize>,
        empty_page_limit: Option<usize>,
    ) -> Result<Self, ConfigError> {
        if let Some(value) = max_items {
            self.max_items = positive("max_items", value)?;
        }
        if let Some(value) = max_pages {
            self.max_pages = positive("max_pages", value)?;
        }
        if let Some(value) = empty_page_limit {
            self.empty_page_limit = positive("empty_page_limit", value)?;
        }
        Ok(self)
    }
}

fn positive(field: &str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

/// Inclusive creation-date range for search mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateFilter {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateFilter {
    /// Range from `since` (YYYY-MM-DD) up to `today`
    pub fn since(since: &str, today: NaiveDate) -> Result<Self, ConfigError> {
        let start = NaiveDate::parse_from_str(since.trim(), "%Y-%m-%d").map_err(|_| {
            ConfigError::InvalidDate {
                value: since.to_string(),
            }
        })?;
        if start > today {
            return Err(ConfigError::InvalidDate {
                value: since.to_string(),
            });
        }
        Ok(Self { start, end: today })
    }

    /// Request-body representation of the filter
    pub fn to_json(&self) -> serde_json::Value {
        let parts = |date: NaiveDate| {
            serde_json::json!({
                "year": date.year(),
                "month": date.month(),
                "day": date.day(),
            })
        };
        serde_json::json!({
            "ranges": [{ "startDate": parts(self.start), "endDate": parts(self.end) }]
        })
    }
}

/// Everything a scan run needs besides credentials
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub tier: TierConfig,
    pub identity: String,
    pub output_prefix: Option<String>,
    pub runs_dir: PathBuf,
    pub page_size: usize,
    /// Reservoir capacity for the thumbnail sample
    pub sample_size: usize,
    /// Bounded URL sample kept in the run report
    pub url_sample_limit: usize,
    /// Minimum similarity percent for a cluster edge
    pub similarity_threshold: u32,
    /// Clustering is skipped above this many candidates
    pub max_cluster_items: usize,
    /// Export every pair when at most this many items were fingerprinted
    pub write_all_pairs_limit: usize,
    pub top_pairs: usize,
    pub download_workers: usize,
    pub drop_singletons: bool,
    pub date_filter: Option<DateFilter>,
    /// List the items picked in an interactive picker session
    pub picker: bool,
    /// Check each sampled content URL with a one-byte range request
    pub probe_urls: bool,
    pub save_baseline: bool,
    pub skip_similarity: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            tier: TierConfig {
                name: "test".to_string(),
                max_items: 10,
                max_pages: 5,
                empty_page_limit: 3,
                poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            },
            identity: "default".to_string(),
            output_prefix: None,
            runs_dir: PathBuf::from("runs"),
            page_size: 100,
            sample_size: 25,
            url_sample_limit: 100,
            similarity_threshold: 70,
            max_cluster_items: 200,
            write_all_pairs_limit: 50,
            top_pairs: 10,
            download_workers: 6,
            drop_singletons: true,
            date_filter: None,
            picker: false,
            probe_urls: false,
            save_baseline: false,
            skip_similarity: false,
        }
    }
}

impl ScanConfig {
    /// Create a new scan configuration builder
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::new()
    }

    /// Picker when requested, search when a date filter is set, else list
    pub fn listing_mode(&self) -> ListingMode {
        if self.picker {
            ListingMode::Picker
        } else if self.date_filter.is_some() {
            ListingMode::Search
        } else {
            ListingMode::List
        }
    }
}

/// Builder for scan configuration
pub struct ScanConfigBuilder {
    config: ScanConfig,
}

impl ScanConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self {
            config: ScanConfig::default(),
        }
    }

    /// Set the tier limits
    pub fn tier(mut self, tier: TierConfig) -> Self {
        self.config.tier = tier;
        self
    }

    /// Set the credential identity
    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.config.identity = identity.into();
        self
    }

    /// Prefix for run ids and artifact names
    pub fn output_prefix(mut self, prefix: Option<String>) -> Self {
        self.config.output_prefix = prefix;
        self
    }

    /// Directory receiving run artifacts
    pub fn runs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.runs_dir = dir.into();
        self
    }

    /// Items requested per page
    pub fn page_size(mut self, size: usize) -> Self {
        self.config.page_size = size;
        self
    }

    /// Thumbnail sample size
    pub fn sample_size(mut self, size: usize) -> Self {
        self.config.sample_size = size;
        self
    }

    /// Similarity threshold in percent
    pub fn similarity_threshold(mut self, threshold: u32) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    /// Clustering item ceiling
    pub fn max_cluster_items(mut self, limit: usize) -> Self {
        self.config.max_cluster_items = limit;
        self
    }

    /// Number of concurrent thumbnail downloads
    pub fn download_workers(mut self, workers: usize) -> Self {
        self.config.download_workers = workers;
        self
    }

    /// Keep single-member clusters in the output
    pub fn keep_singletons(mut self, keep: bool) -> Self {
        self.config.drop_singletons = !keep;
        self
    }

    /// Use search mode with a creation-date range
    pub fn date_filter(mut self, filter: Option<DateFilter>) -> Self {
        self.config.date_filter = filter;
        self
    }

    /// List a picker session's selection instead of the whole library
    pub fn picker(mut self, picker: bool) -> Self {
        self.config.picker = picker;
        self
    }

    /// Probe the sampled content URLs after listing
    pub fn probe_urls(mut self, probe: bool) -> Self {
        self.config.probe_urls = probe;
        self
    }

    /// Also write a baseline id file
    pub fn save_baseline(mut self, save: bool) -> Self {
        self.config.save_baseline = save;
        self
    }

    /// Stop after listing
    pub fn skip_similarity(mut self, skip: bool) -> Self {
        self.config.skip_similarity = skip;
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<ScanConfig, ConfigError> {
        let config = self.config;
        validate_identity(&config.identity)?;
        if config.page_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "page_size".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if config.sample_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sample_size".to_string(),
                reason: "must be a positive number".to_string(),
            });
        }
        if config.similarity_threshold > 100 {
            return Err(ConfigError::InvalidValue {
                field: "similarity_threshold".to_string(),
                reason: "must be between 0 and 100".to_string(),
            });
        }
        if config.picker && config.date_filter.is_some() {
            return Err(ConfigError::InvalidValue {
                field: "search_since".to_string(),
                reason: "a date filter cannot be combined with a picker session".to_string(),
            });
        }
        if config.download_workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "download_workers".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(config)
    }
}

impl Default for ScanConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Identities become file names, so keep them to a safe alphabet
pub fn validate_identity(identity: &str) -> Result<(), ConfigError> {
    let valid = !identity.is_empty()
        && identity
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidIdentity {
            identity: identity.to_string(),
        })
    }
}
