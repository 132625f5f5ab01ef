//! # Fetcher Module
//!
//! Authenticated HTTP calls with retry, backoff and refresh-on-401.
//!
//! ## Retry Policy
//! | Response            | Action                                          |
//! |---------------------|-------------------------------------------------|
//! | 2xx                 | Return                                          |
//! | 401                 | Force a token refresh, retry                    |
//! | 429 / 503           | `Retry-After` seconds, else backoff, retry      |
//! | other 5xx           | Backoff, retry                                  |
//! | other 4xx           | Terminal (`403` counted as quota)               |
//! | timeout / reset     | Counted as network, backoff, retry              |
//!
//! Every attempt is counted in [`RequestMetrics`].

pub mod backoff;
pub mod metrics;
pub mod transport;

pub use backoff::{parse_retry_after, BackoffPolicy, Sleeper, ThreadSleeper};
pub use metrics::{FailureCounts, RateLimitEvents, RequestMetrics};
pub use transport::{
    HttpRequest, HttpResponse, HttpTransport, Method, RequestBody, TransportError,
    TransportErrorKind, UreqTransport, DEFAULT_TIMEOUT,
};

use crate::error::{AuthError, FailureKind, FetchError};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// An access token plus whether obtaining it required a refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    pub refreshed: bool,
}

/// Supplies bearer tokens to the fetcher
pub trait TokenProvider {
    /// Return a valid access token, refreshing first when `force_refresh` is set
    fn access_token(&mut self, force_refresh: bool) -> Result<AccessToken, AuthError>;
}

/// A fixed token that never refreshes. Used for already-authorized calls
/// and tests.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl TokenProvider for StaticToken {
    fn access_token(&mut self, _force_refresh: bool) -> Result<AccessToken, AuthError> {
        Ok(AccessToken {
            value: self.0.clone(),
            refreshed: false,
        })
    }
}

/// Executes requests with the retry policy described in the module docs
pub struct ResilientFetcher {
    transport: Arc<dyn HttpTransport>,
    sleeper: Arc<dyn Sleeper>,
    policy: BackoffPolicy,
    max_retries: u32,
    rng: StdRng,
}

impl ResilientFetcher {
    /// Create a fetcher that really sleeps between attempts
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            sleeper: Arc::new(ThreadSleeper),
            policy: BackoffPolicy::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            rng: StdRng::from_entropy(),
        }
    }

    /// Replace the sleeper
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Replace the backoff policy
    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Number of retries after the first attempt
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Seed jitter for reproducible runs
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn transport(&self) -> Arc<dyn HttpTransport> {
        Arc::clone(&self.transport)
    }

    /// Sleeper shared with callers that pace their own loops
    pub fn sleeper(&self) -> Arc<dyn Sleeper> {
        Arc::clone(&self.sleeper)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Same transport, sleeper and policy with an independent jitter source,
    /// for use on another thread
    pub fn fork(&mut self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            sleeper: Arc::clone(&self.sleeper),
            policy: self.policy,
            max_retries: self.max_retries,
            rng: StdRng::from_rng(&mut self.rng).unwrap_or_else(|_| StdRng::from_entropy()),
        }
    }

    /// Execute `template`, retrying per policy, and return the successful response
    pub fn request(
        &mut self,
        template: &HttpRequest,
        tokens: &mut dyn TokenProvider,
        metrics: &mut RequestMetrics,
    ) -> Result<HttpResponse, FetchError> {
        let attempts_allowed = self.max_retries + 1;
        let mut force_refresh = false;

        for attempt in 1..=attempts_allowed {
            let retries_remain = attempt < attempts_allowed;

            let token = tokens.access_token(force_refresh)?;
            if token.refreshed {
                metrics.record_refresh();
            }
            force_refresh = false;

            metrics.record_attempt();
            debug!(method = template.method.as_str(), url = %template.url, attempt, "HTTP request");
            let request = template.clone().with_bearer(&token.value);

            let response = match self.transport.execute(&request) {
                Ok(response) => response,
                Err(error) => {
                    metrics.record_failure(FailureKind::Network);
                    if !retries_remain {
                        return Err(FetchError::Network {
                            attempts: attempt,
                            message: error.to_string(),
                        });
                    }
                    let delay = self.policy.delay(attempt, None, &mut self.rng);
                    warn!(attempt, error = %error, ?delay, "network failure, retrying");
                    self.wait(delay, metrics);
                    continue;
                }
            };

            match response.status {
                status if (200..300).contains(&status) => return Ok(response),
                401 => {
                    metrics.record_failure(FailureKind::Auth);
                    if !retries_remain {
                        return Err(FetchError::Unauthorized { attempts: attempt });
                    }
                    debug!(attempt, "401 received, forcing token refresh");
                    force_refresh = true;
                }
                status @ (429 | 503) => {
                    let retry_after = parse_retry_after(response.header("retry-after"));
                    metrics.record_rate_limit(status, retry_after);
                    if !retries_remain {
                        return Err(FetchError::RateLimited {
                            status,
                            attempts: attempt,
                        });
                    }
                    let delay = self.policy.delay(attempt, retry_after, &mut self.rng);
                    warn!(status, attempt, ?delay, "rate limited, backing off");
                    self.wait(delay, metrics);
                }
                status if status >= 500 => {
                    metrics.record_failure(FailureKind::Server);
                    if !retries_remain {
                        return Err(FetchError::Server {
                            status,
                            attempts: attempt,
                            body: response.text(),
                        });
                    }
                    let delay = self.policy.delay(attempt, None, &mut self.rng);
                    warn!(status, attempt, ?delay, "server error, backing off");
                    self.wait(delay, metrics);
                }
                status => {
                    let error = FetchError::Client {
                        status,
                        body: response.text(),
                    };
                    metrics.record_failure(error.kind());
                    return Err(error);
                }
            }
        }

        // The final attempt always returns from inside the loop
        Err(FetchError::Unauthorized {
            attempts: attempts_allowed,
        })
    }

    /// Execute `template` and parse the body as JSON
    pub fn request_json(
        &mut self,
        template: &HttpRequest,
        tokens: &mut dyn TokenProvider,
        metrics: &mut RequestMetrics,
    ) -> Result<serde_json::Value, FetchError> {
        let response = self.request(template, tokens, metrics)?;
        if response.body.is_empty() {
            return Ok(serde_json::Value::Object(Default::default()));
        }
        serde_json::from_slice(&response.body).map_err(|e| FetchError::InvalidJson(e.to_string()))
    }

    fn wait(&self, delay: Duration, metrics: &mut RequestMetrics) {
        metrics.record_retry(delay);
        self.sleeper.sleep(delay);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transport and recording sleeper shared by unit tests.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    pub type Scripted = Result<HttpResponse, TransportError>;

    /// Replays a fixed list of outcomes and records every request
    pub struct ScriptedTransport {
        script: Mutex<VecDeque<Scripted>>,
        pub requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        pub fn new(script: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    impl HttpTransport for ScriptedTransport {
        fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.requests.lock().unwrap().push(request.clone());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::new(500, "script exhausted")))
        }
    }

    #[derive(Default)]
    pub struct RecordingSleeper {
        pub delays: Mutex<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.delays.lock().unwrap().push(duration);
        }
    }

    /// Counts refreshes the fetcher asks for
    #[derive(Default)]
    pub struct CountingTokens {
        pub refreshes: u32,
    }

    impl TokenProvider for CountingTokens {
        fn access_token(&mut self, force_refresh: bool) -> Result<AccessToken, AuthError> {
            if force_refresh {
                self.refreshes += 1;
            }
            Ok(AccessToken {
                value: format!("token-{}", self.refreshes),
                refreshed: force_refresh,
            })
        }
    }
}
