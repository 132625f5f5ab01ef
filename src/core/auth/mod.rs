//! # Auth Module
//!
//! OAuth 2.0 authorization-code flow with PKCE, and encrypted token storage.
//!
//! ## Flow
//! 1. [`CredentialStore::authorize`] returns early when tokens are already
//!    stored. Otherwise (or via [`CredentialStore::reauthorize`]) it binds the
//!    redirect listener, hands the consent URL to the caller, waits for the
//!    callback and exchanges the code.
//! 2. Tokens are sealed into a [`CredentialEnvelope`] (Argon2id + AES-256-GCM)
//!    and written to `<dir>/<identity>.enc` with owner-only permissions.
//! 3. [`CredentialStore::get_valid_access_token`] decrypts, refreshes when
//!    expired or forced, and re-persists after every refresh.
//!
//! ## Credential files
//! | Field | Content |
//! |-------|---------|
//! | `version` | Envelope format version, checked before decryption |
//! | `salt` | Argon2id salt (base64) |
//! | `iv` | AES-GCM nonce (base64) |
//! | `tag` | Authentication tag (base64) |
//! | `data` | Ciphertext of the token set (base64) |

pub mod callback;
pub mod envelope;
pub mod pkce;
pub mod session;
pub mod token_endpoint;

pub use callback::{CallbackListener, RedirectTarget};
pub use envelope::{CredentialEnvelope, TokenSet};
pub use pkce::PkcePair;
pub use session::PassphraseSession;
pub use token_endpoint::TokenEndpoint;

use crate::core::config::{validate_identity, ClientConfig};
use crate::core::fetcher::{AccessToken, HttpTransport, TokenProvider};
use crate::error::AuthError;
use chrono::Utc;
use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

/// How long [`CredentialStore::authorize`] waits for the browser redirect
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

/// Result of [`CredentialStore::authorize`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    /// A sealed token file was already present; nothing was changed
    Existing,
    /// The consent flow ran and new tokens were stored
    Completed,
}

/// Default token directory under the platform data dir
pub fn default_token_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("photo-library-scan")
        .join("tokens")
}

/// Encrypted per-identity token storage plus the OAuth flows that fill it
pub struct CredentialStore {
    dir: PathBuf,
    client: ClientConfig,
    endpoint: TokenEndpoint,
    session: PassphraseSession,
    callback_timeout: Duration,
    cache: Mutex<HashMap<String, TokenSet>>,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>, client: ClientConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let session = PassphraseSession::new(client.passphrase.clone());
        Self {
            dir: dir.into(),
            endpoint: TokenEndpoint::new(transport, client.clone()),
            client,
            session,
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_session(mut self, session: PassphraseSession) -> Self {
        self.session = session;
        self
    }

    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn client(&self) -> &ClientConfig {
        &self.client
    }

    /// Path of the sealed token file for `identity`
    pub fn token_path(&self, identity: &str) -> Result<PathBuf, AuthError> {
        validate_identity(identity)?;
        Ok(self.dir.join(format!("{}.enc", identity)))
    }

    pub fn has_credentials(&self, identity: &str) -> bool {
        self.token_path(identity)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    /// Make sure `identity` has stored tokens, running the interactive flow
    /// only when no sealed file exists yet.
    pub fn authorize<F>(&self, identity: &str, on_url: F) -> Result<Authorization, AuthError>
    where
        F: FnOnce(&str),
    {
        if self.token_path(identity)?.is_file() {
            info!(identity, "stored tokens found, skipping consent");
            return Ok(Authorization::Existing);
        }
        self.reauthorize(identity, on_url)
    }

    /// Run the interactive authorization flow and persist the resulting
    /// tokens, replacing any stored set.
    ///
    /// `on_url` receives the consent URL once the callback listener is ready.
    pub fn reauthorize<F>(&self, identity: &str, on_url: F) -> Result<Authorization, AuthError>
    where
        F: FnOnce(&str),
    {
        self.token_path(identity)?;
        // Resolve before the browser step so a prompt does not race the redirect
        self.session.passphrase()?;

        let target = RedirectTarget::parse(&self.client.redirect_uri)?;
        let listener = CallbackListener::bind(target)?;

        let pkce = PkcePair::generate();
        let state = pkce::random_state();
        let url = pkce::authorization_url(&self.client, &state, &pkce.challenge);
        on_url(&url);

        let code = listener.wait_for_code(&state, self.callback_timeout)?;
        let tokens = self.endpoint.exchange_code(&code, &pkce.verifier)?;
        if tokens.refresh_token.is_none() {
            debug!(identity, "token response carried no refresh token");
        }

        self.persist(identity, &tokens)?;
        self.lock_cache().insert(identity.to_string(), tokens);
        info!(identity, "authorization complete");
        Ok(Authorization::Completed)
    }

    /// Return a usable access token, refreshing when expired or when
    /// `force_refresh` is set. Every refresh is persisted before returning.
    pub fn get_valid_access_token(&self, identity: &str, force_refresh: bool) -> Result<AccessToken, AuthError> {
        let mut cache = self.lock_cache();
        let tokens = match cache.get(identity) {
            Some(tokens) => tokens.clone(),
            None => self.load(identity)?,
        };

        if !force_refresh && !tokens.is_expired(Utc::now()) {
            let value = tokens.access_token.clone();
            cache.insert(identity.to_string(), tokens);
            return Ok(AccessToken {
                value,
                refreshed: false,
            });
        }

        let refresh_token = tokens
            .refresh_token
            .clone()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AuthError::MissingRefreshToken {
                identity: identity.to_string(),
            })?;
        debug!(identity, force_refresh, "refreshing access token");
        let refreshed = tokens.merge_refresh(self.endpoint.refresh(&refresh_token)?);
        self.persist(identity, &refreshed)?;

        let value = refreshed.access_token.clone();
        cache.insert(identity.to_string(), refreshed);
        Ok(AccessToken {
            value,
            refreshed: true,
        })
    }

    /// Seal and write `tokens` for `identity`
    pub fn store_tokens(&self, identity: &str, tokens: &TokenSet) -> Result<(), AuthError> {
        self.persist(identity, tokens)?;
        self.lock_cache().insert(identity.to_string(), tokens.clone());
        Ok(())
    }

    /// Provider view bound to a single identity
    pub fn tokens_for<'a>(&'a self, identity: &str) -> IdentityTokens<'a> {
        IdentityTokens {
            store: self,
            identity: identity.to_string(),
        }
    }

    fn load(&self, identity: &str) -> Result<TokenSet, AuthError> {
        let path = self.token_path(identity)?;
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(AuthError::NotAuthorized {
                    identity: identity.to_string(),
                })
            }
            Err(source) => return Err(AuthError::Io { path, source }),
        };
        let envelope = CredentialEnvelope::from_json(&json)?;
        Ok(envelope.open(self.session.passphrase()?)?)
    }

    fn persist(&self, identity: &str, tokens: &TokenSet) -> Result<(), AuthError> {
        let path = self.token_path(identity)?;
        let envelope = CredentialEnvelope::seal(tokens, self.session.passphrase()?)?;
        let json = envelope.to_json()?;

        create_private_dir(&self.dir)?;
        let tmp = path.with_extension("enc.tmp");
        write_private_file(&tmp, json.as_bytes())?;
        fs::rename(&tmp, &path).map_err(|source| AuthError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(identity, path = %path.display(), "credentials persisted");
        Ok(())
    }

    fn lock_cache(&self) -> MutexGuard<'_, HashMap<String, TokenSet>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// [`TokenProvider`] over one identity of a [`CredentialStore`]
pub struct IdentityTokens<'a> {
    store: &'a CredentialStore,
    identity: String,
}

impl TokenProvider for IdentityTokens<'_> {
    fn access_token(&mut self, force_refresh: bool) -> Result<AccessToken, AuthError> {
        self.store.get_valid_access_token(&self.identity, force_refresh)
    }
}

fn create_private_dir(dir: &Path) -> Result<(), AuthError> {
    let io_err = |source| AuthError::Io {
        path: dir.to_path_buf(),
        source,
    };
    fs::create_dir_all(dir).map_err(io_err)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700)).map_err(io_err)?;
    }
    Ok(())
}

fn write_private_file(path: &Path, contents: &[u8]) -> Result<(), AuthError> {
    let io_err = |source| AuthError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path).map_err(io_err)?;
    file.write_all(contents).map_err(io_err)?;
    file.sync_all().map_err(io_err)
}
