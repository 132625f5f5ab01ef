//! # Error Module
//!
//! Error types for the photo library scanner.
//!
//! ## Design Principles
//! - **Never panic** on server data - return errors instead
//! - **Include context** - status codes, response bodies, paths, identities
//! - **Name the stage** - every top-level variant says where the run failed
//! - **Per-item failures are data** - decode and download problems are recorded, not raised

use std::path::PathBuf;
use thiserror::Error;

/// Top-level application error
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Hashing error: {0}")]
    Hash(#[from] HashError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Missing or invalid input. Always fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {name}")]
    MissingEnv { name: String },

    #[error("Unknown tier: {tier} (expected test, small, medium or large)")]
    UnknownTier { tier: String },

    #[error("Invalid date filter {value:?} (expected YYYY-MM-DD)")]
    InvalidDate { value: String },

    #[error("Identity must be alphanumeric, dash, or underscore only: {identity:?}")]
    InvalidIdentity { identity: String },

    #[error("Redirect URI must be http:// with a host for the local callback: {uri}")]
    InvalidRedirectUri { uri: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Credential lifecycle failures. Fatal; most require re-authorization.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("OAuth state mismatch or missing code in callback")]
    StateMismatch,

    #[error("No OAuth callback arrived within {seconds}s")]
    CallbackTimeout { seconds: u64 },

    #[error("Missing refresh token; re-authorization required for identity {identity}")]
    MissingRefreshToken { identity: String },

    #[error("No stored credentials for identity {identity}; run authorization first")]
    NotAuthorized { identity: String },

    #[error("Token endpoint rejected the request ({status}): {body}")]
    TokenExchange { status: u16, body: String },

    #[error("Token endpoint unreachable: {0}")]
    TokenTransport(String),

    #[error("Token endpoint returned an unreadable payload: {0}")]
    TokenPayload(String),

    #[error("Could not read encryption passphrase: {0}")]
    Passphrase(String),

    #[error("Callback listener failed on {address}: {reason}")]
    Callback { address: String, reason: String },

    #[error("Credential envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Credential file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Encrypted credential envelope failures. Decryption fails closed.
#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("Unsupported credential envelope version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Decryption failed: wrong passphrase or tampered credential file")]
    DecryptionFailed,

    #[error("Malformed credential envelope: {0}")]
    Malformed(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),
}

/// Failure category for request metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Network,
    Auth,
    Quota,
    Server,
    Other,
}

/// Errors raised by the resilient fetcher once retries are exhausted or a
/// terminal response arrives.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network failure after {attempts} attempts: {message}")]
    Network { attempts: u32, message: String },

    #[error("Still rate limited (status {status}) after {attempts} attempts")]
    RateLimited { status: u16, attempts: u32 },

    #[error("Server error {status} after {attempts} attempts: {body}")]
    Server {
        status: u16,
        attempts: u32,
        body: String,
    },

    #[error("API error {status}: {body}")]
    Client { status: u16, body: String },

    #[error("Still unauthorized after {attempts} attempts")]
    Unauthorized { attempts: u32 },

    #[error("Could not obtain access token: {0}")]
    Token(#[from] AuthError),

    #[error("Response was not valid JSON: {0}")]
    InvalidJson(String),
}

impl FetchError {
    /// Metrics category for a terminal error
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::Network { .. } | FetchError::InvalidJson(_) => FailureKind::Network,
            FetchError::RateLimited { .. } | FetchError::Server { .. } => FailureKind::Server,
            FetchError::Client { status: 403, .. } => FailureKind::Quota,
            FetchError::Client { .. } => FailureKind::Other,
            FetchError::Unauthorized { .. } | FetchError::Token(_) => FailureKind::Auth,
        }
    }
}

/// Errors that occur during image decoding and hashing
#[derive(Error, Debug)]
pub enum HashError {
    #[error("Unsupported image format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Failed to decode image {item_id}: {reason}")]
    DecodeError { item_id: String, reason: String },

    #[error("Image is empty or corrupted: {item_id}")]
    EmptyImage { item_id: String },
}

/// Errors writing run artifacts
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize {what}: {reason}")]
    Serialize { what: String, reason: String },

    #[error("Output self-check failed for {path}: {reason}. Aborting to avoid silent corruption.")]
    Integrity { path: PathBuf, reason: String },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_env_names_variable() {
        let error = ConfigError::MissingEnv {
            name: "CLIENT_ID".to_string(),
        };
        assert!(error.to_string().contains("CLIENT_ID"));
    }

    #[test]
    fn client_error_carries_status_and_body() {
        let error = FetchError::Client {
            status: 404,
            body: "not found".to_string(),
        };
        let message = error.to_string();
        assert!(message.contains("404"));
        assert!(message.contains("not found"));
    }

    #[test]
    fn forbidden_is_classified_as_quota() {
        let error = FetchError::Client {
            status: 403,
            body: String::new(),
        };
        assert_eq!(error.kind(), FailureKind::Quota);
    }

    #[test]
    fn top_level_error_names_stage() {
        let error: ScanError = AuthError::StateMismatch.into();
        assert!(error.to_string().starts_with("Authentication error"));
    }

    #[test]
    fn integrity_error_explains_abort() {
        let error = StorageError::Integrity {
            path: PathBuf::from("/runs/items.ndjson"),
            reason: "line 1 is not JSON".to_string(),
        };
        let message = error.to_string();
        assert!(message.contains("/runs/items.ndjson"));
        assert!(message.contains("Aborting"));
    }
}
