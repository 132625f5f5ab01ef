//! Encrypted credential envelope.
//!
//! Tokens are serialized to JSON and sealed with AES-256-GCM under a key
//! derived from the passphrase with Argon2id and a random 16-byte salt.
//! The nonce is a random 96-bit value. On disk:
//!
//! ```json
//! { "version": 1, "salt": "...", "iv": "...", "tag": "...", "data": "..." }
//! ```
//!
//! Binary fields are standard base64. Decryption either yields the exact
//! token set that was sealed or an error.

use crate::error::EnvelopeError;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

pub const ENVELOPE_VERSION: u32 = 1;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

// Argon2id cost: 19 MiB, 2 passes, 1 lane
const KDF_MEMORY_KIB: u32 = 19 * 1024;
const KDF_ITERATIONS: u32 = 2;
const KDF_LANES: u32 = 1;

/// Refresh this long before the recorded expiry
pub const EXPIRY_BUFFER_SECONDS: i64 = 60;

/// Decrypted OAuth tokens for one identity
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenSet {
    /// True once `now` is within the safety buffer of the expiry.
    ///
    /// Tokens without a recorded expiry never count as expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expiry) => now >= expiry - Duration::seconds(EXPIRY_BUFFER_SECONDS),
            None => false,
        }
    }

    /// Fold a refresh grant into the stored set, keeping fields the grant omits
    pub fn merge_refresh(&self, refreshed: TokenSet) -> TokenSet {
        TokenSet {
            access_token: refreshed.access_token,
            refresh_token: refreshed
                .refresh_token
                .filter(|token| !token.is_empty())
                .or_else(|| self.refresh_token.clone()),
            scope: refreshed.scope.or_else(|| self.scope.clone()),
            token_type: refreshed.token_type.or_else(|| self.token_type.clone()),
            expires_at: refreshed.expires_at,
        }
    }
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[redacted]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .field("scope", &self.scope)
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// On-disk form of a sealed token set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialEnvelope {
    pub version: u32,
    pub salt: String,
    pub iv: String,
    pub tag: String,
    pub data: String,
}

impl CredentialEnvelope {
    /// Encrypt `tokens` under `passphrase` with fresh salt and nonce
    pub fn seal(tokens: &TokenSet, passphrase: &str) -> Result<Self, EnvelopeError> {
        let mut rng = rand::thread_rng();
        let mut salt = [0u8; SALT_LEN];
        let mut iv = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut iv);

        let key = derive_key(passphrase, &salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key[..])
            .map_err(|e| EnvelopeError::KeyDerivation(e.to_string()))?;

        let plaintext = Zeroizing::new(
            serde_json::to_vec(tokens).map_err(|e| EnvelopeError::Malformed(e.to_string()))?,
        );
        let mut sealed = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_slice())
            .map_err(|_| EnvelopeError::Malformed("encryption failed".to_string()))?;
        // aes-gcm appends the tag to the ciphertext
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        Ok(Self {
            version: ENVELOPE_VERSION,
            salt: STANDARD.encode(salt),
            iv: STANDARD.encode(iv),
            tag: STANDARD.encode(tag),
            data: STANDARD.encode(sealed),
        })
    }

    /// Decrypt with `passphrase`
    pub fn open(&self, passphrase: &str) -> Result<TokenSet, EnvelopeError> {
        if self.version != ENVELOPE_VERSION {
            return Err(EnvelopeError::UnsupportedVersion {
                found: self.version,
                expected: ENVELOPE_VERSION,
            });
        }

        let salt = decode_field("salt", &self.salt)?;
        let iv = decode_field("iv", &self.iv)?;
        let tag = decode_field("tag", &self.tag)?;
        let mut combined = decode_field("data", &self.data)?;

        if salt.len() < 8 {
            return Err(EnvelopeError::Malformed("salt too short".to_string()));
        }
        if iv.len() != NONCE_LEN {
            return Err(EnvelopeError::Malformed(format!(
                "iv must be {} bytes, found {}",
                NONCE_LEN,
                iv.len()
            )));
        }
        if tag.len() != TAG_LEN {
            return Err(EnvelopeError::Malformed(format!(
                "tag must be {} bytes, found {}",
                TAG_LEN,
                tag.len()
            )));
        }

        let key = derive_key(passphrase, &salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key[..])
            .map_err(|e| EnvelopeError::KeyDerivation(e.to_string()))?;

        combined.extend_from_slice(&tag);
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(&iv), combined.as_slice())
                .map_err(|_| EnvelopeError::DecryptionFailed)?,
        );

        serde_json::from_slice(&plaintext).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        serde_json::to_string_pretty(self).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, EnvelopeError> {
        serde_json::from_str(json).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, EnvelopeError> {
    STANDARD
        .decode(value)
        .map_err(|e| EnvelopeError::Malformed(format!("{} is not base64: {}", name, e)))
}

fn derive_key(passphrase: &str, salt: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>, EnvelopeError> {
    let params = Params::new(KDF_MEMORY_KIB, KDF_ITERATIONS, KDF_LANES, Some(KEY_LEN))
        .map_err(|e| EnvelopeError::KeyDerivation(e.to_string()))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon
        .hash_password_into(passphrase.as_bytes(), salt, &mut key[..])
        .map_err(|e| EnvelopeError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_tokens() -> TokenSet {
        TokenSet {
            access_token: "ya29.access".to_string(),
            refresh_token: Some("1//refresh".to_string()),
            scope: Some("photoslibrary.readonly".to_string()),
            token_type: Some("Bearer".to_string()),
            expires_at: Some(Utc.with_ymd_and_hms(2030, 1, 1, 12, 0, 0).unwrap()),
        }
    }

    fn flip_first_byte(encoded: &str) -> String {
        let mut bytes = STANDARD.decode(encoded).unwrap();
        bytes[0] ^= 0x01;
        STANDARD.encode(bytes)
    }

    #[test]
    fn seal_then_open_round_trips_exactly() {
        let tokens = sample_tokens();
        let envelope = CredentialEnvelope::seal(&tokens, "correct horse").unwrap();

        assert_eq!(envelope.version, ENVELOPE_VERSION);
        assert_eq!(envelope.open("correct horse").unwrap(), tokens);
    }

    #[test]
    fn wrong_passphrase_fails_closed() {
        let envelope = CredentialEnvelope::seal(&sample_tokens(), "correct horse").unwrap();
        let result = envelope.open("battery staple");
        assert!(matches!(result, Err(EnvelopeError::DecryptionFailed)));
    }

    #[test]
    fn tampered_ciphertext_or_tag_fails_closed() {
        let envelope = CredentialEnvelope::seal(&sample_tokens(), "pw").unwrap();

        let mut tampered_data = envelope.clone();
        tampered_data.data = flip_first_byte(&envelope.data);
        assert!(matches!(
            tampered_data.open("pw"),
            Err(EnvelopeError::DecryptionFailed)
        ));

        let mut tampered_tag = envelope.clone();
        tampered_tag.tag = flip_first_byte(&envelope.tag);
        assert!(matches!(
            tampered_tag.open("pw"),
            Err(EnvelopeError::DecryptionFailed)
        ));
    }

    #[test]
    fn version_mismatch_is_rejected_before_decrypting() {
        let mut envelope = CredentialEnvelope::seal(&sample_tokens(), "pw").unwrap();
        envelope.version = 2;
        assert!(matches!(
            envelope.open("pw"),
            Err(EnvelopeError::UnsupportedVersion { found: 2, expected: 1 })
        ));
    }

    #[test]
    fn fresh_salt_and_nonce_per_seal() {
        let tokens = sample_tokens();
        let a = CredentialEnvelope::seal(&tokens, "pw").unwrap();
        let b = CredentialEnvelope::seal(&tokens, "pw").unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.data, b.data);
    }

    #[test]
    fn json_uses_documented_field_names() {
        let envelope = CredentialEnvelope::seal(&sample_tokens(), "pw").unwrap();
        let value: serde_json::Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        for field in ["version", "salt", "iv", "tag", "data"] {
            assert!(value.get(field).is_some(), "missing {}", field);
        }
        assert!(!envelope.to_json().unwrap().contains("ya29"));
    }

    #[test]
    fn expiry_respects_safety_buffer() {
        let expiry = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let tokens = TokenSet {
            expires_at: Some(expiry),
            ..sample_tokens()
        };

        assert!(!tokens.is_expired(expiry - Duration::seconds(61)));
        assert!(tokens.is_expired(expiry - Duration::seconds(60)));
        assert!(tokens.is_expired(expiry + Duration::seconds(1)));

        let no_expiry = TokenSet {
            expires_at: None,
            ..sample_tokens()
        };
        assert!(!no_expiry.is_expired(expiry));
    }

    #[test]
    fn refresh_keeps_existing_refresh_token_when_omitted() {
        let stored = sample_tokens();
        let grant = TokenSet {
            access_token: "new".to_string(),
            refresh_token: None,
            scope: None,
            token_type: None,
            expires_at: None,
        };
        let merged = stored.merge_refresh(grant);

        assert_eq!(merged.access_token, "new");
        assert_eq!(merged.refresh_token, stored.refresh_token);
        assert_eq!(merged.scope, stored.scope);
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let rendered = format!("{:?}", sample_tokens());
        assert!(!rendered.contains("ya29"));
        assert!(!rendered.contains("1//refresh"));
    }
}
