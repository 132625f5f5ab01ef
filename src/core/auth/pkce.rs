//! PKCE verifier/challenge pairs and the authorization URL.

use crate::core::config::ClientConfig;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use sha2::{Digest, Sha256};

const VERIFIER_BYTES: usize = 32;
const STATE_BYTES: usize = 16;

/// Code verifier and its S256 challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    /// Generate a verifier from 32 random bytes
    pub fn generate() -> Self {
        let mut bytes = [0u8; VERIFIER_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::from_verifier(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Derive the challenge for a known verifier
    pub fn from_verifier(verifier: String) -> Self {
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

/// Random state nonce bound to one authorization attempt
pub fn random_state() -> String {
    let mut bytes = [0u8; STATE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Build the consent URL the user opens in a browser
pub fn authorization_url(client: &ClientConfig, state: &str, challenge: &str) -> String {
    let params = [
        ("client_id", client.client_id.as_str()),
        ("redirect_uri", client.redirect_uri.as_str()),
        ("response_type", "code"),
        ("scope", client.scope.as_str()),
        ("access_type", "offline"),
        ("prompt", "consent"),
        ("state", state),
        ("include_granted_scopes", "true"),
        ("code_challenge", challenge),
        ("code_challenge_method", "S256"),
    ];
    let query = params
        .iter()
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}?{}", client.auth_endpoint, query)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_matches_rfc7636_example() {
        // Appendix B of RFC 7636
        let pair = PkcePair::from_verifier("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".to_string());
        assert_eq!(pair.challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGUSpw_cQU");
    }

    #[test]
    fn generated_verifier_has_enough_entropy() {
        let a = PkcePair::generate();
        let b = PkcePair::generate();
        // 32 bytes -> 43 base64url characters
        assert_eq!(a.verifier.len(), 43);
        assert_ne!(a.verifier, b.verifier);
        assert_ne!(random_state(), random_state());
    }

    #[test]
    fn authorization_url_carries_state_and_challenge() {
        let client = ClientConfig::from_lookup(|name| match name {
            "CLIENT_ID" => Some("client-123".to_string()),
            "CLIENT_SECRET" => Some("secret".to_string()),
            "REDIRECT_URI" => Some("http://127.0.0.1:8080/callback".to_string()),
            _ => None,
        })
        .unwrap();

        let url = authorization_url(&client, "state-xyz", "challenge-abc");

        assert!(url.starts_with(&client.auth_endpoint));
        assert!(url.contains("state=state-xyz"));
        assert!(url.contains("code_challenge=challenge-abc"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("redirect_uri=http%3A%2F%2F127.0.0.1%3A8080%2Fcallback"));
    }
}
