//! OAuth token endpoint: code exchange and refresh grants.

use super::envelope::TokenSet;
use crate::core::config::ClientConfig;
use crate::core::fetcher::{HttpRequest, HttpTransport};
use crate::error::AuthError;
use chrono::{Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Talks to the provider's token endpoint
pub struct TokenEndpoint {
    transport: Arc<dyn HttpTransport>,
    client: ClientConfig,
}

impl TokenEndpoint {
    pub fn new(transport: Arc<dyn HttpTransport>, client: ClientConfig) -> Self {
        Self { transport, client }
    }

    /// Exchange an authorization code plus PKCE verifier for tokens
    pub fn exchange_code(&self, code: &str, verifier: &str) -> Result<TokenSet, AuthError> {
        self.grant(vec![
            ("client_id", self.client.client_id.clone()),
            ("client_secret", self.client.client_secret.clone()),
            ("redirect_uri", self.client.redirect_uri.clone()),
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("code_verifier", verifier.to_string()),
        ])
    }

    /// Obtain a new access token from a refresh token
    pub fn refresh(&self, refresh_token: &str) -> Result<TokenSet, AuthError> {
        self.grant(vec![
            ("client_id", self.client.client_id.clone()),
            ("client_secret", self.client.client_secret.clone()),
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
        ])
    }

    fn grant(&self, fields: Vec<(&str, String)>) -> Result<TokenSet, AuthError> {
        let fields = fields
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect();
        let request = HttpRequest::post_form(self.client.token_endpoint.clone(), fields);

        let response = self
            .transport
            .execute(&request)
            .map_err(|e| AuthError::TokenTransport(e.to_string()))?;
        if !response.is_success() {
            return Err(AuthError::TokenExchange {
                status: response.status,
                body: response.text(),
            });
        }

        let payload: TokenResponse = serde_json::from_slice(&response.body)
            .map_err(|e| AuthError::TokenPayload(e.to_string()))?;
        Ok(TokenSet {
            access_token: payload.access_token,
            refresh_token: payload.refresh_token,
            scope: payload.scope,
            token_type: payload.token_type,
            expires_at: payload
                .expires_in
                .map(|seconds| Utc::now() + Duration::seconds(seconds)),
        })
    }
}
