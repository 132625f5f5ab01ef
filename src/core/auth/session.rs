//! Encryption passphrase, resolved once per session.

use crate::error::AuthError;
use std::sync::OnceLock;
use zeroize::Zeroizing;

type Prompt = Box<dyn Fn() -> std::io::Result<String> + Send + Sync>;

/// Resolves the passphrase from the environment or an interactive prompt.
///
/// The prompt runs at most once; the answer is reused for the rest of the
/// session and wiped on drop.
pub struct PassphraseSession {
    preset: Option<Zeroizing<String>>,
    prompt: Prompt,
    cached: OnceLock<Zeroizing<String>>,
}

impl PassphraseSession {
    /// Use `preset` when set, otherwise prompt on the terminal
    pub fn new(preset: Option<Zeroizing<String>>) -> Self {
        Self::with_prompt(preset, || {
            rpassword::prompt_password("Token encryption passphrase: ")
        })
    }

    pub fn with_prompt<F>(preset: Option<Zeroizing<String>>, prompt: F) -> Self
    where
        F: Fn() -> std::io::Result<String> + Send + Sync + 'static,
    {
        Self {
            preset,
            prompt: Box::new(prompt),
            cached: OnceLock::new(),
        }
    }

    pub fn passphrase(&self) -> Result<&str, AuthError> {
        if let Some(preset) = &self.preset {
            return Ok(preset.as_str());
        }
        if let Some(cached) = self.cached.get() {
            return Ok(cached.as_str());
        }

        let answer = Zeroizing::new((self.prompt)().map_err(|e| AuthError::Passphrase(e.to_string()))?);
        if answer.is_empty() {
            return Err(AuthError::Passphrase("passphrase must not be empty".to_string()));
        }
        Ok(self.cached.get_or_init(|| answer).as_str())
    }
}
