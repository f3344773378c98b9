//! Downstream code-host credential access.

use async_trait::async_trait;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A short-lived credential and its expiry, cleared from memory on drop so
/// it cannot be trivially recovered from a core dump after rotation.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Token {
    value: String,
    #[zeroize(skip)]
    expires_at: u64,
}

impl Token {
    /// Build a token from its raw value and absolute expiry (epoch seconds).
    pub fn new(value: impl Into<String>, expires_at: u64) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    /// The raw credential value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Absolute expiry, epoch seconds.
    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    /// Whether the token is still usable `now`, given a `safety_margin` of
    /// seconds before hard expiry.
    pub fn is_fresh(&self, now: u64, safety_margin: u64) -> bool {
        self.expires_at.saturating_sub(now) > safety_margin
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Errors surfaced by a [`TokenProvider`], unchanged to callers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TokenError {
    /// The refresh call to the credential endpoint failed.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
}

/// Holds one credential and proactively refreshes it before expiry. A
/// production adapter calls out to a credential endpoint over HTTP; a static
/// adapter returns a fixed token for local development and tests.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Return the cached token if still fresh, otherwise refresh first.
    async fn current(&self) -> Result<Token, TokenError>;

    /// Force a refresh, replacing the cached token atomically. Idempotent:
    /// concurrent callers observe a single in-flight refresh.
    async fn refresh(&self) -> Result<Token, TokenError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_token_well_inside_its_margin_is_fresh() {
        let token = Token::new("abc", 1_000);
        assert!(token.is_fresh(0, 300));
    }

    #[test]
    fn a_token_inside_the_safety_margin_is_not_fresh() {
        let token = Token::new("abc", 1_000);
        assert!(!token.is_fresh(800, 300));
    }

    #[test]
    fn debug_formatting_never_prints_the_raw_value() {
        let token = Token::new("super-secret", 1_000);
        let formatted = format!("{token:?}");
        assert!(!formatted.contains("super-secret"));
    }
}
