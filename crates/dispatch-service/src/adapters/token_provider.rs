//! Token provider adapters: an HTTP-backed production implementation and a
//! fixed-value adapter for local development and tests.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, Mutex, RwLock};

use crate::ports::token_provider::{Token, TokenError, TokenProvider};

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

enum RefreshState {
    Idle,
    InFlight(broadcast::Sender<Result<Token, TokenError>>),
}

/// Calls a configured HTTP endpoint to mint a fresh credential. Concurrent
/// callers observing an expired token share a single in-flight refresh
/// rather than each issuing their own network call.
pub struct HttpTokenProvider {
    client: reqwest::Client,
    endpoint: String,
    safety_margin: u64,
    timeout: Duration,
    cached: RwLock<Option<Token>>,
    state: Mutex<RefreshState>,
}

#[derive(Deserialize)]
struct RefreshResponse {
    token: String,
    #[serde(rename = "expiresAt")]
    expires_at: u64,
}

impl HttpTokenProvider {
    /// Build a new provider against `endpoint`, refreshing `safety_margin`
    /// seconds before hard expiry and bounding each refresh call to `timeout`.
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        safety_margin: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            safety_margin: safety_margin.as_secs(),
            timeout,
            cached: RwLock::new(None),
            state: Mutex::new(RefreshState::Idle),
        }
    }

    async fn do_refresh(&self) -> Result<Token, TokenError> {
        let request = self.client.post(&self.endpoint).send();
        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| TokenError::RefreshFailed("refresh request timed out".to_string()))?
            .map_err(|e| TokenError::RefreshFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TokenError::RefreshFailed(format!(
                "refresh endpoint returned {}",
                response.status()
            )));
        }

        let parsed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| TokenError::RefreshFailed(e.to_string()))?;

        let token = Token::new(parsed.token, parsed.expires_at);
        *self.cached.write().await = Some(token.clone());
        Ok(token)
    }
}

#[async_trait]
impl TokenProvider for HttpTokenProvider {
    async fn current(&self) -> Result<Token, TokenError> {
        let now = now_secs();
        if let Some(token) = self.cached.read().await.clone() {
            if token.is_fresh(now, self.safety_margin) {
                return Ok(token);
            }
        }
        self.refresh().await
    }

    async fn refresh(&self) -> Result<Token, TokenError> {
        let mut guard = self.state.lock().await;
        if let RefreshState::InFlight(tx) = &*guard {
            let mut rx = tx.subscribe();
            drop(guard);
            return rx
                .recv()
                .await
                .unwrap_or_else(|_| Err(TokenError::RefreshFailed("refresh task dropped".to_string())));
        }

        let (tx, _rx) = broadcast::channel(1);
        *guard = RefreshState::InFlight(tx.clone());
        drop(guard);

        let result = self.do_refresh().await;
        *self.state.lock().await = RefreshState::Idle;
        let _ = tx.send(result.clone());
        result
    }
}

/// Returns a fixed token from configuration. Used for local development and
/// integration tests that don't exercise the real credential endpoint.
pub struct StaticTokenProvider {
    token: Arc<RwLock<Token>>,
}

impl StaticTokenProvider {
    /// Build a provider that always returns `token` and never expires it
    /// (`refresh` just re-issues the same value).
    pub fn new(token: Token) -> Self {
        Self {
            token: Arc::new(RwLock::new(token)),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn current(&self) -> Result<Token, TokenError> {
        Ok(self.token.read().await.clone())
    }

    async fn refresh(&self) -> Result<Token, TokenError> {
        Ok(self.token.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_provider_always_returns_its_fixed_token() {
        let provider = StaticTokenProvider::new(Token::new("fixed", u64::MAX));
        let token = provider.current().await.unwrap();
        assert_eq!(token.value(), "fixed");
        let refreshed = provider.refresh().await.unwrap();
        assert_eq!(refreshed.value(), "fixed");
    }
}
