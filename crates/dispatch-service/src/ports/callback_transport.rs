//! Outbound delivery of a signed callback envelope.

use async_trait::async_trait;

/// The outcome of a single delivery attempt, classified the way the emitter
/// needs to decide whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// 2xx: accepted.
    Accepted,
    /// 4xx other than 429: permanent rejection, do not retry.
    PermanentReject,
    /// 5xx or 429: transient, retry with backoff.
    Transient,
}

/// Delivers a signed HTTP POST to a callback URL. The production adapter
/// wraps a shared `reqwest::Client`; tests substitute a fake that records
/// calls without touching the network.
#[async_trait]
pub trait CallbackTransport: Send + Sync {
    /// POST `body` to `url` with the given signature headers.
    async fn deliver(
        &self,
        url: &str,
        body: &str,
        timestamp: &str,
        signature: &str,
    ) -> DeliveryOutcome;
}
