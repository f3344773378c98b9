//! `reqwest`-backed production adapter for [`crate::ports::CallbackTransport`].

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::ports::callback_transport::{CallbackTransport, DeliveryOutcome};

/// Delivers callbacks over a shared `reqwest::Client`, built once at startup
/// with the configured callback timeout.
pub struct HttpCallbackTransport {
    client: reqwest::Client,
}

impl HttpCallbackTransport {
    /// Wrap an already-configured client.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CallbackTransport for HttpCallbackTransport {
    async fn deliver(&self, url: &str, body: &str, timestamp: &str, signature: &str) -> DeliveryOutcome {
        let result = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .header("x-callback-timestamp", timestamp)
            .header("x-callback-signature", signature)
            .body(body.to_string())
            .send()
            .await;

        match result {
            Ok(response) => classify(response.status()),
            Err(_) => DeliveryOutcome::Transient,
        }
    }
}

fn classify(status: StatusCode) -> DeliveryOutcome {
    if status.is_success() {
        DeliveryOutcome::Accepted
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        DeliveryOutcome::Transient
    } else {
        DeliveryOutcome::PermanentReject
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_statuses_are_accepted() {
        assert_eq!(classify(StatusCode::OK), DeliveryOutcome::Accepted);
        assert_eq!(classify(StatusCode::ACCEPTED), DeliveryOutcome::Accepted);
    }

    #[test]
    fn server_errors_and_429_are_transient() {
        assert_eq!(classify(StatusCode::INTERNAL_SERVER_ERROR), DeliveryOutcome::Transient);
        assert_eq!(classify(StatusCode::TOO_MANY_REQUESTS), DeliveryOutcome::Transient);
    }

    #[test]
    fn other_4xx_is_a_permanent_rejection() {
        assert_eq!(classify(StatusCode::BAD_REQUEST), DeliveryOutcome::PermanentReject);
        assert_eq!(classify(StatusCode::NOT_FOUND), DeliveryOutcome::PermanentReject);
    }
}
