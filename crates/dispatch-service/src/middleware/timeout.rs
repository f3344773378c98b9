//! Request-level timeout middleware.
//!
//! A single wall-clock budget applies to every request passing through the
//! admission router; the per-task worker timeout is a separate, longer-lived
//! concern enforced by the worker runner, not this layer.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::time::Duration;
use tokio::time::timeout;
use tower::{Layer, Service};
use tracing::warn;

/// Timeout layer applying a fixed budget to every request it wraps.
#[derive(Clone)]
pub struct TimeoutLayer {
    duration: Duration,
}

impl TimeoutLayer {
    /// Build a layer enforcing `duration` on every request.
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService {
            inner,
            duration: self.duration,
        }
    }
}

/// Service enforcing the configured timeout before delegating to `inner`.
#[derive(Clone)]
pub struct TimeoutService<S> {
    inner: S,
    duration: Duration,
}

impl<S> Service<Request<Body>> for TimeoutService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();
        let duration = self.duration;

        Box::pin(async move {
            match timeout(duration, inner.call(req)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(timeout_ms = duration.as_millis(), "request exceeded the admission timeout");
                    Ok(timeout_response(duration))
                }
            }
        })
    }
}

fn timeout_response(duration: Duration) -> Response {
    (
        StatusCode::GATEWAY_TIMEOUT,
        Json(json!({ "error": format!("request exceeded {}s timeout", duration.as_secs()) })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_response_carries_gateway_timeout_status() {
        let response = timeout_response(Duration::from_secs(5));
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
