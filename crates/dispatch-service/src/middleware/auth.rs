//! Signed-request verification middleware.
//!
//! Applied selectively to `/tasks` and `/admin/*` (see `router.rs`): buffers
//! the request body, runs it through [`dispatch_core::verify_signed_request`]
//! against the shared nonce cache, and rejects with [`AdmissionRejection`] on
//! any failure before the inner handler ever sees the request.

use axum::body::{to_bytes, Body};
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use dispatch_core::{verify_signed_request, DispatchError, DispatchErrorKind, NonceCache, SignedRequest};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tower::{Layer, Service};

use crate::domain::error::AdmissionRejection;

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared configuration for the signed-request verifier.
#[derive(Clone)]
pub struct AuthConfig {
    /// HMAC shared secret used to verify `/tasks` and `/admin/*` requests.
    pub shared_secret: Arc<str>,
    /// Replay cache shared across every request this middleware sees.
    pub nonce_cache: Arc<NonceCache>,
}

impl AuthConfig {
    /// Build a new config from the service's configured secret and cache.
    pub fn new(shared_secret: impl Into<Arc<str>>, nonce_cache: Arc<NonceCache>) -> Self {
        Self {
            shared_secret: shared_secret.into(),
            nonce_cache,
        }
    }
}

/// Layer that wraps inner routes with signed-request verification.
#[derive(Clone)]
pub struct AuthLayer {
    config: Arc<AuthConfig>,
}

impl AuthLayer {
    /// Build a new layer from a config.
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            config: Arc::clone(&self.config),
        }
    }
}

/// Service that performs the verification before delegating to `inner`.
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    config: Arc<AuthConfig>,
}

impl<S> Service<Request<Body>> for AuthService<S>
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
        let config = Arc::clone(&self.config);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let (parts, body) = req.into_parts();

            let timestamp = header_str(&parts.headers, "x-dispatch-timestamp");
            let nonce = header_str(&parts.headers, "x-dispatch-nonce");
            let signature = header_str(&parts.headers, "x-dispatch-signature");

            let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
                Ok(bytes) => bytes,
                Err(_) => {
                    return Ok(AdmissionRejection(DispatchError::bare(
                        DispatchErrorKind::InvalidRequest,
                    ))
                    .into_response())
                }
            };

            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);

            let signed = SignedRequest {
                timestamp: timestamp.as_deref(),
                nonce: nonce.as_deref(),
                signature: signature.as_deref(),
                raw_body: &bytes,
            };

            if let Err(err) = verify_signed_request(
                &signed,
                config.shared_secret.as_bytes(),
                now,
                Some(&config.nonce_cache),
            ) {
                return Ok(AdmissionRejection(err).into_response());
            }

            let req = Request::from_parts(parts, Body::from(bytes));
            inner.call(req).await
        })
    }
}

fn header_str(headers: &axum::http::HeaderMap, name: &str) -> Option<String> {
    headers.get(name)?.to_str().ok().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::sign;

    #[test]
    fn header_str_returns_none_for_absent_header() {
        let headers = axum::http::HeaderMap::new();
        assert!(header_str(&headers, "x-dispatch-timestamp").is_none());
    }

    #[test]
    fn header_str_reads_a_present_header() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("x-dispatch-nonce", "abc".parse().unwrap());
        assert_eq!(header_str(&headers, "x-dispatch-nonce").as_deref(), Some("abc"));
    }

    #[test]
    fn a_correctly_signed_body_verifies_against_the_cache() {
        let cache = NonceCache::new(300);
        let secret = b"0123456789abcdef0123456789abcdef";
        let body = br#"{"taskId":"t-1"}"#;
        let message = format!("1000.n-1.{}", std::str::from_utf8(body).unwrap());
        let signature = sign(secret, message.as_bytes());

        let req = SignedRequest {
            timestamp: Some("1000"),
            nonce: Some("n-1"),
            signature: Some(&signature),
            raw_body: body,
        };

        assert!(verify_signed_request(&req, secret, 1000, Some(&cache)).is_ok());
    }
}
