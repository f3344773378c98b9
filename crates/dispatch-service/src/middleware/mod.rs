//! Middleware stack for the dispatch HTTP surface.
//!
//! Layer order on the admission-guarded routes: tracing → timeout →
//! request-body-size-limit → auth → handler. `/tasks/:id` reads/cancels and
//! `/health` skip the auth layer; everything else shares the same stack.

pub mod auth;
pub mod timeout;
pub mod tracing;

pub use auth::{AuthConfig, AuthLayer};
pub use timeout::TimeoutLayer;
pub use tracing::TracingLayer;

use dispatch_core::NonceCache;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::config::DispatchConfig;

/// Bundles the stateful middleware layers built from a loaded configuration.
pub struct MiddlewareStack {
    /// Signed-request verification, applied to `/tasks` and `/admin/*`.
    pub auth: AuthLayer,
    /// Overall per-request wall-clock budget.
    pub timeout: TimeoutLayer,
    /// Span-per-request tracing.
    pub tracing: TracingLayer,
}

impl MiddlewareStack {
    /// Build the stack from a validated config and the shared nonce cache.
    pub fn from_config(config: &DispatchConfig, nonce_cache: Arc<NonceCache>) -> Self {
        Self {
            auth: AuthLayer::new(AuthConfig::new(
                config.security.shared_secret.clone(),
                nonce_cache,
            )),
            timeout: TimeoutLayer::new(
                config
                    .http
                    .admission_parse_timeout
                    .max(Duration::from_secs(1)),
            ),
            tracing: TracingLayer::new(),
        }
    }
}
