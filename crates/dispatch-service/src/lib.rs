//! Task-dispatch worker orchestrator.
//!
//! Accepts signed task submissions, admits them under a concurrency bound,
//! provisions an isolated git-worktree workspace per task, runs an external
//! worker subprocess, guards its commits against sensitive-file leakage, and
//! delivers signed, ordered lifecycle callbacks to the submitter.
//!
//! # Architecture
//!
//! ```text
//! POST /tasks ──► auth ──► Dispatcher::submit ──► tokio::spawn(run_pipeline)
//!                                                        │
//!                      ┌─────────────────────────────────┼──────────────────────┐
//!                      ▼                ▼                ▼              ▼       ▼
//!                 WorkspaceManager  TokenProvider   WorkerRunner   SensitiveGuard CallbackEmitter
//! ```
//!
//! `dispatcher` is the composition root; `ports` defines the trait seams
//! above, and `adapters` holds their production implementations.

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod dispatcher;
pub mod domain;
pub mod middleware;
pub mod ports;
pub mod router;
pub mod service;

pub use dispatcher::{CancelOutcome, Dispatcher, DispatcherStatus, SubmitRejection};
pub use domain::config::DispatchConfig;
pub use domain::error::{AdmissionRejection, ServiceError};
pub use domain::types::*;
pub use service::run;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!VERSION.is_empty());
    }
}
