//! Domain error taxonomy: admission, pipeline, and callback failures.
//!
//! These are caller-facing machine-readable reasons, not transport-level
//! errors — the HTTP and callback adapters in the service crate translate
//! a [`DispatchError`] into a status code or an `errorCode` field, the same
//! way this codebase's JSON-RPC surface translates its own domain errors at
//! the edge rather than leaking transport concerns into domain code.

use std::fmt;

/// A stable, machine-readable error kind forwarded to callers and into
/// terminal callback `errorCode` fields. Never changes shape based on
/// transport (HTTP vs. callback body).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchErrorKind {
    /// One or more of the timestamp/nonce/signature headers is absent.
    MissingAuth,
    /// The signature did not match, including a length mismatch.
    InvalidSignature,
    /// The timestamp header did not parse as an integer.
    InvalidTimestampFormat,
    /// The timestamp fell outside the signature validity window.
    StaleOrFutureTimestamp,
    /// The nonce was already observed within the validity window.
    ReplayedNonce,
    /// A task with this `taskId` is already live.
    DuplicateTask,
    /// The running-task count equals capacity.
    AtCapacity,
    /// The request body failed schema or field-constraint validation.
    InvalidRequest,
    /// Workspace allocation failed before the worker could run.
    WorkspaceAllocationFailed,
    /// The identity/token provider had no usable credential.
    TokenUnavailable,
    /// The worker subprocess could not be spawned.
    WorkerSpawnFailed,
    /// The worker exceeded its wall-clock timeout.
    WorkerTimeout,
    /// The worker exited successfully but never emitted a terminal marker.
    WorkerSilentExit,
    /// The worker emitted `__WORKER_FAILED__` with the given code.
    WorkerFailed,
    /// The sensitive-file guard could not revert every sensitive file.
    SensitiveRevertPartial,
    /// The callback endpoint returned a permanent (4xx, non-429) rejection.
    CallbackPermanentReject,
    /// A non-terminal callback exhausted its retry budget.
    CallbackExhausted,
    /// Signing a callback envelope failed — always a configuration bug.
    CallbackSigningError,
    /// Catch-all for anything else; always logged with full context.
    InternalError,
}

impl DispatchErrorKind {
    /// The stable machine-readable reason string sent to callers and into
    /// callback `errorCode` fields.
    pub fn as_reason(&self) -> &'static str {
        match self {
            Self::MissingAuth => "missing_auth",
            Self::InvalidSignature => "invalid_signature",
            Self::InvalidTimestampFormat => "invalid_timestamp_format",
            Self::StaleOrFutureTimestamp => "stale_or_future_timestamp",
            Self::ReplayedNonce => "replayed_nonce",
            Self::DuplicateTask => "duplicate_task",
            Self::AtCapacity => "at_capacity",
            Self::InvalidRequest => "invalid_request",
            Self::WorkspaceAllocationFailed => "workspace_allocation_failed",
            Self::TokenUnavailable => "token_unavailable",
            Self::WorkerSpawnFailed => "worker_spawn_failed",
            Self::WorkerTimeout => "worker_timeout",
            Self::WorkerSilentExit => "worker_silent_exit",
            Self::WorkerFailed => "worker_failed",
            Self::SensitiveRevertPartial => "sensitive_revert_partial",
            Self::CallbackPermanentReject => "callback_permanent_reject",
            Self::CallbackExhausted => "callback_exhausted",
            Self::CallbackSigningError => "callback_signing_error",
            Self::InternalError => "internal_error",
        }
    }

    /// Admission failures are reported to the HTTP caller synchronously;
    /// everything else only ever surfaces via a terminal callback or a log.
    pub fn is_admission_error(&self) -> bool {
        matches!(
            self,
            Self::MissingAuth
                | Self::InvalidSignature
                | Self::InvalidTimestampFormat
                | Self::StaleOrFutureTimestamp
                | Self::ReplayedNonce
                | Self::DuplicateTask
                | Self::AtCapacity
                | Self::InvalidRequest
        )
    }
}

impl fmt::Display for DispatchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_reason())
    }
}

/// A domain error, carrying its stable [`DispatchErrorKind`] plus an
/// optional human-readable detail for logs. The detail is never sent to an
/// external caller — only `kind.as_reason()` crosses the trust boundary.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct DispatchError {
    /// The stable, externally visible error kind.
    pub kind: DispatchErrorKind,
    detail: String,
}

impl DispatchError {
    /// Build an error with an internal detail message for logs.
    pub fn new(kind: DispatchErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Build an error whose detail is the same as its reason string.
    pub fn bare(kind: DispatchErrorKind) -> Self {
        let detail = kind.as_reason().to_string();
        Self { kind, detail }
    }

    /// The stable machine-readable reason string.
    pub fn reason(&self) -> &'static str {
        self.kind.as_reason()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_strings_match_spec_vocabulary() {
        assert_eq!(
            DispatchErrorKind::StaleOrFutureTimestamp.as_reason(),
            "stale_or_future_timestamp"
        );
        assert_eq!(DispatchErrorKind::AtCapacity.as_reason(), "at_capacity");
    }

    #[test]
    fn admission_classification_is_exhaustive_for_synchronous_reasons() {
        assert!(DispatchErrorKind::DuplicateTask.is_admission_error());
        assert!(!DispatchErrorKind::WorkerTimeout.is_admission_error());
        assert!(!DispatchErrorKind::CallbackExhausted.is_admission_error());
    }

    #[test]
    fn bare_error_detail_falls_back_to_reason() {
        let err = DispatchError::bare(DispatchErrorKind::TokenUnavailable);
        assert_eq!(err.reason(), "token_unavailable");
        assert!(err.to_string().contains("token_unavailable"));
    }
}
