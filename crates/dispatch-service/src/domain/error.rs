//! Internal and startup-facing errors, and the edge conversion from a
//! [`dispatch_core::DispatchError`] into an HTTP response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dispatch_core::{DispatchError, DispatchErrorKind};
use serde::Serialize;

use crate::domain::config::ConfigError;

/// Internal, never-externally-visible service errors: startup misconfiguration,
/// bind failures, and anything else that is process-fatal rather than
/// per-task.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Configuration failed validation.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// The HTTP listener could not bind.
    #[error("server bind error: {0}")]
    Bind(String),
    /// The shared base repository could not be opened.
    #[error("base repository error: {0}")]
    BaseRepository(String),
    /// Catch-all for anything else encountered during startup.
    #[error("internal error: {0}")]
    Internal(String),
}

/// The JSON error body returned to HTTP callers. Carries only the stable
/// machine-readable reason, never internal detail.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable reason, e.g. `"at_capacity"`.
    pub error: &'static str,
}

/// Maps an admission-time [`DispatchError`] to its HTTP status, per the
/// external-interface table: 401 for any auth failure, 409 for duplicates,
/// 503 at capacity, 400 otherwise.
pub fn admission_status_code(kind: DispatchErrorKind) -> StatusCode {
    match kind {
        DispatchErrorKind::MissingAuth
        | DispatchErrorKind::InvalidSignature
        | DispatchErrorKind::InvalidTimestampFormat
        | DispatchErrorKind::StaleOrFutureTimestamp
        | DispatchErrorKind::ReplayedNonce => StatusCode::UNAUTHORIZED,
        DispatchErrorKind::DuplicateTask => StatusCode::CONFLICT,
        DispatchErrorKind::AtCapacity => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_REQUEST,
    }
}

/// Wrapper so admission errors can be returned directly from an axum handler.
/// Never leaks which specific auth check failed: every auth-family kind is
/// reported as the single external reason `invalid_signature` per §6.
pub struct AdmissionRejection(pub DispatchError);

impl IntoResponse for AdmissionRejection {
    fn into_response(self) -> Response {
        let kind = self.0.kind;
        let status = admission_status_code(kind);
        let reason = if status == StatusCode::UNAUTHORIZED {
            "invalid_signature"
        } else {
            kind.as_reason()
        };
        (status, Json(ErrorBody { error: reason })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_family_errors_all_map_to_401() {
        for kind in [
            DispatchErrorKind::MissingAuth,
            DispatchErrorKind::InvalidSignature,
            DispatchErrorKind::InvalidTimestampFormat,
            DispatchErrorKind::StaleOrFutureTimestamp,
            DispatchErrorKind::ReplayedNonce,
        ] {
            assert_eq!(admission_status_code(kind), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn duplicate_and_capacity_map_to_their_documented_codes() {
        assert_eq!(
            admission_status_code(DispatchErrorKind::DuplicateTask),
            StatusCode::CONFLICT
        );
        assert_eq!(
            admission_status_code(DispatchErrorKind::AtCapacity),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn auth_failures_never_reveal_which_check_failed() {
        let err = AdmissionRejection(DispatchError::bare(DispatchErrorKind::ReplayedNonce));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
