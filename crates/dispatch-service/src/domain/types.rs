//! Wire-facing request and response DTOs for the HTTP surface.

use dispatch_core::TaskStatus;
use serde::{Deserialize, Serialize};

/// Body of `POST /tasks`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitTaskRequest {
    /// Unique identifier among currently-live tasks, 1-128 chars.
    pub task_id: String,
    /// Opaque tag passed to the worker runner.
    pub worker_type: String,
    /// Opaque payload forwarded to the worker.
    pub prompt: String,
    /// Absolute URL the status callbacks are POSTed to.
    pub callback_url: String,
    /// Per-task shared secret used to sign outbound callbacks, >= 32 chars.
    pub callback_secret: String,
    /// Revision the workspace is rooted at; defaults to the workspace
    /// manager's configured default when omitted.
    pub base_revision: Option<String>,
    /// Wall-clock timeout override, 1..=7200 seconds.
    pub timeout_seconds: Option<u64>,
}

impl SubmitTaskRequest {
    /// Field-level validation beyond what `serde` checks, per §6's table.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.task_id.is_empty() || self.task_id.len() > 128 {
            return Err("taskId must be 1-128 characters");
        }
        if self.worker_type.is_empty() {
            return Err("workerType must be non-empty");
        }
        if self.prompt.is_empty() {
            return Err("prompt must be non-empty");
        }
        if self.callback_secret.len() < 32 {
            return Err("callbackSecret must be at least 32 characters");
        }
        if let Some(t) = self.timeout_seconds {
            if t == 0 || t > 7200 {
                return Err("timeoutSeconds must be between 1 and 7200");
            }
        }
        Ok(())
    }

    /// Whether `callbackUrl` parses as an absolute URL with the required
    /// scheme. `require_https` mirrors the production posture in
    /// `HttpConfig::require_https_callbacks`.
    pub fn validate_callback_url(&self, require_https: bool) -> Result<(), &'static str> {
        let parsed =
            url::Url::parse(&self.callback_url).map_err(|_| "callbackUrl must be an absolute URL")?;
        if require_https && parsed.scheme() != "https" {
            return Err("callbackUrl must use https");
        }
        Ok(())
    }
}

/// `202` response body on successful admission.
#[derive(Debug, Serialize)]
pub struct SubmitTaskResponse {
    /// Echo of the submitted `taskId`.
    pub task_id: String,
    /// Always `"queued"` on this response path.
    pub status: &'static str,
}

/// Response body for `GET /tasks/:id` and a successful `DELETE /tasks/:id`.
#[derive(Debug, Serialize)]
pub struct TaskSnapshot {
    /// The task identifier.
    pub task_id: String,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Opaque tag passed to the worker runner.
    pub worker_type: String,
    /// Epoch seconds at submission.
    pub created_at: u64,
    /// Epoch seconds at slot grant, if granted.
    pub started_at: Option<u64>,
    /// Epoch seconds at terminal transition, if terminal.
    pub ended_at: Option<u64>,
}

/// Response body for `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `"ready"` while accepting submissions, `"draining"` after shutdown.
    pub status: &'static str,
    /// Configured capacity.
    pub capacity: usize,
    /// Current running count.
    pub running: usize,
    /// `capacity - running`.
    pub available: usize,
    /// Epoch seconds the current credential expires at, if one is held.
    pub token_expires_at: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> SubmitTaskRequest {
        SubmitTaskRequest {
            task_id: "t-1".to_string(),
            worker_type: "echo".to_string(),
            prompt: "hello".to_string(),
            callback_url: "https://cb.test/t1".to_string(),
            callback_secret: "s".repeat(32),
            base_revision: None,
            timeout_seconds: Some(60),
        }
    }

    #[test]
    fn a_well_formed_request_validates() {
        assert!(base_request().validate().is_ok());
        assert!(base_request().validate_callback_url(true).is_ok());
    }

    #[test]
    fn a_short_callback_secret_is_rejected() {
        let mut req = base_request();
        req.callback_secret = "short".to_string();
        assert!(req.validate().is_err());
    }

    #[test]
    fn an_out_of_range_timeout_is_rejected() {
        let mut req = base_request();
        req.timeout_seconds = Some(10_000);
        assert!(req.validate().is_err());
    }

    #[test]
    fn http_callback_url_is_rejected_when_https_is_required() {
        let mut req = base_request();
        req.callback_url = "http://cb.test/t1".to_string();
        assert!(req.validate_callback_url(true).is_err());
        assert!(req.validate_callback_url(false).is_ok());
    }
}
