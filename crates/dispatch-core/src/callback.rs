//! The outbound callback envelope delivered to a task's submitter.

use serde::{Deserialize, Serialize};

/// Diagnostics attached to a `completed` event when the sensitive-file guard
/// could not revert every sensitive file it found.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallbackDiagnostics {
    /// Paths the guard classified `sensitive` but failed to revert.
    #[serde(rename = "revertFailures")]
    pub revert_failures: Vec<String>,
}

/// The kind-specific portion of a callback, tagged by the envelope's
/// `status` field on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallbackPayload {
    /// Emitted exactly once, on the worker's first non-empty stdout line.
    Started,
    /// Emitted per recognised or opaque progress marker.
    Progress {
        /// The progress text, recognised or forwarded opaquely.
        #[serde(rename = "progressText")]
        progress_text: String,
    },
    /// Terminal: the worker succeeded and the sensitive-file guard ran.
    Completed {
        /// Opaque reference to the worker's result, if any.
        #[serde(rename = "resultRef", skip_serializing_if = "Option::is_none")]
        result_ref: Option<String>,
        /// Sensitive files the guard reverted.
        #[serde(
            rename = "revertedFiles",
            skip_serializing_if = "Vec::is_empty",
            default
        )]
        reverted_files: Vec<String>,
        /// Present only when some sensitive files could not be reverted.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        diagnostics: Option<CallbackDiagnostics>,
    },
    /// Terminal: the worker failed, timed out, or the pipeline errored.
    Failed {
        /// Machine-readable error kind, from [`crate::DispatchErrorKind`].
        #[serde(rename = "errorCode")]
        error_code: String,
    },
    /// Terminal: caller-initiated cancellation or an all-sensitive diff.
    Cancelled {
        /// e.g. `"all_changes_sensitive"` when the guard reverted everything.
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl CallbackPayload {
    /// Whether this payload kind corresponds to a task leaving `running`
    /// for good — used by the emitter to pick the terminal-vs-non-terminal
    /// retry policy.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }
}

/// A single outbound callback, signed and delivered in order per task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallbackEnvelope {
    /// The task this event concerns.
    pub task_id: String,
    /// Monotonically increasing per-task cursor, starting at 1.
    pub sequence: u64,
    /// Epoch seconds at emission.
    pub timestamp: u64,
    /// The kind-specific payload, flattened so `status` sits alongside the
    /// envelope's other top-level fields on the wire.
    #[serde(flatten)]
    pub payload: CallbackPayload,
}

impl CallbackEnvelope {
    /// Build a new envelope. `sequence` and `timestamp` are supplied by the
    /// caller (the emitter draws them from the task record and the clock).
    pub fn new(task_id: impl Into<String>, sequence: u64, timestamp: u64, payload: CallbackPayload) -> Self {
        Self {
            task_id: task_id.into(),
            sequence,
            timestamp,
            payload,
        }
    }

    /// The canonical JSON body signed and sent on the wire.
    pub fn canonical_body(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// The exact message HMAC-signed under the per-task `callbackSecret`:
    /// `timestamp + "." + canonical(body)`.
    pub fn signing_message(&self) -> Result<String, serde_json::Error> {
        Ok(format!("{}.{}", self.timestamp, self.canonical_body()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn started_event_serializes_with_bare_status() {
        let env = CallbackEnvelope::new("t-1", 1, 1_000, CallbackPayload::Started);
        let body = env.canonical_body().unwrap();
        assert!(body.contains("\"status\":\"started\""));
        assert!(body.contains("\"taskId\":\"t-1\""));
    }

    #[test]
    fn progress_event_carries_progress_text() {
        let env = CallbackEnvelope::new(
            "t-1",
            2,
            1_000,
            CallbackPayload::Progress {
                progress_text: "hello".to_string(),
            },
        );
        let body = env.canonical_body().unwrap();
        assert!(body.contains("\"progressText\":\"hello\""));
    }

    #[test]
    fn completed_event_omits_empty_reverted_files_and_diagnostics() {
        let env = CallbackEnvelope::new(
            "t-1",
            3,
            1_000,
            CallbackPayload::Completed {
                result_ref: None,
                reverted_files: Vec::new(),
                diagnostics: None,
            },
        );
        let body = env.canonical_body().unwrap();
        assert!(!body.contains("revertedFiles"));
        assert!(!body.contains("diagnostics"));
    }

    #[test]
    fn completed_event_with_partial_revert_failure_carries_diagnostics() {
        let env = CallbackEnvelope::new(
            "t-1",
            3,
            1_000,
            CallbackPayload::Completed {
                result_ref: None,
                reverted_files: Vec::new(),
                diagnostics: Some(CallbackDiagnostics {
                    revert_failures: vec![".env".to_string()],
                }),
            },
        );
        let body = env.canonical_body().unwrap();
        assert!(body.contains("\"revertFailures\":[\".env\"]"));
    }

    #[test]
    fn terminal_classification_matches_the_three_terminal_kinds() {
        assert!(!CallbackPayload::Started.is_terminal());
        assert!(!CallbackPayload::Progress { progress_text: "x".into() }.is_terminal());
        assert!(CallbackPayload::Failed { error_code: "worker_timeout".into() }.is_terminal());
        assert!(CallbackPayload::Cancelled { reason: None }.is_terminal());
    }

    #[test]
    fn signing_message_is_timestamp_dot_canonical_body() {
        let env = CallbackEnvelope::new("t-1", 1, 1_000, CallbackPayload::Started);
        let msg = env.signing_message().unwrap();
        assert!(msg.starts_with("1000."));
        assert!(msg.ends_with(&env.canonical_body().unwrap()));
    }
}
