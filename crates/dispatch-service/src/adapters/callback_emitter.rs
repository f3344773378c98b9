//! Ordered, retrying outbound callback delivery.
//!
//! Each live task owns one `tokio::sync::mpsc` channel; a single dedicated
//! delivery task reads it and delivers strictly in sequence, never starting
//! attempt `s+1` until attempt `s` has either succeeded or been classified.
//! Cross-task delivery proceeds concurrently since each task has its own
//! channel and delivery task.

use dispatch_core::{sign, CallbackEnvelope};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::ports::callback_transport::{CallbackTransport, DeliveryOutcome};

/// Retry tuning for the emitter, sourced from `CallbackConfig`.
#[derive(Debug, Clone)]
pub struct CallbackEmitterConfig {
    /// Attempt cap for non-terminal events before the drop is logged.
    pub max_attempts_non_terminal: u32,
    /// Initial backoff delay.
    pub backoff_base: Duration,
    /// Backoff ceiling.
    pub backoff_cap: Duration,
}

/// Owns delivery for every live task's outbox.
pub struct CallbackEmitter<T> {
    transport: Arc<T>,
    config: CallbackEmitterConfig,
}

impl<T> CallbackEmitter<T>
where
    T: CallbackTransport + 'static,
{
    /// Build an emitter over a shared transport.
    pub fn new(transport: Arc<T>, config: CallbackEmitterConfig) -> Self {
        Self { transport, config }
    }

    /// Spawn the ordered delivery task for one live task and return the
    /// sender the stream parser enqueues envelopes onto.
    pub fn spawn_outbox(&self, callback_url: String, callback_secret: String) -> mpsc::Sender<CallbackEnvelope> {
        let (tx, mut rx) = mpsc::channel::<CallbackEnvelope>(32);
        let transport = Arc::clone(&self.transport);
        let config = self.config.clone();

        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                deliver_with_retry(transport.as_ref(), &callback_url, &callback_secret, &envelope, &config).await;
            }
        });

        tx
    }
}

async fn deliver_with_retry<T: CallbackTransport>(
    transport: &T,
    url: &str,
    secret: &str,
    envelope: &CallbackEnvelope,
    config: &CallbackEmitterConfig,
) {
    let is_terminal = envelope.payload.is_terminal();

    let body = match envelope.canonical_body() {
        Ok(body) => body,
        Err(e) => {
            error!(task_id = %envelope.task_id, error = %e, "callback envelope failed to serialise");
            return;
        }
    };
    let message = match envelope.signing_message() {
        Ok(message) => message,
        Err(e) => {
            error!(task_id = %envelope.task_id, error = %e, "callback signing message failed to build");
            return;
        }
    };
    let signature = sign(secret.as_bytes(), message.as_bytes());
    let timestamp = envelope.timestamp.to_string();

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match transport.deliver(url, &body, &timestamp, &signature).await {
            DeliveryOutcome::Accepted => return,
            DeliveryOutcome::PermanentReject => {
                error!(
                    task_id = %envelope.task_id,
                    sequence = envelope.sequence,
                    "callback permanently rejected by the submitter"
                );
                return;
            }
            DeliveryOutcome::Transient => {
                if !is_terminal && attempt >= config.max_attempts_non_terminal {
                    warn!(
                        task_id = %envelope.task_id,
                        sequence = envelope.sequence,
                        attempts = attempt,
                        "dropping non-terminal callback after exhausting retry budget"
                    );
                    return;
                }
                let delay = backoff_with_jitter(attempt, config.backoff_base, config.backoff_cap);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn backoff_with_jitter(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let scaled = base.saturating_mul(1u32.checked_shl(exponent).unwrap_or(u32::MAX));
    let bounded = scaled.min(cap);
    let jittered_millis = rand::thread_rng().gen_range(0..=bounded.as_millis().max(1) as u64);
    Duration::from_millis(jittered_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_never_exceeds_the_configured_cap() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(30);
        for attempt in 1..20 {
            assert!(backoff_with_jitter(attempt, base, cap) <= cap);
        }
    }
}
