//! Spawns the worker subprocess and streams its stdout to the parser.
//!
//! Graceful-then-forceful termination: `SIGTERM` via `nix::sys::signal::kill`
//! races a grace-window `tokio::time::sleep` against `Child::wait()` in
//! `tokio::select!`, falling back to `Child::kill()` (`SIGKILL`) on expiry —
//! the same deadline-race idiom this codebase uses to pit a shutdown signal
//! against a server future.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use super::stream_parser::{StreamEvent, StreamParser, TerminalKind};

/// Why the worker process ultimately exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The parser observed a `completed` marker and the process exited 0.
    Succeeded,
    /// The parser observed a `failed` marker, carrying its error code.
    ParserFailed(String),
    /// The process exited 0 but the parser never saw a terminal marker.
    SilentExit,
    /// The process exited non-zero without a parser-observed failure marker.
    NonZeroExit(i32),
    /// The overall wall-clock timeout elapsed before the process exited.
    TimedOut,
    /// The dispatcher latched cancellation before the process exited.
    Cancelled,
}

/// Spawns one worker process per task and drives it to completion.
pub struct WorkerRunner {
    /// Grace window between `SIGTERM` and `SIGKILL`.
    pub grace_window: Duration,
}

impl WorkerRunner {
    /// Build a runner with the configured grace window.
    pub fn new(grace_window: Duration) -> Self {
        Self { grace_window }
    }

    /// Run `worker_type` against `workspace_path` with `prompt` on stdin and
    /// `credential` exposed via `DISPATCH_WORKER_CREDENTIAL`, invoking
    /// `on_event` for every line-driven stream event as it arrives.
    ///
    /// `on_event` returns a future that the read loop awaits before asking
    /// for the next line. This is deliberate back-pressure: if the future
    /// stalls (e.g. a bounded callback outbox is full), the loop stops
    /// draining the worker's stdout pipe, which eventually blocks the
    /// worker's own writes to it.
    pub async fn run<F, Fut>(
        &self,
        worker_type: &str,
        workspace_path: &Path,
        prompt: &str,
        credential: &str,
        timeout: Duration,
        cancellation: CancellationToken,
        mut on_event: F,
    ) -> ExitReason
    where
        F: FnMut(StreamEvent) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let mut command = Command::new(worker_type);
        command
            .current_dir(workspace_path)
            .env("DISPATCH_WORKER_CREDENTIAL", credential)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(error = %e, "worker process failed to spawn");
                return ExitReason::NonZeroExit(-1);
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            let _ = stdin.write_all(prompt.as_bytes()).await;
            let _ = stdin.shutdown().await;
        }

        let stdout = child.stdout.take().expect("stdout was piped");
        drain_stderr(&mut child);

        let mut parser = StreamParser::new();
        let mut lines = BufReader::new(stdout).lines();

        loop {
            tokio::select! {
                biased;

                _ = cancellation.cancelled() => {
                    terminate(&mut child, self.grace_window).await;
                    return ExitReason::Cancelled;
                }
                _ = tokio::time::sleep(timeout) => {
                    terminate(&mut child, self.grace_window).await;
                    return ExitReason::TimedOut;
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            for event in parser.feed(&line) {
                                let terminal = matches!(event, StreamEvent::Succeeded | StreamEvent::Failed(_));
                                on_event(event).await;
                                if terminal {
                                    let status = child.wait().await;
                                    return classify_exit(&parser, status.ok().and_then(|s| s.code()));
                                }
                            }
                        }
                        Ok(None) => {
                            let status = child.wait().await;
                            return classify_exit(&parser, status.ok().and_then(|s| s.code()));
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "reading worker stdout failed");
                            let status = child.wait().await;
                            return classify_exit(&parser, status.ok().and_then(|s| s.code()));
                        }
                    }
                }
            }
        }
    }
}

fn classify_exit(parser: &StreamParser, exit_code: Option<i32>) -> ExitReason {
    match parser.terminal_kind() {
        Some(TerminalKind::Succeeded) => return ExitReason::Succeeded,
        Some(TerminalKind::Failed(code)) => return ExitReason::ParserFailed(code.clone()),
        None => {}
    }
    match exit_code {
        Some(0) => ExitReason::SilentExit,
        Some(code) => ExitReason::NonZeroExit(code),
        None => ExitReason::SilentExit,
    }
}

fn drain_stderr(child: &mut Child) {
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(worker_stderr = %line, "worker stderr");
            }
        });
    }
}

async fn terminate(child: &mut Child, grace_window: Duration) {
    if let Some(pid) = child.id() {
        let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }

    tokio::select! {
        _ = child.wait() => {}
        _ = tokio::time::sleep(grace_window) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_exit_prefers_the_parsers_terminal_observation() {
        let mut parser = StreamParser::new();
        parser.feed("line");
        parser.feed("__WORKER_DONE__");
        assert_eq!(classify_exit(&parser, Some(1)), ExitReason::Succeeded);
    }

    #[test]
    fn a_clean_exit_with_no_terminal_marker_is_silent() {
        let parser = StreamParser::new();
        assert_eq!(classify_exit(&parser, Some(0)), ExitReason::SilentExit);
    }

    #[test]
    fn a_nonzero_exit_with_no_terminal_marker_is_reported() {
        let parser = StreamParser::new();
        assert_eq!(classify_exit(&parser, Some(2)), ExitReason::NonZeroExit(2));
    }

    #[test]
    fn a_failed_marker_is_classified_as_parser_failed_not_succeeded() {
        let mut parser = StreamParser::new();
        parser.feed("line");
        parser.feed("__WORKER_FAILED__ boom");
        // The process itself may still exit 0 (the worker reported its own
        // failure on stdout and exited cleanly); the parser's observation
        // must win over a misleadingly-successful exit code.
        assert_eq!(
            classify_exit(&parser, Some(0)),
            ExitReason::ParserFailed("boom".to_string())
        );
    }
}
