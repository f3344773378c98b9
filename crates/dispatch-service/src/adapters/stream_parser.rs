//! Worker stdout parser: a plain runtime state machine, not the type-state
//! pattern this codebase uses elsewhere for statically-known lifecycles. The
//! parser's states are driven by untrusted subprocess output observed by a
//! single owning task, so there is no out-of-band mutation for a type-state
//! coordinator to guard against.

/// Lifecycle state of a single task's output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    Initial,
    Running,
    Terminal,
}

/// An event produced by feeding one line of worker stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Emitted exactly once, on the first non-empty line after spawn.
    Started,
    /// An unrecognised line, forwarded verbatim as progress text.
    Progress(String),
    /// The `__WORKER_DONE__` marker was observed.
    Succeeded,
    /// The `__WORKER_FAILED__ <code>` marker was observed.
    Failed(String),
}

const DONE_MARKER: &str = "__WORKER_DONE__";
const FAILED_MARKER: &str = "__WORKER_FAILED__";

/// Which terminal marker a parser landed on, for callers that need to tell
/// a clean completion apart from a reported failure after the fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalKind {
    /// The `__WORKER_DONE__` marker was observed.
    Succeeded,
    /// The `__WORKER_FAILED__ <code>` marker was observed, carrying its code.
    Failed(String),
}

/// Consumes worker stdout line-by-line and produces ordered lifecycle
/// events. Never reorders: callers observe events in the exact order `feed`
/// produced them.
#[derive(Debug, Default)]
pub struct StreamParser {
    state: ParserState,
    terminal_kind: Option<TerminalKind>,
}

impl Default for ParserState {
    fn default() -> Self {
        ParserState::Initial
    }
}

impl StreamParser {
    /// Build a parser in its initial state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a terminal marker has already been observed; once true,
    /// further lines produce no events (first terminal marker wins).
    pub fn is_terminal(&self) -> bool {
        self.state == ParserState::Terminal
    }

    /// Which terminal marker was observed, if any. `None` until `feed` has
    /// seen `__WORKER_DONE__` or `__WORKER_FAILED__`.
    pub fn terminal_kind(&self) -> Option<&TerminalKind> {
        self.terminal_kind.as_ref()
    }

    /// Feed one line of worker stdout (without its trailing newline).
    /// A line can produce zero, one, or two events: a blank line before
    /// anything has been seen produces none; the first non-empty line
    /// produces `Started` followed by that line's own classification;
    /// every subsequent line produces exactly one event until a terminal
    /// marker is observed, after which nothing more is emitted.
    pub fn feed(&mut self, line: &str) -> Vec<StreamEvent> {
        let mut events = Vec::with_capacity(2);

        if self.state == ParserState::Terminal || line.is_empty() {
            return events;
        }

        if self.state == ParserState::Initial {
            self.state = ParserState::Running;
            events.push(StreamEvent::Started);
        }

        if line == DONE_MARKER {
            self.state = ParserState::Terminal;
            self.terminal_kind = Some(TerminalKind::Succeeded);
            events.push(StreamEvent::Succeeded);
        } else if let Some(code) = line.strip_prefix(FAILED_MARKER) {
            let code = code.trim().to_string();
            self.state = ParserState::Terminal;
            self.terminal_kind = Some(TerminalKind::Failed(code.clone()));
            events.push(StreamEvent::Failed(code));
        } else {
            events.push(StreamEvent::Progress(line.to_string()));
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_happy_path_emits_started_progress_then_succeeded() {
        let mut parser = StreamParser::new();
        assert_eq!(parser.feed("hello"), vec![StreamEvent::Started, StreamEvent::Progress("hello".into())]);
        assert_eq!(parser.feed(DONE_MARKER), vec![StreamEvent::Succeeded]);
        assert!(parser.is_terminal());
    }

    #[test]
    fn blank_lines_before_any_output_produce_no_events() {
        let mut parser = StreamParser::new();
        assert!(parser.feed("").is_empty());
        assert!(!parser.is_terminal());
    }

    #[test]
    fn a_failed_marker_carries_its_error_code() {
        let mut parser = StreamParser::new();
        parser.feed("working");
        assert_eq!(
            parser.feed("__WORKER_FAILED__ boom"),
            vec![StreamEvent::Failed("boom".to_string())]
        );
    }

    #[test]
    fn once_terminal_no_further_lines_produce_events() {
        let mut parser = StreamParser::new();
        parser.feed("line");
        parser.feed(DONE_MARKER);
        assert!(parser.feed("late line").is_empty());
    }

    #[test]
    fn the_first_terminal_marker_wins_if_both_appear() {
        let mut parser = StreamParser::new();
        parser.feed("line");
        assert_eq!(parser.feed(DONE_MARKER), vec![StreamEvent::Succeeded]);
        assert!(parser.feed("__WORKER_FAILED__ too-late").is_empty());
    }
}
