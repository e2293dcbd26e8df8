//! Tagged-segment streaming parser.
//!
//! Commander and agent sessions ask the model to structure every reply into
//! a sequence of tagged segments, one per line-prefixed tag:
//!
//! ```text
//! REASONING: I should check the weather first.
//! ACTION: http_get
//! ACTION_INPUT: {"url": "https://example.com/weather"}
//! ___STOP___
//! ```
//!
//! [`SegmentParser`] is a single-threaded, append-only state machine that
//! turns a sequence of streamed text chunks into a [`ParsedSegments`]
//! accumulator. It never buffers more than the trailing partial line of a
//! chunk, so a tag split across two network reads (`"ACTION_IN"` + `"PUT:
//! ..."`) is reassembled correctly.

use std::collections::HashMap;
use std::fmt;

/// The terminator line that ends a tagged-segment reply.
pub const STOP_MARKER: &str = "___STOP___";

/// The kind of tagged segment a line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    /// Free-form chain-of-thought text, never shown to the end user.
    Reasoning,
    /// The name of a tool to invoke.
    Action,
    /// The JSON input for the tool named by the preceding `Action` segment.
    ActionInput,
    /// A final natural-language answer (agent sessions).
    Answer,
    /// A structured JSON output payload (commander sessions on iterated
    /// tasks).
    Output,
    /// A free-form note persisted to the knowledge store once the task
    /// completes.
    Learnings,
    /// A question addressed to the owning commander from a sub-agent, or
    /// from one commander to another.
    AskCommander,
}

impl SegmentKind {
    /// The line-prefix tag recognised for this segment, e.g. `"REASONING:"`.
    fn tag(self) -> &'static str {
        match self {
            SegmentKind::Reasoning => "REASONING:",
            SegmentKind::Action => "ACTION:",
            SegmentKind::ActionInput => "ACTION_INPUT:",
            SegmentKind::Answer => "ANSWER:",
            SegmentKind::Output => "OUTPUT:",
            SegmentKind::Learnings => "LEARNINGS:",
            SegmentKind::AskCommander => "ASK_COMMANDER:",
        }
    }

    /// All recognised segment kinds, checked in this order when a new line
    /// arrives. Order matters only in that no tag is a prefix of another.
    const ALL: [SegmentKind; 7] = [
        SegmentKind::Reasoning,
        SegmentKind::Action,
        SegmentKind::ActionInput,
        SegmentKind::Answer,
        SegmentKind::Output,
        SegmentKind::Learnings,
        SegmentKind::AskCommander,
    ];

    fn from_line(line: &str) -> Option<(SegmentKind, &str)> {
        for kind in SegmentKind::ALL {
            if let Some(rest) = line.strip_prefix(kind.tag()) {
                return Some((kind, rest.trim_start()));
            }
        }
        None
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag().trim_end_matches(':'))
    }
}

/// Accumulated content for every segment kind observed so far, plus whether
/// the stream has reached its `___STOP___` terminator.
#[derive(Debug, Clone, Default)]
pub struct ParsedSegments {
    segments: HashMap<SegmentKind, String>,
    /// True once the `___STOP___` terminator line has been consumed.
    pub stopped: bool,
}

impl ParsedSegments {
    /// The accumulated text for a segment kind, if any line tagged with it
    /// was seen.
    pub fn get(&self, kind: SegmentKind) -> Option<&str> {
        self.segments.get(&kind).map(|s| s.as_str())
    }

    /// Convenience accessor for the `REASONING` segment.
    pub fn reasoning(&self) -> Option<&str> {
        self.get(SegmentKind::Reasoning)
    }

    /// Convenience accessor for the `ACTION` segment.
    pub fn action(&self) -> Option<&str> {
        self.get(SegmentKind::Action)
    }

    /// Convenience accessor for the `ACTION_INPUT` segment.
    pub fn action_input(&self) -> Option<&str> {
        self.get(SegmentKind::ActionInput)
    }

    /// Convenience accessor for the `ANSWER` segment.
    pub fn answer(&self) -> Option<&str> {
        self.get(SegmentKind::Answer)
    }

    /// Convenience accessor for the `OUTPUT` segment.
    pub fn output(&self) -> Option<&str> {
        self.get(SegmentKind::Output)
    }

    /// Convenience accessor for the `LEARNINGS` segment.
    pub fn learnings(&self) -> Option<&str> {
        self.get(SegmentKind::Learnings)
    }

    /// Convenience accessor for the `ASK_COMMANDER` segment.
    pub fn ask_commander(&self) -> Option<&str> {
        self.get(SegmentKind::AskCommander)
    }

    fn append(&mut self, kind: SegmentKind, text: &str) {
        let entry = self.segments.entry(kind).or_default();
        if !entry.is_empty() {
            entry.push('\n');
        }
        entry.push_str(text);
    }
}

/// A streaming, single-threaded tagged-segment parser.
///
/// Feed it chunks as they arrive from the provider with [`SegmentParser::feed`];
/// once all chunks for a turn have been fed, call [`SegmentParser::finish`] to
/// flush any trailing partial line and obtain the final [`ParsedSegments`].
///
/// # Example
///
/// ```rust
/// use missionrt::segment_parser::{SegmentParser, SegmentKind};
///
/// let mut parser = SegmentParser::new();
/// parser.feed("REASONING: checking the weather\nACTION: http_");
/// parser.feed("get\nACTION_INPUT: {\"url\": \"https://x\"}\n___STOP___\n");
/// let parsed = parser.finish();
/// assert!(parsed.stopped);
/// assert_eq!(parsed.action(), Some("http_get"));
/// assert_eq!(parsed.reasoning(), Some("checking the weather"));
/// ```
pub struct SegmentParser {
    parsed: ParsedSegments,
    current: Option<SegmentKind>,
    /// Trailing text not yet terminated by a newline; carried across `feed`
    /// calls so a tag split across chunk boundaries is not misclassified.
    pending_line: String,
}

impl SegmentParser {
    /// Create an empty parser with no segments observed yet.
    pub fn new() -> Self {
        SegmentParser {
            parsed: ParsedSegments::default(),
            current: None,
            pending_line: String::new(),
        }
    }

    /// Feed the next chunk of streamed text into the parser.
    ///
    /// Complete lines (terminated by `\n`) are processed immediately; any
    /// trailing partial line is retained in an internal buffer and
    /// prepended to the next chunk fed in.
    pub fn feed(&mut self, chunk: &str) {
        if self.parsed.stopped {
            return;
        }
        self.pending_line.push_str(chunk);
        loop {
            match self.pending_line.find('\n') {
                Some(idx) => {
                    let line: String = self.pending_line.drain(..=idx).collect();
                    self.process_line(line.trim_end_matches(['\n', '\r']));
                    if self.parsed.stopped {
                        self.pending_line.clear();
                        break;
                    }
                }
                None => break,
            }
        }
    }

    /// Flush the trailing partial line (if not empty and the stream didn't
    /// stop mid-line) and return the accumulated segments.
    pub fn finish(mut self) -> ParsedSegments {
        if !self.parsed.stopped && !self.pending_line.is_empty() {
            let line = std::mem::take(&mut self.pending_line);
            self.process_line(&line);
        }
        self.parsed
    }

    fn process_line(&mut self, line: &str) {
        if line == STOP_MARKER {
            self.parsed.stopped = true;
            return;
        }
        if let Some((kind, rest)) = SegmentKind::from_line(line) {
            self.current = Some(kind);
            if !rest.is_empty() {
                self.parsed.append(kind, rest);
            }
            return;
        }
        if let Some(kind) = self.current {
            self.parsed.append(kind, line);
        }
        // Lines before any tag has been seen are discarded: the protocol
        // requires every reply to open with a recognised tag.
    }
}

impl Default for SegmentParser {
    fn default() -> Self {
        Self::new()
    }
}
