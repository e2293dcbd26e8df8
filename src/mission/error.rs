//! Error taxonomy for the mission runtime.
//!
//! A single [`MissionError`] enum carries every failure category the runtime
//! observes — from fatal construction-time problems (cyclic DAGs, bad
//! inputs) to retry-eligible per-iteration failures (tool errors, output
//! validation) to mission-level cancellation. Tool failures carry a
//! [`ToolErrorKind`] classification so callers can decide whether a retry is
//! worth attempting without re-parsing the error message themselves.

use std::error::Error;
use std::fmt;

/// Classification of a tool-execution failure, derived from message substring
/// matching against the observed error text.
///
/// Only [`ToolErrorKind::Timeout`], [`ToolErrorKind::Network`], and
/// [`ToolErrorKind::RateLimit`] are considered retryable by
/// [`ToolErrorKind::is_retryable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolErrorKind {
    /// The call exceeded a deadline (`timeout`, `deadline`).
    Timeout,
    /// A network/connection fault (`network`, `HTTP`, `connection`).
    Network,
    /// The provider or tool signalled rate limiting (`429`, `rate limit`).
    RateLimit,
    /// The target resource did not exist (`404`, `not found`).
    NotFound,
    /// The call was rejected on credentials (`401`, `403`, `unauthorized`).
    Auth,
    /// None of the known substrings matched.
    Unknown,
}

impl ToolErrorKind {
    /// Classify a raw error message using the substring rules from the spec's
    /// error taxonomy.
    ///
    /// # Examples
    ///
    /// ```
    /// use missionrt::error::ToolErrorKind;
    ///
    /// assert_eq!(ToolErrorKind::classify("connection timeout after 30s"), ToolErrorKind::Timeout);
    /// assert_eq!(ToolErrorKind::classify("got HTTP 502 from upstream"), ToolErrorKind::Network);
    /// assert_eq!(ToolErrorKind::classify("429 too many requests"), ToolErrorKind::RateLimit);
    /// assert_eq!(ToolErrorKind::classify("404 not found"), ToolErrorKind::NotFound);
    /// assert_eq!(ToolErrorKind::classify("401 unauthorized"), ToolErrorKind::Auth);
    /// assert_eq!(ToolErrorKind::classify("the disk caught fire"), ToolErrorKind::Unknown);
    /// ```
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("timeout") || lower.contains("deadline") {
            ToolErrorKind::Timeout
        } else if lower.contains("network")
            || lower.contains("http")
            || lower.contains("connection")
        {
            ToolErrorKind::Network
        } else if lower.contains("429") || lower.contains("rate limit") {
            ToolErrorKind::RateLimit
        } else if lower.contains("404") || lower.contains("not found") {
            ToolErrorKind::NotFound
        } else if lower.contains("401") || lower.contains("403") || lower.contains("unauthorized")
        {
            ToolErrorKind::Auth
        } else {
            ToolErrorKind::Unknown
        }
    }

    /// Whether an error of this kind should be retried by the iteration engine.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ToolErrorKind::Timeout | ToolErrorKind::Network | ToolErrorKind::RateLimit
        )
    }
}

impl fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ToolErrorKind::Timeout => "timeout",
            ToolErrorKind::Network => "network",
            ToolErrorKind::RateLimit => "rate_limit",
            ToolErrorKind::NotFound => "not_found",
            ToolErrorKind::Auth => "auth",
            ToolErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// The unified error type surfaced by every mission-runtime component.
///
/// Variants map one-to-one onto the error taxonomy in the spec's error
/// handling design: construction-time failures are fatal, `Tool` and
/// `OutputValidation` are retry-eligible inside the iteration engine, and
/// `Cancellation` propagates straight through the scheduler.
#[derive(Debug, Clone)]
pub enum MissionError {
    /// Input type coercion, missing required input, cyclic DAG, or an
    /// unresolved task/dataset reference. Fatal at mission construction.
    ConfigResolution(String),
    /// A dataset's bind-to-input was missing/non-list, or an item failed its
    /// declared schema. Fatal before the owning task begins.
    DatasetResolution(String),
    /// The LLM provider returned an error, a network fault occurred, or a
    /// stream was interrupted. Retry-eligible at the iteration level.
    Llm(String),
    /// A tool call failed, classified per [`ToolErrorKind`].
    Tool {
        /// The tool name that failed.
        tool_name: String,
        /// Classification derived from the raw message.
        kind: ToolErrorKind,
        /// The raw message reported by the tool or transport.
        message: String,
    },
    /// A required output field was missing or null in the parsed `<OUTPUT>`
    /// block. Retry-eligible.
    OutputValidation {
        /// The task whose output failed validation.
        task_name: String,
        /// The required field names that were missing.
        missing_fields: Vec<String>,
    },
    /// A clone-based ancestor or ask-commander query failed. Fatal to the
    /// requesting task.
    DependencyContext(String),
    /// The mission's execution was cancelled.
    Cancellation,
}

impl MissionError {
    /// Whether this error is eligible for the iteration engine's retry policy.
    ///
    /// # Examples
    ///
    /// ```
    /// use missionrt::error::{MissionError, ToolErrorKind};
    ///
    /// let e = MissionError::Tool {
    ///     tool_name: "http".into(),
    ///     kind: ToolErrorKind::Timeout,
    ///     message: "timeout".into(),
    /// };
    /// assert!(e.is_retryable());
    ///
    /// let e = MissionError::Cancellation;
    /// assert!(!e.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            MissionError::Llm(_) => true,
            MissionError::Tool { kind, .. } => kind.is_retryable(),
            MissionError::OutputValidation { .. } => true,
            _ => false,
        }
    }
}

impl fmt::Display for MissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissionError::ConfigResolution(msg) => write!(f, "config resolution error: {}", msg),
            MissionError::DatasetResolution(msg) => write!(f, "dataset resolution error: {}", msg),
            MissionError::Llm(msg) => write!(f, "llm error: {}", msg),
            MissionError::Tool {
                tool_name,
                kind,
                message,
            } => write!(f, "tool '{}' failed ({}): {}", tool_name, kind, message),
            MissionError::OutputValidation {
                task_name,
                missing_fields,
            } => write!(
                f,
                "task '{}' output missing required fields: {}",
                task_name,
                missing_fields.join(", ")
            ),
            MissionError::DependencyContext(msg) => write!(f, "dependency context error: {}", msg),
            MissionError::Cancellation => write!(f, "mission cancelled"),
        }
    }
}

impl Error for MissionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_picks_first_matching_rule() {
        assert_eq!(
            ToolErrorKind::classify("request timed out"),
            ToolErrorKind::Timeout
        );
        assert_eq!(ToolErrorKind::classify("HTTP 503"), ToolErrorKind::Network);
        assert_eq!(
            ToolErrorKind::classify("429 Too Many Requests"),
            ToolErrorKind::RateLimit
        );
    }

    #[test]
    fn only_three_kinds_are_retryable() {
        assert!(ToolErrorKind::Timeout.is_retryable());
        assert!(ToolErrorKind::Network.is_retryable());
        assert!(ToolErrorKind::RateLimit.is_retryable());
        assert!(!ToolErrorKind::NotFound.is_retryable());
        assert!(!ToolErrorKind::Auth.is_retryable());
        assert!(!ToolErrorKind::Unknown.is_retryable());
    }

    #[test]
    fn output_validation_is_retryable() {
        let e = MissionError::OutputValidation {
            task_name: "t".into(),
            missing_fields: vec!["price".into()],
        };
        assert!(e.is_retryable());
    }
}
