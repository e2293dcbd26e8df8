//! Configuration for the mission runtime.
//!
//! Provides [`RuntimeConfig`], the handful of numeric knobs the core engine
//! needs defaults for. Users construct this manually — no TOML, YAML, or HCL
//! parsing dependency is introduced here; that belongs to whatever CLI or
//! config layer embeds this crate.
//!
//! # Example
//!
//! ```rust
//! use missionrt::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::default();
//! assert_eq!(config.default_concurrency_limit, 5);
//!
//! let config = RuntimeConfig {
//!     default_concurrency_limit: 10,
//!     ..RuntimeConfig::default()
//! };
//! assert_eq!(config.default_concurrency_limit, 10);
//! ```

/// Global configuration for the mission runtime's core engine.
///
/// This struct is intentionally minimal; callers construct it however they
/// want. No config-file parsing dependencies are introduced.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Size threshold above which a tool result is intercepted into the
    /// result store instead of being returned inline.
    pub result_intercept_threshold_bytes: usize,
    /// Number of items sampled into the inline summary for an intercepted
    /// array-shaped result.
    pub result_sample_items: usize,
    /// Byte budget for the inline summary of an intercepted scalar/object
    /// result.
    pub result_sample_bytes: usize,
    /// Default cap on simultaneously in-flight dataset items in parallel
    /// iteration mode, used when a task does not declare its own.
    pub default_concurrency_limit: usize,
    /// Default number of retry attempts for a failed iteration, used when a
    /// task does not declare its own.
    pub default_max_retries: usize,
    /// Token budget enforced on a commander session's trimmed conversation
    /// history.
    pub commander_max_tokens: usize,
    /// Token budget enforced on an agent session's trimmed conversation
    /// history.
    pub agent_max_tokens: usize,
    /// Soft cap, in tool-turns, on how long an isolated ask-commander query
    /// loop will run before giving up.
    pub ask_commander_timeout: usize,
}

impl Default for RuntimeConfig {
    /// Create a config with the runtime's baseline defaults.
    ///
    /// # Example
    ///
    /// ```rust
    /// use missionrt::config::RuntimeConfig;
    ///
    /// let config = RuntimeConfig::default();
    /// assert_eq!(config.result_intercept_threshold_bytes, 8 * 1024);
    /// assert_eq!(config.ask_commander_timeout, 50);
    /// ```
    fn default() -> Self {
        Self {
            result_intercept_threshold_bytes: 8 * 1024,
            result_sample_items: 20,
            result_sample_bytes: 2 * 1024,
            default_concurrency_limit: 5,
            default_max_retries: 0,
            commander_max_tokens: 128_000,
            agent_max_tokens: 128_000,
            ask_commander_timeout: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_values() {
        let config = RuntimeConfig::default();
        assert_eq!(config.result_sample_items, 20);
        assert_eq!(config.default_max_retries, 0);
        assert_eq!(config.commander_max_tokens, 128_000);
        assert_eq!(config.agent_max_tokens, 128_000);
    }

    #[test]
    fn struct_update_syntax_overrides_one_field() {
        let config = RuntimeConfig {
            default_concurrency_limit: 1,
            ..RuntimeConfig::default()
        };
        assert_eq!(config.default_concurrency_limit, 1);
        assert_eq!(config.default_max_retries, 0);
    }
}
