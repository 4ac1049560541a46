//! Guard configuration loaded from environment variables.
//!
//! Every setting has a default matching the production policy, so the guard
//! works with zero configuration.

use std::collections::HashSet;

use chrono::Duration;
use parley_shared::constants::{
    AUTO_BLOCK_SECS, DEFAULT_FORBIDDEN_TAGS, DEFAULT_MAX_REQUESTS_PER_MINUTE, MAX_FAILED_LOGINS,
    MAX_MESSAGE_LENGTH, RATE_WINDOW_SECS, SECURITY_LOG_CAPACITY, SESSION_TIMEOUT_SECS,
};

use crate::session::ActivitySignal;

#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Calls admitted per rolling window.
    /// Env: `PARLEY_MAX_REQUESTS_PER_MINUTE`
    pub max_requests_per_minute: usize,

    /// Length of the rolling rate-limit window.
    pub rate_window: Duration,

    /// Maximum message length in characters.
    /// Env: `PARLEY_MAX_MESSAGE_LENGTH`
    pub max_message_length: usize,

    /// Tags rejected when they appear as an opening tag (lowercase).
    /// Env: `PARLEY_FORBIDDEN_TAGS` (comma separated)
    pub forbidden_tags: Vec<String>,

    /// Consecutive failures before an identity is blocked.
    /// Env: `PARLEY_MAX_FAILED_LOGINS`
    pub max_failed_logins: u32,

    /// How long a blocked identity stays blocked.
    /// Env: `PARLEY_AUTO_BLOCK_SECS`
    pub auto_block_duration: Duration,

    /// Idle time after which the session is ended.
    /// Env: `PARLEY_SESSION_TIMEOUT_SECS`
    pub session_timeout: Duration,

    /// Signals that count as user activity.
    pub activity_signals: HashSet<ActivitySignal>,

    /// Security events kept in memory.
    pub security_log_capacity: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: DEFAULT_MAX_REQUESTS_PER_MINUTE,
            rate_window: Duration::seconds(RATE_WINDOW_SECS),
            max_message_length: MAX_MESSAGE_LENGTH,
            forbidden_tags: DEFAULT_FORBIDDEN_TAGS.iter().map(|t| t.to_string()).collect(),
            max_failed_logins: MAX_FAILED_LOGINS,
            auto_block_duration: Duration::seconds(AUTO_BLOCK_SECS),
            session_timeout: Duration::seconds(SESSION_TIMEOUT_SECS),
            activity_signals: ActivitySignal::ALL.into_iter().collect(),
            security_log_capacity: SECURITY_LOG_CAPACITY,
        }
    }
}

impl GuardConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(n) = parse_var::<usize>(&lookup, "PARLEY_MAX_REQUESTS_PER_MINUTE") {
            config.max_requests_per_minute = n;
        }

        if let Some(n) = parse_var::<usize>(&lookup, "PARLEY_MAX_MESSAGE_LENGTH") {
            config.max_message_length = n;
        }

        if let Some(tags) = lookup("PARLEY_FORBIDDEN_TAGS") {
            let tags: Vec<String> = tags
                .split(',')
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect();
            if !tags.is_empty() {
                config.forbidden_tags = tags;
            }
        }

        if let Some(n) = parse_var::<u32>(&lookup, "PARLEY_MAX_FAILED_LOGINS") {
            config.max_failed_logins = n.max(1);
        }

        if let Some(secs) = parse_var::<i64>(&lookup, "PARLEY_AUTO_BLOCK_SECS") {
            config.auto_block_duration = Duration::seconds(secs);
        }

        if let Some(secs) = parse_var::<i64>(&lookup, "PARLEY_SESSION_TIMEOUT_SECS") {
            config.session_timeout = Duration::seconds(secs);
        }

        config
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}
