//! Client configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use parley_guard::GuardConfig;
use parley_shared::constants::{HEARTBEAT_SECS, HISTORY_LIMIT, ONLINE_LIST_LIMIT};
use parley_store::database::default_data_dir;
use parley_store::StoreError;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Guard layer policy.
    pub guard: GuardConfig,

    /// Messages loaded when a conversation is opened.
    /// Env: `PARLEY_HISTORY_LIMIT`
    pub history_limit: usize,

    /// Presence heartbeat period.
    /// Env: `PARLEY_HEARTBEAT_SECS`
    pub heartbeat_interval: Duration,

    /// How often the idle session monitor is polled.
    /// Env: `PARLEY_SESSION_CHECK_SECS`
    pub session_check_interval: Duration,

    /// Maximum users returned by the online list.
    pub online_list_limit: usize,

    /// Directory holding the local database. `None` uses the platform
    /// data directory.
    /// Env: `PARLEY_DATA_DIR`
    pub data_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            guard: GuardConfig::default(),
            history_limit: HISTORY_LIMIT,
            heartbeat_interval: Duration::from_secs(HEARTBEAT_SECS),
            session_check_interval: Duration::from_secs(30),
            online_list_limit: ONLINE_LIST_LIMIT,
            data_dir: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self {
            guard: GuardConfig::from_env(),
            ..Self::default()
        };

        if let Ok(val) = std::env::var("PARLEY_HISTORY_LIMIT") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.history_limit = n,
                _ => tracing::warn!(value = %val, "Invalid PARLEY_HISTORY_LIMIT, using default"),
            }
        }

        if let Ok(val) = std::env::var("PARLEY_HEARTBEAT_SECS") {
            match val.parse::<u64>() {
                Ok(n) if n > 0 => config.heartbeat_interval = Duration::from_secs(n),
                _ => tracing::warn!(value = %val, "Invalid PARLEY_HEARTBEAT_SECS, using default"),
            }
        }

        if let Ok(val) = std::env::var("PARLEY_SESSION_CHECK_SECS") {
            match val.parse::<u64>() {
                Ok(n) if n > 0 => config.session_check_interval = Duration::from_secs(n),
                _ => tracing::warn!(value = %val, "Invalid PARLEY_SESSION_CHECK_SECS, using default"),
            }
        }

        if let Ok(dir) = std::env::var("PARLEY_DATA_DIR") {
            if !dir.trim().is_empty() {
                config.data_dir = Some(PathBuf::from(dir));
            }
        }

        config
    }

    /// Path of the local database file.
    pub fn database_path(&self) -> Result<PathBuf, StoreError> {
        let dir = match &self.data_dir {
            Some(dir) => dir.clone(),
            None => default_data_dir()?,
        };
        Ok(dir.join("parley.db"))
    }
}
