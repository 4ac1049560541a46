use parley_shared::CoreError;
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The record does not exist or is no longer live.
    #[error("Record not found")]
    NotFound,

    /// The actor does not own the record.
    #[error("Not allowed to modify this record")]
    Unauthorized,

    /// A uniqueness rule would be broken.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Conversation membership rules were broken.
    #[error("Invalid conversation: {0}")]
    InvalidConversation(String),

    /// Transient failure reaching the store.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Chrono parsing error.
    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),

    /// JSON payload error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => CoreError::NotFound,
            StoreError::Unauthorized => CoreError::Unauthorized,
            StoreError::Unavailable(msg) => CoreError::NetworkFailure(msg),
            // Rejected by the store for any other reason.
            other => {
                tracing::debug!(error = %other, "Store rejected request");
                CoreError::Unauthorized
            }
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maps_into_core_errors() {
        assert_eq!(CoreError::from(StoreError::NotFound), CoreError::NotFound);
        assert_eq!(CoreError::from(StoreError::Unauthorized), CoreError::Unauthorized);
        assert!(CoreError::from(StoreError::Unavailable("timeout".into())).is_retryable());
        assert_eq!(
            CoreError::from(StoreError::Conflict("dup".into())),
            CoreError::Unauthorized
        );
    }
}
