use chrono::Duration;
use thiserror::Error;

/// Why the validator refused a piece of text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    #[error("Message is empty")]
    Empty,

    #[error("Message too long: {len} chars (max {max})")]
    TooLong { len: usize, max: usize },

    #[error("Message contains forbidden tag <{tag}>")]
    ForbiddenMarkup { tag: String },

    #[error("Possible spam detected")]
    SpamPattern,

    #[error("Invalid email address")]
    InvalidEmail,

    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    #[error("Code must be {} digits", crate::constants::ONE_TIME_CODE_LEN)]
    MalformedCode,
}

/// Error taxonomy surfaced by the chat core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Too many requests, try again later")]
    RateLimited,

    #[error("Validation failed: {0}")]
    ValidationFailed(RejectReason),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Network failure: {0}")]
    NetworkFailure(String),

    #[error("Not found")]
    NotFound,

    #[error("Too many failed attempts, blocked for {}s", remaining.num_seconds())]
    LockedOut { remaining: Duration },

    #[error("No active session")]
    SessionClosed,
}

impl CoreError {
    /// Whether the user may retry the operation as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::NetworkFailure(_))
    }
}

impl From<RejectReason> for CoreError {
    fn from(reason: RejectReason) -> Self {
        CoreError::ValidationFailed(reason)
    }
}

/// Failures reported by the identity provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid code")]
    InvalidCode,

    #[error("Code expired")]
    CodeExpired,

    #[error("Identity provider unreachable: {0}")]
    Network(String),
}

impl From<AuthError> for CoreError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCode | AuthError::CodeExpired => CoreError::Unauthorized,
            AuthError::Network(msg) => CoreError::NetworkFailure(msg),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CoreError>;
