/// Application name
pub const APP_NAME: &str = "Parley";

/// Rate limiter ceiling per rolling window
pub const DEFAULT_MAX_REQUESTS_PER_MINUTE: usize = 60;

/// Rolling rate-limit window in seconds
pub const RATE_WINDOW_SECS: i64 = 60;

/// Maximum message length in characters (after trimming and after escaping)
pub const MAX_MESSAGE_LENGTH: usize = 2000;

/// Tags rejected when they appear as an opening tag
pub const DEFAULT_FORBIDDEN_TAGS: [&str; 4] = ["script", "iframe", "object", "embed"];

/// A single character repeated this many times in a row is spam
pub const SPAM_CHAR_RUN: usize = 11;

/// A single word repeated this many times in a row is spam
pub const SPAM_WORD_RUN: usize = 6;

/// Consecutive failed logins before an identity is blocked
pub const MAX_FAILED_LOGINS: u32 = 5;

/// Lockout duration in seconds (5 minutes)
pub const AUTO_BLOCK_SECS: i64 = 300;

/// Idle session timeout in seconds (1 hour)
pub const SESSION_TIMEOUT_SECS: i64 = 3600;

/// Security events kept in memory before the oldest is evicted
pub const SECURITY_LOG_CAPACITY: usize = 100;

/// Content shown in place of a soft-deleted message
pub const DELETED_PLACEHOLDER: &str = "[Message deleted]";

/// Previews longer than this are truncated
pub const PREVIEW_MAX_CHARS: usize = 30;

/// Characters kept when a preview is truncated
pub const PREVIEW_KEEP_CHARS: usize = 27;

/// Marker appended to a truncated preview
pub const PREVIEW_ELLIPSIS: &str = "...";

/// Messages loaded when a conversation is opened
pub const HISTORY_LIMIT: usize = 50;

/// Presence heartbeat interval in seconds
pub const HEARTBEAT_SECS: u64 = 30;

/// Maximum number of entries in the online list
pub const ONLINE_LIST_LIMIT: usize = 15;

/// Length of an emailed one-time code
pub const ONE_TIME_CODE_LEN: usize = 6;

/// Local state key holding the identity awaiting code verification
pub const PENDING_EMAIL_KEY: &str = "pendingEmail";

/// Username length bounds
pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 20;
