use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of a recorded security event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SecurityEventKind {
    RateLimited,
    ForbiddenContent,
    AccountBlocked,
    SessionTimeout,
    SuspiciousActivity,
    ClientError,
}

impl SecurityEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::ForbiddenContent => "forbidden_content",
            Self::AccountBlocked => "account_blocked",
            Self::SessionTimeout => "session_timeout",
            Self::SuspiciousActivity => "suspicious_activity",
            Self::ClientError => "client_error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "rate_limited" => Self::RateLimited,
            "forbidden_content" => Self::ForbiddenContent,
            "account_blocked" => Self::AccountBlocked,
            "session_timeout" => Self::SessionTimeout,
            "suspicious_activity" => Self::SuspiciousActivity,
            "client_error" => Self::ClientError,
            _ => return None,
        })
    }
}

impl fmt::Display for SecurityEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityEvent {
    pub kind: SecurityEventKind,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn new(kind: SecurityEventKind, payload: serde_json::Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            payload,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_parse_back() {
        for kind in [
            SecurityEventKind::RateLimited,
            SecurityEventKind::ForbiddenContent,
            SecurityEventKind::AccountBlocked,
            SecurityEventKind::SessionTimeout,
            SecurityEventKind::SuspiciousActivity,
            SecurityEventKind::ClientError,
        ] {
            assert_eq!(SecurityEventKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(SecurityEventKind::parse("nope"), None);
    }
}
