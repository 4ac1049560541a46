//! Failed-authentication lockout.
//!
//! Counts consecutive failures per identity. The Nth failure blocks the
//! identity for a fixed duration. Expiry is evaluated lazily at lookup:
//! once `blocked_until` has passed the record is treated as absent, even
//! though it stays stored until a success clears it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info};

use parley_shared::SecurityEventKind;

use crate::events::SecurityLog;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LockoutRecord {
    pub identity: String,
    pub failure_count: u32,
    pub first_failure_at: DateTime<Utc>,
    pub blocked_until: Option<DateTime<Utc>>,
}

impl LockoutRecord {
    fn new(identity: &str, now: DateTime<Utc>) -> Self {
        Self {
            identity: identity.to_string(),
            failure_count: 0,
            first_failure_at: now,
            blocked_until: None,
        }
    }

    pub fn is_blocked(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until.map_or(false, |until| until > now)
    }

    /// A block that has run out. Such a record counts as absent.
    fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until.map_or(false, |until| until <= now)
    }
}

/// Result of [`LockoutTracker::record_failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    pub blocked: bool,
    pub attempts: u32,
}

/// Result of [`LockoutTracker::is_blocked`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockStatus {
    pub blocked: bool,
    pub remaining: Duration,
}

#[derive(Clone)]
pub struct LockoutTracker {
    records: Arc<RwLock<HashMap<String, LockoutRecord>>>,
    max_failures: u32,
    block_for: Duration,
    log: Arc<SecurityLog>,
}

impl LockoutTracker {
    pub fn new(max_failures: u32, block_for: Duration, log: Arc<SecurityLog>) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            max_failures: max_failures.max(1),
            block_for,
            log,
        }
    }

    pub async fn record_failure(&self, identity: &str, now: DateTime<Utc>) -> FailureOutcome {
        let mut records = self.records.write().await;
        let record = records
            .entry(identity.to_string())
            .or_insert_with(|| LockoutRecord::new(identity, now));

        if record.is_lapsed(now) {
            *record = LockoutRecord::new(identity, now);
        }

        record.failure_count += 1;

        if record.is_blocked(now) {
            return FailureOutcome {
                blocked: true,
                attempts: record.failure_count,
            };
        }

        if record.failure_count >= self.max_failures {
            let until = now + self.block_for;
            record.blocked_until = Some(until);
            info!(identity, attempts = record.failure_count, until = %until, "Identity locked out");
            self.log.record(
                SecurityEventKind::AccountBlocked,
                json!({
                    "identity": identity,
                    "attempts": record.failure_count,
                    "blocked_until": until.to_rfc3339(),
                }),
                now,
            );
            return FailureOutcome {
                blocked: true,
                attempts: record.failure_count,
            };
        }

        debug!(identity, attempts = record.failure_count, "Failed authentication recorded");
        FailureOutcome {
            blocked: false,
            attempts: record.failure_count,
        }
    }

    /// Clear the record for `identity`.
    pub async fn record_success(&self, identity: &str) {
        if self.records.write().await.remove(identity).is_some() {
            debug!(identity, "Lockout record cleared");
        }
    }

    pub async fn is_blocked(&self, identity: &str, now: DateTime<Utc>) -> BlockStatus {
        let records = self.records.read().await;
        match records.get(identity).and_then(|r| r.blocked_until) {
            Some(until) if until > now => BlockStatus {
                blocked: true,
                remaining: until - now,
            },
            _ => BlockStatus {
                blocked: false,
                remaining: Duration::zero(),
            },
        }
    }

    /// Stored records, including lapsed ones.
    pub async fn snapshot(&self) -> Vec<LockoutRecord> {
        let records = self.records.read().await;
        let mut out: Vec<_> = records.values().cloned().collect();
        out.sort_by(|a, b| a.identity.cmp(&b.identity));
        out
    }

    pub async fn tracked_count(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn blocked_count(&self, now: DateTime<Utc>) -> usize {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.is_blocked(now))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> (LockoutTracker, Arc<SecurityLog>) {
        let log = Arc::new(SecurityLog::new(100));
        (
            LockoutTracker::new(5, Duration::minutes(5), log.clone()),
            log,
        )
    }

    #[tokio::test]
    async fn test_blocks_on_fifth_failure() {
        let (tracker, log) = tracker();
        let now = Utc::now();

        for attempt in 1..5 {
            let outcome = tracker.record_failure("u1", now).await;
            assert_eq!(outcome, FailureOutcome { blocked: false, attempts: attempt });
        }
        assert!(!tracker.is_blocked("u1", now).await.blocked);

        let outcome = tracker.record_failure("u1", now).await;
        assert_eq!(outcome, FailureOutcome { blocked: true, attempts: 5 });

        let status = tracker.is_blocked("u1", now).await;
        assert!(status.blocked);
        assert_eq!(status.remaining, Duration::minutes(5));

        let events = log.snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, SecurityEventKind::AccountBlocked);
        assert_eq!(events[0].payload["attempts"], 5);
    }

    #[tokio::test]
    async fn test_unblocks_once_clock_passes_blocked_until() {
        let (tracker, _) = tracker();
        let now = Utc::now();
        for _ in 0..5 {
            tracker.record_failure("u1", now).await;
        }

        let later = now + Duration::minutes(4);
        let status = tracker.is_blocked("u1", later).await;
        assert!(status.blocked);
        assert_eq!(status.remaining, Duration::minutes(1));

        let after = now + Duration::minutes(5);
        assert!(!tracker.is_blocked("u1", after).await.blocked);
        // Still stored until a success clears it.
        assert_eq!(tracker.tracked_count().await, 1);
        assert_eq!(tracker.blocked_count(after).await, 0);
    }

    #[tokio::test]
    async fn test_lapsed_record_counts_as_absent() {
        let (tracker, _) = tracker();
        let now = Utc::now();
        for _ in 0..5 {
            tracker.record_failure("u1", now).await;
        }

        let after = now + Duration::minutes(6);
        let outcome = tracker.record_failure("u1", after).await;
        assert_eq!(outcome, FailureOutcome { blocked: false, attempts: 1 });
        assert_eq!(tracker.snapshot().await[0].first_failure_at, after);
    }

    #[tokio::test]
    async fn test_success_clears_record() {
        let (tracker, _) = tracker();
        let now = Utc::now();
        for _ in 0..4 {
            tracker.record_failure("u1", now).await;
        }
        tracker.record_success("u1").await;
        assert_eq!(tracker.tracked_count().await, 0);
        assert_eq!(
            tracker.record_failure("u1", now).await,
            FailureOutcome { blocked: false, attempts: 1 }
        );
    }

    #[tokio::test]
    async fn test_identities_are_independent() {
        let (tracker, _) = tracker();
        let now = Utc::now();
        for _ in 0..5 {
            tracker.record_failure("u1", now).await;
        }
        assert!(tracker.is_blocked("u1", now).await.blocked);
        assert!(!tracker.is_blocked("u2", now).await.blocked);
    }
}
