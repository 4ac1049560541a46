//! The [`Guard`] facade.
//!
//! One instance per process. Clones share the same rate-limit window,
//! lockout table and security log.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use parley_shared::{Clock, CoreError, IdentityProvider, SecurityEvent, SecurityEventKind};

use crate::config::GuardConfig;
use crate::events::SecurityLog;
use crate::lockout::{FailureOutcome, LockoutRecord, LockoutTracker};
use crate::rate_limit::{Admission, RateLimiter};
use crate::session::SessionMonitor;
use crate::validator::{MarkupThreat, Validator};

#[derive(Clone)]
pub struct Guard {
    config: Arc<GuardConfig>,
    clock: Arc<dyn Clock>,
    limiter: RateLimiter,
    validator: Arc<Validator>,
    lockout: LockoutTracker,
    log: Arc<SecurityLog>,
}

/// Point-in-time counters for diagnostics.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct GuardStats {
    pub requests_in_window: usize,
    pub tracked_identities: usize,
    pub blocked_identities: usize,
    pub logged_events: usize,
}

/// Policy in effect, in plain seconds.
#[derive(Debug, Clone, Serialize)]
pub struct PolicySummary {
    pub max_requests_per_minute: usize,
    pub rate_window_secs: i64,
    pub max_message_length: usize,
    pub forbidden_tags: Vec<String>,
    pub max_failed_logins: u32,
    pub auto_block_secs: i64,
    pub session_timeout_secs: i64,
}

/// Everything the guard knows, for audit export.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityReport {
    pub exported_at: DateTime<Utc>,
    pub policy: PolicySummary,
    pub stats: GuardStats,
    pub events: Vec<SecurityEvent>,
    pub lockouts: Vec<LockoutRecord>,
}

impl Guard {
    pub fn new(config: GuardConfig, clock: Arc<dyn Clock>) -> Self {
        let log = Arc::new(SecurityLog::new(config.security_log_capacity));
        let limiter = RateLimiter::new(config.max_requests_per_minute, config.rate_window);
        let validator = Validator::new(config.max_message_length, config.forbidden_tags.clone());
        let lockout = LockoutTracker::new(
            config.max_failed_logins,
            config.auto_block_duration,
            log.clone(),
        );
        Self {
            config: Arc::new(config),
            clock,
            limiter,
            validator: Arc::new(validator),
            lockout,
            log,
        }
    }

    /// Admit one outbound call. Rejections are logged as `RateLimited`.
    pub async fn admit(&self, operation: &str) -> Result<(), CoreError> {
        let now = self.clock.now();
        match self.limiter.admit(now).await {
            Admission::Allowed => Ok(()),
            Admission::Rejected { in_window } => {
                self.log.record(
                    SecurityEventKind::RateLimited,
                    json!({ "operation": operation, "requests_in_window": in_window }),
                    now,
                );
                Err(CoreError::RateLimited)
            }
        }
    }

    /// Validate message text. Markup rejections are logged as
    /// `ForbiddenContent`.
    pub fn validate_message(&self, text: &str) -> Result<String, CoreError> {
        self.validator.validate(text).map_err(|reason| {
            if let parley_shared::RejectReason::ForbiddenMarkup { tag } = &reason {
                self.log.record(
                    SecurityEventKind::ForbiddenContent,
                    json!({ "tag": tag, "length": text.chars().count() }),
                    self.clock.now(),
                );
            } else {
                debug!(%reason, "Message rejected");
            }
            CoreError::ValidationFailed(reason)
        })
    }

    /// Inspect markup about to be rendered. Hits are logged as
    /// `SuspiciousActivity`.
    pub fn inspect_markup(&self, fragment: &str) -> Option<MarkupThreat> {
        let threat = self.validator.inspect_markup(fragment)?;
        let detail = match &threat {
            MarkupThreat::ForbiddenTag(tag) => json!({ "threat": "forbidden_tag", "tag": tag }),
            MarkupThreat::ScriptUrl => json!({ "threat": "script_url" }),
        };
        self.log
            .record(SecurityEventKind::SuspiciousActivity, detail, self.clock.now());
        Some(threat)
    }

    /// Refuse locally while `identity` is blocked.
    pub async fn check_login_allowed(&self, identity: &str) -> Result<(), CoreError> {
        let status = self.lockout.is_blocked(identity, self.clock.now()).await;
        if status.blocked {
            return Err(CoreError::LockedOut {
                remaining: status.remaining,
            });
        }
        Ok(())
    }

    pub async fn record_login_failure(&self, identity: &str) -> FailureOutcome {
        self.lockout.record_failure(identity, self.clock.now()).await
    }

    pub async fn record_login_success(&self, identity: &str) {
        self.lockout.record_success(identity).await
    }

    /// A monitor for a freshly started session.
    pub fn session_monitor(&self, idp: Arc<dyn IdentityProvider>) -> SessionMonitor {
        SessionMonitor::new(
            self.config.session_timeout,
            self.config.activity_signals.clone(),
            idp,
            self.log.clone(),
            self.clock.now(),
        )
    }

    /// Record an unexpected client-side failure.
    pub fn report_client_error(&self, context: &str, message: &str) {
        self.log.record(
            SecurityEventKind::ClientError,
            json!({ "context": context, "message": message }),
            self.clock.now(),
        );
    }

    pub async fn stats(&self) -> GuardStats {
        let now = self.clock.now();
        GuardStats {
            requests_in_window: self.limiter.in_window(now).await,
            tracked_identities: self.lockout.tracked_count().await,
            blocked_identities: self.lockout.blocked_count(now).await,
            logged_events: self.log.len(),
        }
    }

    pub async fn export(&self) -> SecurityReport {
        let config = &self.config;
        SecurityReport {
            exported_at: self.clock.now(),
            policy: PolicySummary {
                max_requests_per_minute: config.max_requests_per_minute,
                rate_window_secs: config.rate_window.num_seconds(),
                max_message_length: config.max_message_length,
                forbidden_tags: config.forbidden_tags.clone(),
                max_failed_logins: config.max_failed_logins,
                auto_block_secs: config.auto_block_duration.num_seconds(),
                session_timeout_secs: config.session_timeout.num_seconds(),
            },
            stats: self.stats().await,
            events: self.log.snapshot(),
            lockouts: self.lockout.snapshot().await,
        }
    }

    pub fn log(&self) -> &Arc<SecurityLog> {
        &self.log
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use parley_shared::{ManualClock, RejectReason};

    fn guard() -> (Guard, ManualClock) {
        let clock = ManualClock::new(Utc::now());
        (Guard::new(GuardConfig::default(), Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_rate_limit_rejection_is_logged() {
        let (guard, _) = guard();
        for _ in 0..60 {
            guard.admit("send").await.unwrap();
        }
        assert_eq!(guard.admit("send").await, Err(CoreError::RateLimited));

        let events = guard.log().snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, SecurityEventKind::RateLimited);
        assert_eq!(events[0].payload["requests_in_window"], 60);
    }

    #[tokio::test]
    async fn test_window_slides_with_clock() {
        let (guard, clock) = guard();
        guard.admit("send").await.unwrap();
        clock.advance(Duration::seconds(30));
        for _ in 0..59 {
            guard.admit("send").await.unwrap();
        }
        assert!(guard.admit("send").await.is_err());

        clock.advance(Duration::seconds(30));
        guard.admit("send").await.unwrap();
    }

    #[tokio::test]
    async fn test_forbidden_markup_is_logged() {
        let (guard, _) = guard();
        let err = guard.validate_message("<script>x</script>").unwrap_err();
        assert_eq!(
            err,
            CoreError::ValidationFailed(RejectReason::ForbiddenMarkup {
                tag: "script".into()
            })
        );
        assert_eq!(guard.log().snapshot()[0].kind, SecurityEventKind::ForbiddenContent);

        // Plain rejections are not security events.
        assert!(guard.validate_message("   ").is_err());
        assert_eq!(guard.log().len(), 1);
    }

    #[tokio::test]
    async fn test_login_lockout_and_expiry() {
        let (guard, clock) = guard();
        for _ in 0..5 {
            guard.record_login_failure("u1").await;
        }

        match guard.check_login_allowed("u1").await {
            Err(CoreError::LockedOut { remaining }) => assert_eq!(remaining, Duration::minutes(5)),
            other => panic!("expected lockout, got {other:?}"),
        }

        clock.advance(Duration::minutes(5));
        assert!(guard.check_login_allowed("u1").await.is_ok());
    }

    #[tokio::test]
    async fn test_inspect_markup_flags_script_urls() {
        let (guard, _) = guard();
        assert_eq!(
            guard.inspect_markup(r#"<a href="JavaScript:alert(1)">x</a>"#),
            Some(MarkupThreat::ScriptUrl)
        );
        assert_eq!(guard.inspect_markup("<b>fine</b>"), None);
        assert_eq!(guard.log().len(), 1);
    }

    #[tokio::test]
    async fn test_stats_and_export() {
        let (guard, _) = guard();
        guard.admit("send").await.unwrap();
        guard.record_login_failure("u1").await;
        guard.report_client_error("render", "boom");

        let stats = guard.stats().await;
        assert_eq!(
            stats,
            GuardStats {
                requests_in_window: 1,
                tracked_identities: 1,
                blocked_identities: 0,
                logged_events: 1,
            }
        );

        let report = guard.export().await;
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["policy"]["session_timeout_secs"], 3600);
        assert_eq!(json["lockouts"][0]["identity"], "u1");
        assert_eq!(json["events"].as_array().unwrap().len(), 1);
    }
}
