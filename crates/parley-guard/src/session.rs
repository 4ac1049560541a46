//! Idle session monitor.
//!
//! `Active` stays `Active` while configured activity signals keep arriving.
//! Once the idle timeout elapses since the most recent signal the monitor
//! moves to `Expired`, logs a `SessionTimeout` event and asks the identity
//! provider to sign out exactly once. A failed sign-out is returned to the
//! caller but the monitor stays `Expired`.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use parley_shared::{CoreError, IdentityProvider, SecurityEventKind};

use crate::events::SecurityLog;

/// Inputs that count as user activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivitySignal {
    PointerMove,
    KeyPress,
    Scroll,
    Touch,
    Click,
}

impl ActivitySignal {
    pub const ALL: [ActivitySignal; 5] = [
        ActivitySignal::PointerMove,
        ActivitySignal::KeyPress,
        ActivitySignal::Scroll,
        ActivitySignal::Touch,
        ActivitySignal::Click,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Expired,
}

#[derive(Debug)]
struct MonitorState {
    state: SessionState,
    last_activity: DateTime<Utc>,
}

pub struct SessionMonitor {
    timeout: Duration,
    signals: HashSet<ActivitySignal>,
    idp: Arc<dyn IdentityProvider>,
    log: Arc<SecurityLog>,
    inner: Mutex<MonitorState>,
}

impl SessionMonitor {
    pub fn new(
        timeout: Duration,
        signals: HashSet<ActivitySignal>,
        idp: Arc<dyn IdentityProvider>,
        log: Arc<SecurityLog>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            timeout,
            signals,
            idp,
            log,
            inner: Mutex::new(MonitorState {
                state: SessionState::Active,
                last_activity: now,
            }),
        }
    }

    /// Note user activity. Signals outside the configured set, and anything
    /// arriving after expiry, are ignored.
    pub async fn record_activity(&self, signal: ActivitySignal, now: DateTime<Utc>) {
        if !self.signals.contains(&signal) {
            return;
        }
        let mut inner = self.inner.lock().await;
        if inner.state == SessionState::Active && now > inner.last_activity {
            inner.last_activity = now;
        }
    }

    /// Check for idle expiry.
    ///
    /// Returns the state after the check. The transition to `Expired` happens
    /// at most once; only that call issues the sign-out.
    pub async fn poll(&self, now: DateTime<Utc>) -> Result<SessionState, CoreError> {
        let idle_for = {
            let mut inner = self.inner.lock().await;
            if inner.state == SessionState::Expired {
                return Ok(SessionState::Expired);
            }
            let idle_for = now - inner.last_activity;
            if idle_for < self.timeout {
                return Ok(SessionState::Active);
            }
            inner.state = SessionState::Expired;
            idle_for
        };

        info!(idle_secs = idle_for.num_seconds(), "Session expired after inactivity");
        self.log.record(
            SecurityEventKind::SessionTimeout,
            json!({ "idle_secs": idle_for.num_seconds() }),
            now,
        );

        match self.idp.sign_out().await {
            Ok(()) => Ok(SessionState::Expired),
            Err(e) => {
                error!("Sign-out after session timeout failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Start a fresh `Active` period, e.g. after a new sign-in.
    pub async fn restart(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().await;
        inner.state = SessionState::Active;
        inner.last_activity = now;
        debug!("Session monitor restarted");
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    pub async fn last_activity(&self) -> DateTime<Utc> {
        self.inner.lock().await.last_activity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::{AuthError, ManualClock, MemoryIdentityProvider};

    fn monitor(now: DateTime<Utc>) -> (SessionMonitor, Arc<MemoryIdentityProvider>, Arc<SecurityLog>) {
        let clock = Arc::new(ManualClock::new(now));
        let idp = Arc::new(MemoryIdentityProvider::new(clock));
        let log = Arc::new(SecurityLog::new(10));
        let monitor = SessionMonitor::new(
            Duration::hours(1),
            ActivitySignal::ALL.into_iter().collect(),
            idp.clone(),
            log.clone(),
            now,
        );
        (monitor, idp, log)
    }

    #[tokio::test]
    async fn test_activity_keeps_session_alive() {
        let start = Utc::now();
        let (monitor, idp, _) = monitor(start);

        monitor.record_activity(ActivitySignal::KeyPress, start + Duration::minutes(50)).await;
        let state = monitor.poll(start + Duration::minutes(100)).await.unwrap();
        assert_eq!(state, SessionState::Active);
        assert_eq!(idp.sign_out_calls(), 0);
    }

    #[tokio::test]
    async fn test_expires_once_and_signs_out_once() {
        let start = Utc::now();
        let (monitor, idp, log) = monitor(start);

        let later = start + Duration::hours(1);
        assert_eq!(monitor.poll(later).await.unwrap(), SessionState::Expired);
        assert_eq!(monitor.poll(later + Duration::seconds(1)).await.unwrap(), SessionState::Expired);

        assert_eq!(idp.sign_out_calls(), 1);
        let events = log.snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, SecurityEventKind::SessionTimeout);
    }

    #[tokio::test]
    async fn test_failed_sign_out_is_surfaced_and_state_is_expired() {
        let start = Utc::now();
        let (monitor, idp, _) = monitor(start);
        idp.set_fail_sign_out(true);

        let err = monitor.poll(start + Duration::hours(2)).await.unwrap_err();
        assert!(matches!(err, CoreError::NetworkFailure(_)));
        assert_eq!(monitor.state().await, SessionState::Expired);

        // No retry.
        monitor.poll(start + Duration::hours(3)).await.unwrap();
        assert_eq!(idp.sign_out_calls(), 1);
    }

    #[tokio::test]
    async fn test_activity_after_expiry_is_ignored() {
        let start = Utc::now();
        let (monitor, _, _) = monitor(start);
        monitor.poll(start + Duration::hours(1)).await.unwrap();

        monitor.record_activity(ActivitySignal::Click, start + Duration::hours(2)).await;
        assert_eq!(monitor.state().await, SessionState::Expired);

        monitor.restart(start + Duration::hours(2)).await;
        assert_eq!(monitor.state().await, SessionState::Active);
    }

    #[tokio::test]
    async fn test_unconfigured_signal_does_not_count() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let idp = Arc::new(MemoryIdentityProvider::new(clock));
        let monitor = SessionMonitor::new(
            Duration::hours(1),
            [ActivitySignal::KeyPress].into_iter().collect(),
            idp,
            Arc::new(SecurityLog::new(10)),
            start,
        );

        monitor.record_activity(ActivitySignal::PointerMove, start + Duration::minutes(59)).await;
        assert_eq!(monitor.last_activity().await, start);
        assert_eq!(
            monitor.poll(start + Duration::hours(1)).await,
            Ok(SessionState::Expired)
        );
    }

    #[test]
    fn test_auth_error_maps_to_network_failure() {
        let err: CoreError = AuthError::Network("down".into()).into();
        assert!(err.is_retryable());
    }
}
