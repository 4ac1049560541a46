//! Capped, append-only security event log.
//!
//! Holds the most recent events in a ring buffer (oldest evicted first),
//! mirrors each one to `tracing`, and fans them out to live subscribers
//! such as an audit view. Events stay process-local until a caller drains
//! them for persistence.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::warn;

use parley_shared::{SecurityEvent, SecurityEventKind};

#[derive(Debug, Default)]
struct LogState {
    events: VecDeque<SecurityEvent>,
    /// Number of events at the back of `events` not yet drained.
    unflushed: usize,
}

pub struct SecurityLog {
    capacity: usize,
    state: Mutex<LogState>,
    tx: broadcast::Sender<SecurityEvent>,
}

impl SecurityLog {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(LogState::default()),
            tx,
        }
    }

    /// Append an event, evicting the oldest one when full.
    pub fn record(
        &self,
        kind: SecurityEventKind,
        payload: serde_json::Value,
        at: DateTime<Utc>,
    ) -> SecurityEvent {
        let event = SecurityEvent::new(kind, payload, at);
        warn!(kind = %event.kind, payload = %event.payload, "Security event");

        {
            let mut state = self.lock();
            state.events.push_back(event.clone());
            state.unflushed += 1;
            while state.events.len() > self.capacity {
                state.events.pop_front();
            }
            state.unflushed = state.unflushed.min(state.events.len());
        }

        // No subscribers is fine.
        let _ = self.tx.send(event.clone());
        event
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SecurityEvent> {
        self.tx.subscribe()
    }

    /// Copy of the retained events, oldest first.
    pub fn snapshot(&self) -> Vec<SecurityEvent> {
        self.lock().events.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the events recorded since the last drain. Events evicted before
    /// being drained are lost.
    pub fn drain_unflushed(&self) -> Vec<SecurityEvent> {
        let mut state = self.lock();
        let start = state.events.len() - state.unflushed;
        state.unflushed = 0;
        state.events.iter().skip(start).cloned().collect()
    }

    /// Put events back into the unflushed set after a failed persist.
    pub fn mark_unflushed(&self, count: usize) {
        let mut state = self.lock();
        state.unflushed = (state.unflushed + count).min(state.events.len());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let log = SecurityLog::new(3);
        let now = Utc::now();
        for i in 0..5 {
            log.record(SecurityEventKind::RateLimited, json!({ "n": i }), now);
        }

        let events = log.snapshot();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].payload, json!({ "n": 2 }));
        assert_eq!(events[2].payload, json!({ "n": 4 }));
    }

    #[test]
    fn test_drain_returns_only_new_events() {
        let log = SecurityLog::new(10);
        let now = Utc::now();
        log.record(SecurityEventKind::ClientError, json!({}), now);
        log.record(SecurityEventKind::SessionTimeout, json!({}), now);

        assert_eq!(log.drain_unflushed().len(), 2);
        assert!(log.drain_unflushed().is_empty());

        log.record(SecurityEventKind::AccountBlocked, json!({}), now);
        let drained = log.drain_unflushed();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].kind, SecurityEventKind::AccountBlocked);

        log.mark_unflushed(1);
        assert_eq!(log.drain_unflushed().len(), 1);
        // Retained events are untouched by draining.
        assert_eq!(log.len(), 3);
    }

    #[tokio::test]
    async fn test_subscribers_see_new_events() {
        let log = SecurityLog::new(10);
        let mut rx = log.subscribe();
        log.record(SecurityEventKind::SuspiciousActivity, json!({ "tag": "script" }), Utc::now());
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, SecurityEventKind::SuspiciousActivity);
    }
}
