//! Sliding-window rate limiter.
//!
//! Keeps the timestamps of admitted calls from the last window. Expired
//! timestamps are pruned lazily on each [`RateLimiter::admit`]. The
//! prune-count-append sequence runs under a single lock so two concurrent
//! callers can never both pass the ceiling.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use parley_shared::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// The window was full; nothing was recorded.
    Rejected { in_window: usize },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }

    pub fn into_result(self) -> Result<(), CoreError> {
        match self {
            Admission::Allowed => Ok(()),
            Admission::Rejected { .. } => Err(CoreError::RateLimited),
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    window: Arc<Mutex<VecDeque<DateTime<Utc>>>>,
    ceiling: usize,
    span: Duration,
}

impl RateLimiter {
    pub fn new(ceiling: usize, span: Duration) -> Self {
        Self {
            window: Arc::new(Mutex::new(VecDeque::with_capacity(ceiling))),
            ceiling,
            span,
        }
    }

    /// Admit a call at `now` if fewer than `ceiling` calls were admitted in
    /// the window ending at `now`.
    pub async fn admit(&self, now: DateTime<Utc>) -> Admission {
        let mut window = self.window.lock().await;
        prune(&mut window, now - self.span);

        if window.len() >= self.ceiling {
            return Admission::Rejected {
                in_window: window.len(),
            };
        }

        window.push_back(now);
        Admission::Allowed
    }

    /// Number of admitted calls still inside the window at `now`.
    pub async fn in_window(&self, now: DateTime<Utc>) -> usize {
        let mut window = self.window.lock().await;
        prune(&mut window, now - self.span);
        window.len()
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(60, Duration::seconds(60))
    }
}

/// Drop every timestamp at or before `cutoff`. Concurrent callers may append
/// slightly out of order, so this scans the whole (small) window.
fn prune(window: &mut VecDeque<DateTime<Utc>>, cutoff: DateTime<Utc>) {
    window.retain(|t| *t > cutoff);
}
