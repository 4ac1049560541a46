//! Session context shared by the coordinator, presence tracker and
//! authentication flow.
//!
//! Replaces ambient "current user" globals: every component that needs the
//! signed-in user reads it from the same [`SessionSlot`], and sign-out
//! clears it for all of them at once.

use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use parley_shared::{CoreError, Session, SessionToken, UserId};
use parley_store::Database;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionContext {
    pub user_id: UserId,
    #[serde(skip)]
    pub token: SessionToken,
    pub started_at: DateTime<Utc>,
}

impl SessionContext {
    pub fn from_session(session: Session, started_at: DateTime<Utc>) -> Self {
        Self {
            user_id: session.user_id,
            token: session.token,
            started_at,
        }
    }
}

#[derive(Clone, Default)]
pub struct SessionSlot(Arc<RwLock<Option<SessionContext>>>);

impl SessionSlot {
    pub fn get(&self) -> Option<SessionContext> {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The active session, or `SessionClosed`.
    pub fn require(&self) -> Result<SessionContext, CoreError> {
        self.get().ok_or(CoreError::SessionClosed)
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.get().map(|s| s.user_id)
    }

    /// Install `ctx`. Returns false when the same token is already active.
    pub fn install(&self, ctx: SessionContext) -> bool {
        let mut slot = self.0.write().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().map(|s| &s.token) == Some(&ctx.token) {
            return false;
        }
        *slot = Some(ctx);
        true
    }

    pub fn clear(&self) -> Option<SessionContext> {
        self.0.write().unwrap_or_else(|e| e.into_inner()).take()
    }
}

/// The local database behind a lock. Calls are short and never held
/// across an await.
pub struct LocalDb(Mutex<Database>);

impl LocalDb {
    pub fn new(db: Database) -> Self {
        Self(Mutex::new(db))
    }

    pub fn with<R>(&self, f: impl FnOnce(&Database) -> R) -> R {
        let db = self.0.lock().unwrap_or_else(|e| e.into_inner());
        f(&db)
    }
}
