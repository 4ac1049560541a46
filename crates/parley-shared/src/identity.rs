//! Identity provider seam.
//!
//! Authentication is delegated to an external provider that emails one-time
//! codes, exchanges a verified code for a session token and announces
//! sign-in / sign-out transitions. [`MemoryIdentityProvider`] is an
//! in-process implementation used for local development and tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::AuthError;
use crate::types::{SessionToken, UserId};

/// How long an issued one-time code stays valid.
pub const CODE_TTL_SECS: i64 = 600;

/// An authenticated session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub user_id: UserId,
    pub token: SessionToken,
}

/// Transitions announced by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(Session),
    SignedOut,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Email a one-time code to `email`.
    async fn issue_one_time_code(&self, email: &str) -> Result<(), AuthError>;

    /// Exchange a code for a session.
    async fn verify_code(&self, email: &str, code: &str) -> Result<Session, AuthError>;

    /// End the current session.
    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Subscribe to sign-in / sign-out events.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

#[derive(Debug, Clone)]
struct IssuedCode {
    code: String,
    issued_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct ProviderState {
    issued: HashMap<String, IssuedCode>,
    offline: bool,
    fail_sign_out: bool,
    verify_calls: usize,
    sign_out_calls: usize,
}

/// In-process identity provider.
///
/// Codes are kept in an in-memory "mailbox" readable through
/// [`MemoryIdentityProvider::last_code`].
pub struct MemoryIdentityProvider {
    clock: Arc<dyn Clock>,
    state: Mutex<ProviderState>,
    events: broadcast::Sender<AuthEvent>,
}

impl MemoryIdentityProvider {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            clock,
            state: Mutex::new(ProviderState::default()),
            events,
        }
    }

    /// The code most recently issued to `email`, if any.
    pub fn last_code(&self, email: &str) -> Option<String> {
        self.lock().issued.get(email).map(|c| c.code.clone())
    }

    /// Make every call fail with [`AuthError::Network`].
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Make `sign_out` fail while still counting the call.
    pub fn set_fail_sign_out(&self, fail: bool) {
        self.lock().fail_sign_out = fail;
    }

    pub fn verify_calls(&self) -> usize {
        self.lock().verify_calls
    }

    pub fn sign_out_calls(&self) -> usize {
        self.lock().sign_out_calls
    }

    /// Stable user id for an email address.
    pub fn user_id_for(email: &str) -> UserId {
        let digest = blake3::hash(email.trim().to_lowercase().as_bytes());
        UserId(format!("user-{}", &hex::encode(digest.as_bytes())[..16]))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn issue_one_time_code(&self, email: &str) -> Result<(), AuthError> {
        let mut state = self.lock();
        if state.offline {
            return Err(AuthError::Network("identity provider offline".into()));
        }

        let n = Uuid::new_v4().as_u128() % 1_000_000;
        let code = format!("{n:06}");
        state.issued.insert(
            email.to_string(),
            IssuedCode {
                code,
                issued_at: self.clock.now(),
            },
        );
        debug!(email, "One-time code issued");
        Ok(())
    }

    async fn verify_code(&self, email: &str, code: &str) -> Result<Session, AuthError> {
        let session = {
            let mut state = self.lock();
            state.verify_calls += 1;
            if state.offline {
                return Err(AuthError::Network("identity provider offline".into()));
            }

            let issued = state.issued.get(email).cloned().ok_or(AuthError::InvalidCode)?;
            if self.clock.now() - issued.issued_at >= Duration::seconds(CODE_TTL_SECS) {
                state.issued.remove(email);
                return Err(AuthError::CodeExpired);
            }
            if issued.code != code {
                return Err(AuthError::InvalidCode);
            }
            state.issued.remove(email);

            Session {
                user_id: Self::user_id_for(email),
                token: SessionToken(Uuid::new_v4().to_string()),
            }
        };

        info!(user = %session.user_id, "Signed in");
        let _ = self.events.send(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        {
            let mut state = self.lock();
            state.sign_out_calls += 1;
            if state.offline || state.fail_sign_out {
                return Err(AuthError::Network("sign-out request failed".into()));
            }
        }
        info!("Signed out");
        let _ = self.events.send(AuthEvent::SignedOut);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
