//! One-time-code sign-in.
//!
//! The email being verified is persisted under a single local key so a
//! verification can resume after a restart. It is cleared on success.
//! Failed verifications feed the guard's lockout tracker; while an identity
//! is locked out the identity provider is not consulted at all.

use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use parley_guard::Guard;
use parley_shared::constants::PENDING_EMAIL_KEY;
use parley_shared::{AuthError, CoreError, IdentityProvider};

use crate::state::{LocalDb, SessionContext};

pub struct AuthFlow {
    idp: Arc<dyn IdentityProvider>,
    guard: Guard,
    db: Arc<LocalDb>,
    pending_email: Mutex<Option<String>>,
}

impl AuthFlow {
    pub fn new(idp: Arc<dyn IdentityProvider>, guard: Guard, db: Arc<LocalDb>) -> Self {
        Self {
            idp,
            guard,
            db,
            pending_email: Mutex::new(None),
        }
    }

    /// Ask the identity provider to email a code to `email`.
    pub async fn request_code(&self, email: &str) -> Result<(), CoreError> {
        let email = email.trim().to_lowercase();
        self.guard.validator().validate_email(&email)?;
        self.guard.check_login_allowed(&email).await?;
        self.guard.admit("request_code").await?;

        self.db
            .with(|db| db.set_state(PENDING_EMAIL_KEY, &email))
            .map_err(|e| {
                warn!(error = %e, "Failed to persist pending email");
                CoreError::from(e)
            })?;
        self.set_pending(Some(email.clone()));

        self.idp.issue_one_time_code(&email).await?;
        info!(email = %email, "One-time code requested");
        Ok(())
    }

    /// Exchange `code` for a session for the pending email.
    pub async fn verify(&self, code: &str) -> Result<SessionContext, CoreError> {
        self.guard.validator().validate_one_time_code(code)?;
        let email = self.pending_email().ok_or(CoreError::NotFound)?;
        self.guard.check_login_allowed(&email).await?;
        self.guard.admit("verify_code").await?;

        match self.idp.verify_code(&email, code.trim()).await {
            Ok(session) => {
                self.guard.record_login_success(&email).await;
                if let Err(e) = self.db.with(|db| db.clear_state(PENDING_EMAIL_KEY)) {
                    warn!(error = %e, "Failed to clear pending email");
                }
                self.set_pending(None);
                info!(user = %session.user_id, "Verification succeeded");
                Ok(SessionContext::from_session(session, self.guard.clock().now()))
            }
            Err(AuthError::Network(msg)) => {
                debug!(error = %msg, "Identity provider unreachable");
                Err(CoreError::NetworkFailure(msg))
            }
            Err(e) => {
                let outcome = self.guard.record_login_failure(&email).await;
                warn!(email = %email, attempts = outcome.attempts, error = %e, "Verification failed");
                if outcome.blocked {
                    let status = self.guard.check_login_allowed(&email).await;
                    return Err(status.err().unwrap_or(CoreError::Unauthorized));
                }
                Err(e.into())
            }
        }
    }

    /// Reload the pending email persisted by an earlier run.
    pub fn resume(&self) -> Result<Option<String>, CoreError> {
        let stored = self.db.with(|db| db.get_state(PENDING_EMAIL_KEY))?;
        if let Some(email) = &stored {
            debug!(email = %email, "Resuming pending verification");
        }
        self.set_pending(stored.clone());
        Ok(stored)
    }

    /// The email awaiting verification, in memory or persisted.
    pub fn pending_email(&self) -> Option<String> {
        if let Some(email) = self.lock().clone() {
            return Some(email);
        }
        match self.db.with(|db| db.get_state(PENDING_EMAIL_KEY)) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "Failed to read pending email");
                None
            }
        }
    }

    /// Forget the pending verification.
    pub fn cancel(&self) -> Result<(), CoreError> {
        self.set_pending(None);
        self.db.with(|db| db.clear_state(PENDING_EMAIL_KEY))?;
        Ok(())
    }

    fn set_pending(&self, email: Option<String>) {
        *self.lock() = email;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.pending_email.lock().unwrap_or_else(|e| e.into_inner())
    }
}
