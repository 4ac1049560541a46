//! Wiring of the client core.
//!
//! [`Client`] owns one guard, one session slot and the components built on
//! them, and reacts to the identity provider's sign-in / sign-out events.

use std::sync::{Arc, Mutex, Weak};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use parley_guard::{ActivitySignal, Guard, SecurityReport, SessionMonitor, SessionState};
use parley_shared::{AuthEvent, Clock, CoreError, IdentityProvider, SecurityEvent};
use parley_store::{DataStore, Database, StoreError};

use crate::auth::AuthFlow;
use crate::config::ClientConfig;
use crate::events::ViewEvent;
use crate::presence::PresenceTracker;
use crate::state::{LocalDb, SessionContext, SessionSlot};
use crate::sync::SyncCoordinator;

pub struct Client {
    config: ClientConfig,
    guard: Guard,
    idp: Arc<dyn IdentityProvider>,
    store: Arc<dyn DataStore>,
    db: Arc<LocalDb>,
    session: SessionSlot,
    auth: AuthFlow,
    sync: SyncCoordinator,
    presence: PresenceTracker,
    monitor: SessionMonitor,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    session_watch: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    pub fn new(
        config: ClientConfig,
        clock: Arc<dyn Clock>,
        idp: Arc<dyn IdentityProvider>,
        store: Arc<dyn DataStore>,
        db: Database,
    ) -> Self {
        let guard = Guard::new(config.guard.clone(), clock.clone());
        let db = Arc::new(LocalDb::new(db));
        let session = SessionSlot::default();

        let auth = AuthFlow::new(idp.clone(), guard.clone(), db.clone());
        let sync = SyncCoordinator::new(
            store.clone(),
            guard.clone(),
            session.clone(),
            config.history_limit,
        );
        let presence = PresenceTracker::new(
            store.clone(),
            session.clone(),
            clock,
            config.online_list_limit,
        );
        let monitor = guard.session_monitor(idp.clone());

        Self {
            config,
            guard,
            idp,
            store,
            db,
            session,
            auth,
            sync,
            presence,
            monitor,
            heartbeat: Mutex::new(None),
            session_watch: Mutex::new(None),
        }
    }

    /// Open the local database named by `config` and build a client on it.
    pub fn open(
        config: ClientConfig,
        clock: Arc<dyn Clock>,
        idp: Arc<dyn IdentityProvider>,
        store: Arc<dyn DataStore>,
    ) -> Result<Self, StoreError> {
        let db = Database::open_at(&config.database_path()?)?;
        Ok(Self::new(config, clock, idp, store, db))
    }

    /// Follow the identity provider's events until it goes away.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.idp.subscribe();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let Some(client) = weak.upgrade() else { break };
                        client.handle_auth_event(event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Auth event loop lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Auth event loop stopped");
        })
    }

    pub async fn handle_auth_event(self: &Arc<Self>, event: AuthEvent) {
        match event {
            AuthEvent::SignedIn(session) => {
                let ctx = SessionContext::from_session(session, self.guard.clock().now());
                self.sign_in(ctx).await;
            }
            AuthEvent::SignedOut => self.end_session("signed out").await,
        }
    }

    /// Verify a one-time code and start the session.
    pub async fn verify(self: &Arc<Self>, code: &str) -> Result<SessionContext, CoreError> {
        let ctx = self.auth.verify(code).await?;
        self.sign_in(ctx.clone()).await;
        Ok(ctx)
    }

    /// Sign out. Local state is torn down even if the provider call fails.
    pub async fn sign_out(&self) -> Result<(), CoreError> {
        let result = self.idp.sign_out().await;
        self.end_session("sign-out requested").await;
        result.map_err(CoreError::from)
    }

    pub async fn record_activity(&self, signal: ActivitySignal) {
        self.monitor
            .record_activity(signal, self.guard.clock().now())
            .await;
    }

    /// Poll the idle monitor. An expired session is torn down locally
    /// whether or not the provider acknowledged the sign-out.
    pub async fn check_session(&self) -> Result<SessionState, CoreError> {
        self.session.require()?;
        let result = self.monitor.poll(self.guard.clock().now()).await;
        if !matches!(result, Ok(SessionState::Active)) {
            self.end_session("idle timeout").await;
        }
        result
    }

    /// Persist security events recorded since the last flush, locally and
    /// in the data store. Returns how many were flushed.
    pub async fn flush_security_events(&self) -> Result<usize, CoreError> {
        let log = self.guard.log();
        let events = log.drain_unflushed();
        if events.is_empty() {
            return Ok(0);
        }

        if let Err(e) = self.db.with(|db| db.append_security_events(&events)) {
            log.mark_unflushed(events.len());
            warn!(error = %e, "Failed to persist security events");
            return Err(e.into());
        }
        if let Err(e) = self.store.append_security_events(&events).await {
            warn!(error = %e, count = events.len(), "Failed to upload security events");
        }
        debug!(count = events.len(), "Security events flushed");
        Ok(events.len())
    }

    pub async fn security_report(&self) -> SecurityReport {
        self.guard.export().await
    }

    pub fn security_events(&self) -> broadcast::Receiver<SecurityEvent> {
        self.guard.log().subscribe()
    }

    pub fn view_events(&self) -> broadcast::Receiver<ViewEvent> {
        self.sync.subscribe()
    }

    pub fn session(&self) -> Option<SessionContext> {
        self.session.get()
    }

    pub fn guard(&self) -> &Guard {
        &self.guard
    }

    pub fn auth(&self) -> &AuthFlow {
        &self.auth
    }

    pub fn sync(&self) -> &SyncCoordinator {
        &self.sync
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn sign_in(self: &Arc<Self>, ctx: SessionContext) {
        let user = ctx.user_id.clone();
        if !self.session.install(ctx) {
            return;
        }
        info!(user = %user, "Session started");

        self.monitor.restart(self.guard.clock().now()).await;
        if let Err(e) = self.presence.heartbeat().await {
            warn!(error = %e, "Initial presence heartbeat failed");
        }

        let heartbeat = self.presence.spawn_heartbeat(self.config.heartbeat_interval);
        replace_task(&self.heartbeat, heartbeat);
        let watch = spawn_session_watch(Arc::downgrade(self), self.config.session_check_interval);
        replace_task(&self.session_watch, watch);
    }

    async fn end_session(&self, reason: &str) {
        let Some(previous) = self.session.clear() else {
            return;
        };
        info!(user = %previous.user_id, reason, "Session ended");

        // The session watch stops on its own once the slot is empty; it
        // may be the task running this.
        if let Some(handle) = lock(&self.heartbeat).take() {
            handle.abort();
        }
        self.sync.reset().await;

        if let Err(e) = self.presence.go_offline(previous.user_id).await {
            warn!(error = %e, "Failed to mark user offline");
        }
        if let Err(e) = self.flush_security_events().await {
            warn!(error = %e, "Failed to flush security events at sign-out");
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        for slot in [&self.heartbeat, &self.session_watch] {
            if let Some(handle) = lock(slot).take() {
                handle.abort();
            }
        }
    }
}

fn spawn_session_watch(client: Weak<Client>, period: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            interval.tick().await;
            let Some(client) = client.upgrade() else { break };
            match client.check_session().await {
                Ok(SessionState::Active) => {}
                Ok(SessionState::Expired) | Err(_) => break,
            }
        }
        debug!("Session watch stopped");
    })
}

fn replace_task(slot: &Mutex<Option<JoinHandle<()>>>, handle: JoinHandle<()>) {
    if let Some(previous) = lock(slot).replace(handle) {
        previous.abort();
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
