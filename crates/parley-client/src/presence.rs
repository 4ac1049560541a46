//! Presence heartbeat and the online list.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use parley_shared::{Clock, CoreError, UserId};
use parley_store::{DataStore, PresenceRecord};

use crate::state::SessionSlot;

#[derive(Clone)]
pub struct PresenceTracker {
    store: Arc<dyn DataStore>,
    session: SessionSlot,
    clock: Arc<dyn Clock>,
    online_limit: usize,
    visible: Arc<AtomicBool>,
}

impl PresenceTracker {
    pub fn new(
        store: Arc<dyn DataStore>,
        session: SessionSlot,
        clock: Arc<dyn Clock>,
        online_limit: usize,
    ) -> Self {
        Self {
            store,
            session,
            clock,
            online_limit,
            visible: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Write the local user's presence: online while the client is visible.
    pub async fn heartbeat(&self) -> Result<(), CoreError> {
        let session = self.session.require()?;
        let online = self.visible.load(Ordering::SeqCst);
        self.write(session.user_id, online).await
    }

    /// Record a visibility transition and write it straight away.
    pub async fn set_visible(&self, visible: bool) -> Result<(), CoreError> {
        self.visible.store(visible, Ordering::SeqCst);
        debug!(visible, "Visibility changed");
        self.heartbeat().await
    }

    /// Mark `user` offline. Takes the id explicitly since it runs while the
    /// session is being torn down.
    pub async fn go_offline(&self, user: UserId) -> Result<(), CoreError> {
        self.write(user, false).await
    }

    /// Online users other than the local one, most recently seen first.
    pub async fn online_users(&self) -> Result<Vec<PresenceRecord>, CoreError> {
        let session = self.session.require()?;
        Ok(self
            .store
            .online_users(&session.user_id, self.online_limit)
            .await?)
    }

    /// Heartbeat every `period` until the session ends. The first beat is
    /// one period out; sign-in sends its own.
    pub fn spawn_heartbeat(&self, period: Duration) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            loop {
                interval.tick().await;
                match tracker.heartbeat().await {
                    Ok(()) => {}
                    Err(CoreError::SessionClosed) => break,
                    Err(e) => warn!(error = %e, "Presence heartbeat failed"),
                }
            }
            debug!("Presence heartbeat stopped");
        })
    }

    async fn write(&self, user_id: UserId, online: bool) -> Result<(), CoreError> {
        let record = PresenceRecord {
            user_id,
            online,
            last_seen_at: self.clock.now(),
        };
        self.store.upsert_presence(record).await?;
        Ok(())
    }
}
