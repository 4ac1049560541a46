//! Fault-injecting store wrapper.
//!
//! Delegates to an inner [`DataStore`] but fails scripted operations with
//! [`StoreError::Unavailable`]. Used to exercise the send / retry paths
//! without a real network.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use parley_shared::{ChatId, ConversationKind, MessageId, SecurityEvent, UserId};

use crate::data_store::DataStore;
use crate::error::{Result, StoreError};
use crate::feed::{ChangeFeed, ChangeKind};
use crate::models::{Conversation, Message, MessageDraft, MessagePatch, PresenceRecord};

#[derive(Default)]
struct Faults {
    fail_inserts: AtomicUsize,
    lose_insert_acks: AtomicUsize,
    fail_updates: AtomicUsize,
    offline: AtomicBool,
    insert_attempts: AtomicUsize,
}

/// Take one from a scripted failure budget.
fn take(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Clone)]
pub struct FlakyStore<S: DataStore> {
    inner: S,
    faults: Arc<Faults>,
}

impl<S: DataStore> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            faults: Arc::new(Faults::default()),
        }
    }

    /// Underlying store (for checking what was actually persisted).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Fail the next `n` inserts before they reach the store.
    pub fn fail_next_inserts(&self, n: usize) {
        self.faults.fail_inserts.store(n, Ordering::SeqCst);
    }

    /// Let the next `n` inserts commit but report failure to the caller,
    /// as when the response is lost in transit.
    pub fn lose_next_insert_acks(&self, n: usize) {
        self.faults.lose_insert_acks.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_updates(&self, n: usize) {
        self.faults.fail_updates.store(n, Ordering::SeqCst);
    }

    /// Fail every call until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.faults.offline.store(offline, Ordering::SeqCst);
    }

    /// Total insert calls seen, failed ones included.
    pub fn insert_attempts(&self) -> usize {
        self.faults.insert_attempts.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<()> {
        if self.faults.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: DataStore> DataStore for FlakyStore<S> {
    async fn create_conversation(
        &self,
        kind: ConversationKind,
        members: BTreeSet<UserId>,
        name: Option<String>,
    ) -> Result<Conversation> {
        self.check_online()?;
        self.inner.create_conversation(kind, members, name).await
    }

    async fn open_direct(&self, a: &UserId, b: &UserId) -> Result<Conversation> {
        self.check_online()?;
        self.inner.open_direct(a, b).await
    }

    async fn conversation(&self, id: ChatId) -> Result<Conversation> {
        self.check_online()?;
        self.inner.conversation(id).await
    }

    async fn conversations_for(&self, user: &UserId) -> Result<Vec<Conversation>> {
        self.check_online()?;
        self.inner.conversations_for(user).await
    }

    async fn touch_conversation(
        &self,
        id: ChatId,
        preview: Option<String>,
        last_activity_at: DateTime<Utc>,
    ) -> Result<Conversation> {
        self.check_online()?;
        self.inner.touch_conversation(id, preview, last_activity_at).await
    }

    async fn insert_message(&self, draft: MessageDraft) -> Result<Message> {
        self.faults.insert_attempts.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        if take(&self.faults.fail_inserts) {
            debug!(provisional = %draft.provisional_id, "Injected insert failure");
            return Err(StoreError::Unavailable("injected insert failure".into()));
        }

        let stored = self.inner.insert_message(draft).await?;
        if take(&self.faults.lose_insert_acks) {
            debug!(id = %stored.id, "Injected lost insert acknowledgement");
            return Err(StoreError::Unavailable("insert acknowledgement lost".into()));
        }
        Ok(stored)
    }

    async fn update_message(
        &self,
        actor: &UserId,
        id: MessageId,
        patch: MessagePatch,
    ) -> Result<Message> {
        self.check_online()?;
        if take(&self.faults.fail_updates) {
            debug!(id = %id, "Injected update failure");
            return Err(StoreError::Unavailable("injected update failure".into()));
        }
        self.inner.update_message(actor, id, patch).await
    }

    async fn message(&self, id: MessageId) -> Result<Message> {
        self.check_online()?;
        self.inner.message(id).await
    }

    async fn messages(&self, chat_id: ChatId, limit: usize) -> Result<Vec<Message>> {
        self.check_online()?;
        self.inner.messages(chat_id, limit).await
    }

    async fn upsert_presence(&self, record: PresenceRecord) -> Result<()> {
        self.check_online()?;
        self.inner.upsert_presence(record).await
    }

    async fn online_users(&self, exclude: &UserId, limit: usize) -> Result<Vec<PresenceRecord>> {
        self.check_online()?;
        self.inner.online_users(exclude, limit).await
    }

    async fn append_security_events(&self, events: &[SecurityEvent]) -> Result<()> {
        self.check_online()?;
        self.inner.append_security_events(events).await
    }

    fn subscribe(&self, chat_id: ChatId, kinds: &[ChangeKind]) -> ChangeFeed {
        self.inner.subscribe(chat_id, kinds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use parley_shared::{ManualClock, ProvisionalId};

    async fn setup() -> (FlakyStore<MemoryStore>, ChatId) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = FlakyStore::new(MemoryStore::new(clock));
        let chat = store
            .open_direct(&UserId::from("a"), &UserId::from("b"))
            .await
            .unwrap();
        (store, chat.id)
    }

    fn draft(chat_id: ChatId) -> MessageDraft {
        MessageDraft {
            provisional_id: ProvisionalId::new(),
            chat_id,
            sender_id: UserId::from("a"),
            content: "hi".into(),
        }
    }

    #[tokio::test]
    async fn test_scripted_insert_failures_then_success() {
        let (store, chat) = setup().await;
        store.fail_next_inserts(2);
        let d = draft(chat);

        assert!(store.insert_message(d.clone()).await.is_err());
        assert!(store.insert_message(d.clone()).await.is_err());
        assert!(store.insert_message(d).await.is_ok());
        assert_eq!(store.insert_attempts(), 3);
        assert_eq!(store.inner().all_messages(chat).await.len(), 1);
    }

    #[tokio::test]
    async fn test_lost_ack_still_commits_once() {
        let (store, chat) = setup().await;
        store.lose_next_insert_acks(1);
        let d = draft(chat);

        assert!(matches!(
            store.insert_message(d.clone()).await,
            Err(StoreError::Unavailable(_))
        ));
        let retried = store.insert_message(d).await.unwrap();
        let stored = store.inner().all_messages(chat).await;
        assert_eq!(stored, vec![retried]);
    }

    #[tokio::test]
    async fn test_offline_fails_everything() {
        let (store, chat) = setup().await;
        store.set_offline(true);
        assert!(store.messages(chat, 10).await.is_err());
        store.set_offline(false);
        assert!(store.messages(chat, 10).await.is_ok());
    }
}
