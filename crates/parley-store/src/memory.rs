//! In-process [`DataStore`].
//!
//! All records live behind one lock, so every mutation and its change-feed
//! publication are ordered the same way for all subscribers.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use parley_shared::constants::DELETED_PLACEHOLDER;
use parley_shared::{
    ChatId, Clock, ConversationKind, MessageId, ProvisionalId, SecurityEvent, UserId,
};

use crate::data_store::DataStore;
use crate::error::{Result, StoreError};
use crate::feed::{ChangeEvent, ChangeFeed, ChangeKind};
use crate::models::{Conversation, Message, MessageDraft, MessagePatch, PresenceRecord};

const FEED_CAPACITY: usize = 256;

#[derive(Default)]
struct MemoryState {
    conversations: HashMap<ChatId, Conversation>,
    messages: BTreeMap<MessageId, Message>,
    by_provisional: HashMap<ProvisionalId, MessageId>,
    presence: HashMap<UserId, PresenceRecord>,
    security_events: Vec<SecurityEvent>,
    next_id: u64,
}

impl MemoryState {
    fn latest_in_chat(&self, chat_id: ChatId) -> Option<DateTime<Utc>> {
        self.messages
            .values()
            .filter(|m| m.chat_id == chat_id)
            .map(|m| m.created_at)
            .max()
    }

    fn find_direct(&self, members: &BTreeSet<UserId>) -> Option<&Conversation> {
        self.conversations
            .values()
            .find(|c| c.kind == ConversationKind::Direct && c.members == *members)
    }
}

#[derive(Clone)]
pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<MemoryState>>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (changes, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            clock,
            state: Arc::new(Mutex::new(MemoryState {
                next_id: 1,
                ..MemoryState::default()
            })),
            changes,
        }
    }

    /// Every stored message of a conversation, oldest first.
    pub async fn all_messages(&self, chat_id: ChatId) -> Vec<Message> {
        self.messages(chat_id, usize::MAX).await.unwrap_or_default()
    }

    pub async fn security_events(&self) -> Vec<SecurityEvent> {
        self.state.lock().await.security_events.clone()
    }

    fn publish(&self, event: ChangeEvent) {
        // No subscribers is fine.
        let _ = self.changes.send(event);
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn create_conversation(
        &self,
        kind: ConversationKind,
        members: BTreeSet<UserId>,
        name: Option<String>,
    ) -> Result<Conversation> {
        let mut state = self.state.lock().await;
        if kind == ConversationKind::Direct && state.find_direct(&members).is_some() {
            return Err(StoreError::Conflict(
                "direct conversation already exists".into(),
            ));
        }

        let chat = Conversation::new(kind, members, name, self.clock.now())?;
        info!(chat = %chat.id, kind = ?chat.kind, members = chat.members.len(), "Conversation created");
        state.conversations.insert(chat.id, chat.clone());
        Ok(chat)
    }

    async fn open_direct(&self, a: &UserId, b: &UserId) -> Result<Conversation> {
        let members: BTreeSet<UserId> = [a.clone(), b.clone()].into_iter().collect();
        let mut state = self.state.lock().await;
        if let Some(existing) = state.find_direct(&members) {
            return Ok(existing.clone());
        }

        let chat = Conversation::new(ConversationKind::Direct, members, None, self.clock.now())?;
        info!(chat = %chat.id, "Direct conversation created");
        state.conversations.insert(chat.id, chat.clone());
        Ok(chat)
    }

    async fn conversation(&self, id: ChatId) -> Result<Conversation> {
        self.state
            .lock()
            .await
            .conversations
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn conversations_for(&self, user: &UserId) -> Result<Vec<Conversation>> {
        let state = self.state.lock().await;
        let mut chats: Vec<Conversation> = state
            .conversations
            .values()
            .filter(|c| c.has_member(user))
            .cloned()
            .collect();
        chats.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(chats)
    }

    async fn touch_conversation(
        &self,
        id: ChatId,
        preview: Option<String>,
        last_activity_at: DateTime<Utc>,
    ) -> Result<Conversation> {
        let mut state = self.state.lock().await;
        let chat = state.conversations.get_mut(&id).ok_or(StoreError::NotFound)?;
        chat.last_message_preview = preview;
        chat.last_activity_at = last_activity_at;
        Ok(chat.clone())
    }

    async fn insert_message(&self, draft: MessageDraft) -> Result<Message> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state.by_provisional.get(&draft.provisional_id) {
            if let Some(message) = state.messages.get(existing) {
                debug!(id = %message.id, provisional = %draft.provisional_id, "Duplicate insert ignored");
                return Ok(message.clone());
            }
        }

        let chat = state
            .conversations
            .get(&draft.chat_id)
            .ok_or(StoreError::NotFound)?;
        if !chat.has_member(&draft.sender_id) {
            return Err(StoreError::Unauthorized);
        }

        // createdAt never goes backwards within a conversation.
        let now = self.clock.now();
        let created_at = state
            .latest_in_chat(draft.chat_id)
            .map_or(now, |latest| latest.max(now));

        let id = MessageId(state.next_id);
        state.next_id += 1;

        let message = Message {
            id,
            chat_id: draft.chat_id,
            sender_id: draft.sender_id,
            content: draft.content,
            created_at,
            edited_at: None,
            deleted: false,
            provisional_id: Some(draft.provisional_id),
        };
        state.by_provisional.insert(draft.provisional_id, id);
        state.messages.insert(id, message.clone());
        debug!(id = %id, chat = %message.chat_id, "Message stored");

        self.publish(ChangeEvent::Insert(message.clone()));
        Ok(message)
    }

    async fn update_message(
        &self,
        actor: &UserId,
        id: MessageId,
        patch: MessagePatch,
    ) -> Result<Message> {
        let mut state = self.state.lock().await;
        let message = state.messages.get_mut(&id).ok_or(StoreError::NotFound)?;

        if message.deleted {
            return Err(StoreError::NotFound);
        }
        if message.sender_id != *actor {
            return Err(StoreError::Unauthorized);
        }

        match patch {
            MessagePatch::Edit(content) => {
                message.content = content;
                message.edited_at = Some(self.clock.now());
            }
            MessagePatch::Delete => {
                message.content = DELETED_PLACEHOLDER.to_string();
                message.deleted = true;
            }
        }
        let updated = message.clone();
        debug!(id = %id, deleted = updated.deleted, "Message updated");

        self.publish(ChangeEvent::Update(updated.clone()));
        Ok(updated)
    }

    async fn message(&self, id: MessageId) -> Result<Message> {
        self.state
            .lock()
            .await
            .messages
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn messages(&self, chat_id: ChatId, limit: usize) -> Result<Vec<Message>> {
        let state = self.state.lock().await;
        if !state.conversations.contains_key(&chat_id) {
            return Err(StoreError::NotFound);
        }
        let mut messages: Vec<Message> = state
            .messages
            .values()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect();
        messages.sort_by_key(Message::sort_key);
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.split_off(skip))
    }

    async fn upsert_presence(&self, record: PresenceRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        state.presence.insert(record.user_id.clone(), record);
        Ok(())
    }

    async fn online_users(&self, exclude: &UserId, limit: usize) -> Result<Vec<PresenceRecord>> {
        let state = self.state.lock().await;
        let mut online: Vec<PresenceRecord> = state
            .presence
            .values()
            .filter(|p| p.online && p.user_id != *exclude)
            .cloned()
            .collect();
        online.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));
        online.truncate(limit);
        Ok(online)
    }

    async fn append_security_events(&self, events: &[SecurityEvent]) -> Result<()> {
        self.state
            .lock()
            .await
            .security_events
            .extend_from_slice(events);
        Ok(())
    }

    fn subscribe(&self, chat_id: ChatId, kinds: &[ChangeKind]) -> ChangeFeed {
        ChangeFeed::new(chat_id, kinds.iter().copied(), self.changes.subscribe())
    }
}
