//! The Data Store seam.
//!
//! The system of record for conversations, messages and presence. Clients
//! never trust their own copy over it: every mutation is confirmed here and
//! echoed on the change feed.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use parley_shared::{ChatId, ConversationKind, MessageId, SecurityEvent, UserId};

use crate::error::Result;
use crate::feed::{ChangeFeed, ChangeKind};
use crate::models::{Conversation, Message, MessageDraft, MessagePatch, PresenceRecord};

#[async_trait]
pub trait DataStore: Send + Sync {
    // ---- conversations ----

    async fn create_conversation(
        &self,
        kind: ConversationKind,
        members: BTreeSet<UserId>,
        name: Option<String>,
    ) -> Result<Conversation>;

    /// The Direct conversation between `a` and `b`, created if missing.
    /// At most one such conversation ever exists.
    async fn open_direct(&self, a: &UserId, b: &UserId) -> Result<Conversation>;

    async fn conversation(&self, id: ChatId) -> Result<Conversation>;

    /// Conversations `user` is a member of, most recently active first.
    async fn conversations_for(&self, user: &UserId) -> Result<Vec<Conversation>>;

    /// Store the summary fields of a conversation.
    async fn touch_conversation(
        &self,
        id: ChatId,
        preview: Option<String>,
        last_activity_at: DateTime<Utc>,
    ) -> Result<Conversation>;

    // ---- messages ----

    /// Persist a new message. The store assigns `id` and `created_at`.
    /// Re-sending a draft whose provisional id was already stored returns
    /// the existing record without publishing it again.
    async fn insert_message(&self, draft: MessageDraft) -> Result<Message>;

    /// Edit or soft-delete a message. Only its sender may do so, and a
    /// deleted message is no longer live (`NotFound`).
    async fn update_message(
        &self,
        actor: &UserId,
        id: MessageId,
        patch: MessagePatch,
    ) -> Result<Message>;

    async fn message(&self, id: MessageId) -> Result<Message>;

    /// The latest `limit` messages of a conversation, oldest first.
    async fn messages(&self, chat_id: ChatId, limit: usize) -> Result<Vec<Message>>;

    // ---- presence ----

    async fn upsert_presence(&self, record: PresenceRecord) -> Result<()>;

    /// Online users other than `exclude`, most recently seen first.
    async fn online_users(&self, exclude: &UserId, limit: usize) -> Result<Vec<PresenceRecord>>;

    // ---- audit ----

    async fn append_security_events(&self, events: &[SecurityEvent]) -> Result<()>;

    // ---- change feed ----

    fn subscribe(&self, chat_id: ChatId, kinds: &[ChangeKind]) -> ChangeFeed;
}
