//! Records held by the Data Store.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to a UI layer.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use parley_shared::{ChatId, ConversationKind, MessageId, ProvisionalId, UserId};

use crate::error::{Result, StoreError};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A stored chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Store-assigned id, increasing with insertion order.
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    /// Sanitized text, or the deletion placeholder once deleted.
    pub content: String,
    /// Assigned by the store on insert.
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    /// Client-generated id the message was sent under. Used to make
    /// re-sent inserts idempotent.
    pub provisional_id: Option<ProvisionalId>,
}

impl Message {
    /// Position of this message in a conversation.
    pub fn sort_key(&self) -> (DateTime<Utc>, MessageId) {
        (self.created_at, self.id)
    }
}

/// What a client hands to the store to create a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageDraft {
    pub provisional_id: ProvisionalId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
}

/// A mutation of an existing message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessagePatch {
    Edit(String),
    Delete,
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: ChatId,
    pub kind: ConversationKind,
    pub members: BTreeSet<UserId>,
    pub name: Option<String>,
    pub last_message_preview: Option<String>,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(
        kind: ConversationKind,
        members: BTreeSet<UserId>,
        name: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        validate_members(kind, &members)?;
        Ok(Self {
            id: ChatId::new(),
            kind,
            members,
            name,
            last_message_preview: None,
            last_activity_at: now,
            created_at: now,
        })
    }

    pub fn has_member(&self, user: &UserId) -> bool {
        self.members.contains(user)
    }

    /// For a Direct conversation, the member who is not `me`.
    pub fn peer_of(&self, me: &UserId) -> Option<&UserId> {
        match self.kind {
            ConversationKind::Direct => self.members.iter().find(|m| *m != me),
            ConversationKind::Group => None,
        }
    }
}

/// Members must be non-empty; a Direct conversation has exactly two.
pub fn validate_members(kind: ConversationKind, members: &BTreeSet<UserId>) -> Result<()> {
    if members.is_empty() {
        return Err(StoreError::InvalidConversation("no members".into()));
    }
    if kind == ConversationKind::Direct && members.len() != 2 {
        return Err(StoreError::InvalidConversation(format!(
            "direct conversation needs 2 members, got {}",
            members.len()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// Online status of one user. Only that user writes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub online: bool,
    pub last_seen_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(ids: &[&str]) -> BTreeSet<UserId> {
        ids.iter().map(|id| UserId::from(*id)).collect()
    }

    #[test]
    fn test_direct_needs_two_members() {
        let now = Utc::now();
        assert!(Conversation::new(ConversationKind::Direct, members(&["a"]), None, now).is_err());
        assert!(
            Conversation::new(ConversationKind::Direct, members(&["a", "b", "c"]), None, now)
                .is_err()
        );
        let chat =
            Conversation::new(ConversationKind::Direct, members(&["a", "b"]), None, now).unwrap();
        assert_eq!(chat.peer_of(&UserId::from("a")), Some(&UserId::from("b")));
    }

    #[test]
    fn test_group_needs_a_member() {
        let now = Utc::now();
        assert!(Conversation::new(ConversationKind::Group, BTreeSet::new(), None, now).is_err());
        let chat = Conversation::new(
            ConversationKind::Group,
            members(&["a"]),
            Some("team".into()),
            now,
        )
        .unwrap();
        assert!(chat.has_member(&UserId::from("a")));
        assert_eq!(chat.peer_of(&UserId::from("a")), None);
    }
}
