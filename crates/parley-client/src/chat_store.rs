//! Per-conversation ordered message list.
//!
//! Entries are kept sorted by `(created_at, id)`. A pending entry has no
//! store id yet; it sorts after every stored entry with the same timestamp
//! and is moved to its authoritative position once confirmed. After that an
//! entry never moves again: edits and deletes patch it in place.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use parley_shared::{ChatId, CoreError, DeliveryState, MessageId, ProvisionalId, UserId};
use parley_store::Message;

/// How an entry is addressed.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
pub enum EntryKey {
    Provisional(ProvisionalId),
    Stored(MessageId),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChatEntry {
    pub key: EntryKey,
    /// Provisional id the entry was sent under, kept after confirmation.
    pub provisional_id: Option<ProvisionalId>,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub delivery: DeliveryState,
    #[serde(skip)]
    local_seq: u64,
}

impl ChatEntry {
    fn from_message(message: Message) -> Self {
        Self {
            key: EntryKey::Stored(message.id),
            provisional_id: message.provisional_id,
            sender_id: message.sender_id,
            content: message.content,
            created_at: message.created_at,
            edited_at: message.edited_at,
            deleted: message.deleted,
            delivery: DeliveryState::Confirmed,
            local_seq: 0,
        }
    }

    pub fn stored_id(&self) -> Option<MessageId> {
        match self.key {
            EntryKey::Stored(id) => Some(id),
            EntryKey::Provisional(_) => None,
        }
    }

    /// Stored entries order by id; unconfirmed ones come after them, in
    /// the order they were sent.
    fn sort_key(&self) -> (DateTime<Utc>, u8, u64) {
        match self.key {
            EntryKey::Stored(id) => (self.created_at, 0, id.0),
            EntryKey::Provisional(_) => (self.created_at, 1, self.local_seq),
        }
    }
}

#[derive(Debug)]
pub struct ChatStore {
    chat_id: ChatId,
    me: UserId,
    entries: Vec<ChatEntry>,
    next_seq: u64,
}

impl ChatStore {
    pub fn new(chat_id: ChatId, me: UserId) -> Self {
        Self {
            chat_id,
            me,
            entries: Vec::new(),
            next_seq: 1,
        }
    }

    /// A store seeded with history, in any order.
    pub fn with_history(chat_id: ChatId, me: UserId, history: Vec<Message>) -> Self {
        let mut store = Self::new(chat_id, me);
        for message in history {
            if message.chat_id == chat_id && store.position(EntryKey::Stored(message.id)).is_none() {
                store.place(ChatEntry::from_message(message));
            }
        }
        store
    }

    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: EntryKey) -> Option<&ChatEntry> {
        self.position(key).map(|i| &self.entries[i])
    }

    /// Add an optimistic entry for a message being sent by the local user.
    pub fn insert_pending(
        &mut self,
        provisional_id: ProvisionalId,
        content: String,
        created_at: DateTime<Utc>,
    ) -> EntryKey {
        let key = EntryKey::Provisional(provisional_id);
        let entry = ChatEntry {
            key,
            provisional_id: Some(provisional_id),
            sender_id: self.me.clone(),
            content,
            created_at,
            edited_at: None,
            deleted: false,
            delivery: DeliveryState::Pending,
            local_seq: self.next_seq,
        };
        self.next_seq += 1;
        self.place(entry);
        key
    }

    /// Swap a pending entry for the stored record. If the entry is gone
    /// because the view was rebuilt while the send was in flight, the record
    /// is placed by id. Returns false when nothing changed.
    pub fn confirm(&mut self, provisional_id: ProvisionalId, message: Message) -> bool {
        if message.chat_id != self.chat_id {
            return false;
        }
        let removed = match self.position(EntryKey::Provisional(provisional_id)) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        };

        if self.position(EntryKey::Stored(message.id)).is_some() {
            debug!(id = %message.id, "Confirmed message already present");
            return removed;
        }

        let mut entry = ChatEntry::from_message(message);
        entry.provisional_id = Some(provisional_id);
        self.place(entry);
        true
    }

    /// Mark a pending entry as failed. It stays in the list.
    pub fn fail(&mut self, provisional_id: ProvisionalId) -> bool {
        match self.position(EntryKey::Provisional(provisional_id)) {
            Some(i) => {
                self.entries[i].delivery = DeliveryState::Failed;
                true
            }
            None => false,
        }
    }

    /// Content of a failed entry, the only kind that may be retried.
    pub fn failed_content(&self, provisional_id: ProvisionalId) -> Option<String> {
        self.get(EntryKey::Provisional(provisional_id))
            .filter(|e| e.delivery == DeliveryState::Failed)
            .map(|e| e.content.clone())
    }

    /// Put a failed entry back to pending for another attempt.
    pub fn mark_pending(&mut self, provisional_id: ProvisionalId) -> bool {
        match self.position(EntryKey::Provisional(provisional_id)) {
            Some(i) if self.entries[i].delivery == DeliveryState::Failed => {
                self.entries[i].delivery = DeliveryState::Pending;
                true
            }
            _ => false,
        }
    }

    /// Drop a failed entry.
    pub fn dismiss(&mut self, provisional_id: ProvisionalId) -> bool {
        match self.position(EntryKey::Provisional(provisional_id)) {
            Some(i) if self.entries[i].delivery == DeliveryState::Failed => {
                self.entries.remove(i);
                true
            }
            _ => false,
        }
    }

    /// Apply an insert from the change feed. The local user's own inserts
    /// were already applied optimistically and are ignored, as are
    /// duplicates and inserts for another conversation.
    pub fn apply_insert(&mut self, message: Message) -> bool {
        if message.chat_id != self.chat_id || message.sender_id == self.me {
            return false;
        }
        if self.position(EntryKey::Stored(message.id)).is_some() {
            return false;
        }
        self.place(ChatEntry::from_message(message));
        true
    }

    /// Patch an entry from an update event, whoever sent it. Never moves
    /// the entry. A deleted entry stays deleted.
    pub fn apply_update(&mut self, message: Message) -> bool {
        if message.chat_id != self.chat_id {
            return false;
        }
        let Some(i) = self.position(EntryKey::Stored(message.id)) else {
            return false;
        };
        let entry = &mut self.entries[i];
        if entry.deleted {
            return false;
        }
        entry.content = message.content;
        entry.edited_at = message.edited_at;
        entry.deleted = message.deleted;
        true
    }

    /// Reconcile with a fresh fetch of recent history. Unknown records are
    /// placed and known ones patched; records whose send is still awaiting
    /// its own confirmation are left to it.
    pub fn merge(&mut self, history: Vec<Message>) -> bool {
        let mut changed = false;
        for message in history {
            if message.chat_id != self.chat_id {
                continue;
            }
            if let Some(i) = self.position(EntryKey::Stored(message.id)) {
                let entry = &self.entries[i];
                let differs = entry.content != message.content
                    || entry.edited_at != message.edited_at
                    || entry.deleted != message.deleted;
                if differs {
                    changed |= self.apply_update(message);
                }
                continue;
            }
            let awaiting = message
                .provisional_id
                .is_some_and(|pid| self.position(EntryKey::Provisional(pid)).is_some());
            if !awaiting {
                self.place(ChatEntry::from_message(message));
                changed = true;
            }
        }
        changed
    }

    /// Whether the local user may edit or delete `id`: it must be a live
    /// entry they sent.
    pub fn check_mutable(&self, id: MessageId) -> Result<(), CoreError> {
        let entry = self.get(EntryKey::Stored(id)).ok_or(CoreError::NotFound)?;
        if entry.deleted {
            return Err(CoreError::NotFound);
        }
        if entry.sender_id != self.me {
            return Err(CoreError::Unauthorized);
        }
        Ok(())
    }

    /// Most recent confirmed entry that is not deleted.
    pub fn latest_visible(&self) -> Option<&ChatEntry> {
        self.entries
            .iter()
            .rev()
            .find(|e| !e.deleted && e.delivery == DeliveryState::Confirmed)
    }

    fn position(&self, key: EntryKey) -> Option<usize> {
        self.entries.iter().position(|e| e.key == key)
    }

    fn place(&mut self, entry: ChatEntry) {
        let key = entry.sort_key();
        let at = self.entries.partition_point(|e| e.sort_key() <= key);
        self.entries.insert(at, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use parley_shared::constants::DELETED_PLACEHOLDER;

    fn message(chat_id: ChatId, id: u64, sender: &str, content: &str, at: DateTime<Utc>) -> Message {
        Message {
            id: MessageId(id),
            chat_id,
            sender_id: UserId::from(sender),
            content: content.to_string(),
            created_at: at,
            edited_at: None,
            deleted: false,
            provisional_id: None,
        }
    }

    fn contents(store: &ChatStore) -> Vec<&str> {
        store.entries().iter().map(|e| e.content.as_str()).collect()
    }

    #[test]
    fn test_history_is_sorted_by_time_then_id() {
        let chat = ChatId::new();
        let t = Utc::now();
        let store = ChatStore::with_history(
            chat,
            UserId::from("me"),
            vec![
                message(chat, 3, "bob", "c", t),
                message(chat, 1, "bob", "a", t),
                message(chat, 2, "bob", "b", t - Duration::seconds(1)),
            ],
        );
        assert_eq!(contents(&store), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_confirm_replaces_pending_in_place() {
        let chat = ChatId::new();
        let t = Utc::now();
        let mut store = ChatStore::new(chat, UserId::from("me"));
        let pid = ProvisionalId::new();
        store.insert_pending(pid, "hi".into(), t);
        assert_eq!(store.entries()[0].delivery, DeliveryState::Pending);

        let mut stored = message(chat, 7, "me", "hi", t);
        stored.provisional_id = Some(pid);
        assert!(store.confirm(pid, stored));

        assert_eq!(store.len(), 1);
        let entry = &store.entries()[0];
        assert_eq!(entry.key, EntryKey::Stored(MessageId(7)));
        assert_eq!(entry.delivery, DeliveryState::Confirmed);
        assert_eq!(entry.provisional_id, Some(pid));
    }

    #[test]
    fn test_confirm_repositions_by_store_order() {
        let chat = ChatId::new();
        let t = Utc::now();
        let mut store = ChatStore::new(chat, UserId::from("me"));
        let pid = ProvisionalId::new();
        store.insert_pending(pid, "mine".into(), t);
        assert!(store.apply_insert(message(chat, 2, "bob", "theirs", t)));
        // Pending sorts after stored entries with the same timestamp.
        assert_eq!(contents(&store), vec!["theirs", "mine"]);

        store.confirm(pid, message(chat, 1, "me", "mine", t));
        assert_eq!(contents(&store), vec!["mine", "theirs"]);
    }

    #[test]
    fn test_confirm_without_pending_entry_places_record() {
        let chat = ChatId::new();
        let t = Utc::now();
        let mut store = ChatStore::new(chat, UserId::from("me"));
        let pid = ProvisionalId::new();

        let mut stored = message(chat, 4, "me", "sent before reopen", t);
        stored.provisional_id = Some(pid);
        assert!(store.confirm(pid, stored.clone()));
        assert_eq!(store.entries()[0].key, EntryKey::Stored(MessageId(4)));
        assert_eq!(store.entries()[0].provisional_id, Some(pid));

        // Already there: nothing changes.
        assert!(!store.confirm(pid, stored));
        assert!(!store.confirm(pid, message(ChatId::new(), 5, "me", "elsewhere", t)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_merge_fills_gaps_and_patches() {
        let chat = ChatId::new();
        let t = Utc::now();
        let mut store = ChatStore::with_history(
            chat,
            UserId::from("me"),
            vec![message(chat, 1, "bob", "a", t)],
        );
        let pid = ProvisionalId::new();
        store.insert_pending(pid, "mine".into(), t);

        let mut edited = message(chat, 1, "bob", "a2", t);
        edited.edited_at = Some(t + Duration::minutes(1));
        let mut own = message(chat, 3, "me", "mine", t);
        own.provisional_id = Some(pid);
        let history = vec![edited, message(chat, 2, "bob", "missed", t), own];

        assert!(store.merge(history.clone()));
        // The pending send is left for its own confirmation.
        assert_eq!(contents(&store), vec!["a2", "missed", "mine"]);
        assert_eq!(store.entries()[2].delivery, DeliveryState::Pending);

        assert!(!store.merge(history[..2].to_vec()));
    }

    #[test]
    fn test_own_and_duplicate_inserts_are_ignored() {
        let chat = ChatId::new();
        let t = Utc::now();
        let mut store = ChatStore::new(chat, UserId::from("me"));

        assert!(!store.apply_insert(message(chat, 1, "me", "echo", t)));
        assert!(store.apply_insert(message(chat, 2, "bob", "x", t)));
        assert!(!store.apply_insert(message(chat, 2, "bob", "x", t)));
        assert!(!store.apply_insert(message(ChatId::new(), 3, "bob", "elsewhere", t)));
        assert_eq!(contents(&store), vec!["x"]);
    }

    #[test]
    fn test_failed_entry_can_be_retried_or_dismissed() {
        let chat = ChatId::new();
        let mut store = ChatStore::new(chat, UserId::from("me"));
        let pid = ProvisionalId::new();
        store.insert_pending(pid, "hi".into(), Utc::now());

        assert_eq!(store.failed_content(pid), None);
        assert!(!store.dismiss(pid));

        assert!(store.fail(pid));
        assert_eq!(store.failed_content(pid).as_deref(), Some("hi"));
        assert!(store.mark_pending(pid));
        assert!(!store.mark_pending(pid));

        store.fail(pid);
        assert!(store.dismiss(pid));
        assert!(store.is_empty());
    }

    #[test]
    fn test_update_patches_without_reordering() {
        let chat = ChatId::new();
        let t = Utc::now();
        let mut store = ChatStore::with_history(
            chat,
            UserId::from("me"),
            vec![message(chat, 1, "bob", "a", t), message(chat, 2, "me", "b", t)],
        );

        let mut edited = message(chat, 1, "bob", "a2", t);
        edited.edited_at = Some(t + Duration::minutes(1));
        assert!(store.apply_update(edited));
        assert_eq!(contents(&store), vec!["a2", "b"]);

        let mut deleted = message(chat, 2, "me", DELETED_PLACEHOLDER, t);
        deleted.deleted = true;
        assert!(store.apply_update(deleted));
        assert_eq!(contents(&store), vec!["a2", DELETED_PLACEHOLDER]);

        // Deleted is terminal.
        assert!(!store.apply_update(message(chat, 2, "me", "back", t)));
        assert_eq!(store.latest_visible().map(|e| e.content.as_str()), Some("a2"));
    }

    #[test]
    fn test_mutation_checks() {
        let chat = ChatId::new();
        let t = Utc::now();
        let mut store = ChatStore::with_history(
            chat,
            UserId::from("me"),
            vec![message(chat, 1, "bob", "a", t), message(chat, 2, "me", "b", t)],
        );

        assert_eq!(store.check_mutable(MessageId(1)), Err(CoreError::Unauthorized));
        assert_eq!(store.check_mutable(MessageId(2)), Ok(()));
        assert_eq!(store.check_mutable(MessageId(9)), Err(CoreError::NotFound));

        let mut deleted = message(chat, 2, "me", DELETED_PLACEHOLDER, t);
        deleted.deleted = true;
        store.apply_update(deleted);
        assert_eq!(store.check_mutable(MessageId(2)), Err(CoreError::NotFound));
    }
}
