//! Sync coordinator.
//!
//! Owns the one open conversation view: its [`ChatStore`] and the change
//! feed subscription that keeps it current. Sends are optimistic: the
//! pending entry is visible as soon as [`SyncCoordinator::send`] returns and
//! a background task confirms or fails it.
//!
//! Each view gets a generation number and its feed pump only touches the
//! view it started under. Delivery tasks reconcile against whichever view
//! of their conversation is resident when they finish, including one
//! reopened in the meantime; with no such view the result is dropped
//! without error.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use parley_guard::Guard;
use parley_shared::{
    ChatId, ConversationKind, CoreError, DeliveryState, MessageId, ProvisionalId, UserId,
};
use parley_store::{
    ChangeEvent, ChangeFeed, ChangeKind, DataStore, FeedItem, Message, MessageDraft, MessagePatch,
};

use crate::chat_store::{ChatEntry, ChatStore, EntryKey};
use crate::events::{emit, ViewEvent};
use crate::state::SessionSlot;
use crate::summary::{preview, ConversationSummary, SummaryList};

const VIEW_EVENT_CAPACITY: usize = 256;

struct ActiveView {
    generation: u64,
    chat: ChatStore,
    pump: JoinHandle<()>,
}

/// A message handed to the store in the background.
#[derive(Debug)]
pub struct Outgoing {
    pub chat_id: ChatId,
    pub provisional_id: ProvisionalId,
    handle: JoinHandle<Result<Message, CoreError>>,
}

impl Outgoing {
    /// Wait for the store's answer.
    pub async fn settled(self) -> Result<Message, CoreError> {
        self.handle
            .await
            .map_err(|e| CoreError::NetworkFailure(format!("delivery task failed: {e}")))?
    }
}

#[derive(Clone)]
pub struct SyncCoordinator {
    store: Arc<dyn DataStore>,
    guard: Guard,
    session: SessionSlot,
    history_limit: usize,
    active: Arc<Mutex<Option<ActiveView>>>,
    summaries: Arc<Mutex<SummaryList>>,
    generation: Arc<AtomicU64>,
    events: broadcast::Sender<ViewEvent>,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<dyn DataStore>,
        guard: Guard,
        session: SessionSlot,
        history_limit: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(VIEW_EVENT_CAPACITY);
        Self {
            store,
            guard,
            session,
            history_limit,
            active: Arc::new(Mutex::new(None)),
            summaries: Arc::new(Mutex::new(SummaryList::default())),
            generation: Arc::new(AtomicU64::new(0)),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewEvent> {
        self.events.subscribe()
    }

    // ---- conversation list ----

    /// Fetch the user's conversations, most recently active first.
    pub async fn load_conversations(&self) -> Result<Vec<ConversationSummary>, CoreError> {
        let session = self.session.require()?;
        self.guard.admit("load_conversations").await?;

        let chats = self.store.conversations_for(&session.user_id).await?;
        let mut summaries = self.summaries.lock().await;
        summaries.replace_all(chats.into_iter().map(ConversationSummary::from));
        debug!(count = summaries.items().len(), "Conversations loaded");
        Ok(summaries.items().to_vec())
    }

    pub async fn summaries(&self) -> Vec<ConversationSummary> {
        self.summaries.lock().await.items().to_vec()
    }

    pub async fn summary(&self, chat_id: ChatId) -> Option<ConversationSummary> {
        self.summaries.lock().await.get(chat_id).cloned()
    }

    /// Find or create the Direct conversation with `peer` and open it.
    pub async fn open_direct(&self, peer: &UserId) -> Result<ChatId, CoreError> {
        let session = self.session.require()?;
        self.guard.admit("open_direct").await?;

        let chat = self.store.open_direct(&session.user_id, peer).await?;
        let chat_id = chat.id;
        self.upsert_summary(ConversationSummary::from(chat)).await;
        self.open_conversation(chat_id).await?;
        Ok(chat_id)
    }

    /// Create a group with the local user and `members`, then open it.
    pub async fn create_group(
        &self,
        name: Option<String>,
        members: impl IntoIterator<Item = UserId>,
    ) -> Result<ChatId, CoreError> {
        let session = self.session.require()?;
        self.guard.admit("create_group").await?;

        let mut all: BTreeSet<UserId> = members.into_iter().collect();
        all.insert(session.user_id.clone());
        let chat = self
            .store
            .create_conversation(ConversationKind::Group, all, name)
            .await?;
        info!(chat = %chat.id, members = chat.members.len(), "Group created");

        let chat_id = chat.id;
        self.upsert_summary(ConversationSummary::from(chat)).await;
        self.open_conversation(chat_id).await?;
        Ok(chat_id)
    }

    // ---- active view ----

    /// Make `chat_id` the active view.
    ///
    /// The previous view's subscription is torn down and the new one set up
    /// under the same lock, so callers never observe two live views. The
    /// new feed is subscribed before history is fetched; events racing the
    /// fetch are merged by id.
    pub async fn open_conversation(&self, chat_id: ChatId) -> Result<Vec<ChatEntry>, CoreError> {
        let session = self.session.require()?;
        self.guard.admit("load_messages").await?;

        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            previous.pump.abort();
            emit(&self.events, ViewEvent::ViewClosed { chat_id: previous.chat.chat_id() });
        }

        let feed = self.store.subscribe(chat_id, &ChangeKind::ALL);
        let history = self.store.messages(chat_id, self.history_limit).await?;
        let chat = ChatStore::with_history(chat_id, session.user_id, history);
        let entries = chat.entries().to_vec();

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let pump = tokio::spawn(self.clone().pump(feed, generation));
        *active = Some(ActiveView {
            generation,
            chat,
            pump,
        });

        info!(chat = %chat_id, entries = entries.len(), "Conversation opened");
        emit(
            &self.events,
            ViewEvent::ViewOpened {
                chat_id,
                entries: entries.len(),
            },
        );
        Ok(entries)
    }

    /// Tear down the active view, e.g. on sign-out.
    pub async fn close(&self) {
        if let Some(previous) = self.active.lock().await.take() {
            previous.pump.abort();
            info!(chat = %previous.chat.chat_id(), "Conversation closed");
            emit(&self.events, ViewEvent::ViewClosed { chat_id: previous.chat.chat_id() });
        }
    }

    /// Drop every cached summary, e.g. on sign-out.
    pub async fn reset(&self) {
        self.close().await;
        self.summaries.lock().await.clear();
    }

    pub async fn active_chat(&self) -> Option<ChatId> {
        self.active.lock().await.as_ref().map(|v| v.chat.chat_id())
    }

    /// Snapshot of the active view's entries.
    pub async fn entries(&self) -> Option<Vec<ChatEntry>> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|v| v.chat.entries().to_vec())
    }

    // ---- messages ----

    /// Send `text` to the active conversation.
    ///
    /// Returns once the pending entry is in the list. Rate limiting and
    /// rejected input fail here, before anything is added.
    pub async fn send(&self, text: &str) -> Result<Outgoing, CoreError> {
        let session = self.session.require()?;
        self.guard.admit("send_message").await?;
        let content = self.guard.validate_message(text)?;

        let provisional_id = ProvisionalId::new();
        let now = self.guard.clock().now();
        let chat_id = {
            let mut active = self.active.lock().await;
            let view = active.as_mut().ok_or(CoreError::NotFound)?;
            let key = view.chat.insert_pending(provisional_id, content.clone(), now);
            let chat_id = view.chat.chat_id();
            emit(&self.events, ViewEvent::EntryAdded { chat_id, key });
            chat_id
        };
        debug!(chat = %chat_id, provisional = %provisional_id, "Message pending");

        let draft = MessageDraft {
            provisional_id,
            chat_id,
            sender_id: session.user_id,
            content,
        };
        let handle = tokio::spawn(self.clone().deliver(draft));
        Ok(Outgoing {
            chat_id,
            provisional_id,
            handle,
        })
    }

    /// Send a failed message again under the same provisional id.
    pub async fn retry(&self, provisional_id: ProvisionalId) -> Result<Outgoing, CoreError> {
        let session = self.session.require()?;
        let (chat_id, content) = {
            let active = self.active.lock().await;
            let view = active.as_ref().ok_or(CoreError::NotFound)?;
            let content = view
                .chat
                .failed_content(provisional_id)
                .ok_or(CoreError::NotFound)?;
            (view.chat.chat_id(), content)
        };
        self.guard.admit("send_message").await?;

        {
            let mut active = self.active.lock().await;
            let view = active
                .as_mut()
                .filter(|v| v.chat.chat_id() == chat_id)
                .ok_or(CoreError::NotFound)?;
            if !view.chat.mark_pending(provisional_id) {
                return Err(CoreError::NotFound);
            }
            self.emit_delivery(chat_id, provisional_id, DeliveryState::Pending);
        }
        debug!(chat = %chat_id, provisional = %provisional_id, "Retrying message");

        let draft = MessageDraft {
            provisional_id,
            chat_id,
            sender_id: session.user_id,
            content,
        };
        let handle = tokio::spawn(self.clone().deliver(draft));
        Ok(Outgoing {
            chat_id,
            provisional_id,
            handle,
        })
    }

    /// Remove a failed message from the list.
    pub async fn dismiss(&self, provisional_id: ProvisionalId) -> Result<(), CoreError> {
        let mut active = self.active.lock().await;
        let view = active.as_mut().ok_or(CoreError::NotFound)?;
        if !view.chat.dismiss(provisional_id) {
            return Err(CoreError::NotFound);
        }
        emit(
            &self.events,
            ViewEvent::EntryRemoved {
                chat_id: view.chat.chat_id(),
                key: EntryKey::Provisional(provisional_id),
            },
        );
        Ok(())
    }

    /// Edit one of the local user's messages in the active view.
    pub async fn edit(&self, id: MessageId, text: &str) -> Result<Message, CoreError> {
        let session = self.session.require()?;
        self.check_mutable(id).await?;
        self.guard.admit("edit_message").await?;
        let content = self.guard.validate_message(text)?;

        let updated = self
            .store
            .update_message(&session.user_id, id, MessagePatch::Edit(content))
            .await?;
        self.apply_local_update(updated.clone()).await;
        Ok(updated)
    }

    /// Soft-delete one of the local user's messages in the active view.
    pub async fn delete(&self, id: MessageId) -> Result<Message, CoreError> {
        let session = self.session.require()?;
        self.check_mutable(id).await?;
        self.guard.admit("delete_message").await?;

        let updated = self
            .store
            .update_message(&session.user_id, id, MessagePatch::Delete)
            .await?;
        self.apply_local_update(updated.clone()).await;
        Ok(updated)
    }

    async fn check_mutable(&self, id: MessageId) -> Result<(), CoreError> {
        let active = self.active.lock().await;
        let view = active.as_ref().ok_or(CoreError::NotFound)?;
        view.chat.check_mutable(id)
    }

    async fn apply_local_update(&self, message: Message) {
        let chat_id = message.chat_id;
        let id = message.id;
        let mut active = self.active.lock().await;
        if let Some(view) = active.as_mut().filter(|v| v.chat.chat_id() == chat_id) {
            if view.chat.apply_update(message) {
                emit(
                    &self.events,
                    ViewEvent::EntryPatched {
                        chat_id,
                        key: EntryKey::Stored(id),
                    },
                );
                let latest = view.chat.latest_visible().cloned();
                drop(active);
                self.refresh_summary(chat_id, latest.as_ref()).await;
            }
        }
    }

    // ---- background work ----

    async fn deliver(self, draft: MessageDraft) -> Result<Message, CoreError> {
        let chat_id = draft.chat_id;
        let provisional_id = draft.provisional_id;

        match self.store.insert_message(draft).await {
            Ok(message) => {
                info!(chat = %chat_id, id = %message.id, "Message confirmed");
                let latest = {
                    let mut active = self.active.lock().await;
                    let resident = active.as_mut().filter(|v| v.chat.chat_id() == chat_id);
                    let latest = match resident {
                        Some(view) => {
                            if view.chat.confirm(provisional_id, message.clone()) {
                                self.emit_delivery(chat_id, provisional_id, DeliveryState::Confirmed);
                            }
                            view.chat.latest_visible().cloned()
                        }
                        None => {
                            debug!(provisional = %provisional_id, "Confirmation for closed view dropped");
                            None
                        }
                    };
                    latest
                };
                self.after_send(&message, latest).await;
                Ok(message)
            }
            Err(e) => {
                let err = CoreError::from(e);
                warn!(chat = %chat_id, provisional = %provisional_id, error = %err, "Message delivery failed");
                let mut active = self.active.lock().await;
                if let Some(view) = active.as_mut().filter(|v| v.chat.chat_id() == chat_id) {
                    if view.chat.fail(provisional_id) {
                        self.emit_delivery(chat_id, provisional_id, DeliveryState::Failed);
                    }
                }
                Err(err)
            }
        }
    }

    /// Refresh the conversation summary after a confirmed send and store it.
    /// Nothing is written once the session has ended.
    async fn after_send(&self, message: &Message, latest: Option<ChatEntry>) {
        let chat_id = message.chat_id;
        if self.session.get().is_none() {
            debug!(chat = %chat_id, "Signed out, summary update discarded");
            return;
        }
        let summary = match latest {
            Some(entry) => self.refresh_summary(chat_id, Some(&entry)).await,
            None => None,
        };
        let (text, at) = match &summary {
            Some(s) => (s.last_message_preview.clone(), s.last_activity_at),
            None => (Some(preview(&message.content)), message.created_at),
        };
        if let Err(e) = self.store.touch_conversation(chat_id, text, at).await {
            warn!(chat = %chat_id, error = %e, "Failed to store conversation summary");
        }
    }

    async fn pump(self, mut feed: ChangeFeed, generation: u64) {
        let chat_id = feed.chat_id();
        while let Some(item) = feed.next().await {
            let event = match item {
                FeedItem::Change(event) => event,
                FeedItem::Lagged { .. } => {
                    if !self.resync(chat_id, generation).await {
                        break;
                    }
                    continue;
                }
            };

            let mut active = self.active.lock().await;
            let Some(view) = active.as_mut().filter(|v| v.generation == generation) else {
                break;
            };

            let (changed, key) = match event {
                ChangeEvent::Insert(message) => {
                    let key = EntryKey::Stored(message.id);
                    let changed = view.chat.apply_insert(message);
                    if changed {
                        emit(&self.events, ViewEvent::EntryAdded { chat_id, key });
                    }
                    (changed, key)
                }
                ChangeEvent::Update(message) => {
                    let key = EntryKey::Stored(message.id);
                    let changed = view.chat.apply_update(message);
                    if changed {
                        emit(&self.events, ViewEvent::EntryPatched { chat_id, key });
                    }
                    (changed, key)
                }
            };

            if changed {
                debug!(chat = %chat_id, ?key, "Change applied");
                let latest = view.chat.latest_visible().cloned();
                drop(active);
                self.refresh_summary(chat_id, latest.as_ref()).await;
            }
        }
        debug!(chat = %chat_id, "Change feed pump stopped");
    }

    /// Re-read recent history after the feed dropped events and merge it
    /// into the view. Returns false once the view is gone.
    async fn resync(&self, chat_id: ChatId, generation: u64) -> bool {
        let fetched = self.store.messages(chat_id, self.history_limit).await;

        let mut active = self.active.lock().await;
        let Some(view) = active.as_mut().filter(|v| v.generation == generation) else {
            return false;
        };
        let history = match fetched {
            Ok(history) => history,
            Err(e) => {
                warn!(chat = %chat_id, error = %e, "History refetch after feed lag failed");
                return true;
            }
        };
        if !view.chat.merge(history) {
            return true;
        }

        info!(chat = %chat_id, entries = view.chat.len(), "View resynced after feed lag");
        emit(
            &self.events,
            ViewEvent::ViewResynced {
                chat_id,
                entries: view.chat.len(),
            },
        );
        let latest = view.chat.latest_visible().cloned();
        drop(active);
        self.refresh_summary(chat_id, latest.as_ref()).await;
        true
    }

    async fn refresh_summary(
        &self,
        chat_id: ChatId,
        latest: Option<&ChatEntry>,
    ) -> Option<ConversationSummary> {
        let updated = self.summaries.lock().await.refresh(chat_id, latest)?;
        emit(&self.events, ViewEvent::SummaryUpdated(updated.clone()));
        Some(updated)
    }

    async fn upsert_summary(&self, summary: ConversationSummary) {
        let mut summaries = self.summaries.lock().await;
        if summaries.get(summary.chat_id).is_none() {
            summaries.upsert(summary);
        }
    }

    fn emit_delivery(&self, chat_id: ChatId, provisional_id: ProvisionalId, state: DeliveryState) {
        emit(
            &self.events,
            ViewEvent::Delivery {
                chat_id,
                provisional_id,
                state,
            },
        );
    }
}
