//! Change feed.
//!
//! The store publishes every committed insert and update on one broadcast
//! channel. A [`ChangeFeed`] is a subscriber's filtered view of it: only
//! events whose conversation id equals the subscribed id and whose kind is
//! in the subscribed set come through. A subscriber that falls behind the
//! channel is told how many events it lost so it can re-read the store.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

use parley_shared::ChatId;

use crate::models::Message;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Insert,
    Update,
}

impl ChangeKind {
    pub const ALL: [ChangeKind; 2] = [ChangeKind::Insert, ChangeKind::Update];
}

/// A committed change, carrying the record as stored afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Insert(Message),
    Update(Message),
}

impl ChangeEvent {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Insert(_) => ChangeKind::Insert,
            ChangeEvent::Update(_) => ChangeKind::Update,
        }
    }

    pub fn message(&self) -> &Message {
        match self {
            ChangeEvent::Insert(m) | ChangeEvent::Update(m) => m,
        }
    }

    pub fn chat_id(&self) -> ChatId {
        self.message().chat_id
    }
}

/// What a [`ChangeFeed`] yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedItem {
    Change(ChangeEvent),
    /// Events were dropped before this subscriber read them. Any of them
    /// may have concerned the subscribed conversation.
    Lagged { skipped: u64 },
}

pub struct ChangeFeed {
    chat_id: ChatId,
    kinds: HashSet<ChangeKind>,
    rx: broadcast::Receiver<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(
        chat_id: ChatId,
        kinds: impl IntoIterator<Item = ChangeKind>,
        rx: broadcast::Receiver<ChangeEvent>,
    ) -> Self {
        Self {
            chat_id,
            kinds: kinds.into_iter().collect(),
            rx,
        }
    }

    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    /// Next matching event or lag notice, or `None` once the store is gone.
    pub async fn next(&mut self) -> Option<FeedItem> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if event.chat_id() == self.chat_id && self.kinds.contains(&event.kind()) {
                        return Some(FeedItem::Change(event));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(chat = %self.chat_id, skipped, "Change feed lagged");
                    return Some(FeedItem::Lagged { skipped });
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
