use serde::Serialize;
use tokio::sync::broadcast;

use parley_shared::{ChatId, DeliveryState, ProvisionalId};

use crate::chat_store::EntryKey;
use crate::summary::ConversationSummary;

/// Changes pushed to whatever renders the client.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ViewEvent {
    /// A conversation view was opened with its history loaded.
    ViewOpened { chat_id: ChatId, entries: usize },
    ViewClosed { chat_id: ChatId },
    /// The view was reconciled against a fresh history fetch.
    ViewResynced { chat_id: ChatId, entries: usize },
    /// A new entry was placed in the list.
    EntryAdded { chat_id: ChatId, key: EntryKey },
    /// An entry was edited or deleted in place.
    EntryPatched { chat_id: ChatId, key: EntryKey },
    /// An entry was removed locally.
    EntryRemoved { chat_id: ChatId, key: EntryKey },
    Delivery {
        chat_id: ChatId,
        provisional_id: ProvisionalId,
        state: DeliveryState,
    },
    SummaryUpdated(ConversationSummary),
}

pub(crate) fn emit(tx: &broadcast::Sender<ViewEvent>, event: ViewEvent) {
    if tx.send(event).is_err() {
        tracing::trace!("No view listeners");
    }
}
