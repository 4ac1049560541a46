//! Conversation list summaries.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use parley_shared::constants::{PREVIEW_ELLIPSIS, PREVIEW_KEEP_CHARS, PREVIEW_MAX_CHARS};
use parley_shared::{ChatId, ConversationKind, UserId};
use parley_store::Conversation;

use crate::chat_store::ChatEntry;

/// Shorten message content for the conversation list. Content longer than
/// 30 characters keeps its first 27 followed by `...`.
pub fn preview(content: &str) -> String {
    if content.chars().count() > PREVIEW_MAX_CHARS {
        let kept: String = content.chars().take(PREVIEW_KEEP_CHARS).collect();
        format!("{kept}{PREVIEW_ELLIPSIS}")
    } else {
        content.to_string()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub chat_id: ChatId,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub members: BTreeSet<UserId>,
    pub last_message_preview: Option<String>,
    pub last_activity_at: DateTime<Utc>,
}

impl From<Conversation> for ConversationSummary {
    fn from(c: Conversation) -> Self {
        Self {
            chat_id: c.id,
            kind: c.kind,
            name: c.name,
            members: c.members,
            last_message_preview: c.last_message_preview,
            last_activity_at: c.last_activity_at,
        }
    }
}

impl ConversationSummary {
    /// Recompute preview and activity time from the latest visible entry.
    /// With no visible entry the preview is cleared and the activity time
    /// kept.
    pub fn refresh_from(&mut self, latest: Option<&ChatEntry>) {
        match latest {
            Some(entry) => {
                self.last_message_preview = Some(preview(&entry.content));
                self.last_activity_at = entry.created_at;
            }
            None => self.last_message_preview = None,
        }
    }
}

/// The conversation list, most recently active first.
#[derive(Debug, Default)]
pub struct SummaryList {
    items: Vec<ConversationSummary>,
}

impl SummaryList {
    pub fn replace_all(&mut self, items: impl IntoIterator<Item = ConversationSummary>) {
        self.items = items.into_iter().collect();
        self.sort();
    }

    /// Insert or replace the summary for its conversation.
    pub fn upsert(&mut self, summary: ConversationSummary) {
        match self.items.iter_mut().find(|s| s.chat_id == summary.chat_id) {
            Some(existing) => *existing = summary,
            None => self.items.push(summary),
        }
        self.sort();
    }

    pub fn get(&self, chat_id: ChatId) -> Option<&ConversationSummary> {
        self.items.iter().find(|s| s.chat_id == chat_id)
    }

    /// Recompute one summary from its conversation's latest entry.
    pub fn refresh(
        &mut self,
        chat_id: ChatId,
        latest: Option<&ChatEntry>,
    ) -> Option<ConversationSummary> {
        let summary = self.items.iter_mut().find(|s| s.chat_id == chat_id)?;
        summary.refresh_from(latest);
        let updated = summary.clone();
        self.sort();
        Some(updated)
    }

    pub fn items(&self) -> &[ConversationSummary] {
        &self.items
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    fn sort(&mut self) {
        self.items
            .sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
    }
}
