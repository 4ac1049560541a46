//! # parley-client
//!
//! The client core of Parley: optimistic message sync for the open
//! conversation, the conversation list, one-time-code sign-in and presence,
//! all behind the security guard layer. Nothing here renders anything; a UI
//! drives it through [`Client`] and listens to [`ViewEvent`]s.

pub mod auth;
pub mod chat_store;
pub mod client;
pub mod config;
pub mod events;
pub mod presence;
pub mod state;
pub mod summary;
pub mod sync;

use tracing_subscriber::{fmt, EnvFilter};

pub use auth::AuthFlow;
pub use chat_store::{ChatEntry, ChatStore, EntryKey};
pub use client::Client;
pub use config::ClientConfig;
pub use events::ViewEvent;
pub use presence::PresenceTracker;
pub use state::{SessionContext, SessionSlot};
pub use summary::{preview, ConversationSummary};
pub use sync::{Outgoing, SyncCoordinator};

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the
/// default filter. Calling it again is a no-op.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("parley_client=debug,parley_guard=info,parley_store=info,warn")
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
