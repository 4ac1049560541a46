//! # parley-store
//!
//! The Data Store seam and the local persisted state of a Parley client.
//!
//! - [`DataStore`] is the system of record for conversations, messages and
//!   presence, with a change feed scoped by conversation id and event kind.
//!   [`MemoryStore`] is the in-process implementation; [`FlakyStore`] wraps
//!   any store and injects failures.
//! - [`Database`] wraps a `rusqlite::Connection` holding small string-keyed
//!   client state (such as the pending sign-in email) and the append-only
//!   security event table.

pub mod data_store;
pub mod database;
pub mod feed;
pub mod flaky;
pub mod local_state;
pub mod memory;
pub mod migrations;
pub mod models;
pub mod security_events;

mod error;

pub use data_store::DataStore;
pub use database::Database;
pub use error::{Result, StoreError};
pub use feed::{ChangeEvent, ChangeFeed, ChangeKind, FeedItem};
pub use flaky::FlakyStore;
pub use memory::MemoryStore;
pub use models::*;
