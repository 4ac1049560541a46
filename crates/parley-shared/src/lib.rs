//! Types shared by every Parley crate: identifiers, the error taxonomy,
//! security events, the clock abstraction and the identity provider seam.

pub mod clock;
pub mod constants;
pub mod error;
pub mod identity;
pub mod integrity;
pub mod security;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{AuthError, CoreError, RejectReason, Result};
pub use identity::{AuthEvent, IdentityProvider, MemoryIdentityProvider, Session};
pub use security::{SecurityEvent, SecurityEventKind};
pub use types::{ChatId, ConversationKind, DeliveryState, MessageId, ProvisionalId, SessionToken, UserId};
