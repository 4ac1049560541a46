//! # parley-guard
//!
//! The security guard layer every outbound call funnels through:
//! - a sliding-window **rate limiter** shared by all in-flight requests
//! - a pure **validator** that sanitizes message text or rejects it
//! - a **lockout tracker** for repeated failed authentication
//! - an idle **session monitor** that signs the user out on timeout
//! - a capped **security event log** with live subscribers
//!
//! The [`Guard`] facade bundles the process-wide pieces behind one handle.

pub mod config;
pub mod events;
pub mod guard;
pub mod lockout;
pub mod rate_limit;
pub mod session;
pub mod validator;

pub use config::GuardConfig;
pub use events::SecurityLog;
pub use guard::{Guard, GuardStats, PolicySummary, SecurityReport};
pub use lockout::{BlockStatus, FailureOutcome, LockoutRecord, LockoutTracker};
pub use rate_limit::{Admission, RateLimiter};
pub use session::{ActivitySignal, SessionMonitor, SessionState};
pub use validator::{MarkupThreat, Validator};
