//! Pairing-session lifecycle: code allocation, participant tracking, expiry.
//!
//! Provides:
//! - Collision-free 6-digit pairing code allocation (atomic insert, bounded retries)
//! - Session state machine (active -> expired / closed, terminal states absorbing)
//! - Participant membership with idempotent join and close-on-empty
//! - Background reaper that flips expired rows and purges terminal ones
//!
//! ## Design Decisions
//! - Uniqueness is enforced by the storage layer, not by pre-checking: the
//!   allocator hands candidates to an insert closure and treats a unique
//!   constraint hit as a redraw signal.
//! - Expiry is logical first, physical later. Reads treat a past-deadline
//!   session as gone immediately; the reaper only makes the state durable.

pub mod allocator;
pub mod reaper;
pub mod store;

pub use allocator::{is_valid_code, InsertOutcome, PairingCodeAllocator};
pub use reaper::ExpiryReaper;
pub use store::{Participant, ReapStats, Session, SessionStatus, SessionStore};
