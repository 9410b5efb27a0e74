//! paircast-core: pairing-session lifecycle and token issuance.
//!
//! The crate pairs ephemeral devices via short numeric codes and
//! authenticates returning users. Two halves share one error taxonomy and
//! one SQLite-backed storage style:
//!
//! - [`session`]: 6-digit pairing-code allocation (atomic insert, bounded
//!   retries), the session state machine with participant tracking, and the
//!   background expiry reaper.
//! - [`auth`]: identity registration/login, compact HMAC access/refresh
//!   tokens, CAS-based refresh rotation and logout.
//!
//! Transport, routing, rate limiting and file storage are collaborators
//! outside this crate; they consume [`context::AppContext`] and map
//! [`error::CoreError`] kinds to their own status signaling.

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod session;

mod store;

pub use config::Config;
pub use context::AppContext;
pub use error::{AuthError, CoreError, Result};
