//! Identity and token lifecycle.
//!
//! Provides:
//! - Identity registration and login (email + password, SQLite-backed)
//! - Compact HMAC-SHA256 access/refresh tokens with fixed issuer/audience
//! - Refresh rotation via compare-and-set on the stored slot
//! - Logout (slot clear) and admin activation toggle
//!
//! ## Design Decisions
//! - Tokens are `base64url(json).base64url(hmac)` signed with `hmac` + `sha2`
//!   and verified in constant time; access tokens verify statelessly while
//!   refresh tokens are additionally matched byte-exact against the stored
//!   slot.
//! - Password hashing sits behind the `CredentialStore` trait; the default
//!   is iterated SHA-256 (100k rounds) with a per-credential salt.
//! - Each identity holds at most one live refresh token. Login overwrites
//!   the slot, refresh swaps it CAS-style, logout clears it. Access tokens
//!   expire on their own.

pub mod credentials;
pub mod identity;
pub mod service;
pub mod token;

pub use credentials::{CredentialStore, HashedCredentialStore};
pub use identity::{Identity, IdentityStore, Role};
pub use service::{AuthOutcome, IdentitySummary, TokenPair, TokenService};
pub use token::{AccessClaims, RefreshClaims, TokenSigner};
