//! Error taxonomy for the pairing/auth core.
//!
//! Every public operation returns a stable kind from this module so the
//! transport layer can map failures to status signaling without string
//! matching. Transient store failures are retried internally (see
//! `store::with_transient_retry`); everything else propagates directly
//! to the caller.

use thiserror::Error;

/// Top-level error kind for all core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed input: bad pairing code, email, connection id, config value.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A unique key (pairing code, email) already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The referenced session or identity does not exist, or is logically
    /// expired and therefore gone for all read purposes.
    #[error("not found: {0}")]
    NotFound(String),

    /// Pairing-code allocation used up its whole retry budget.
    /// Never retried internally; the caller abandons or re-queues.
    #[error("pairing code space exhausted after {attempts} attempts")]
    Exhausted { attempts: u32 },

    /// Authentication / token failure.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Store timeout or connection trouble. Safe to retry.
    #[error("transient store failure: {0}")]
    TransientStore(String),
}

/// Authentication failure subkinds.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Token is past its expiry timestamp.
    #[error("token expired")]
    ExpiredToken,

    /// Signature mismatch, malformed token, or wrong issuer/audience/type.
    #[error("invalid token signature")]
    InvalidSignature,

    /// Refresh token does not match the identity's stored slot
    /// (already rotated, or cleared by logout).
    #[error("refresh token revoked")]
    RevokedToken,

    /// Unknown email, wrong password, or deactivated identity.
    #[error("invalid credentials")]
    InvalidCredentials,
}

impl CoreError {
    /// Whether a bounded internal retry is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::TransientStore(_))
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::QueryReturnedNoRows => CoreError::NotFound("no matching row".into()),
            rusqlite::Error::SqliteFailure(code, _) => match code.code {
                rusqlite::ErrorCode::ConstraintViolation => {
                    CoreError::Conflict(err.to_string())
                }
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                    CoreError::TransientStore(err.to_string())
                }
                _ => CoreError::TransientStore(err.to_string()),
            },
            _ => CoreError::TransientStore(err.to_string()),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
