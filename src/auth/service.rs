//! Token issuance, rotation and revocation.
//!
//! The service composes the identity store, a `CredentialStore` and the
//! `TokenSigner`. It owns the registration/login/refresh/logout flows and
//! the invariant that an identity holds at most one live refresh token:
//! register and login overwrite the slot, refresh swaps it with a
//! compare-and-set keyed on the token just presented, logout clears it.
//! Access tokens verify statelessly and cannot be revoked early; the short
//! configured TTL is the mitigation.

use std::sync::Arc;

use crate::auth::credentials::CredentialStore;
use crate::auth::identity::{normalize_email, Identity, IdentityStore, Role};
use crate::auth::token::{AccessClaims, TokenSigner};
use crate::error::{AuthError, CoreError, Result};
use crate::store::epoch_secs;

/// Longest accepted email, matching common mail-system limits.
const MAX_EMAIL_LEN: usize = 254;

/// Minimum password length accepted at registration.
const MIN_PASSWORD_LEN: usize = 8;

/// Freshly issued access + refresh pair.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: u64,
    pub refresh_expires_at: u64,
}

/// Identity view safe to hand to callers (no credential material).
#[derive(Debug, Clone)]
pub struct IdentitySummary {
    pub id: String,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
    pub last_login_at: Option<u64>,
    pub created_at: u64,
}

impl From<&Identity> for IdentitySummary {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id.clone(),
            email: identity.email.clone(),
            role: identity.role,
            is_active: identity.is_active,
            last_login_at: identity.last_login_at,
            created_at: identity.created_at,
        }
    }
}

/// Result of a successful register or login.
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub identity: IdentitySummary,
    pub tokens: TokenPair,
}

/// Issues, verifies, rotates and revokes token pairs.
pub struct TokenService {
    identities: Arc<IdentityStore>,
    credentials: Arc<dyn CredentialStore>,
    signer: TokenSigner,
    access_ttl_secs: u64,
    refresh_ttl_secs: u64,
}

impl TokenService {
    pub fn new(
        identities: Arc<IdentityStore>,
        credentials: Arc<dyn CredentialStore>,
        signer: TokenSigner,
        access_ttl_secs: u64,
        refresh_ttl_secs: u64,
    ) -> Self {
        Self {
            identities,
            credentials,
            signer,
            access_ttl_secs,
            refresh_ttl_secs,
        }
    }

    /// Create a new identity and issue its first token pair.
    pub fn register(&self, email: &str, password: &str, role: Role) -> Result<AuthOutcome> {
        let email = validate_email(email)?;
        if password.len() < MIN_PASSWORD_LEN {
            return Err(CoreError::Validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let identity = Identity {
            id: uuid::Uuid::new_v4().to_string(),
            email,
            password_hash: self.credentials.store(password)?,
            role,
            is_active: true,
            refresh_token: None,
            last_login_at: None,
            created_at: epoch_secs(),
        };
        self.identities.insert(&identity)?;

        let tokens = self.issue_pair(&identity)?;
        self.identities
            .set_refresh_token(&identity.id, &tokens.refresh_token)?;
        tracing::info!(identity_id = %identity.id, "identity registered");

        Ok(AuthOutcome {
            identity: IdentitySummary::from(&identity),
            tokens,
        })
    }

    /// Authenticate and issue a fresh pair, superseding any previous refresh
    /// token for this identity.
    pub fn login(&self, email: &str, password: &str) -> Result<AuthOutcome> {
        let Some(identity) = self.identities.by_email(email)? else {
            // Unknown email: burn the hashing work so lookup misses are not
            // cheaper than password mismatches.
            self.credentials.equalize(password);
            return Err(AuthError::InvalidCredentials.into());
        };
        if !self.credentials.verify(&identity.password_hash, password) {
            return Err(AuthError::InvalidCredentials.into());
        }
        if !identity.is_active {
            return Err(AuthError::InvalidCredentials.into());
        }

        let tokens = self.issue_pair(&identity)?;
        self.identities
            .set_refresh_token(&identity.id, &tokens.refresh_token)?;
        self.identities.touch_last_login(&identity.id)?;
        tracing::debug!(identity_id = %identity.id, "login succeeded");

        let mut summary = IdentitySummary::from(&identity);
        summary.last_login_at = Some(epoch_secs());
        Ok(AuthOutcome {
            identity: summary,
            tokens,
        })
    }

    /// Stateless access-token check: signature, expiry, issuer, audience.
    /// No storage round trip, so revocation before natural expiry is not
    /// possible here.
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims> {
        self.signer.verify_access(token)
    }

    /// Rotate a refresh token. The presented token must byte-exact match the
    /// identity's stored slot, and the slot swap is compare-and-set on that
    /// value, so of two concurrent calls bearing the same token exactly one
    /// wins and the other sees `RevokedToken`.
    pub fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let claims = self.signer.verify_refresh(refresh_token)?;
        let identity = self
            .identities
            .by_id(&claims.identity_id)?
            .ok_or_else(|| CoreError::NotFound(format!("identity {}", claims.identity_id)))?;
        if !identity.is_active {
            return Err(AuthError::InvalidCredentials.into());
        }
        if identity.refresh_token.as_deref() != Some(refresh_token) {
            return Err(AuthError::RevokedToken.into());
        }

        let tokens = self.issue_pair(&identity)?;
        let swapped = self.identities.swap_refresh_token(
            &identity.id,
            refresh_token,
            &tokens.refresh_token,
        )?;
        if !swapped {
            // Lost the race to a concurrent rotation or logout.
            return Err(AuthError::RevokedToken.into());
        }
        tracing::debug!(identity_id = %identity.id, "refresh token rotated");
        Ok(tokens)
    }

    /// Clear the identity's refresh slot. Already-issued access tokens stay
    /// valid until natural expiry.
    pub fn logout(&self, identity_id: &str) -> Result<()> {
        if !self.identities.clear_refresh_token(identity_id)? {
            return Err(CoreError::NotFound(format!("identity {identity_id}")));
        }
        tracing::debug!(identity_id, "logged out");
        Ok(())
    }

    /// Access check plus identity-active check, for connection-oriented
    /// collaborators. Returns just the identity id.
    pub fn verify_for_transport(&self, token: &str) -> Result<String> {
        let claims = self.signer.verify_access(token)?;
        let identity = self
            .identities
            .by_id(&claims.identity_id)?
            .ok_or(AuthError::InvalidCredentials)?;
        if !identity.is_active {
            return Err(AuthError::InvalidCredentials.into());
        }
        Ok(identity.id)
    }

    /// Summary lookup by id.
    pub fn identity(&self, identity_id: &str) -> Result<Option<IdentitySummary>> {
        Ok(self
            .identities
            .by_id(identity_id)?
            .as_ref()
            .map(IdentitySummary::from))
    }

    /// Summary lookup by (normalized) email.
    pub fn identity_by_email(&self, email: &str) -> Result<Option<IdentitySummary>> {
        Ok(self
            .identities
            .by_email(email)?
            .as_ref()
            .map(IdentitySummary::from))
    }

    /// Admin toggle; a deactivated identity fails login, refresh and
    /// transport verification but keeps its row.
    pub fn set_active(&self, identity_id: &str, active: bool) -> Result<()> {
        self.identities.set_active(identity_id, active)
    }

    pub fn count(&self) -> Result<u64> {
        self.identities.count()
    }

    fn issue_pair(&self, identity: &Identity) -> Result<TokenPair> {
        let now = epoch_secs();
        let access_token = self.signer.sign_access(
            &identity.id,
            &identity.email,
            identity.role,
            self.access_ttl_secs,
        )?;
        let refresh_token = self
            .signer
            .sign_refresh(&identity.id, self.refresh_ttl_secs)?;
        Ok(TokenPair {
            access_token,
            refresh_token,
            access_expires_at: now + self.access_ttl_secs,
            refresh_expires_at: now + self.refresh_ttl_secs,
        })
    }
}

/// Non-empty, contains `@`, bounded length; returned in canonical form.
fn validate_email(email: &str) -> Result<String> {
    let normalized = normalize_email(email);
    if normalized.is_empty() {
        return Err(CoreError::Validation("email must be non-empty".into()));
    }
    if normalized.len() > MAX_EMAIL_LEN {
        return Err(CoreError::Validation(format!(
            "email too long (max {MAX_EMAIL_LEN} characters)"
        )));
    }
    let Some((local, domain)) = normalized.split_once('@') else {
        return Err(CoreError::Validation(format!("invalid email: {normalized}")));
    };
    if local.is_empty() || domain.is_empty() {
        return Err(CoreError::Validation(format!("invalid email: {normalized}")));
    }
    Ok(normalized)
}
