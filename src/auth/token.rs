//! Compact HMAC-signed token codec.
//!
//! Tokens are `base64url(claims JSON) . base64url(hmac_sha256(payload))`
//! with no padding. Access tokens carry identity and role claims and verify
//! statelessly; refresh tokens carry only the identity id plus a fixed
//! `token_type` marker so the two kinds cannot be swapped for each other.
//! Signature checks run in constant time via `Mac::verify_slice`. Any decode
//! or claim mismatch surfaces as `InvalidSignature`; only a structurally
//! valid, correctly signed token past its deadline yields `ExpiredToken`.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Sha256;

use crate::auth::identity::Role;
use crate::error::{AuthError, Result};
use crate::store::epoch_secs;

type HmacSha256 = Hmac<Sha256>;

/// Marker distinguishing refresh tokens from access tokens.
const REFRESH_TOKEN_TYPE: &str = "refresh";

/// Claims carried by a short-lived access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub identity_id: String,
    pub email: String,
    pub role: Role,
    pub issued_at: u64,
    pub expires_at: u64,
    pub issuer: String,
    pub audience: String,
}

/// Claims carried by a long-lived refresh token. `token_id` makes every
/// issued refresh token byte-unique even within one clock second, which the
/// byte-exact slot match during rotation depends on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub identity_id: String,
    pub token_type: String,
    pub token_id: String,
    pub issued_at: u64,
    pub expires_at: u64,
    pub issuer: String,
    pub audience: String,
}

/// Signs and verifies compact tokens under one fixed key/issuer/audience.
#[derive(Clone)]
pub struct TokenSigner {
    key: Vec<u8>,
    issuer: String,
    audience: String,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

impl TokenSigner {
    /// Build a signer from the configured secret. A hex-encoded secret is
    /// decoded to raw key bytes; anything else is used verbatim so operators
    /// can pin arbitrary passphrases.
    pub fn new(secret: &str, issuer: &str, audience: &str) -> Self {
        let key = hex::decode(secret).unwrap_or_else(|_| secret.as_bytes().to_vec());
        Self {
            key,
            issuer: issuer.to_string(),
            audience: audience.to_string(),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Sign an access token for `identity_id` valid for `ttl_secs`.
    pub fn sign_access(
        &self,
        identity_id: &str,
        email: &str,
        role: Role,
        ttl_secs: u64,
    ) -> Result<String> {
        let now = epoch_secs();
        let claims = AccessClaims {
            identity_id: identity_id.to_string(),
            email: email.to_string(),
            role,
            issued_at: now,
            expires_at: now + ttl_secs,
            issuer: self.issuer.clone(),
            audience: self.audience.clone(),
        };
        self.sign(&claims)
    }

    /// Sign a refresh token for `identity_id` valid for `ttl_secs`.
    pub fn sign_refresh(&self, identity_id: &str, ttl_secs: u64) -> Result<String> {
        let now = epoch_secs();
        let claims = RefreshClaims {
            identity_id: identity_id.to_string(),
            token_type: REFRESH_TOKEN_TYPE.to_string(),
            token_id: uuid::Uuid::new_v4().to_string(),
            issued_at: now,
            expires_at: now + ttl_secs,
            issuer: self.issuer.clone(),
            audience: self.audience.clone(),
        };
        self.sign(&claims)
    }

    /// Verify an access token: signature, issuer/audience, then expiry.
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims> {
        let claims: AccessClaims = self.verify(token)?;
        self.check_common(&claims.issuer, &claims.audience, claims.expires_at)?;
        Ok(claims)
    }

    /// Verify a refresh token; also rejects access tokens presented as
    /// refresh tokens via the `token_type` marker.
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims> {
        let claims: RefreshClaims = self.verify(token)?;
        if claims.token_type != REFRESH_TOKEN_TYPE {
            return Err(AuthError::InvalidSignature.into());
        }
        self.check_common(&claims.issuer, &claims.audience, claims.expires_at)?;
        Ok(claims)
    }

    fn sign<C: Serialize>(&self, claims: &C) -> Result<String> {
        let payload = serde_json::to_vec(claims)
            .map_err(|_| crate::error::CoreError::from(AuthError::InvalidSignature))?;
        let encoded = URL_SAFE_NO_PAD.encode(&payload);
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|_| crate::error::CoreError::from(AuthError::InvalidSignature))?;
        mac.update(encoded.as_bytes());
        let tag = mac.finalize().into_bytes();
        Ok(format!("{encoded}.{}", URL_SAFE_NO_PAD.encode(tag)))
    }

    /// Decode and authenticate, then parse claims. The MAC is checked before
    /// any claim content is looked at.
    fn verify<C: DeserializeOwned>(&self, token: &str) -> Result<C> {
        let (payload, tag) = token
            .split_once('.')
            .ok_or(AuthError::InvalidSignature)?;
        let tag_bytes = URL_SAFE_NO_PAD
            .decode(tag)
            .map_err(|_| AuthError::InvalidSignature)?;

        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|_| AuthError::InvalidSignature)?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&tag_bytes)
            .map_err(|_| AuthError::InvalidSignature)?;

        let claim_bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| AuthError::InvalidSignature)?;
        let claims =
            serde_json::from_slice(&claim_bytes).map_err(|_| AuthError::InvalidSignature)?;
        Ok(claims)
    }

    fn check_common(&self, issuer: &str, audience: &str, expires_at: u64) -> Result<()> {
        if issuer != self.issuer || audience != self.audience {
            return Err(AuthError::InvalidSignature.into());
        }
        if expires_at <= epoch_secs() {
            return Err(AuthError::ExpiredToken.into());
        }
        Ok(())
    }
}
