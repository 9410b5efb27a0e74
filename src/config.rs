//! Core configuration surface.
//!
//! Every field has a serde default so `Config::default()` works standalone
//! and a TOML file only needs to name the fields it overrides. Token TTLs
//! and issuer/audience are configuration, not constants; the access-token
//! lifetime in particular is a named field because upstream sources disagree
//! on a "correct" default.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CoreError, Result};

/// Byte length of a generated token-signing secret (hex-encoded to 64 chars).
const SECRET_BYTES: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Session time-to-live in minutes.
    pub session_ttl_minutes: u64,
    /// Pairing-code allocation retry budget.
    pub max_code_retries: u32,
    /// Access-token lifetime in minutes. Kept short: access tokens cannot
    /// be revoked before natural expiry.
    pub access_ttl_minutes: u64,
    /// Refresh-token lifetime in days.
    pub refresh_ttl_days: u64,
    /// Fixed issuer claim, validated on every verification.
    pub issuer: String,
    /// Fixed audience claim, validated on every verification.
    pub audience: String,
    /// Reaper sweep interval in seconds.
    pub reaper_interval_secs: u64,
    /// How long terminal (expired/closed) session rows are kept before the
    /// reaper purges them, in minutes.
    pub reaped_retention_minutes: u64,
    /// HMAC signing key, hex-encoded. Generated at random when absent, which
    /// invalidates outstanding tokens across restarts unless pinned.
    pub token_secret: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_ttl_minutes: 30,
            max_code_retries: 10,
            access_ttl_minutes: 15,
            refresh_ttl_days: 14,
            issuer: "paircast".to_string(),
            audience: "paircast-clients".to_string(),
            reaper_interval_secs: 60,
            reaped_retention_minutes: 60,
            token_secret: generate_secret(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file. Missing fields fall back to
    /// their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Validation(format!("cannot read config {}: {e}", path.display()))
        })?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| CoreError::Validation(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the core cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.session_ttl_minutes == 0 {
            return Err(CoreError::Validation(
                "session_ttl_minutes must be positive".into(),
            ));
        }
        if self.max_code_retries == 0 {
            return Err(CoreError::Validation(
                "max_code_retries must be positive".into(),
            ));
        }
        if self.refresh_ttl_days == 0 {
            return Err(CoreError::Validation(
                "refresh_ttl_days must be positive".into(),
            ));
        }
        if self.issuer.trim().is_empty() || self.audience.trim().is_empty() {
            return Err(CoreError::Validation(
                "issuer and audience must be non-empty".into(),
            ));
        }
        if self.token_secret.trim().is_empty() {
            return Err(CoreError::Validation("token_secret must be non-empty".into()));
        }
        Ok(())
    }

    pub fn session_ttl_secs(&self) -> u64 {
        self.session_ttl_minutes * 60
    }

    pub fn access_ttl_secs(&self) -> u64 {
        self.access_ttl_minutes * 60
    }

    pub fn refresh_ttl_secs(&self) -> u64 {
        self.refresh_ttl_days * 24 * 3600
    }

    pub fn reaped_retention_secs(&self) -> u64 {
        self.reaped_retention_minutes * 60
    }
}

/// Random hex signing secret.
fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let config = Config::default();
        assert_eq!(config.session_ttl_minutes, 30);
        assert_eq!(config.max_code_retries, 10);
        assert_eq!(config.session_ttl_secs(), 1800);
        assert_eq!(config.token_secret.len(), SECRET_BYTES * 2);
        config.validate().unwrap();
    }

    #[test]
    fn generated_secrets_differ() {
        assert_ne!(Config::default().token_secret, Config::default().token_secret);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config =
            toml::from_str("session_ttl_minutes = 5\nissuer = \"unit-test\"").unwrap();
        assert_eq!(config.session_ttl_minutes, 5);
        assert_eq!(config.issuer, "unit-test");
        assert_eq!(config.max_code_retries, 10);
        assert!(!config.token_secret.is_empty());
    }

    #[test]
    fn zero_ttl_rejected() {
        let config = Config {
            session_ttl_minutes: 0,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn load_missing_file_fails() {
        let err = Config::load(Path::new("/nonexistent/paircast.toml")).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn load_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("core.toml");
        std::fs::write(&path, "access_ttl_minutes = 5\nreaper_interval_secs = 10\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.access_ttl_minutes, 5);
        assert_eq!(config.reaper_interval_secs, 10);
        assert_eq!(config.refresh_ttl_days, 14);
    }
}
