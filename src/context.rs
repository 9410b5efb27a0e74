//! Explicit application wiring.
//!
//! There are no ambient singletons anywhere in this crate. `AppContext`
//! builds the stores, allocator, signer and service from one `Config` and is
//! passed by reference (or cloned `Arc`s) to whoever needs it. The reaper is
//! handed out as a value so the embedding runtime decides where it runs.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{CredentialStore, HashedCredentialStore, IdentityStore, TokenService, TokenSigner};
use crate::config::Config;
use crate::error::Result;
use crate::session::{ExpiryReaper, SessionStore};

/// Fully wired core: session store plus token service under one config.
pub struct AppContext {
    pub config: Config,
    pub sessions: Arc<SessionStore>,
    pub tokens: Arc<TokenService>,
}

impl AppContext {
    /// Open file-backed stores under `data_dir` (created if absent).
    pub fn open(data_dir: &Path, config: Config) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(data_dir).map_err(|e| {
            crate::error::CoreError::Validation(format!(
                "cannot create data dir {}: {e}",
                data_dir.display()
            ))
        })?;
        let sessions = Arc::new(SessionStore::open(&data_dir.join("sessions.db"), &config)?);
        let identities = Arc::new(IdentityStore::open(&data_dir.join("identities.db"))?);
        Self::wire(config, sessions, identities)
    }

    /// In-memory stores for tests and ephemeral deployments.
    pub fn in_memory(config: Config) -> Result<Self> {
        config.validate()?;
        let sessions = Arc::new(SessionStore::open_in_memory(&config)?);
        let identities = Arc::new(IdentityStore::open_in_memory()?);
        Self::wire(config, sessions, identities)
    }

    fn wire(
        config: Config,
        sessions: Arc<SessionStore>,
        identities: Arc<IdentityStore>,
    ) -> Result<Self> {
        let credentials: Arc<dyn CredentialStore> = Arc::new(HashedCredentialStore::new());
        let signer = TokenSigner::new(&config.token_secret, &config.issuer, &config.audience);
        let tokens = Arc::new(TokenService::new(
            identities,
            credentials,
            signer,
            config.access_ttl_secs(),
            config.refresh_ttl_secs(),
        ));
        tracing::info!(
            session_ttl_minutes = config.session_ttl_minutes,
            reaper_interval_secs = config.reaper_interval_secs,
            "core context wired"
        );
        Ok(Self {
            config,
            sessions,
            tokens,
        })
    }

    /// Build the background sweep task for this context's session store.
    /// Spawn `reaper.run(shutdown)` on the embedding runtime.
    pub fn reaper(&self) -> ExpiryReaper {
        ExpiryReaper::new(
            Arc::clone(&self.sessions),
            Duration::from_secs(self.config.reaper_interval_secs),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::error::CoreError;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    #[test]
    fn in_memory_context_is_fully_functional() {
        init_tracing();
        let ctx = AppContext::in_memory(Config::default()).unwrap();

        let session = ctx.sessions.create(None).unwrap();
        assert!(ctx
            .sessions
            .find_active_by_code(&session.code)
            .unwrap()
            .is_some());

        let outcome = ctx
            .tokens
            .register("a@example.com", "secret-password", Role::User)
            .unwrap();
        ctx.tokens
            .verify_access(&outcome.tokens.access_token)
            .unwrap();
    }

    #[test]
    fn invalid_config_rejected_at_construction() {
        let config = Config {
            session_ttl_minutes: 0,
            ..Config::default()
        };
        assert!(matches!(
            AppContext::in_memory(config),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn file_backed_context_persists_identities() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = Config::default();

        let id = {
            let ctx = AppContext::open(tmp.path(), config.clone()).unwrap();
            ctx.tokens
                .register("a@example.com", "secret-password", Role::User)
                .unwrap()
                .identity
                .id
        };

        let ctx = AppContext::open(tmp.path(), config).unwrap();
        let found = ctx.tokens.identity(&id).unwrap().unwrap();
        assert_eq!(found.email, "a@example.com");
    }

    #[tokio::test]
    async fn reaper_task_runs_against_context_store() {
        let config = Config {
            reaper_interval_secs: 1,
            ..Config::default()
        };
        let ctx = AppContext::in_memory(config).unwrap();
        let (tx, rx) = tokio::sync::watch::channel(false);

        let handle = tokio::spawn(ctx.reaper().run(rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
