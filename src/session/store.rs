//! SQLite-backed pairing-session store.
//!
//! Owns the session lifecycle (`active → expired`, `active → closed`),
//! the participant list, and the denormalized message/file counters.
//!
//! ## Storage
//! One connection in WAL mode. Code uniqueness is enforced by a partial
//! unique index over `status = 'active'` rows, so a code frees up the
//! moment its session leaves the active state while the terminal row is
//! still around for the reaper's retention window.
//!
//! ## Read discipline
//! Logical expiry (`expires_at <= now`) precedes physical cleanup by the
//! reaper. Every read and mutation path evaluates it: an expired-but-not-
//! yet-reaped session is invisible to code lookup and rejects participant
//! and counter operations.

use parking_lot::Mutex;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::allocator::{is_valid_code, InsertOutcome, PairingCodeAllocator};
use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::store::{self, epoch_secs};

// ── Entity types ────────────────────────────────────────────────────

/// Lifecycle state of a pairing session. `Expired` and `Closed` are
/// terminal: no transition ever leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Expired,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Closed => "closed",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            "expired" => Self::Expired,
            _ => Self::Closed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// A pairing session as read from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    /// 6-digit pairing code, unique among active sessions.
    pub code: String,
    /// Owning identity, when the session was created by an authenticated user.
    pub owner_id: Option<String>,
    pub status: SessionStatus,
    pub created_at: u64,
    pub expires_at: u64,
    pub last_activity: u64,
    pub message_count: u64,
    pub file_count: u64,
}

impl Session {
    /// Logical expiry predicate at an explicit instant.
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires_at <= now
    }

    /// Logical expiry predicate at the current instant.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(epoch_secs())
    }
}

/// A connected device within a session. Owned exclusively by its session;
/// removed on disconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    /// Opaque connection identifier, unique within the session.
    pub conn_id: String,
    pub device_label: Option<String>,
    pub joined_at: u64,
}

/// Counts from one reaper sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapStats {
    /// Active sessions flipped to `expired`.
    pub expired: u64,
    /// Terminal rows purged after the retention window.
    pub purged: u64,
}

/// Length cap for connection identifiers and device labels.
const MAX_IDENTIFIER_LEN: usize = 128;

// ── SQLite store ────────────────────────────────────────────────────

pub struct SessionStore {
    conn: Mutex<rusqlite::Connection>,
    allocator: PairingCodeAllocator,
    ttl_secs: u64,
    retention_secs: u64,
}

impl SessionStore {
    /// Open (or create) the session database at the given path.
    pub fn open(db_path: &Path, config: &Config) -> Result<Self> {
        Self::with_conn(store::open(db_path)?, config)
    }

    /// In-memory store for tests and ephemeral deployments.
    pub fn open_in_memory(config: &Config) -> Result<Self> {
        Self::with_conn(store::open_in_memory()?, config)
    }

    fn with_conn(conn: rusqlite::Connection, config: &Config) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                id            TEXT PRIMARY KEY,
                code          TEXT NOT NULL,
                owner_id      TEXT,
                status        TEXT NOT NULL DEFAULT 'active',
                created_at    INTEGER NOT NULL,
                expires_at    INTEGER NOT NULL,
                last_activity INTEGER NOT NULL,
                message_count INTEGER NOT NULL DEFAULT 0,
                file_count    INTEGER NOT NULL DEFAULT 0
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_active_code
                ON sessions(code) WHERE status = 'active';
            CREATE INDEX IF NOT EXISTS idx_sessions_status_expires
                ON sessions(status, expires_at);

            CREATE TABLE IF NOT EXISTS participants (
                session_id   TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                conn_id      TEXT NOT NULL,
                device_label TEXT,
                joined_at    INTEGER NOT NULL,
                PRIMARY KEY (session_id, conn_id)
            );
            CREATE INDEX IF NOT EXISTS idx_participants_session
                ON participants(session_id);",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            allocator: PairingCodeAllocator::new(config.max_code_retries),
            ttl_secs: config.session_ttl_secs(),
            retention_secs: config.reaped_retention_secs(),
        })
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Create a new active session with a freshly allocated unique code
    /// and expiry `now + TTL`.
    pub fn create(&self, owner_id: Option<&str>) -> Result<Session> {
        store::with_transient_retry("session_create", || self.try_create(owner_id))
    }

    fn try_create(&self, owner_id: Option<&str>) -> Result<Session> {
        let conn = self.conn.lock();
        let id = uuid::Uuid::new_v4().to_string();
        let now = epoch_secs();
        let expires_at = now + self.ttl_secs;

        // The INSERT itself is the uniqueness check: a hit on the partial
        // unique index comes back as a constraint violation and the
        // allocator redraws. There is no check-then-act window.
        let code = self.allocator.allocate(|candidate| {
            let inserted = conn.execute(
                "INSERT INTO sessions (id, code, owner_id, status, created_at, expires_at, last_activity)
                 VALUES (?1, ?2, ?3, 'active', ?4, ?5, ?4)",
                params![id, candidate, owner_id, now as i64, expires_at as i64],
            );
            match inserted {
                Ok(_) => Ok(InsertOutcome::Inserted),
                Err(err) if store::is_unique_violation(&err) => Ok(InsertOutcome::Collision),
                Err(err) => Err(err.into()),
            }
        })?;

        tracing::info!(session_id = %id, code = %code, expires_at, "session created");

        Ok(Session {
            id,
            code,
            owner_id: owner_id.map(str::to_string),
            status: SessionStatus::Active,
            created_at: now,
            expires_at,
            last_activity: now,
            message_count: 0,
            file_count: 0,
        })
    }

    /// Look up a session by id. A logically-expired row that the reaper has
    /// not swept yet is reported with status `Expired`.
    pub fn get(&self, session_id: &str) -> Result<Option<Session>> {
        let conn = self.conn.lock();
        let row = conn.query_row(
            "SELECT id, code, owner_id, status, created_at, expires_at, last_activity,
                    message_count, file_count
             FROM sessions WHERE id = ?1",
            params![session_id],
            row_to_session,
        );
        match row {
            Ok(mut session) => {
                if session.status == SessionStatus::Active && session.is_expired() {
                    session.status = SessionStatus::Expired;
                }
                Ok(Some(session))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve a pairing code to its active, unexpired session.
    pub fn find_active_by_code(&self, code: &str) -> Result<Option<Session>> {
        let code = code.trim();
        if !is_valid_code(code) {
            return Err(CoreError::Validation(format!(
                "malformed pairing code: {code:?}"
            )));
        }

        let conn = self.conn.lock();
        let now = epoch_secs() as i64;
        let row = conn.query_row(
            "SELECT id, code, owner_id, status, created_at, expires_at, last_activity,
                    message_count, file_count
             FROM sessions
             WHERE code = ?1 AND status = 'active' AND expires_at > ?2",
            params![code, now],
            row_to_session,
        );
        match row {
            Ok(session) => Ok(Some(session)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Extend an active session: expiry becomes `now + minutes`, activity is
    /// touched. Returns `false` without effect when the session is terminal,
    /// logically expired, or missing; callers that depend on the extension
    /// must check the outcome.
    pub fn extend_expiration(&self, session_id: &str, minutes: u64) -> Result<bool> {
        if minutes == 0 {
            return Err(CoreError::Validation(
                "extension must be at least one minute".into(),
            ));
        }
        store::with_transient_retry("session_extend", || {
            let conn = self.conn.lock();
            let now = epoch_secs() as i64;
            let changed = conn.execute(
                "UPDATE sessions
                 SET expires_at = ?1, last_activity = ?2
                 WHERE id = ?3 AND status = 'active' AND expires_at > ?2",
                params![now + (minutes * 60) as i64, now, session_id],
            )?;
            Ok(changed == 1)
        })
    }

    // ── Participants ────────────────────────────────────────────────

    /// Add a participant to an active session. Idempotent: re-joining with
    /// an existing connection id neither duplicates the entry, resets its
    /// join time, nor touches activity.
    pub fn add_participant(
        &self,
        session_id: &str,
        conn_id: &str,
        device_label: Option<&str>,
    ) -> Result<Participant> {
        validate_identifier("connection id", conn_id)?;
        if let Some(label) = device_label {
            if label.len() > MAX_IDENTIFIER_LEN {
                return Err(CoreError::Validation("device label too long".into()));
            }
        }

        store::with_transient_retry("participant_add", || {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            let now = epoch_secs();

            let live = tx.query_row(
                "SELECT status, expires_at FROM sessions WHERE id = ?1",
                params![session_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            );
            let (status, expires_at) = match live {
                Ok(pair) => pair,
                Err(rusqlite::Error::QueryReturnedNoRows) => {
                    return Err(CoreError::NotFound(format!("session {session_id}")));
                }
                Err(e) => return Err(e.into()),
            };
            if SessionStatus::from_str_lossy(&status).is_terminal() || expires_at as u64 <= now {
                return Err(CoreError::NotFound(format!(
                    "session {session_id} is no longer active"
                )));
            }

            let inserted = tx.execute(
                "INSERT OR IGNORE INTO participants (session_id, conn_id, device_label, joined_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![session_id, conn_id, device_label, now as i64],
            )?;
            if inserted == 1 {
                tx.execute(
                    "UPDATE sessions SET last_activity = ?1 WHERE id = ?2",
                    params![now as i64, session_id],
                )?;
                tracing::debug!(session_id, conn_id, "participant joined");
            }

            let participant = tx.query_row(
                "SELECT conn_id, device_label, joined_at
                 FROM participants WHERE session_id = ?1 AND conn_id = ?2",
                params![session_id, conn_id],
                row_to_participant,
            )?;
            tx.commit()?;
            Ok(participant)
        })
    }

    /// Remove a participant on disconnect. Absent participants (or sessions)
    /// are a no-op. Removing the last participant of an active session
    /// closes it irrevocably.
    pub fn remove_participant(&self, session_id: &str, conn_id: &str) -> Result<()> {
        store::with_transient_retry("participant_remove", || {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            let now = epoch_secs() as i64;

            let removed = tx.execute(
                "DELETE FROM participants WHERE session_id = ?1 AND conn_id = ?2",
                params![session_id, conn_id],
            )?;
            if removed == 0 {
                tx.commit()?;
                return Ok(());
            }

            tx.execute(
                "UPDATE sessions SET last_activity = ?1 WHERE id = ?2",
                params![now, session_id],
            )?;

            let remaining: i64 = tx.query_row(
                "SELECT COUNT(*) FROM participants WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )?;
            if remaining == 0 {
                // Guarded on 'active' so a terminal state is never overwritten.
                let closed = tx.execute(
                    "UPDATE sessions SET status = 'closed' WHERE id = ?1 AND status = 'active'",
                    params![session_id],
                )?;
                if closed == 1 {
                    tracing::info!(session_id, "last participant left, session closed");
                }
            }

            tx.commit()?;
            Ok(())
        })
    }

    /// Participants of a session, ordered by join time.
    pub fn participants(&self, session_id: &str) -> Result<Vec<Participant>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT conn_id, device_label, joined_at
             FROM participants WHERE session_id = ?1
             ORDER BY joined_at ASC, conn_id ASC",
        )?;
        let participants = stmt
            .query_map(params![session_id], row_to_participant)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(participants)
    }

    // ── Activity & counters ─────────────────────────────────────────

    /// Touch the last-activity timestamp of an active session.
    pub fn touch_activity(&self, session_id: &str) -> Result<()> {
        store::with_transient_retry("session_touch", || {
            let conn = self.conn.lock();
            let now = epoch_secs() as i64;
            let changed = conn.execute(
                "UPDATE sessions SET last_activity = ?1
                 WHERE id = ?2 AND status = 'active' AND expires_at > ?1",
                params![now, session_id],
            )?;
            if changed == 0 {
                return Err(CoreError::NotFound(format!(
                    "session {session_id} is no longer active"
                )));
            }
            Ok(())
        })
    }

    /// Record a message created within the session.
    pub fn increment_message_count(&self, session_id: &str) -> Result<()> {
        self.bump_counter("session_bump_messages", "message_count", session_id)
    }

    /// Record a file shared within the session.
    pub fn increment_file_count(&self, session_id: &str) -> Result<()> {
        self.bump_counter("session_bump_files", "file_count", session_id)
    }

    /// Counter bump fused with the activity touch in one statement, so
    /// concurrent writers can never lose an update to read-modify-write.
    fn bump_counter(
        &self,
        op_name: &'static str,
        column: &'static str,
        session_id: &str,
    ) -> Result<()> {
        store::with_transient_retry(op_name, || {
            let conn = self.conn.lock();
            let now = epoch_secs() as i64;
            let sql = format!(
                "UPDATE sessions SET {column} = {column} + 1, last_activity = ?1
                 WHERE id = ?2 AND status = 'active' AND expires_at > ?1"
            );
            let changed = conn.execute(&sql, params![now, session_id])?;
            if changed == 0 {
                return Err(CoreError::NotFound(format!(
                    "session {session_id} is no longer active"
                )));
            }
            Ok(())
        })
    }

    // ── Reaping ─────────────────────────────────────────────────────

    /// One reaper sweep at the given instant: flip overdue active sessions
    /// to `expired`, then purge terminal rows past the retention window
    /// (cascading their participants). Idempotent.
    pub fn reap(&self, now: u64) -> Result<ReapStats> {
        store::with_transient_retry("session_reap", || {
            let conn = self.conn.lock();
            let expired = conn.execute(
                "UPDATE sessions SET status = 'expired'
                 WHERE status = 'active' AND expires_at <= ?1",
                params![now as i64],
            )?;
            let cutoff = now.saturating_sub(self.retention_secs);
            let purged = conn.execute(
                "DELETE FROM sessions
                 WHERE status IN ('expired', 'closed') AND last_activity <= ?1",
                params![cutoff as i64],
            )?;
            Ok(ReapStats {
                expired: expired as u64,
                purged: purged as u64,
            })
        })
    }

    /// Number of currently active (and not logically expired) sessions.
    pub fn active_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let now = epoch_secs() as i64;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE status = 'active' AND expires_at > ?1",
            params![now],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

fn validate_identifier(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CoreError::Validation(format!("{what} cannot be empty")));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(CoreError::Validation(format!("{what} too long")));
    }
    Ok(())
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        code: row.get(1)?,
        owner_id: row.get(2)?,
        status: SessionStatus::from_str_lossy(&row.get::<_, String>(3)?),
        created_at: row.get::<_, i64>(4)? as u64,
        expires_at: row.get::<_, i64>(5)? as u64,
        last_activity: row.get::<_, i64>(6)? as u64,
        message_count: row.get::<_, i64>(7)? as u64,
        file_count: row.get::<_, i64>(8)? as u64,
    })
}

fn row_to_participant(row: &rusqlite::Row<'_>) -> rusqlite::Result<Participant> {
    Ok(Participant {
        conn_id: row.get(0)?,
        device_label: row.get(1)?,
        joined_at: row.get::<_, i64>(2)? as u64,
    })
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn test_store() -> SessionStore {
        SessionStore::open_in_memory(&Config::default()).unwrap()
    }

    fn backdate_expiry(store: &SessionStore, session_id: &str) {
        store
            .conn
            .lock()
            .execute(
                "UPDATE sessions SET expires_at = ?1 WHERE id = ?2",
                params![(epoch_secs() - 10) as i64, session_id],
            )
            .unwrap();
    }

    #[test]
    fn create_assigns_wellformed_unique_codes() {
        let store = test_store();
        let mut codes = HashSet::new();
        for _ in 0..50 {
            let session = store.create(None).unwrap();
            assert!(is_valid_code(&session.code));
            assert_eq!(session.status, SessionStatus::Active);
            assert!(session.expires_at > epoch_secs());
            assert!(codes.insert(session.code));
        }
        assert_eq!(store.active_count().unwrap(), 50);
    }

    #[test]
    fn create_records_owner() {
        let store = test_store();
        let session = store.create(Some("identity-1")).unwrap();
        let fetched = store.get(&session.id).unwrap().unwrap();
        assert_eq!(fetched.owner_id.as_deref(), Some("identity-1"));
    }

    #[test]
    fn find_by_code_roundtrip() {
        let store = test_store();
        let session = store.create(None).unwrap();

        let found = store.find_active_by_code(&session.code).unwrap().unwrap();
        assert_eq!(found.id, session.id);

        // Whitespace tolerated, as entered by users.
        let padded = format!(" {} ", session.code);
        assert!(store.find_active_by_code(&padded).unwrap().is_some());
    }

    #[test]
    fn find_by_malformed_code_is_validation_error() {
        let store = test_store();
        for bad in ["12345", "1234567", "abc123", ""] {
            assert!(matches!(
                store.find_active_by_code(bad),
                Err(CoreError::Validation(_))
            ));
        }
    }

    #[test]
    fn get_unknown_session_is_none() {
        let store = test_store();
        assert!(store.get("nope").unwrap().is_none());
    }

    #[test]
    fn add_participant_is_idempotent_and_preserves_join_time() {
        let store = test_store();
        let session = store.create(None).unwrap();

        let first = store
            .add_participant(&session.id, "conn-1", Some("Pixel 9"))
            .unwrap();

        // Age the entry so a reset of the join time would be visible.
        store
            .conn
            .lock()
            .execute(
                "UPDATE participants SET joined_at = joined_at - 100 WHERE conn_id = 'conn-1'",
                [],
            )
            .unwrap();

        let again = store
            .add_participant(&session.id, "conn-1", Some("Pixel 9"))
            .unwrap();
        assert_eq!(again.joined_at, first.joined_at - 100);
        assert_eq!(store.participants(&session.id).unwrap().len(), 1);
    }

    #[test]
    fn participants_ordered_by_join_time() {
        let store = test_store();
        let session = store.create(None).unwrap();

        store.add_participant(&session.id, "conn-a", None).unwrap();
        store.add_participant(&session.id, "conn-b", None).unwrap();
        // Make conn-b strictly older so ordering is deterministic.
        store
            .conn
            .lock()
            .execute(
                "UPDATE participants SET joined_at = joined_at - 50 WHERE conn_id = 'conn-b'",
                [],
            )
            .unwrap();

        let ordered = store.participants(&session.id).unwrap();
        assert_eq!(ordered.len(), 2);
        assert_eq!(ordered[0].conn_id, "conn-b");
        assert_eq!(ordered[1].conn_id, "conn-a");
    }

    #[test]
    fn empty_conn_id_rejected() {
        let store = test_store();
        let session = store.create(None).unwrap();
        assert!(matches!(
            store.add_participant(&session.id, "  ", None),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn removing_last_participant_closes_session() {
        let store = test_store();
        let session = store.create(None).unwrap();

        store.add_participant(&session.id, "conn-1", None).unwrap();
        store.remove_participant(&session.id, "conn-1").unwrap();

        let closed = store.get(&session.id).unwrap().unwrap();
        assert_eq!(closed.status, SessionStatus::Closed);
        assert!(store.find_active_by_code(&session.code).unwrap().is_none());
    }

    #[test]
    fn closed_is_absorbing() {
        let store = test_store();
        let session = store.create(None).unwrap();
        store.add_participant(&session.id, "conn-1", None).unwrap();
        store.remove_participant(&session.id, "conn-1").unwrap();

        // Joins are rejected, repeat removals are no-ops, extension has
        // no effect; the state never leaves closed.
        assert!(matches!(
            store.add_participant(&session.id, "conn-2", None),
            Err(CoreError::NotFound(_))
        ));
        store.remove_participant(&session.id, "conn-1").unwrap();
        assert!(!store.extend_expiration(&session.id, 30).unwrap());
        assert_eq!(
            store.get(&session.id).unwrap().unwrap().status,
            SessionStatus::Closed
        );
    }

    #[test]
    fn remove_absent_participant_is_noop() {
        let store = test_store();
        let session = store.create(None).unwrap();
        store.add_participant(&session.id, "conn-1", None).unwrap();

        store.remove_participant(&session.id, "ghost").unwrap();
        store.remove_participant("no-such-session", "conn-1").unwrap();

        assert_eq!(
            store.get(&session.id).unwrap().unwrap().status,
            SessionStatus::Active
        );
        assert_eq!(store.participants(&session.id).unwrap().len(), 1);
    }

    #[test]
    fn partial_removal_keeps_session_active() {
        let store = test_store();
        let session = store.create(None).unwrap();
        store.add_participant(&session.id, "conn-1", None).unwrap();
        store.add_participant(&session.id, "conn-2", None).unwrap();

        store.remove_participant(&session.id, "conn-1").unwrap();

        assert_eq!(
            store.get(&session.id).unwrap().unwrap().status,
            SessionStatus::Active
        );
        assert_eq!(store.participants(&session.id).unwrap().len(), 1);
    }

    #[test]
    fn extend_strictly_increases_expiry() {
        let config = Config {
            session_ttl_minutes: 1,
            ..Config::default()
        };
        let store = SessionStore::open_in_memory(&config).unwrap();
        let session = store.create(None).unwrap();

        assert!(store.extend_expiration(&session.id, 45).unwrap());
        let extended = store.get(&session.id).unwrap().unwrap();
        assert!(extended.expires_at > session.expires_at);
        assert!(extended.expires_at > epoch_secs());
    }

    #[test]
    fn extend_zero_minutes_rejected() {
        let store = test_store();
        let session = store.create(None).unwrap();
        assert!(matches!(
            store.extend_expiration(&session.id, 0),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn counters_accumulate_and_touch_activity() {
        let store = test_store();
        let session = store.create(None).unwrap();

        store.increment_message_count(&session.id).unwrap();
        store.increment_message_count(&session.id).unwrap();
        store.increment_file_count(&session.id).unwrap();
        store.touch_activity(&session.id).unwrap();

        let fetched = store.get(&session.id).unwrap().unwrap();
        assert_eq!(fetched.message_count, 2);
        assert_eq!(fetched.file_count, 1);
        assert!(fetched.last_activity >= session.last_activity);
    }

    #[test]
    fn counters_rejected_on_terminal_session() {
        let store = test_store();
        let session = store.create(None).unwrap();
        store.add_participant(&session.id, "conn-1", None).unwrap();
        store.remove_participant(&session.id, "conn-1").unwrap();

        assert!(matches!(
            store.increment_message_count(&session.id),
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(
            store.touch_activity(&session.id),
            Err(CoreError::NotFound(_))
        ));
    }

    #[test]
    fn logically_expired_session_is_gone_before_reaping() {
        let store = test_store();
        let session = store.create(None).unwrap();
        backdate_expiry(&store, &session.id);

        // No sweep has run, but every read and mutation path already
        // treats the session as expired.
        assert!(store.find_active_by_code(&session.code).unwrap().is_none());
        assert!(matches!(
            store.add_participant(&session.id, "conn-1", None),
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(
            store.increment_file_count(&session.id),
            Err(CoreError::NotFound(_))
        ));
        assert!(!store.extend_expiration(&session.id, 30).unwrap());
        assert_eq!(
            store.get(&session.id).unwrap().unwrap().status,
            SessionStatus::Expired
        );
        assert_eq!(store.active_count().unwrap(), 0);
    }

    #[test]
    fn reap_flips_overdue_sessions() {
        let store = test_store();
        let session = store.create(None).unwrap();
        backdate_expiry(&store, &session.id);

        let stats = store.reap(epoch_secs()).unwrap();
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.purged, 0);

        // Idempotent: a second sweep finds nothing to do.
        let stats = store.reap(epoch_secs()).unwrap();
        assert_eq!(stats, ReapStats::default());

        assert_eq!(
            store.get(&session.id).unwrap().unwrap().status,
            SessionStatus::Expired
        );
    }

    #[test]
    fn reap_purges_terminal_rows_after_retention() {
        let store = test_store();
        let session = store.create(None).unwrap();
        store.add_participant(&session.id, "conn-1", None).unwrap();
        backdate_expiry(&store, &session.id);

        let now = epoch_secs();
        store.reap(now).unwrap();
        assert!(store.get(&session.id).unwrap().is_some());

        // Jump past the retention window: the row and its participants go.
        let stats = store.reap(now + store.retention_secs + 10).unwrap();
        assert_eq!(stats.purged, 1);
        assert!(store.get(&session.id).unwrap().is_none());
        assert!(store.participants(&session.id).unwrap().is_empty());
    }

    #[test]
    fn code_is_reusable_once_session_is_terminal() {
        let store = test_store();
        let session = store.create(None).unwrap();
        store.add_participant(&session.id, "conn-1", None).unwrap();
        store.remove_participant(&session.id, "conn-1").unwrap();

        // The terminal row still exists, but the partial unique index no
        // longer claims the code: a fresh active session may take it.
        let now = epoch_secs() as i64;
        store
            .conn
            .lock()
            .execute(
                "INSERT INTO sessions (id, code, status, created_at, expires_at, last_activity)
                 VALUES ('fresh', ?1, 'active', ?2, ?2 + 1800, ?2)",
                params![session.code, now],
            )
            .unwrap();

        let found = store.find_active_by_code(&session.code).unwrap().unwrap();
        assert_eq!(found.id, "fresh");
    }

    #[test]
    fn duplicate_active_code_rejected_by_index() {
        let store = test_store();
        let session = store.create(None).unwrap();

        let now = epoch_secs() as i64;
        let err = store
            .conn
            .lock()
            .execute(
                "INSERT INTO sessions (id, code, status, created_at, expires_at, last_activity)
                 VALUES ('dup', ?1, 'active', ?2, ?2 + 1800, ?2)",
                params![session.code, now],
            )
            .unwrap_err();
        assert!(store::is_unique_violation(&err));
    }
}
