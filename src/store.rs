//! Shared SQLite plumbing for the entity stores.
//!
//! Each store owns one connection behind a `parking_lot::Mutex`; the database
//! is the only shared mutable resource, and every atomic update is scoped to
//! a single entity. WAL mode keeps readers off the writer's back and
//! `busy_timeout` bounds each call so a contended write surfaces as a
//! transient failure instead of hanging.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::Result;

/// Bounded attempts for transient store failures before surfacing.
const MAX_TRANSIENT_ATTEMPTS: u32 = 3;

/// Initial backoff between transient retries; doubles per attempt.
const TRANSIENT_BACKOFF: Duration = Duration::from_millis(50);

/// Open a file-backed connection with the standard pragmas applied.
pub(crate) fn open(path: &std::path::Path) -> Result<rusqlite::Connection> {
    let conn = rusqlite::Connection::open(path)?;
    apply_pragmas(&conn)?;
    Ok(conn)
}

/// Open an in-memory connection (tests and ephemeral deployments).
pub(crate) fn open_in_memory() -> Result<rusqlite::Connection> {
    let conn = rusqlite::Connection::open_in_memory()?;
    apply_pragmas(&conn)?;
    Ok(conn)
}

fn apply_pragmas(conn: &rusqlite::Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous  = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(())
}

/// Run `op`, retrying a small bounded number of times on transient store
/// failures with doubling backoff. All other error kinds propagate on the
/// first occurrence; the caller decides what to do with them.
pub(crate) fn with_transient_retry<T>(
    op_name: &'static str,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut backoff = TRANSIENT_BACKOFF;
    let mut attempt = 0;
    loop {
        match op() {
            Err(err) if err.is_transient() && attempt + 1 < MAX_TRANSIENT_ATTEMPTS => {
                attempt += 1;
                tracing::warn!(op = op_name, attempt, error = %err, "transient store failure, retrying");
                std::thread::sleep(backoff);
                backoff *= 2;
            }
            other => return other,
        }
    }
}

/// Current Unix epoch in seconds.
pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Whether a constraint failure came from a UNIQUE (or primary key) index,
/// as opposed to some other constraint class.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    const SQLITE_CONSTRAINT_UNIQUE: i32 = 2067;
    const SQLITE_CONSTRAINT_PRIMARYKEY: i32 = 1555;
    matches!(
        err,
        rusqlite::Error::SqliteFailure(code, _)
            if code.extended_code == SQLITE_CONSTRAINT_UNIQUE
                || code.extended_code == SQLITE_CONSTRAINT_PRIMARYKEY
    )
}
