//! SQLite-backed identity records.
//!
//! One row per registered identity. The `refresh_token` column is a single
//! slot holding the currently valid refresh token verbatim; rotation swaps
//! it with a compare-and-set UPDATE so concurrent refreshes cannot both win.
//! Emails are stored trimmed and lowercased and the column is UNIQUE, so
//! duplicate registration surfaces as a constraint conflict rather than a
//! racy pre-check.

use std::path::Path;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::store::{self, epoch_secs, with_transient_retry};

/// Authorization role attached to an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    /// Strict parse; anything but the two known roles is rejected.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(CoreError::Validation(format!("unknown role: {other}"))),
        }
    }
}

/// A stored identity row.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    /// Currently valid refresh token, if any. `None` after logout or before
    /// the first login.
    pub refresh_token: Option<String>,
    pub last_login_at: Option<u64>,
    pub created_at: u64,
}

/// Identity persistence. One connection behind a mutex, same as the other
/// stores in this crate.
pub struct IdentityStore {
    conn: Mutex<rusqlite::Connection>,
}

impl IdentityStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        Self::from_conn(store::open(db_path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_conn(store::open_in_memory()?)
    }

    fn from_conn(conn: rusqlite::Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS identities (
                id            TEXT PRIMARY KEY,
                email         TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                role          TEXT NOT NULL DEFAULT 'user',
                is_active     INTEGER NOT NULL DEFAULT 1,
                refresh_token TEXT,
                last_login_at INTEGER,
                created_at    INTEGER NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert a new identity. The email must already be normalized; a
    /// duplicate surfaces as `Conflict` from the unique column.
    pub fn insert(&self, identity: &Identity) -> Result<()> {
        with_transient_retry("identity_insert", || {
            let conn = self.conn.lock();
            let result = conn.execute(
                "INSERT INTO identities
                     (id, email, password_hash, role, is_active, refresh_token, last_login_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    identity.id,
                    identity.email,
                    identity.password_hash,
                    identity.role.as_str(),
                    identity.is_active as i64,
                    identity.refresh_token,
                    identity.last_login_at.map(|t| t as i64),
                    identity.created_at as i64,
                ],
            );
            match result {
                Ok(_) => Ok(()),
                Err(err) if store::is_unique_violation(&err) => Err(CoreError::Conflict(format!(
                    "email '{}' is already registered",
                    identity.email
                ))),
                Err(err) => Err(err.into()),
            }
        })
    }

    pub fn by_id(&self, id: &str) -> Result<Option<Identity>> {
        with_transient_retry("identity_by_id", || {
            let conn = self.conn.lock();
            Self::query_one(&conn, "id = ?1", rusqlite::params![id])
        })
    }

    /// Lookup by email. The argument is normalized the same way `insert`
    /// expects, so `A@Example.Com ` finds `a@example.com`.
    pub fn by_email(&self, email: &str) -> Result<Option<Identity>> {
        let needle = normalize_email(email);
        with_transient_retry("identity_by_email", || {
            let conn = self.conn.lock();
            Self::query_one(&conn, "email = ?1", rusqlite::params![needle])
        })
    }

    /// Overwrite the refresh slot unconditionally. Used when issuing a fresh
    /// pair at register/login time, where the previous slot value is
    /// intentionally superseded.
    pub fn set_refresh_token(&self, id: &str, token: &str) -> Result<()> {
        with_transient_retry("identity_set_refresh", || {
            let conn = self.conn.lock();
            let updated = conn.execute(
                "UPDATE identities SET refresh_token = ?2 WHERE id = ?1",
                rusqlite::params![id, token],
            )?;
            if updated == 0 {
                return Err(CoreError::NotFound(format!("identity {id}")));
            }
            Ok(())
        })
    }

    /// Compare-and-set rotation: install `new` only if the slot still holds
    /// `expected`. Returns whether the swap happened. A `false` means the
    /// slot changed underneath the caller (concurrent rotation or logout).
    pub fn swap_refresh_token(&self, id: &str, expected: &str, new: &str) -> Result<bool> {
        with_transient_retry("identity_swap_refresh", || {
            let conn = self.conn.lock();
            let updated = conn.execute(
                "UPDATE identities SET refresh_token = ?3
                 WHERE id = ?1 AND refresh_token = ?2",
                rusqlite::params![id, expected, new],
            )?;
            Ok(updated == 1)
        })
    }

    /// Clear the refresh slot (logout). Returns whether a row was cleared;
    /// an unknown id yields `false`.
    pub fn clear_refresh_token(&self, id: &str) -> Result<bool> {
        with_transient_retry("identity_clear_refresh", || {
            let conn = self.conn.lock();
            let updated = conn.execute(
                "UPDATE identities SET refresh_token = NULL WHERE id = ?1",
                rusqlite::params![id],
            )?;
            Ok(updated == 1)
        })
    }

    pub fn touch_last_login(&self, id: &str) -> Result<()> {
        with_transient_retry("identity_touch_login", || {
            let conn = self.conn.lock();
            conn.execute(
                "UPDATE identities SET last_login_at = ?2 WHERE id = ?1",
                rusqlite::params![id, epoch_secs() as i64],
            )?;
            Ok(())
        })
    }

    /// Admin toggle. Deactivation does not delete anything; verification
    /// paths check the flag.
    pub fn set_active(&self, id: &str, active: bool) -> Result<()> {
        with_transient_retry("identity_set_active", || {
            let conn = self.conn.lock();
            let updated = conn.execute(
                "UPDATE identities SET is_active = ?2 WHERE id = ?1",
                rusqlite::params![id, active as i64],
            )?;
            if updated == 0 {
                return Err(CoreError::NotFound(format!("identity {id}")));
            }
            Ok(())
        })
    }

    pub fn count(&self) -> Result<u64> {
        with_transient_retry("identity_count", || {
            let conn = self.conn.lock();
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM identities", [], |row| row.get(0))?;
            Ok(n as u64)
        })
    }

    fn query_one(
        conn: &rusqlite::Connection,
        predicate: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<Identity>> {
        let sql = format!(
            "SELECT id, email, password_hash, role, is_active, refresh_token,
                    last_login_at, created_at
             FROM identities WHERE {predicate}"
        );
        let row = conn.query_row(&sql, params, |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<i64>>(6)?,
                row.get::<_, i64>(7)?,
            ))
        });
        match row {
            Ok((id, email, password_hash, role, is_active, refresh_token, last_login, created)) => {
                Ok(Some(Identity {
                    id,
                    email,
                    password_hash,
                    role: Role::parse(&role)
                        .map_err(|_| CoreError::Validation(format!("corrupt role: {role}")))?,
                    is_active: is_active != 0,
                    refresh_token,
                    last_login_at: last_login.map(|t| t as u64),
                    created_at: created as u64,
                }))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Canonical email form used for both storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
