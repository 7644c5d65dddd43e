//! SQLite-backed credential store.
//!
//! One table of user records: normalized username, base64 PBKDF2
//! hash + salt, the iteration count each hash was derived at, and
//! created/updated/last-login timestamps. The store is the sole
//! authority for identity.
//!
//! The store holds only the database path and opens a fresh connection
//! per operation — no connection is shared across calls or threads, so
//! the store is freely `Clone + Send + Sync` and can be driven from a
//! background worker as well as the UI thread. Call frequency is
//! human-scale (a handful of operations per session), so the per-call
//! open cost does not matter. The schema is created idempotently on
//! every open.

use std::path::{Path, PathBuf};

use chrono::Local;
use rusqlite::Connection;
use thiserror::Error;

use crate::auth::hashing;

/// Timestamp text format for record columns.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Directory under the home directory holding the auth database.
const DATA_DIR_NAME: &str = ".s3keeper";

/// Database file name within the data directory.
const DB_FILE_NAME: &str = "auth.db";

/// A persisted user record.
#[derive(Debug, Clone)]
pub struct UserRecord {
    /// Row id, assigned on creation, stable for the record's life.
    pub id: i64,
    /// Normalized (trimmed, lower-cased) username.
    pub username: String,
    /// Base64-encoded PBKDF2 output.
    pub password_hash: String,
    /// Base64-encoded per-user salt, never regenerated on verify.
    pub salt: String,
    /// Cost factor this hash was derived at.
    pub iterations: u32,
    pub created_at: String,
    pub updated_at: String,
    pub last_login: Option<String>,
}

/// Credential store failure.
///
/// `DuplicateUsername` is user-visible; the rest surface as a generic
/// "unexpected error" but stay distinguishable internally for
/// diagnostics.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The local database could not be opened, read, or written.
    #[error("auth database unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),
    /// The database directory could not be created.
    #[error("auth database directory unavailable: {0}")]
    DataDir(#[from] std::io::Error),
    /// A stored hash or salt field failed to decode.
    #[error("corrupt credential record for user id {user_id}: {source}")]
    CorruptRecord {
        user_id: i64,
        #[source]
        source: hashing::CorruptEncoding,
    },
    /// The normalized username already exists (uniqueness constraint).
    #[error("username '{0}' is already taken")]
    DuplicateUsername(String),
    /// No home directory to place the database under.
    #[error("could not resolve a home directory for the auth database")]
    NoHomeDirectory,
}

/// SQLite-backed credential store.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    db_path: PathBuf,
    /// Cost factor for newly derived hashes. Existing records always
    /// verify at their own stored cost.
    iterations: u32,
}

impl CredentialStore {
    /// Store at the default location, `~/.s3keeper/auth.db`.
    pub fn open_default() -> Result<Self, StoreError> {
        let home = directories::UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .ok_or(StoreError::NoHomeDirectory)?;
        Ok(Self::at_path(home.join(DATA_DIR_NAME).join(DB_FILE_NAME)))
    }

    /// Store backed by an explicit database path (tests, or hosts with
    /// their own profile layout).
    pub fn at_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            iterations: hashing::DEFAULT_ITERATIONS,
        }
    }

    /// Override the cost factor for new hashes (tests, or a future
    /// policy bump). Stored records keep their own cost.
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    /// Path of the backing database file.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Open a connection, creating the parent directory and schema if absent.
    fn connect(&self) -> Result<Connection, StoreError> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                username      TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                salt          TEXT NOT NULL,
                iterations    INTEGER NOT NULL,
                created_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL,
                last_login    TEXT
            );",
        )?;
        Ok(conn)
    }

    // ── Operations ──────────────────────────────────────────────────

    /// Total registered users. Zero means the flow opens in register mode.
    pub fn user_count(&self) -> Result<u64, StoreError> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Case-insensitive lookup by normalized username.
    pub fn get_user(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        let conn = self.connect()?;
        let row = conn.query_row(
            "SELECT id, username, password_hash, salt, iterations,
                    created_at, updated_at, last_login
             FROM users WHERE username = ?1",
            [normalize_username(username)],
            |row| {
                Ok(UserRecord {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    password_hash: row.get(2)?,
                    salt: row.get(3)?,
                    iterations: row.get(4)?,
                    created_at: row.get(5)?,
                    updated_at: row.get(6)?,
                    last_login: row.get(7)?,
                })
            },
        );
        match row {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Create a user with a fresh salt/hash at the current default cost.
    /// Returns the new user's id.
    ///
    /// The UNIQUE constraint — not a pre-check — is what closes the race
    /// between concurrent registrations.
    pub fn create_user(&self, username: &str, password: &str) -> Result<i64, StoreError> {
        let username = normalize_username(username);
        let derived = hashing::derive(password, self.iterations);
        let now = timestamp_now();

        let conn = self.connect()?;
        let result = conn.execute(
            "INSERT INTO users (username, password_hash, salt, iterations, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                username,
                derived.hash,
                derived.salt,
                derived.iterations,
                now,
                now
            ],
        );
        match result {
            Ok(_) => {
                tracing::info!(username = %username, "User created");
                Ok(conn.last_insert_rowid())
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateUsername(username))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Verify a username/password pair. `Ok(None)` covers both unknown
    /// user and wrong password — the caller gets no way to tell the two
    /// apart. Refreshes `last_login`/`updated_at` on success.
    pub fn verify_user(&self, username: &str, password: &str) -> Result<Option<i64>, StoreError> {
        let user = match self.get_user(username)? {
            Some(user) => user,
            None => {
                // Burn a hash so a lookup miss costs as much as a mismatch.
                hashing::dummy_derive(password, self.iterations);
                return Ok(None);
            }
        };
        let matched = hashing::verify(password, &user.salt, user.iterations, &user.password_hash)
            .map_err(|source| StoreError::CorruptRecord {
                user_id: user.id,
                source,
            })?;
        if !matched {
            return Ok(None);
        }

        let now = timestamp_now();
        let conn = self.connect()?;
        conn.execute(
            "UPDATE users SET last_login = ?1, updated_at = ?1 WHERE id = ?2",
            rusqlite::params![now, user.id],
        )?;
        Ok(Some(user.id))
    }

    /// Rehash at the current default cost, overwriting hash, salt, and
    /// iteration count.
    pub fn change_password(&self, user_id: i64, new_password: &str) -> Result<(), StoreError> {
        let derived = hashing::derive(new_password, self.iterations);
        let now = timestamp_now();
        let conn = self.connect()?;
        let updated = conn.execute(
            "UPDATE users SET password_hash = ?1, salt = ?2, iterations = ?3, updated_at = ?4
             WHERE id = ?5",
            rusqlite::params![derived.hash, derived.salt, derived.iterations, now, user_id],
        )?;
        if updated == 0 {
            return Err(StoreError::Unavailable(
                rusqlite::Error::QueryReturnedNoRows,
            ));
        }
        tracing::info!(user_id, "Password changed");
        Ok(())
    }

    /// All usernames, ascending. Administrative listing only — never fed
    /// back into a username field.
    pub fn list_usernames(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT username FROM users ORDER BY username ASC")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }
}

/// Trim and lower-case — the uniqueness and lookup key.
pub fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}

fn timestamp_now() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, CredentialStore) {
        let tmp = TempDir::new().unwrap();
        let store = CredentialStore::at_path(tmp.path().join("auth.db")).with_iterations(2_000);
        (tmp, store)
    }

    #[test]
    fn create_and_verify_round_trip() {
        let (_tmp, store) = test_store();

        let id = store.create_user("bob", "Secret123!").unwrap();
        assert_eq!(store.verify_user("bob", "Secret123!").unwrap(), Some(id));
        assert_eq!(store.verify_user("bob", "wrong").unwrap(), None);
        // A wrong attempt is not sticky; the next correct one still works.
        assert_eq!(store.verify_user("bob", "Secret123!").unwrap(), Some(id));
    }

    #[test]
    fn unknown_user_is_invalid_not_an_error() {
        let (_tmp, store) = test_store();
        assert_eq!(store.verify_user("ghost", "anything").unwrap(), None);
    }

    #[test]
    fn lookup_normalizes_case_and_whitespace() {
        let (_tmp, store) = test_store();

        let id = store.create_user("Alice ", "Secret123!").unwrap();
        let a = store.get_user("alice").unwrap().unwrap();
        let b = store.get_user(" ALICE").unwrap().unwrap();
        assert_eq!(a.id, id);
        assert_eq!(b.id, id);
        assert_eq!(a.username, "alice");
    }

    #[test]
    fn duplicate_differing_only_in_case_is_rejected() {
        let (_tmp, store) = test_store();

        store.create_user("carol", "Secret123!").unwrap();
        let err = store.create_user(" CAROL ", "Other456!").unwrap_err();
        assert!(matches!(err, StoreError::DuplicateUsername(u) if u == "carol"));
    }

    #[test]
    fn user_count_drives_first_run_detection() {
        let (_tmp, store) = test_store();

        assert_eq!(store.user_count().unwrap(), 0);
        store.create_user("first", "Secret123!").unwrap();
        assert_eq!(store.user_count().unwrap(), 1);
    }

    #[test]
    fn verify_refreshes_last_login() {
        let (_tmp, store) = test_store();

        store.create_user("dave", "Secret123!").unwrap();
        assert!(store.get_user("dave").unwrap().unwrap().last_login.is_none());

        store.verify_user("dave", "Secret123!").unwrap();
        let user = store.get_user("dave").unwrap().unwrap();
        assert!(user.last_login.is_some());
        assert_eq!(user.last_login.as_deref(), Some(user.updated_at.as_str()));
    }

    #[test]
    fn change_password_rehashes_at_current_default() {
        let (_tmp, store) = test_store();

        let id = store.create_user("erin", "OldSecret1!").unwrap();
        let before = store.get_user("erin").unwrap().unwrap();

        store.change_password(id, "NewSecret2!").unwrap();
        let after = store.get_user("erin").unwrap().unwrap();

        assert_ne!(before.salt, after.salt);
        assert_ne!(before.password_hash, after.password_hash);
        assert_eq!(after.created_at, before.created_at);

        assert_eq!(store.verify_user("erin", "OldSecret1!").unwrap(), None);
        assert_eq!(store.verify_user("erin", "NewSecret2!").unwrap(), Some(id));
    }

    #[test]
    fn old_records_verify_after_a_cost_bump() {
        let (_tmp, store) = test_store();
        let id = store.create_user("frank", "Secret123!").unwrap();

        // Policy raises the default cost; frank's record still verifies
        // at its stored cost until the next password change.
        let bumped = CredentialStore::at_path(store.db_path()).with_iterations(4_000);
        assert_eq!(bumped.verify_user("frank", "Secret123!").unwrap(), Some(id));
        assert_eq!(store.get_user("frank").unwrap().unwrap().iterations, 2_000);

        bumped.change_password(id, "Secret123!").unwrap();
        assert_eq!(bumped.get_user("frank").unwrap().unwrap().iterations, 4_000);
        assert_eq!(bumped.verify_user("frank", "Secret123!").unwrap(), Some(id));
    }

    #[test]
    fn list_usernames_ascending() {
        let (_tmp, store) = test_store();

        store.create_user("zoe", "Secret123!").unwrap();
        store.create_user("adam", "Secret123!").unwrap();
        store.create_user("mia", "Secret123!").unwrap();
        assert_eq!(store.list_usernames().unwrap(), ["adam", "mia", "zoe"]);
    }

    #[test]
    fn store_is_usable_from_a_worker_thread() {
        let (_tmp, store) = test_store();
        let id = store.create_user("worker", "Secret123!").unwrap();

        let clone = store.clone();
        let handle = std::thread::spawn(move || clone.verify_user("worker", "Secret123!").unwrap());
        assert_eq!(handle.join().unwrap(), Some(id));
    }

    #[test]
    fn schema_creation_is_idempotent_across_opens() {
        let (_tmp, store) = test_store();

        store.create_user("kept", "Secret123!").unwrap();
        // Re-point a second store at the same file; records survive.
        let reopened = CredentialStore::at_path(store.db_path());
        assert_eq!(reopened.user_count().unwrap(), 1);
    }
}
