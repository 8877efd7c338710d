//! Durable credential store backed by sqlite.
//!
//! The store is the exclusive owner of account data: seeding, lookup and
//! inserts all go through it. Uniqueness of usernames is enforced by the
//! `UNIQUE` constraint on the table itself rather than an application-level
//! check-then-insert, so concurrent writers cannot race past it.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backing medium cannot be opened, read or written. Fatal at startup.
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
    /// Insertion conflict on the unique username column. Recoverable.
    #[error("username `{0}` already exists")]
    DuplicateUsername(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// A stored username/password/rank/email record.
///
/// Passwords are held and compared in the clear, matching the system this
/// gateway fronts. Callers must never serialize this type onto the wire;
/// project through a sanitized view instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub password: String,
    pub rank: i64,
    pub email: String,
}

/// Row data for account creation; the store assigns the id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAccount {
    pub username: String,
    pub password: String,
    pub rank: i64,
    pub email: String,
}

#[derive(Clone)]
pub struct Store {
    db_path: PathBuf,
}

impl Store {
    /// Open (or create) the store under `dir` and ensure the schema exists.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let db_path = dir.join("gate.sqlite");
        let conn = Connection::open(&db_path)?;
        // Pragmas tuned for concurrent request handling
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        let busy_ms: u64 = std::env::var("GATE_SQLITE_BUSY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5000);
        conn.busy_timeout(std::time::Duration::from_millis(busy_ms))?;
        Self::init_schema(&conn)?;
        debug!(target: "gate::store", path = %db_path.display(), "credential store opened");
        Ok(Self { db_path })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              username TEXT NOT NULL UNIQUE,
              password TEXT NOT NULL,
              rank INTEGER NOT NULL,
              email TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<Connection, StoreError> {
        Ok(Connection::open(&self.db_path)?)
    }

    /// Insert the bootstrap account iff the table is empty.
    ///
    /// Idempotent: a second run sees a non-empty table and does nothing,
    /// leaving any existing rows untouched. Returns whether a row was
    /// inserted.
    pub fn seed_default(&self, seed: &NewAccount) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))?;
        if n > 0 {
            return Ok(false);
        }
        conn.execute(
            "INSERT INTO accounts(username,password,rank,email) VALUES (?1,?2,?3,?4)
             ON CONFLICT(username) DO NOTHING",
            params![seed.username, seed.password, seed.rank, seed.email],
        )?;
        info!(target: "gate::store", username = %seed.username, "empty store seeded with bootstrap account");
        Ok(true)
    }

    /// Exact-match, case-sensitive lookup. Absence is a normal outcome.
    pub fn find_by_username(&self, username: &str) -> Result<Option<Account>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id,username,password,rank,email FROM accounts WHERE username = ? LIMIT 1",
        )?;
        let account = stmt
            .query_row([username], |row| {
                Ok(Account {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    password: row.get(2)?,
                    rank: row.get(3)?,
                    email: row.get(4)?,
                })
            })
            .optional()?;
        Ok(account)
    }

    /// Persist a new account and return its row id.
    ///
    /// A username collision surfaces as `DuplicateUsername`; the constraint
    /// rejection leaves no partial row behind.
    pub fn insert(&self, account: &NewAccount) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        let res = conn.execute(
            "INSERT INTO accounts(username,password,rank,email) VALUES (?1,?2,?3,?4)",
            params![account.username, account.password, account.rank, account.email],
        );
        match res {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateUsername(account.username.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn count(&self) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))?;
        Ok(n)
    }

    // ---------------- Async wrappers (spawn_blocking) ----------------
    // These helpers offload rusqlite work from async executors.

    pub async fn seed_default_async(&self, seed: &NewAccount) -> Result<bool, StoreError> {
        let store = self.clone();
        let seed = seed.clone();
        tokio::task::spawn_blocking(move || store.seed_default(&seed))
            .await
            .map_err(|e| StoreError::Unavailable(format!("join error: {e}")))?
    }

    pub async fn find_by_username_async(
        &self,
        username: &str,
    ) -> Result<Option<Account>, StoreError> {
        let store = self.clone();
        let username = username.to_string();
        tokio::task::spawn_blocking(move || store.find_by_username(&username))
            .await
            .map_err(|e| StoreError::Unavailable(format!("join error: {e}")))?
    }

    pub async fn insert_async(&self, account: &NewAccount) -> Result<i64, StoreError> {
        let store = self.clone();
        let account = account.clone();
        tokio::task::spawn_blocking(move || store.insert(&account))
            .await
            .map_err(|e| StoreError::Unavailable(format!("join error: {e}")))?
    }

    pub async fn count_async(&self) -> Result<i64, StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.count())
            .await
            .map_err(|e| StoreError::Unavailable(format!("join error: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn seed() -> NewAccount {
        NewAccount {
            username: "admin".into(),
            password: "admin123".into(),
            rank: 1,
            email: "admin@example.com".into(),
        }
    }

    #[test]
    fn seeding_is_idempotent() {
        let dir = tempdir().expect("tempdir");
        let store = Store::open(dir.path()).expect("open store");
        assert!(store.seed_default(&seed()).expect("first seed"));
        assert!(!store.seed_default(&seed()).expect("second seed"));
        assert!(!store.seed_default(&seed()).expect("third seed"));
        assert_eq!(store.count().expect("count"), 1);
    }

    #[test]
    fn seeding_leaves_populated_store_alone() {
        let dir = tempdir().expect("tempdir");
        let store = Store::open(dir.path()).expect("open store");
        store
            .insert(&NewAccount {
                username: "ops".into(),
                password: "s3cret".into(),
                rank: 2,
                email: "ops@example.com".into(),
            })
            .expect("insert");
        assert!(!store.seed_default(&seed()).expect("seed"));
        assert!(store
            .find_by_username("admin")
            .expect("lookup")
            .is_none());
    }

    #[test]
    fn reopen_keeps_rows() {
        let dir = tempdir().expect("tempdir");
        {
            let store = Store::open(dir.path()).expect("open store");
            store.seed_default(&seed()).expect("seed");
        }
        let store = Store::open(dir.path()).expect("reopen store");
        let account = store
            .find_by_username("admin")
            .expect("lookup")
            .expect("admin present");
        assert_eq!(account.password, "admin123");
        assert_eq!(account.rank, 1);
    }

    #[test]
    fn duplicate_username_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let store = Store::open(dir.path()).expect("open store");
        let first = seed();
        store.insert(&first).expect("first insert");
        let mut second = seed();
        second.email = "other@example.com".into();
        match store.insert(&second) {
            Err(StoreError::DuplicateUsername(name)) => assert_eq!(name, "admin"),
            other => panic!("expected duplicate error, got {other:?}"),
        }
        // no partial state: original row intact, still exactly one row
        assert_eq!(store.count().expect("count"), 1);
        let account = store
            .find_by_username("admin")
            .expect("lookup")
            .expect("admin present");
        assert_eq!(account.email, "admin@example.com");
    }

    #[test]
    fn lookup_is_case_sensitive() {
        let dir = tempdir().expect("tempdir");
        let store = Store::open(dir.path()).expect("open store");
        store.seed_default(&seed()).expect("seed");
        assert!(store.find_by_username("admin").expect("exact").is_some());
        assert!(store.find_by_username("Admin").expect("cased").is_none());
        assert!(store.find_by_username("nobody").expect("unknown").is_none());
    }

    #[tokio::test]
    async fn async_wrappers_roundtrip() {
        let dir = tempdir().expect("tempdir");
        let store = Store::open(dir.path()).expect("open store");
        store.seed_default_async(&seed()).await.expect("seed");
        let account = store
            .find_by_username_async("admin")
            .await
            .expect("lookup")
            .expect("admin present");
        assert_eq!(account.username, "admin");
        assert_eq!(store.count_async().await.expect("count"), 1);
    }
}
