//! Durable credential storage.
//!
//! Two named entries, both opaque strings:
//! - `access_token`: the current access credential
//! - `refresh_token`: the optional renewal credential
//!
//! The SQLite file is scoped to one API origin, so switching `api_url` never
//! sends one backend's credential to another.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Entry name of the access credential.
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Entry name of the renewal credential.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("credential database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("credential directory error: {0}")]
    Io(#[from] std::io::Error),
}

/// What `load()` found. Either entry may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredCredentials {
    pub access: Option<String>,
    pub renewal: Option<String>,
}

impl StoredCredentials {
    pub fn is_empty(&self) -> bool {
        self.access.is_none() && self.renewal.is_none()
    }
}

/// get/set/clear over the two credential entries. No network access.
pub trait CredentialStore: Send + Sync {
    /// Replace both entries. `renewal = None` removes any previous renewal
    /// credential.
    fn save(&self, access: &str, renewal: Option<&str>) -> Result<(), StoreError>;

    fn load(&self) -> Result<StoredCredentials, StoreError>;

    /// Remove both entries. Clearing an empty store is not an error.
    fn clear(&self) -> Result<(), StoreError>;
}

// ── SQLite ──────────────────────────────────────────────────────

/// SQLite-backed credential store.
pub struct SqliteCredentialStore {
    conn: Mutex<rusqlite::Connection>,
    path: PathBuf,
}

impl SqliteCredentialStore {
    /// Open (or create) the credential database at the given path.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = rusqlite::Connection::open(db_path)?;

        // WAL mode for concurrent reads + crash safety
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS credentials (
                name TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: db_path.to_path_buf(),
        })
    }

    /// Open the store for one API origin inside `data_dir`.
    pub fn for_origin(data_dir: &Path, api_url: &str) -> Result<Self, StoreError> {
        Self::open(&data_dir.join(origin_file_name(api_url)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn save(&self, access: &str, renewal: Option<&str>) -> Result<(), StoreError> {
        let now = epoch_secs() as i64;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO credentials (name, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            rusqlite::params![ACCESS_TOKEN_KEY, access, now],
        )?;
        match renewal {
            Some(renewal) => {
                tx.execute(
                    "INSERT INTO credentials (name, value, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                    rusqlite::params![REFRESH_TOKEN_KEY, renewal, now],
                )?;
            }
            None => {
                tx.execute(
                    "DELETE FROM credentials WHERE name = ?1",
                    rusqlite::params![REFRESH_TOKEN_KEY],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn load(&self) -> Result<StoredCredentials, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT name, value FROM credentials")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut loaded = StoredCredentials::default();
        for row in rows {
            let (name, value) = row?;
            match name.as_str() {
                ACCESS_TOKEN_KEY => loaded.access = Some(value),
                REFRESH_TOKEN_KEY => loaded.renewal = Some(value),
                _ => {}
            }
        }
        Ok(loaded)
    }

    fn clear(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM credentials WHERE name IN (?1, ?2)",
            rusqlite::params![ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY],
        )?;
        Ok(())
    }
}

// ── In-memory ───────────────────────────────────────────────────

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<StoredCredentials>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn save(&self, access: &str, renewal: Option<&str>) -> Result<(), StoreError> {
        *self.entries.lock() = StoredCredentials {
            access: Some(access.to_string()),
            renewal: renewal.map(str::to_string),
        };
        Ok(())
    }

    fn load(&self) -> Result<StoredCredentials, StoreError> {
        Ok(self.entries.lock().clone())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.entries.lock() = StoredCredentials::default();
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────

/// `credentials-<origin>.db` with every non-alphanumeric byte replaced.
fn origin_file_name(api_url: &str) -> String {
    let origin: String = api_url
        .trim()
        .trim_end_matches('/')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("credentials-{origin}.db")
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, SqliteCredentialStore) {
        let tmp = TempDir::new().unwrap();
        let store = SqliteCredentialStore::open(&tmp.path().join("credentials.db")).unwrap();
        (tmp, store)
    }

    #[test]
    fn save_then_load_round_trips_both_entries() {
        let (_tmp, store) = test_store();

        store.save("access.abc", Some("renew-xyz")).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.access.as_deref(), Some("access.abc"));
        assert_eq!(loaded.renewal.as_deref(), Some("renew-xyz"));
    }

    #[test]
    fn clear_then_load_reports_absent() {
        let (_tmp, store) = test_store();

        store.save("a", Some("b")).unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_empty());

        // clearing twice is fine
        store.clear().unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn save_without_renewal_drops_previous_renewal() {
        let (_tmp, store) = test_store();

        store.save("first", Some("renew")).unwrap();
        store.save("second", None).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.access.as_deref(), Some("second"));
        assert!(loaded.renewal.is_none());
    }

    #[test]
    fn entries_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("credentials.db");
        {
            let store = SqliteCredentialStore::open(&path).unwrap();
            store.save("persisted", Some("renewal")).unwrap();
        }
        let reopened = SqliteCredentialStore::open(&path).unwrap();
        assert_eq!(
            reopened.load().unwrap(),
            StoredCredentials {
                access: Some("persisted".into()),
                renewal: Some("renewal".into()),
            }
        );
    }

    #[test]
    fn origins_get_separate_files() {
        let tmp = TempDir::new().unwrap();
        let prod = SqliteCredentialStore::for_origin(tmp.path(), "https://api.example.org").unwrap();
        let local = SqliteCredentialStore::for_origin(tmp.path(), "http://localhost:5000/").unwrap();

        prod.save("prod-token", None).unwrap();
        assert!(local.load().unwrap().access.is_none());
        assert_ne!(prod.path(), local.path());
    }

    #[test]
    fn origin_file_name_is_filesystem_safe() {
        assert_eq!(
            origin_file_name("http://localhost:5000/"),
            "credentials-http___localhost_5000.db"
        );
    }

    #[test]
    fn memory_store_round_trip_and_clear() {
        let store = MemoryCredentialStore::new();
        store.save("a", Some("b")).unwrap();
        assert_eq!(store.load().unwrap().renewal.as_deref(), Some("b"));
        store.clear().unwrap();
        assert!(store.load().unwrap().is_empty());
    }
}
