// Credential storage
// Holds the current token pair; the SQLite store survives process restarts

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, RwLock};

use super::types::{StoredSession, TokenPair};

/// Key under which the session document lives in `auth_kv`
const SESSION_KEY: &str = "marketplace:session:token";

/// Holds the current access and refresh tokens
///
/// Reads are synchronous so that the refresh coordinator can check and
/// transition its state without suspending.
pub trait CredentialStore: Send + Sync {
    fn access_token(&self) -> Option<String>;

    fn refresh_token(&self) -> Option<String>;

    /// Replace the whole pair in one step
    fn set_tokens(&self, pair: &TokenPair) -> Result<()>;

    fn clear(&self) -> Result<()>;

    fn expires_at(&self) -> Option<DateTime<Utc>>;
}

/// In-process credential store
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    session: RwLock<Option<StoredSession>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(pair: &TokenPair) -> Self {
        Self {
            session: RwLock::new(Some(StoredSession::from(pair))),
        }
    }

    fn read(&self) -> Option<StoredSession> {
        self.session
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn access_token(&self) -> Option<String> {
        self.read().map(|s| s.access_token)
    }

    fn refresh_token(&self) -> Option<String> {
        self.read().map(|s| s.refresh_token)
    }

    fn set_tokens(&self, pair: &TokenPair) -> Result<()> {
        let mut session = self
            .session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *session = Some(StoredSession::from(pair));
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut session = self
            .session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *session = None;
        Ok(())
    }

    fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.read().and_then(|s| s.expires_at)
    }
}

/// SQLite-backed credential store
pub struct SqliteCredentialStore {
    conn: Mutex<Connection>,
}

impl SqliteCredentialStore {
    /// Open (or create) the credential database
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create credential directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        Self::init(conn)
    }

    /// Store without a backing file
    #[cfg(any(test, feature = "test-utils"))]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .context("Failed to create auth_kv table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn load(&self) -> Result<Option<StoredSession>> {
        let conn = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM auth_kv WHERE key = ?",
                [SESSION_KEY],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to load session from SQLite")?;

        value
            .map(|json| serde_json::from_str(&json).context("Failed to parse stored session"))
            .transpose()
    }

    fn session(&self) -> Option<StoredSession> {
        match self.load() {
            Ok(session) => session,
            Err(e) => {
                tracing::error!("Credential store read failed: {:#}", e);
                None
            }
        }
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn access_token(&self) -> Option<String> {
        self.session().map(|s| s.access_token)
    }

    fn refresh_token(&self) -> Option<String> {
        self.session().map(|s| s.refresh_token)
    }

    fn set_tokens(&self, pair: &TokenPair) -> Result<()> {
        let json = serde_json::to_string(&StoredSession::from(pair))
            .context("Failed to serialize session")?;
        let conn = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        conn.execute(
            "INSERT OR REPLACE INTO auth_kv (key, value) VALUES (?1, ?2)",
            [SESSION_KEY, json.as_str()],
        )
        .context("Failed to store session in SQLite")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        conn.execute("DELETE FROM auth_kv WHERE key = ?", [SESSION_KEY])
            .context("Failed to clear session in SQLite")?;
        Ok(())
    }

    fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.session().and_then(|s| s.expires_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_lifecycle() {
        let store = MemoryCredentialStore::new();
        assert!(store.access_token().is_none());
        assert!(store.refresh_token().is_none());

        store.set_tokens(&TokenPair::new("T1", "R1", 3600)).unwrap();
        assert_eq!(store.access_token().as_deref(), Some("T1"));
        assert_eq!(store.refresh_token().as_deref(), Some("R1"));
        assert!(store.expires_at().is_some());

        store.clear().unwrap();
        assert!(store.access_token().is_none());
        assert!(store.expires_at().is_none());
    }

    #[test]
    fn test_sqlite_store_replaces_pair() {
        let store = SqliteCredentialStore::open_in_memory().unwrap();
        store.set_tokens(&TokenPair::new("T1", "R1", 3600)).unwrap();
        store.set_tokens(&TokenPair::new("T2", "R2", 3600)).unwrap();

        assert_eq!(store.access_token().as_deref(), Some("T2"));
        assert_eq!(store.refresh_token().as_deref(), Some("R2"));

        store.clear().unwrap();
        assert!(store.refresh_token().is_none());
    }

    #[test]
    fn test_sqlite_store_survives_reopen() {
        let path = std::env::temp_dir()
            .join(format!("marketplace-client-{}", uuid::Uuid::new_v4()))
            .join("credentials.sqlite3");

        {
            let store = SqliteCredentialStore::open(&path).unwrap();
            store.set_tokens(&TokenPair::new("T1", "R1", 3600)).unwrap();
        }

        let reopened = SqliteCredentialStore::open(&path).unwrap();
        assert_eq!(reopened.access_token().as_deref(), Some("T1"));
        assert_eq!(reopened.refresh_token().as_deref(), Some("R1"));

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn test_sqlite_store_corrupt_document_reads_as_empty() {
        let store = SqliteCredentialStore::open_in_memory().unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO auth_kv (key, value) VALUES (?1, ?2)",
                [SESSION_KEY, "{not json"],
            )
            .unwrap();
        }
        assert!(store.access_token().is_none());
    }
}
