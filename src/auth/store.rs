// Durable session storage

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use super::types::PersistedSession;

/// Key holding the whole serialized session
const SESSION_KEY: &str = "campus:session";

/// Storage for the persisted session record.
///
/// Implementations hold at most one record and replace it as a unit.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<PersistedSession>>;
    fn save(&self, session: &PersistedSession) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// SQLite-backed store using a single key/value table
pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
}

impl SqliteSessionStore {
    /// Open (or create) the session database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create session directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        Self::from_connection(conn)
    }

    /// In-memory SQLite database, gone when the store is dropped
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .context("Failed to create auth_kv table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Session database lock poisoned"))?;
        f(&conn)
    }
}

impl SessionStore for SqliteSessionStore {
    fn load(&self) -> Result<Option<PersistedSession>> {
        let json: Option<String> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM auth_kv WHERE key = ?",
                [SESSION_KEY],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to load session from SQLite")
        })?;

        match json {
            Some(json) => {
                let session = serde_json::from_str(&json)
                    .context("Failed to parse session record from SQLite")?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    fn save(&self, session: &PersistedSession) -> Result<()> {
        let json = serde_json::to_string(session).context("Failed to serialize session")?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO auth_kv (key, value) VALUES (?1, ?2)",
                params![SESSION_KEY, json],
            )
            .context("Failed to save session to SQLite")?;
            Ok(())
        })
    }

    fn clear(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM auth_kv WHERE key = ?", [SESSION_KEY])
                .context("Failed to clear session from SQLite")?;
            Ok(())
        })
    }
}

/// Process-local store that keeps the serialized record in memory
#[derive(Default)]
pub struct MemorySessionStore {
    record: Mutex<Option<String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a record, as if left by a previous run
    pub fn with_session(session: &PersistedSession) -> Result<Self> {
        let store = Self::new();
        store.save(session)?;
        Ok(store)
    }

    /// Raw stored value, for inspection
    pub fn raw(&self) -> Option<String> {
        self.record.lock().ok().and_then(|r| r.clone())
    }

    fn slot(&self) -> Result<std::sync::MutexGuard<'_, Option<String>>> {
        self.record
            .lock()
            .map_err(|_| anyhow::anyhow!("Session store lock poisoned"))
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<PersistedSession>> {
        match self.slot()?.as_deref() {
            Some(json) => Ok(Some(
                serde_json::from_str(json).context("Failed to parse stored session")?,
            )),
            None => Ok(None),
        }
    }

    fn save(&self, session: &PersistedSession) -> Result<()> {
        let json = serde_json::to_string(session).context("Failed to serialize session")?;
        *self.slot()? = Some(json);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot()? = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::AccessClaims;
    use crate::auth::types::{Role, User};

    fn sample() -> PersistedSession {
        PersistedSession {
            access_token: "header.payload.sig".to_string(),
            refresh_token: Some("refresh".to_string()),
            claims: AccessClaims {
                token_type: "access".to_string(),
                exp: 2_000_000_000,
                iat: 1_900_000_000,
                jti: "j1".to_string(),
                user_id: 1,
            },
            role: Some(Role::Student),
            user: Some(User {
                id: 1,
                first_name: Some("Jo".to_string()),
                last_name: None,
                email: "student@example.com".to_string(),
                role: Role::Student,
                profile_picture: None,
            }),
        }
    }

    #[test]
    fn test_sqlite_store_save_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.sqlite3");

        let store = SqliteSessionStore::open(&path).unwrap();
        assert_eq!(store.load().unwrap(), None);

        store.save(&sample()).unwrap();
        assert_eq!(store.load().unwrap(), Some(sample()));

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.sqlite3");

        SqliteSessionStore::open(&path).unwrap().save(&sample()).unwrap();

        let reopened = SqliteSessionStore::open(&path).unwrap();
        assert_eq!(reopened.load().unwrap(), Some(sample()));
    }

    #[test]
    fn test_sqlite_store_replaces_single_record() {
        let store = SqliteSessionStore::open_in_memory().unwrap();
        store.save(&sample()).unwrap();

        let mut updated = sample();
        updated.access_token = "new.token.value".to_string();
        store.save(&updated).unwrap();

        let count: i64 = store
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM auth_kv", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(store.load().unwrap().unwrap().access_token, "new.token.value");
    }

    #[test]
    fn test_sqlite_store_corrupt_record_is_an_error() {
        let store = SqliteSessionStore::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO auth_kv (key, value) VALUES (?1, ?2)",
                    params![SESSION_KEY, "{not json"],
                )?;
                Ok(())
            })
            .unwrap();

        assert!(store.load().is_err());
    }

    #[test]
    fn test_memory_store() {
        let store = MemorySessionStore::with_session(&sample()).unwrap();
        assert!(store.raw().unwrap().contains("student@example.com"));
        assert_eq!(store.load().unwrap(), Some(sample()));

        store.clear().unwrap();
        assert_eq!(store.raw(), None);
        assert_eq!(store.load().unwrap(), None);
    }
}
