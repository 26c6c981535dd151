//! SQLite 会话存储
//!
//! 单表 `sessions(session_id PRIMARY KEY, schema_version, saved_at, snapshot)`，保存时 upsert；
//! rusqlite 为同步 API，连接放在 Mutex 中并经 spawn_blocking 访问。

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::store::{SessionSnapshot, StateStore};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    schema_version INTEGER NOT NULL,
    saved_at TEXT NOT NULL,
    snapshot TEXT NOT NULL
)";

#[derive(Clone)]
pub struct SqliteStateStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStateStore {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.execute(SCHEMA, [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| anyhow!("sqlite connection poisoned"))?;
            f(&guard)
        })
        .await?
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn load(&self, session_id: &str) -> anyhow::Result<Option<SessionSnapshot>> {
        let id = session_id.to_string();
        let raw: Option<String> = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT snapshot FROM sessions WHERE session_id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;
        match raw {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, session_id: &str, snapshot: &SessionSnapshot) -> anyhow::Result<()> {
        let id = session_id.to_string();
        let data = serde_json::to_string(snapshot)?;
        let schema_version = snapshot.schema_version;
        let saved_at = snapshot.saved_at;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO sessions (session_id, schema_version, saved_at, snapshot)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(session_id) DO UPDATE SET
                    schema_version = excluded.schema_version,
                    saved_at = excluded.saved_at,
                    snapshot = excluded.snapshot",
                params![id, schema_version, saved_at, data],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::SessionContext;

    #[tokio::test]
    async fn test_upsert_overwrites() {
        let store = SqliteStateStore::in_memory().unwrap();
        let mut ctx = SessionContext::new("s1");
        store.save("s1", &SessionSnapshot::new(ctx.clone())).await.unwrap();
        ctx.version = 7;
        store.save("s1", &SessionSnapshot::new(ctx)).await.unwrap();
        let loaded = store.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.context.version, 7);
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_backed_db() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("planloop.db");
        {
            let store = SqliteStateStore::open(&path).unwrap();
            store
                .save("s1", &SessionSnapshot::new(SessionContext::new("s1").with_mission("m")))
                .await
                .unwrap();
        }
        let reopened = SqliteStateStore::open(&path).unwrap();
        let loaded = reopened.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.context.mission, "m");
    }
}
