use crate::error::{Result, ToolError};
use crate::store::{LocalStore, Persistence, StoreSnapshot};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// Fixed namespace the snapshot lives under.
pub const STATE_KEY: &str = "karrytask_state_v1";

pub struct SqliteSnapshot {
    conn: Mutex<Connection>,
}

pub type SqliteStore = LocalStore<SqliteSnapshot>;

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "opening sqlite task store");
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(1000))?;
        Self::with_persistence(SqliteSnapshot::new(conn)?)
    }
}

impl SqliteSnapshot {
    fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS kv_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
)
"#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ToolError::Storage("sqlite connection lock poisoned".to_string()))
    }
}

impl Persistence for SqliteSnapshot {
    fn load(&self) -> Result<StoreSnapshot> {
        let raw: Option<String> = self
            .conn()?
            .query_row(
                "SELECT value FROM kv_state WHERE key = ?1",
                params![STATE_KEY],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(StoreSnapshot::default()),
        }
    }

    fn save(&self, snapshot: &StoreSnapshot) -> Result<()> {
        let value = serde_json::to_string(snapshot)?;
        self.conn()?.execute(
            r#"
INSERT INTO kv_state (key, value, updated_at)
VALUES (?1, ?2, CURRENT_TIMESTAMP)
ON CONFLICT(key) DO UPDATE
SET value = excluded.value,
    updated_at = CURRENT_TIMESTAMP
"#,
            params![STATE_KEY, value],
        )?;
        tracing::debug!(
            tasks = snapshot.tasks.len(),
            notes_len = snapshot.notes.len(),
            "store snapshot persisted"
        );
        Ok(())
    }
}
