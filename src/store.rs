//! Durable task store backed by SQLite.
//!
//! Tasks are persisted at creation and on every state transition so an
//! external reader can observe progress without waiting for completion.
//! Rows are never deleted; a finished task is only marked terminal.
//! Updates are last-write-wins per task id.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a task. Monotonic:
/// PENDING -> EXECUTING -> {DONE | ERROR}.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Executing,
    Done,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "executing" => Some(Self::Executing),
            "done" => Some(Self::Done),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

/// Persisted task row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    pub error: Option<String>,
    pub cost_usd: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("task store lock poisoned")]
    Poisoned,
    #[error("corrupt task row: {0}")]
    Corrupt(String),
}

/// Durable task persistence boundary.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, id: &str, description: &str) -> Result<(), StoreError>;

    async fn update_task(
        &self,
        id: &str,
        status: TaskStatus,
        error: Option<&str>,
        cost_usd: f64,
    ) -> Result<(), StoreError>;

    async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>, StoreError>;
}

/// SQLite-backed [`TaskStore`]. The connection is cheap to serialize behind
/// a mutex; every operation is a single short statement.
pub struct SqliteTaskStore {
    conn: Mutex<Connection>,
}

impl SqliteTaskStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store, used by tests that don't care about the file.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init(conn: &Connection) -> Result<(), StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                description TEXT NOT NULL,
                status TEXT NOT NULL,
                error TEXT,
                cost_usd REAL NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks (status)",
            [],
        )?;
        Ok(())
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{}': {}", raw, e)))
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create_task(&self, id: &str, description: &str) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            "INSERT INTO tasks (id, description, status, error, cost_usd, created_at, updated_at)
             VALUES (?1, ?2, ?3, NULL, 0, ?4, ?4)",
            rusqlite::params![id, description, TaskStatus::Pending.as_str(), now],
        )?;
        Ok(())
    }

    async fn update_task(
        &self,
        id: &str,
        status: TaskStatus,
        error: Option<&str>,
        cost_usd: f64,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            "UPDATE tasks SET status = ?2, error = ?3, cost_usd = ?4, updated_at = ?5
             WHERE id = ?1",
            rusqlite::params![id, status.as_str(), error, cost_usd, now],
        )?;
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare(
            "SELECT id, description, status, error, cost_usd, created_at, updated_at
             FROM tasks WHERE id = ?1",
        )?;

        let mut rows = stmt.query(rusqlite::params![id])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let status_raw: String = row.get(2)?;
        let status = TaskStatus::parse(&status_raw)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown status '{}'", status_raw)))?;
        let created_raw: String = row.get(5)?;
        let updated_raw: String = row.get(6)?;

        Ok(Some(TaskRecord {
            id: row.get(0)?,
            description: row.get(1)?,
            status,
            error: row.get(3)?,
            cost_usd: row.get(4)?,
            created_at: parse_timestamp(&created_raw)?,
            updated_at: parse_timestamp(&updated_raw)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_get() {
        let store = SqliteTaskStore::open_in_memory().unwrap();

        store.create_task("t-1", "Add login endpoint").await.unwrap();
        let task = store.get_task("t-1").await.unwrap().expect("task exists");

        assert_eq!(task.id, "t-1");
        assert_eq!(task.description, "Add login endpoint");
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.error.is_none());
        assert_eq!(task.cost_usd, 0.0);
    }

    #[tokio::test]
    async fn test_update_transitions_last_write_wins() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        store.create_task("t-2", "Fix auth bug").await.unwrap();

        store
            .update_task("t-2", TaskStatus::Executing, None, 0.5)
            .await
            .unwrap();
        store
            .update_task("t-2", TaskStatus::Error, Some("Agent 'x' failed after 2 attempts"), 1.2)
            .await
            .unwrap();

        let task = store.get_task("t-2").await.unwrap().expect("task exists");
        assert_eq!(task.status, TaskStatus::Error);
        assert!(task.error.as_deref().unwrap().contains("failed after"));
        assert!((task.cost_usd - 1.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_get_missing_task() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        assert!(store.get_task("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.db");

        {
            let store = SqliteTaskStore::open(&path).unwrap();
            store.create_task("t-3", "Persisted").await.unwrap();
            store
                .update_task("t-3", TaskStatus::Done, None, 2.0)
                .await
                .unwrap();
        }

        let store = SqliteTaskStore::open(&path).unwrap();
        let task = store.get_task("t-3").await.unwrap().expect("task exists");
        assert_eq!(task.status, TaskStatus::Done);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Executing,
            TaskStatus::Done,
            TaskStatus::Error,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert!(TaskStatus::parse("bogus").is_none());
        assert!(TaskStatus::Done.is_terminal());
        assert!(!TaskStatus::Executing.is_terminal());
    }
}
