// src/state_manager.rs

use crate::models::{TaskDescriptor, TaskStatus};
use rusqlite::params;
use std::cmp::Reverse;
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("database query failed: {0}")]
    Query(#[from] rusqlite::Error),
}

/// Download history: every task descriptor the CLI has seen, stored as JSON
/// in an SQLite table.
pub struct TaskStore {
    conn: Connection,
}

impl TaskStore {
    /// Opens (or creates) the store at `db_path`.
    pub async fn open(db_path: &Path) -> Result<Self, StateError> {
        let conn = Connection::open(db_path).await?;
        let store = Self { conn };
        store.setup_database().await?;
        Ok(store)
    }

    /// In-memory store, used by tests.
    pub async fn open_in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory().await?;
        let store = Self { conn };
        store.setup_database().await?;
        Ok(store)
    }

    async fn setup_database(&self) -> Result<(), StateError> {
        self.conn
            .call(|conn| {
                conn.execute(
                    "CREATE TABLE IF NOT EXISTS tasks (
                        id              TEXT PRIMARY KEY,
                        task_data       TEXT NOT NULL
                    )",
                    [],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Inserts or replaces a task.
    pub async fn save(&self, task: &TaskDescriptor) -> Result<(), StateError> {
        let task_data = serde_json::to_string(task)?;
        let task_id = task.id.clone();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO tasks (id, task_data) VALUES (?1, ?2)",
                    params![task_id, task_data],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Loads every stored task.
    ///
    /// Nothing is downloading when the store is opened, so tasks recorded as
    /// `Downloading` (the process died mid-session) come back as `Paused`.
    pub async fn load_all(&self) -> Result<Vec<TaskDescriptor>, StateError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT task_data FROM tasks")?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<String>, rusqlite::Error>>()?;
                Ok(rows)
            })
            .await?;

        let mut tasks = Vec::with_capacity(rows.len());
        for data in rows {
            let mut task: TaskDescriptor = serde_json::from_str(&data)?;
            if task.status == TaskStatus::Downloading {
                task.status = TaskStatus::Paused;
                task.speed = 0;
            }
            tasks.push(task);
        }
        Ok(tasks)
    }

    pub async fn get(&self, task_id: &str) -> Result<Option<TaskDescriptor>, StateError> {
        Ok(self.load_all().await?.into_iter().find(|t| t.id == task_id))
    }

    /// All tasks, completed ones first (most recently completed first), then
    /// the rest by when they were added, newest first.
    pub async fn list(&self) -> Result<Vec<TaskDescriptor>, StateError> {
        let mut tasks = self.load_all().await?;
        sort_for_listing(&mut tasks);
        Ok(tasks)
    }

    pub async fn delete(&self, task_id: &str) -> Result<(), StateError> {
        let task_id = task_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

pub fn sort_for_listing(tasks: &mut [TaskDescriptor]) {
    tasks.sort_by_key(|t| match t.completed_at {
        Some(done) if t.status == TaskStatus::Completed => (0, Reverse(done)),
        _ => (1, Reverse(t.added_at)),
    });
}
