//! SQLite implementation of the task queue and option table

use super::{OptionStore, TaskQueue};
use anyhow::{anyhow, bail, Context, Result};
use edgebox_shared::state_machine::{next_status, TaskEvent};
use edgebox_shared::{now_datetime, Task, TaskStatus};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS task (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    task    TEXT    NOT NULL,
    args    TEXT,
    status  INTEGER NOT NULL DEFAULT 0,
    result  TEXT,
    created TEXT    NOT NULL,
    updated TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS task_status_created ON task (status, created, id);

CREATE TABLE IF NOT EXISTS option (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    name    TEXT    NOT NULL UNIQUE,
    value   TEXT,
    created TEXT    NOT NULL,
    updated TEXT    NOT NULL
);
"#;

const TASK_COLUMNS: &str = "id, task, args, status, result, created, updated";

/// Queue and option table behind a single connection
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create database dir {}", parent.display()))?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("open sqlite db {}", db_path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).context("apply schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))
    }

    /// Insert a task with an explicit creation timestamp
    pub fn enqueue_at(&self, kind: &str, args: Option<&str>, created: &str) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO task (task, args, status, created, updated) VALUES (?1, ?2, ?3, ?4, ?4)",
            params![kind, args, TaskStatus::Created.code(), created],
        )?;
        Ok(conn.last_insert_rowid())
    }

    #[cfg(test)]
    pub fn get_task(&self, id: i64) -> Result<Option<Task>> {
        let conn = self.conn()?;
        let task = conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM task WHERE id = ?1"),
                [id],
                Self::row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
        let code: i64 = row.get(3)?;
        let status = TaskStatus::from_code(code)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(3, code))?;
        Ok(Task {
            id: row.get(0)?,
            kind: row.get(1)?,
            args: row.get(2)?,
            status,
            result: row.get(4)?,
            created: row.get(5)?,
            updated: row.get(6)?,
        })
    }

    /// Apply a lifecycle event; refuses anything the state machine does not allow
    fn transition(&self, id: i64, event: TaskEvent, result: Option<&str>) -> Result<TaskStatus> {
        let conn = self.conn()?;
        let code: Option<i64> = conn
            .query_row("SELECT status FROM task WHERE id = ?1", [id], |r| r.get(0))
            .optional()?;
        let Some(code) = code else {
            bail!("task {id} not found");
        };
        let from = TaskStatus::from_code(code)
            .ok_or_else(|| anyhow!("task {id} has unknown status code {code}"))?;
        let to = next_status(from, event)?;

        let changed = match result {
            Some(result) => conn.execute(
                "UPDATE task SET status = ?1, result = ?2, updated = ?3 WHERE id = ?4 AND status = ?5",
                params![to.code(), result, now_datetime(), id, from.code()],
            )?,
            None => conn.execute(
                "UPDATE task SET status = ?1, updated = ?2 WHERE id = ?3 AND status = ?4",
                params![to.code(), now_datetime(), id, from.code()],
            )?,
        };
        if changed != 1 {
            bail!("task {id} changed status concurrently");
        }

        debug!("task {} {} -> {}", id, from, to);
        Ok(to)
    }
}

impl TaskQueue for Database {
    fn enqueue(&self, kind: &str, args: Option<&str>) -> Result<i64> {
        self.enqueue_at(kind, args, &now_datetime())
    }

    fn dequeue_oldest_pending(&self) -> Result<Option<Task>> {
        let conn = self.conn()?;
        let task = conn
            .query_row(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM task WHERE status = ?1 ORDER BY created ASC, id ASC LIMIT 1"
                ),
                [TaskStatus::Created.code()],
                Self::row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    fn mark_executing(&self, id: i64) -> Result<()> {
        self.transition(id, TaskEvent::Claimed, None).map(|_| ())
    }

    fn mark_finished(&self, id: i64, result: &str) -> Result<()> {
        self.transition(id, TaskEvent::Completed, Some(result)).map(|_| ())
    }

    fn mark_error(&self, id: i64, result: &str) -> Result<()> {
        self.transition(id, TaskEvent::Failed, Some(result)).map(|_| ())
    }

    fn list_executing(&self) -> Result<Vec<Task>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM task WHERE status = ?1 ORDER BY created DESC, id DESC"
        ))?;
        let rows = stmt.query_map([TaskStatus::Executing.code()], Self::row_to_task)?;

        let mut tasks = vec![];
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }
}

impl OptionStore for Database {
    fn get_option(&self, name: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value: Option<Option<String>> = conn
            .query_row("SELECT value FROM option WHERE name = ?1", [name], |r| r.get(0))
            .optional()?;
        Ok(value.flatten())
    }

    fn set_option(&self, name: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO option (name, value, created, updated) VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated = excluded.updated",
            params![name, value, now_datetime()],
        )?;
        Ok(())
    }
}
