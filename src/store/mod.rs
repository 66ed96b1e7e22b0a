//! Durable state
//!
//! The task queue and the option table are the only state that survives a
//! restart. Both live in one SQLite file shared with the API that enqueues
//! tasks and the dashboards that read options.
//!
//! Every call is a single statement on a single row. There are no
//! transactions spanning both tables.

mod options;
mod sqlite;

pub use options::{BackupCredentials, Options, UpdateTarget};
pub use sqlite::Database;

use anyhow::Result;
use edgebox_shared::Task;

/// Durable FIFO of work items, ordered by creation time
pub trait TaskQueue: Send + Sync {
    /// Insert a task in status `created`, returning its id
    fn enqueue(&self, kind: &str, args: Option<&str>) -> Result<i64>;

    /// Oldest `created` task (ties broken by id), without claiming it
    fn dequeue_oldest_pending(&self) -> Result<Option<Task>>;

    /// `created -> executing`
    fn mark_executing(&self, id: i64) -> Result<()>;

    /// `executing -> finished`, storing the handler result
    fn mark_finished(&self, id: i64, result: &str) -> Result<()>;

    /// `executing -> error`, storing a diagnostic placeholder
    fn mark_error(&self, id: i64, result: &str) -> Result<()>;

    /// Tasks stuck in `executing`, most recently created first
    fn list_executing(&self) -> Result<Vec<Task>>;
}

/// Durable key/value table, upsert by name
pub trait OptionStore: Send + Sync {
    fn get_option(&self, name: &str) -> Result<Option<String>>;
    fn set_option(&self, name: &str, value: &str) -> Result<()>;
}
