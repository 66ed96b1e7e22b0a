//! Task queue rows

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result stored when a task has no handler or its arguments do not decode
pub const INVALID_TASK_RESULT: &str = "Invalid Task";

/// Result stored when a handler reports a failure
pub const FAILED_TASK_RESULT: &str = "Error";

/// Lifecycle status of a queued task
///
/// Stored as an integer code in the `task.status` column so that external
/// producers can insert rows with `status = 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Created,
    Executing,
    Finished,
    Error,
}

impl TaskStatus {
    /// Integer code used in the database
    pub fn code(self) -> i64 {
        match self {
            TaskStatus::Created => 0,
            TaskStatus::Executing => 1,
            TaskStatus::Finished => 2,
            TaskStatus::Error => 3,
        }
    }

    /// Parse a database code, `None` for anything unknown
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(TaskStatus::Created),
            1 => Some(TaskStatus::Executing),
            2 => Some(TaskStatus::Finished),
            3 => Some(TaskStatus::Error),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Created => "created",
            TaskStatus::Executing => "executing",
            TaskStatus::Finished => "finished",
            TaskStatus::Error => "error",
        }
    }

    /// Finished and errored tasks never move again
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Finished | TaskStatus::Error)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of queued work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    /// Which handler applies, e.g. `install_edgeapp`
    #[serde(rename = "task")]
    pub kind: String,
    /// Kind-specific JSON payload, nullable
    pub args: Option<String>,
    pub status: TaskStatus,
    pub result: Option<String>,
    pub created: String,
    pub updated: String,
}

/// Task kinds understood by the agent
pub mod kinds {
    pub const INSTALL_EDGEAPP: &str = "install_edgeapp";
    pub const INSTALL_BULK_EDGEAPPS: &str = "install_bulk_edgeapps";
    pub const REMOVE_EDGEAPP: &str = "remove_edgeapp";
    pub const START_EDGEAPP: &str = "start_edgeapp";
    pub const STOP_EDGEAPP: &str = "stop_edgeapp";
    pub const SET_EDGEAPP_OPTIONS: &str = "set_edgeapp_options";
    pub const ENABLE_ONLINE: &str = "enable_online";
    pub const DISABLE_ONLINE: &str = "disable_online";

    pub const SETUP_TUNNEL: &str = "setup_tunnel";
    pub const START_TUNNEL: &str = "start_tunnel";
    pub const STOP_TUNNEL: &str = "stop_tunnel";
    pub const DISABLE_TUNNEL: &str = "disable_tunnel";

    pub const SETUP_BACKUPS: &str = "setup_backups";
    pub const START_BACKUP: &str = "start_backup";
    pub const RESTORE_BACKUP: &str = "restore_backup";
    pub const DISABLE_BACKUPS: &str = "disable_backups";

    pub const START_SHELL: &str = "start_shell";

    pub const CHECK_UPDATES: &str = "check_updates";
    pub const APPLY_UPDATES: &str = "apply_updates";
}
