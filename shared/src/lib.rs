//! Edgebox Shared Types
//!
//! This crate provides the task queue rows, option keys and derived-status
//! snapshots shared between the device agent, the task producers that enqueue
//! work and the dashboards that poll the option table.

pub mod codec;
pub mod options;
pub mod state_machine;
pub mod status;
pub mod task;

use chrono::{DateTime, Utc};

// Re-export commonly used types at crate root
pub use options::{BackupStatus, OptionKey, ShellState, ShellStatus, TunnelState, TunnelStatus};
pub use status::{
    Device, DeviceStatus, EdgeApp, EdgeAppService, EdgeAppState, EdgeAppStatus, Partition,
    UsageSplit, UsageStat,
};
pub use task::{kinds, Task, TaskStatus, FAILED_TASK_RESULT, INVALID_TASK_RESULT};

/// Layout used for every timestamp written to the queue and option tables
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Get current timestamp in seconds since Unix epoch
pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

/// Format a timestamp the way the database columns store it
pub fn format_datetime(t: DateTime<Utc>) -> String {
    t.format(DATETIME_FORMAT).to_string()
}

/// Current time, formatted for a database column
pub fn now_datetime() -> String {
    format_datetime(Utc::now())
}

/// Timing parameters for the agent
pub mod timing {
    /// Pause between two ticks of the outer loop
    pub const TICK_INTERVAL_MS: u64 = 1000;

    /// Pause before re-checking readiness when the workspace is not built yet
    pub const NOT_READY_SLEEP_MS: u64 = 60_000;

    /// A backup older than this is stale and eligible for an automatic run
    pub const BACKUP_FRESHNESS_SECS: i64 = 3600;

    /// Fixed retry interval while a continuation polls for an external condition
    pub const CONTINUATION_POLL_INTERVAL_MS: u64 = 1000;

    /// Upper bound for any continuation wait
    pub const CONTINUATION_TIMEOUT_SECS: u64 = 15 * 60;

    /// How long `setup_tunnel` waits for the login link before giving up
    pub const LOGIN_LINK_TIMEOUT_MS: u64 = 60_000;

    /// How long a measured apps directory size is reused before `du` runs again
    pub const APPS_SIZE_MAX_AGE_SECS: u64 = 60;

    /// Maximum lifetime of an interactive shell session
    pub const SHELL_SESSION_MAX_SECS: u64 = 60 * 60;
}
