//! Cadence table
//!
//! Which recurring actions are due on a given tick. Pure functions only;
//! running the actions is the scheduler's job.
//!
//! | Predicate          | Actions                                             |
//! |--------------------|-----------------------------------------------------|
//! | `tick == 1`        | cloud bootstrap, system info, apps, storage, rebuild |
//! | `tick % 5 == 0`    | uptime, storage devices                             |
//! | `tick % 15 == 0`   | tunnel service liveness                             |
//! | `tick % 30 == 0`   | apps list, auto-backup gate                         |
//! | `tick % 60 == 0`   | IP address                                          |
//! | `tick % 3600 == 0` | backup repository info, system updates              |
//! | `tick % 86400 == 0`| runtime rebuild                                     |

use edgebox_shared::BackupStatus;

/// One recurring maintenance action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledAction {
    /// Import cloud bootstrap options (cloud release only)
    CloudBootstrap,
    /// Release, hostname and IP address
    SystemInfo,
    Uptime,
    StorageDevices,
    TunnelServiceActive,
    EdgeAppsList,
    AutoBackup,
    IpAddress,
    BackupInfo,
    CheckUpdates,
    RebuildRuntime,
}

/// Actions due on `tick`, in execution order
pub fn rules_for_tick(tick: u64) -> Vec<ScheduledAction> {
    use ScheduledAction::*;

    let mut actions = Vec::new();
    if tick == 1 {
        actions.extend([CloudBootstrap, SystemInfo, Uptime, EdgeAppsList, StorageDevices, RebuildRuntime]);
    }
    if tick == 0 {
        return actions;
    }
    if tick % 5 == 0 {
        actions.extend([Uptime, StorageDevices]);
    }
    if tick % 15 == 0 {
        actions.push(TunnelServiceActive);
    }
    if tick % 30 == 0 {
        actions.extend([EdgeAppsList, AutoBackup]);
    }
    if tick % 60 == 0 {
        actions.push(IpAddress);
    }
    if tick % 3600 == 0 {
        actions.extend([BackupInfo, CheckUpdates]);
    }
    if tick % 86400 == 0 {
        actions.push(RebuildRuntime);
    }
    actions
}

/// Whether the auto-backup gate opens
///
/// Both conditions must hold: a repository is known to work, and the last
/// successful backup is older than `freshness_secs`. Without a recorded run
/// nothing happens.
pub fn should_auto_backup(
    last_run: Option<i64>,
    status: Option<BackupStatus>,
    now: i64,
    freshness_secs: i64,
) -> bool {
    let Some(last_run) = last_run else {
        return false;
    };
    now - last_run > freshness_secs && status == Some(BackupStatus::Working)
}
