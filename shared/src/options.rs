//! Option table keys and typed status payloads
//!
//! The option table doubles as configuration and as a bulletin board read by
//! dashboards. Every key the agent reads or writes is listed here so that the
//! name used by a writer and a reader can never drift apart.

use serde::{Deserialize, Serialize};

/// Named entries of the option table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKey {
    EdgeAppsList,
    StorageDevicesList,
    SystemUptime,
    IpAddress,
    Hostname,
    ReleaseVersion,
    TunnelStatus,
    TunnelServiceActive,
    BackupStatus,
    BackupLastRun,
    BackupErrorMessage,
    BackupInfo,
    BackupService,
    BackupRepositoryUrl,
    BackupAccessKeyId,
    BackupSecretAccessKey,
    SystemUpdates,
    UpdatingSystem,
    ShellStatus,
    // Cloud bootstrap
    Name,
    Email,
    Username,
    Cluster,
    ClusterIp,
    ClusterSshPort,
    ApiToken,
}

impl OptionKey {
    /// Keys imported from the cloud env file on first boot of a cloud release
    pub const CLOUD_BOOTSTRAP: [OptionKey; 7] = [
        OptionKey::Name,
        OptionKey::Email,
        OptionKey::Username,
        OptionKey::Cluster,
        OptionKey::ClusterIp,
        OptionKey::ClusterSshPort,
        OptionKey::ApiToken,
    ];

    /// Column value of `option.name`
    pub fn as_str(self) -> &'static str {
        match self {
            OptionKey::EdgeAppsList => "EDGEAPPS_LIST",
            OptionKey::StorageDevicesList => "STORAGE_DEVICES_LIST",
            OptionKey::SystemUptime => "SYSTEM_UPTIME",
            OptionKey::IpAddress => "IP_ADDRESS",
            OptionKey::Hostname => "HOSTNAME",
            OptionKey::ReleaseVersion => "RELEASE_VERSION",
            OptionKey::TunnelStatus => "TUNNEL_STATUS",
            OptionKey::TunnelServiceActive => "TUNNEL_SERVICE_ACTIVE",
            OptionKey::BackupStatus => "BACKUP_STATUS",
            OptionKey::BackupLastRun => "BACKUP_LAST_RUN",
            OptionKey::BackupErrorMessage => "BACKUP_ERROR_MESSAGE",
            OptionKey::BackupInfo => "BACKUP_INFO",
            OptionKey::BackupService => "BACKUP_SERVICE",
            OptionKey::BackupRepositoryUrl => "BACKUP_REPOSITORY_URL",
            OptionKey::BackupAccessKeyId => "BACKUP_ACCESS_KEY_ID",
            OptionKey::BackupSecretAccessKey => "BACKUP_SECRET_ACCESS_KEY",
            OptionKey::SystemUpdates => "SYSTEM_UPDATES",
            OptionKey::UpdatingSystem => "UPDATING_SYSTEM",
            OptionKey::ShellStatus => "SHELL_STATUS",
            OptionKey::Name => "NAME",
            OptionKey::Email => "EMAIL",
            OptionKey::Username => "USERNAME",
            OptionKey::Cluster => "CLUSTER",
            OptionKey::ClusterIp => "CLUSTER_IP",
            OptionKey::ClusterSshPort => "CLUSTER_SSH_PORT",
            OptionKey::ApiToken => "EDGEBOXIO_API_TOKEN",
        }
    }
}

/// Last known state of the backup subsystem, stored as a bare string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    /// Repository initialisation under way
    Initiating,
    /// A repository has been initialised and the last operation succeeded
    Working,
    /// A backup is running
    InProgress,
    /// A restore is running
    Restoring,
    /// The last operation failed, see `BACKUP_ERROR_MESSAGE`
    Error,
}

impl BackupStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BackupStatus::Initiating => "initiating",
            BackupStatus::Working => "working",
            BackupStatus::InProgress => "in_progress",
            BackupStatus::Restoring => "restoring",
            BackupStatus::Error => "error",
        }
    }

    /// Parse a stored value; empty or unknown values mean "never set up"
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "initiating" => Some(BackupStatus::Initiating),
            "working" => Some(BackupStatus::Working),
            "in_progress" => Some(BackupStatus::InProgress),
            "restoring" => Some(BackupStatus::Restoring),
            "error" => Some(BackupStatus::Error),
            _ => None,
        }
    }
}

/// Real-world state of the public tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelState {
    /// Waiting for the operator to complete the login link
    Waiting,
    /// Credentials arrived, tunnel is being created
    Starting,
    Connected,
    Stopped,
    Error,
}

/// JSON payload of `TUNNEL_STATUS`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelStatus {
    pub status: TunnelState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TunnelStatus {
    fn with_state(status: TunnelState) -> Self {
        Self {
            status,
            login_link: None,
            domain: None,
            error: None,
        }
    }

    pub fn waiting(login_link: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            login_link: Some(login_link.into()),
            domain: Some(domain.into()),
            ..Self::with_state(TunnelState::Waiting)
        }
    }

    pub fn starting(domain: impl Into<String>) -> Self {
        Self {
            domain: Some(domain.into()),
            ..Self::with_state(TunnelState::Starting)
        }
    }

    pub fn connected(domain: impl Into<String>) -> Self {
        Self {
            domain: Some(domain.into()),
            ..Self::with_state(TunnelState::Connected)
        }
    }

    pub fn stopped() -> Self {
        Self::with_state(TunnelState::Stopped)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::with_state(TunnelState::Error)
        }
    }
}

/// State of the interactive shell session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellState {
    Running,
    Stopped,
    Error,
}

/// JSON payload of `SHELL_STATUS`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellStatus {
    pub status: ShellState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ShellStatus {
    pub fn running(url: impl Into<String>) -> Self {
        Self {
            status: ShellState::Running,
            url: Some(url.into()),
            error: None,
        }
    }

    pub fn stopped() -> Self {
        Self {
            status: ShellState::Stopped,
            url: None,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ShellState::Error,
            url: None,
            error: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_status_parse() {
        assert_eq!(BackupStatus::parse("working"), Some(BackupStatus::Working));
        assert_eq!(BackupStatus::parse(BackupStatus::InProgress.as_str()), Some(BackupStatus::InProgress));
        assert_eq!(BackupStatus::parse(""), None);
    }

    #[test]
    fn test_tunnel_status_json() {
        let json = serde_json::to_string(&TunnelStatus::waiting("https://login", "box.example.com")).unwrap();
        assert_eq!(
            json,
            r#"{"status":"waiting","login_link":"https://login","domain":"box.example.com"}"#
        );

        let parsed: TunnelStatus = serde_json::from_str(r#"{"status":"connected","domain":"d"}"#).unwrap();
        assert_eq!(parsed, TunnelStatus::connected("d"));
    }

    #[test]
    fn test_cloud_bootstrap_keys() {
        let names: Vec<_> = OptionKey::CLOUD_BOOTSTRAP.iter().map(|k| k.as_str()).collect();
        assert!(names.contains(&"EDGEBOXIO_API_TOKEN"));
        assert_eq!(names.len(), 7);
    }
}
