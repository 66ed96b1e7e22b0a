//! Agent configuration
//!
//! Defaults match a production device image. A TOML file passed with
//! `--config` can override any field; CLI flags override the file.

use anyhow::{Context, Result};
use edgebox_shared::timing;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Release flavour the agent was built or deployed as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseVersion {
    /// Development build: tasks are claimed but never executed
    Dev,
    #[default]
    Prod,
    /// Hosted instance, bootstrapped from a cloud env file
    Cloud,
    Other,
}

impl ReleaseVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            ReleaseVersion::Dev => "dev",
            ReleaseVersion::Prod => "prod",
            ReleaseVersion::Cloud => "cloud",
            ReleaseVersion::Other => "other",
        }
    }
}

/// Filesystem locations of the collaborating components
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Workspace builder; contains the `ws` script and the `.ready` marker
    pub ws_path: PathBuf,
    /// One directory per installable application
    pub apps_path: PathBuf,
    /// Helper shell scripts (tunnel create/delete)
    pub scripts_path: PathBuf,
    /// System updater (`run.sh`, `targets.env`)
    pub updater_path: PathBuf,
    /// Tunnel daemon configuration written after tunnel creation
    pub cloudflared_config: PathBuf,
    /// Directories searched for the tunnel login certificate and credentials, in order
    pub cloudflared_dirs: Vec<PathBuf>,
    /// Password file handed to the backup tool
    pub backup_password_file: PathBuf,
    /// Cloud bootstrap env file, deleted once imported
    pub cloud_env_file: PathBuf,
    pub proc_uptime: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            ws_path: "/home/system/components/ws".into(),
            apps_path: "/home/system/components/apps".into(),
            scripts_path: "/home/system/components/edgeboxctl/scripts".into(),
            updater_path: "/home/system/components/updater".into(),
            cloudflared_config: "/home/system/.cloudflared/config.yml".into(),
            cloudflared_dirs: vec!["/home/system/.cloudflared".into(), "/root/.cloudflared".into()],
            backup_password_file: "/home/system/components/backups/pw.txt".into(),
            cloud_env_file: "/home/system/components/edgeboxctl/cloud.env".into(),
            proc_uptime: "/proc/uptime".into(),
        }
    }
}

impl PathsConfig {
    /// Present once the workspace has been built at least once
    pub fn ready_marker(&self) -> PathBuf {
        self.ws_path.join(".ready")
    }
}

/// Loop cadence and continuation bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub tick_interval_ms: u64,
    pub not_ready_sleep_ms: u64,
    pub continuation_poll_interval_ms: u64,
    pub continuation_timeout_secs: u64,
    pub login_link_timeout_ms: u64,
    pub shell_session_max_secs: u64,
    pub backup_freshness_secs: i64,
    pub apps_size_max_age_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: timing::TICK_INTERVAL_MS,
            not_ready_sleep_ms: timing::NOT_READY_SLEEP_MS,
            continuation_poll_interval_ms: timing::CONTINUATION_POLL_INTERVAL_MS,
            continuation_timeout_secs: timing::CONTINUATION_TIMEOUT_SECS,
            login_link_timeout_ms: timing::LOGIN_LINK_TIMEOUT_MS,
            shell_session_max_secs: timing::SHELL_SESSION_MAX_SECS,
            backup_freshness_secs: timing::BACKUP_FRESHNESS_SECS,
            apps_size_max_age_secs: timing::APPS_SIZE_MAX_AGE_SECS,
        }
    }
}

impl TimingConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn not_ready_sleep(&self) -> Duration {
        Duration::from_millis(self.not_ready_sleep_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.continuation_poll_interval_ms)
    }

    pub fn continuation_timeout(&self) -> Duration {
        Duration::from_secs(self.continuation_timeout_secs)
    }

    /// Bound on the login-link scan, which runs inside the tick
    pub fn login_link_timeout(&self) -> Duration {
        Duration::from_millis(self.login_link_timeout_ms)
    }

    pub fn shell_session_max(&self) -> Duration {
        Duration::from_secs(self.shell_session_max_secs)
    }

    pub fn apps_size_max_age(&self) -> Duration {
        Duration::from_secs(self.apps_size_max_age_secs)
    }
}

/// Web shell launched by `start_shell`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    pub program: String,
    pub default_port: u16,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: "ttyd".into(),
            default_port: 7681,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Service name used in logs
    pub name: String,
    /// SQLite database shared with the API (task queue + options)
    pub database_path: PathBuf,
    pub release: ReleaseVersion,
    pub paths: PathsConfig,
    pub timing: TimingConfig,
    pub shell: ShellConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "edgebox".into(),
            database_path: "/home/system/components/api/data/edgebox.db".into(),
            release: ReleaseVersion::default(),
            paths: PathsConfig::default(),
            timing: TimingConfig::default(),
            shell: ShellConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load from a TOML file, or fall back to defaults when no file is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("read config {}", path.display()))?;
                Self::from_toml(&text).with_context(|| format!("parse config {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn is_dev(&self) -> bool {
        self.release == ReleaseVersion::Dev
    }
}
