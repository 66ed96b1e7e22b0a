//! Status aggregation
//!
//! Computing a status and publishing it are separate steps: the functions
//! in the submodules only observe, while the `refresh_*` helpers here write
//! the resulting snapshot into the option table.

pub mod edgeapps;
pub mod storage;
pub mod system;

use crate::config::AgentConfig;
use crate::runner::CommandRunner;
use crate::store::Options;
use anyhow::Result;
use edgebox_shared::{EdgeApp, OptionKey};
use tracing::debug;

pub use edgeapps::EdgeAppInspector;
pub use storage::AppsSizeCache;

/// Host name used for local application URLs
pub fn local_host(options: &Options) -> Result<String> {
    Ok(options
        .get(OptionKey::Hostname)?
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "edgebox".to_string()))
}

pub async fn refresh_edgeapps_list(
    config: &AgentConfig,
    runner: &dyn CommandRunner,
    options: &Options,
) -> Result<Vec<EdgeApp>> {
    let host = local_host(options)?;
    let apps = EdgeAppInspector::new(&config.paths.apps_path, runner)
        .list(&host)
        .await?;
    options.set_edgeapps(&apps)?;
    debug!("published {} edgeapps", apps.len());
    Ok(apps)
}

pub async fn refresh_storage_devices(
    config: &AgentConfig,
    runner: &dyn CommandRunner,
    options: &Options,
    apps_size: &AppsSizeCache,
) -> Result<()> {
    let devices = storage::list_devices(runner, &config.paths.apps_path, apps_size).await;
    options.set_storage_devices(&devices)
}

pub fn refresh_uptime(config: &AgentConfig, options: &Options) -> Result<()> {
    let seconds = system::uptime_seconds(&config.paths.proc_uptime)?;
    debug!("uptime {}", system::format_uptime(seconds));
    options.set(OptionKey::SystemUptime, seconds.to_string())
}

pub async fn refresh_ip(runner: &dyn CommandRunner, options: &Options) -> Result<()> {
    options.set(OptionKey::IpAddress, system::ip_address(runner).await)
}

pub async fn refresh_hostname(runner: &dyn CommandRunner, options: &Options) -> Result<()> {
    options.set(OptionKey::Hostname, system::hostname(runner).await)
}
