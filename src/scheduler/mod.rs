//! Scheduler
//!
//! Runs the recurring maintenance actions due on each tick. A failing action
//! is logged and skipped; the remaining actions of the tick still run.

mod cadence;

pub use cadence::{rules_for_tick, should_auto_backup, ScheduledAction};

use crate::config::ReleaseVersion;
use crate::status::{self, AppsSizeCache};
use crate::task::handlers::{refresh_backup_info, rebuild_runtime, refresh_tunnel_service};
use crate::task::{HandlerContext, HandlerRegistry, HandlerResult};
use anyhow::{anyhow, Result};
use edgebox_shared::{kinds, now_unix, OptionKey};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Scheduler {
    ctx: HandlerContext,
    registry: Arc<HandlerRegistry>,
    apps_size: AppsSizeCache,
}

impl Scheduler {
    pub fn new(ctx: HandlerContext, registry: Arc<HandlerRegistry>) -> Self {
        let apps_size = AppsSizeCache::new(ctx.config.timing.apps_size_max_age());
        Self { ctx, registry, apps_size }
    }

    /// Run every action due on `tick`, returning how many failed
    pub async fn run_schedules(&self, tick: u64) -> usize {
        let mut failures = 0;
        for action in rules_for_tick(tick) {
            if let Err(e) = self.run_action(action).await {
                warn!("[SCHEDULER] {:?} error on tick {}: {:?}", action, tick, e);
                failures += 1;
            }
        }
        failures
    }

    async fn run_action(&self, action: ScheduledAction) -> Result<()> {
        let ctx = &self.ctx;
        let config = ctx.config.as_ref();
        let runner = ctx.runner.as_ref();

        match action {
            ScheduledAction::CloudBootstrap => {
                if config.release == ReleaseVersion::Cloud {
                    status::system::setup_cloud_options(&config.paths.cloud_env_file, &ctx.options)?;
                }
            }
            ScheduledAction::SystemInfo => {
                ctx.options.set(OptionKey::ReleaseVersion, config.release.as_str())?;
                status::refresh_hostname(runner, &ctx.options).await?;
                status::refresh_ip(runner, &ctx.options).await?;
            }
            ScheduledAction::Uptime => status::refresh_uptime(config, &ctx.options)?,
            ScheduledAction::StorageDevices => {
                status::refresh_storage_devices(config, runner, &ctx.options, &self.apps_size).await?
            }
            ScheduledAction::TunnelServiceActive => {
                refresh_tunnel_service(ctx).await?;
            }
            ScheduledAction::EdgeAppsList => {
                status::refresh_edgeapps_list(config, runner, &ctx.options).await?;
            }
            ScheduledAction::AutoBackup => self.auto_backup().await?,
            ScheduledAction::IpAddress => status::refresh_ip(runner, &ctx.options).await?,
            ScheduledAction::BackupInfo => {
                refresh_backup_info(ctx).await?;
            }
            ScheduledAction::CheckUpdates => {
                self.invoke(kinds::CHECK_UPDATES).await?;
            }
            ScheduledAction::RebuildRuntime => {
                rebuild_runtime(ctx).await;
            }
        }
        Ok(())
    }

    /// Start a backup when the last one is stale and the repository works
    async fn auto_backup(&self) -> Result<()> {
        let options = &self.ctx.options;
        let last_run = options.backup_last_run()?;
        let backup_status = options.backup_status()?;
        let freshness = self.ctx.config.timing.backup_freshness_secs;

        if !should_auto_backup(last_run, backup_status, now_unix(), freshness) {
            debug!("[SCHEDULER] Auto-backup not due");
            return Ok(());
        }
        info!("[SCHEDULER] Last backup is stale, starting one");
        self.invoke(kinds::START_BACKUP).await
    }

    /// Run a registered handler outside the queue
    async fn invoke(&self, kind: &str) -> Result<()> {
        let handler = self
            .registry
            .get(kind)
            .ok_or_else(|| anyhow!("no handler registered for {}", kind))?;
        match handler.call(&self.ctx, None).await? {
            HandlerResult::Failed(message) => Err(anyhow!("{} failed: {}", kind, message)),
            HandlerResult::Completed(_) | HandlerResult::Accepted(_) => Ok(()),
        }
    }
}
