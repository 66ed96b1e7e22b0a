//! Task handlers for the different task kinds

mod backups;
mod edgeapps;
mod shell;
mod system;
mod tunnel;

pub use backups::refresh_backup_info;
pub use system::rebuild_runtime;
pub use tunnel::refresh_tunnel_service;

use super::registry::HandlerRegistry;
use crate::config::AgentConfig;
use crate::continuation::ContinuationSupervisor;
use crate::runner::CommandRunner;
use crate::store::Options;
use edgebox_shared::codec::encode_result;
use serde::Serialize;
use std::sync::Arc;

/// Context passed to task handlers
#[derive(Clone)]
pub struct HandlerContext {
    pub config: Arc<AgentConfig>,
    pub runner: Arc<dyn CommandRunner>,
    pub options: Options,
    pub continuations: ContinuationSupervisor,
}

/// Outcome of a handler invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerResult {
    /// Work is done; the payload becomes the task result
    Completed(String),
    /// Synchronous prefix done and a continuation detached; the real outcome
    /// is published later through an option
    Accepted(String),
    /// The task ends in error; the message is logged, not stored
    Failed(String),
}

impl HandlerResult {
    pub fn json<T: Serialize>(value: &T) -> Self {
        match encode_result(value) {
            Ok(encoded) => HandlerResult::Completed(encoded),
            Err(e) => HandlerResult::Failed(e.to_string()),
        }
    }

    pub fn accepted_json<T: Serialize>(value: &T) -> Self {
        match encode_result(value) {
            Ok(encoded) => HandlerResult::Accepted(encoded),
            Err(e) => HandlerResult::Failed(e.to_string()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        HandlerResult::Failed(message.into())
    }

    #[cfg(test)]
    pub fn is_success(&self) -> bool {
        !matches!(self, HandlerResult::Failed(_))
    }
}

/// Fold an internal error into a failed result
impl From<anyhow::Error> for HandlerResult {
    fn from(e: anyhow::Error) -> Self {
        HandlerResult::Failed(format!("{:#}", e))
    }
}

pub fn register_all(registry: &mut HandlerRegistry) {
    registry.register(edgeapps::InstallEdgeApp);
    registry.register(edgeapps::InstallBulkEdgeApps);
    registry.register(edgeapps::RemoveEdgeApp);
    registry.register(edgeapps::StartEdgeApp);
    registry.register(edgeapps::StopEdgeApp);
    registry.register(edgeapps::SetEdgeAppOptions);
    registry.register(edgeapps::EnableOnline);
    registry.register(edgeapps::DisableOnline);

    registry.register(tunnel::SetupTunnel);
    registry.register(tunnel::StartTunnel);
    registry.register(tunnel::StopTunnel);
    registry.register(tunnel::DisableTunnel);

    registry.register(backups::SetupBackups);
    registry.register(backups::StartBackup);
    registry.register(backups::RestoreBackup);
    registry.register(backups::DisableBackups);

    registry.register(shell::StartShell);

    registry.register(system::CheckUpdates);
    registry.register(system::ApplyUpdates);
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::runner::fake::FakeRunner;
    use crate::store::Database;
    use std::path::Path;

    /// Context over an in-memory database and a scripted runner
    pub(crate) fn context(root: &Path, runner: Arc<FakeRunner>) -> (HandlerContext, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let options = Options::new(db.clone());

        let mut config = AgentConfig::default();
        config.paths.ws_path = root.join("ws");
        config.paths.apps_path = root.join("apps");
        config.paths.scripts_path = root.join("scripts");
        config.paths.updater_path = root.join("updater");
        config.paths.cloudflared_config = root.join("etc").join("config.yml");
        config.paths.cloudflared_dirs = vec![root.join("home-cf"), root.join("root-cf")];
        config.paths.backup_password_file = root.join("backups").join("pw.txt");
        config.paths.cloud_env_file = root.join("cloud.env");
        config.paths.proc_uptime = root.join("uptime");
        config.timing.continuation_poll_interval_ms = 5;
        config.timing.continuation_timeout_secs = 5;
        for dir in [&config.paths.ws_path, &config.paths.apps_path] {
            std::fs::create_dir_all(dir).unwrap();
        }

        let ctx = HandlerContext {
            config: Arc::new(config),
            runner,
            options: options.clone(),
            continuations: ContinuationSupervisor::new(options),
        };
        (ctx, db)
    }

    /// Wait for every detached continuation to finish
    pub(crate) async fn settle(ctx: &HandlerContext) {
        for _ in 0..500 {
            if ctx.continuations.reap() == 0 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("continuations did not settle");
    }
}
