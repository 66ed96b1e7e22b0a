//! System handlers: runtime rebuild and system updates

use super::{HandlerContext, HandlerResult};
use crate::runner::Cmd;
use crate::store::UpdateTarget;
use crate::task::registry::TaskHandler;
use async_trait::async_trait;
use edgebox_shared::kinds;
use serde::de::IgnoredAny;
use std::path::Path;
use tracing::{info, warn};

/// Rebuild and restart the application runtime (`./ws -b`)
pub async fn rebuild_runtime(ctx: &HandlerContext) -> String {
    info!("[SYSTEM] Rebuilding application runtime");
    ctx.runner
        .run_streaming(
            &Cmd::new("./ws")
                .arg("-b")
                .current_dir(&ctx.config.paths.ws_path),
        )
        .await
}

/// Parse `targets.env` lines of the form `<TARGET>_VERSION=<version>`
pub fn parse_update_targets(raw: &str) -> Vec<UpdateTarget> {
    raw.lines()
        .filter_map(|line| line.trim().split_once('='))
        .filter(|(key, _)| !key.trim().is_empty() && !key.trim_start().starts_with('#'))
        .map(|(key, version)| UpdateTarget {
            target: key.trim().trim_end_matches("_VERSION").to_string(),
            version: version.trim().trim_matches('"').to_string(),
        })
        .collect()
}

fn read_update_targets(updater_path: &Path) -> Vec<UpdateTarget> {
    let path = updater_path.join("targets.env");
    match std::fs::read_to_string(&path) {
        Ok(raw) => parse_update_targets(&raw),
        Err(_) => {
            info!("[SYSTEM] No {} found", path.display());
            vec![]
        }
    }
}

fn updater(ctx: &HandlerContext, flag: &str) -> Cmd {
    Cmd::new("sh")
        .arg(ctx.config.paths.updater_path.join("run.sh").to_string_lossy())
        .arg(flag)
        .current_dir(&ctx.config.paths.updater_path)
}

/// Refresh `SYSTEM_UPDATES`; also runs hourly from the scheduler
pub struct CheckUpdates;

#[async_trait]
impl TaskHandler for CheckUpdates {
    type Args = IgnoredAny;

    fn kind(&self) -> &'static str {
        kinds::CHECK_UPDATES
    }

    async fn handle(&self, ctx: &HandlerContext, _args: IgnoredAny) -> HandlerResult {
        info!("[SYSTEM] Checking for system updates");
        ctx.runner.run_streaming(&updater(ctx, "--check")).await;

        let targets = read_update_targets(&ctx.config.paths.updater_path);
        if let Err(e) = ctx.options.set_system_updates(&targets) {
            return e.into();
        }
        HandlerResult::json(&targets)
    }
}

pub struct ApplyUpdates;

#[async_trait]
impl TaskHandler for ApplyUpdates {
    type Args = IgnoredAny;

    fn kind(&self) -> &'static str {
        kinds::APPLY_UPDATES
    }

    async fn handle(&self, ctx: &HandlerContext, _args: IgnoredAny) -> HandlerResult {
        info!("[SYSTEM] Applying system updates");
        if let Err(e) = ctx.options.set_updating_system(true) {
            return e.into();
        }

        let out = ctx.runner.run_streaming(&updater(ctx, "--update")).await;

        // Reached only if the update did not restart the device
        if let Err(e) = ctx.options.set_updating_system(false) {
            return e.into();
        }
        if out.contains("Fatal:") || out.to_lowercase().contains("error:") {
            warn!("[SYSTEM] Update reported a failure");
            return HandlerResult::failed(out);
        }
        if let Err(e) = ctx.options.set_system_updates(&[]) {
            return e.into();
        }
        HandlerResult::Completed("OK".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::fake::FakeRunner;
    use crate::task::handlers::testing::context;
    use edgebox_shared::OptionKey;
    use std::sync::Arc;

    #[test]
    fn test_parse_update_targets() {
        let targets = parse_update_targets("WS_VERSION=1.2.0\n# comment=x\nAPI_VERSION=\"2.0\"\n\n");
        assert_eq!(
            targets,
            vec![
                UpdateTarget { target: "WS".into(), version: "1.2.0".into() },
                UpdateTarget { target: "API".into(), version: "2.0".into() },
            ]
        );
    }

    #[tokio::test]
    async fn test_check_updates_publishes_targets() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let (ctx, _db) = context(root.path(), runner.clone());
        std::fs::create_dir_all(&ctx.config.paths.updater_path).unwrap();
        std::fs::write(ctx.config.paths.updater_path.join("targets.env"), "WS_VERSION=1.2.0\n").unwrap();

        let result = CheckUpdates.handle(&ctx, IgnoredAny).await;

        assert_eq!(result, HandlerResult::Completed(r#"[{"target":"WS","version":"1.2.0"}]"#.into()));
        assert_eq!(
            ctx.options.get(OptionKey::SystemUpdates).unwrap().as_deref(),
            Some(r#"[{"target":"WS","version":"1.2.0"}]"#)
        );
        assert_eq!(runner.count("run.sh --check"), 1);
    }

    #[tokio::test]
    async fn test_check_updates_without_targets() {
        let root = tempfile::tempdir().unwrap();
        let (ctx, _db) = context(root.path(), Arc::new(FakeRunner::new()));

        CheckUpdates.handle(&ctx, IgnoredAny).await;
        assert_eq!(ctx.options.get(OptionKey::SystemUpdates).unwrap().as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn test_apply_updates_clears_flag() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new().respond("--update", "updated ws"));
        let (ctx, _db) = context(root.path(), runner);

        let result = ApplyUpdates.handle(&ctx, IgnoredAny).await;
        assert!(result.is_success());
        assert_eq!(ctx.options.get(OptionKey::UpdatingSystem).unwrap().as_deref(), Some("false"));
    }
}
