//! EdgeApp handlers (install, remove, start, stop, options, online exposure)
//!
//! All of them are synchronous and idempotent: perform the action, publish a
//! fresh application list, and return the affected application's snapshot.

use super::system::rebuild_runtime;
use super::{HandlerContext, HandlerResult};
use crate::runner::Cmd;
use crate::status::edgeapps::{INSTALL_MARKER, ONLINE_ENV_FILE, OPTIONS_ENV_FILE};
use crate::status::{refresh_edgeapps_list, EdgeAppInspector};
use crate::task::registry::TaskHandler;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use edgebox_shared::{kinds, EdgeApp};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct AppArgs {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct BulkArgs {
    pub ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct OptionsArgs {
    pub id: String,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct OnlineArgs {
    pub id: String,
    pub internet_url: String,
}

/// Directory of an existing application; rejects ids that could escape the apps dir
fn app_dir(ctx: &HandlerContext, id: &str) -> Result<PathBuf> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !id.starts_with('.');
    if !valid {
        bail!("invalid edgeapp id {:?}", id);
    }
    let inspector = EdgeAppInspector::new(&ctx.config.paths.apps_path, ctx.runner.as_ref());
    if !inspector.exists(id) {
        bail!("edgeapp {} does not exist", id);
    }
    Ok(inspector.app_dir(id))
}

fn remove_if_present(path: PathBuf) -> Result<()> {
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
    }
}

/// Publish the list and pick the affected application out of it
async fn publish_and_get(ctx: &HandlerContext, id: &str) -> Result<EdgeApp> {
    let apps = refresh_edgeapps_list(&ctx.config, ctx.runner.as_ref(), &ctx.options).await?;
    apps.into_iter()
        .find(|app| app.id == id)
        .with_context(|| format!("edgeapp {} vanished while refreshing", id))
}

async fn respond(ctx: &HandlerContext, id: &str) -> HandlerResult {
    match publish_and_get(ctx, id).await {
        Ok(app) => HandlerResult::json(&app),
        Err(e) => e.into(),
    }
}

fn compose(ctx: &HandlerContext, id: &str, action: &str) -> Cmd {
    let module_config = ctx
        .config
        .paths
        .ws_path
        .join("module-configs")
        .join(format!("{}.yml", id));
    Cmd::new("docker-compose")
        .arg("-f")
        .arg(module_config.to_string_lossy())
        .arg(action)
        .current_dir(&ctx.config.paths.ws_path)
}

pub struct InstallEdgeApp;

#[async_trait]
impl TaskHandler for InstallEdgeApp {
    type Args = AppArgs;

    fn kind(&self) -> &'static str {
        kinds::INSTALL_EDGEAPP
    }

    async fn handle(&self, ctx: &HandlerContext, args: AppArgs) -> HandlerResult {
        let dir = match app_dir(ctx, &args.id) {
            Ok(dir) => dir,
            Err(e) => return e.into(),
        };
        info!("[EDGEAPPS] Installing {}", args.id);
        if let Err(e) = std::fs::write(dir.join(INSTALL_MARKER), "") {
            return HandlerResult::failed(format!("mark {} installed: {}", args.id, e));
        }
        rebuild_runtime(ctx).await;
        respond(ctx, &args.id).await
    }
}

/// Installs several applications with a single rebuild and a single list refresh
pub struct InstallBulkEdgeApps;

#[async_trait]
impl TaskHandler for InstallBulkEdgeApps {
    type Args = BulkArgs;

    fn kind(&self) -> &'static str {
        kinds::INSTALL_BULK_EDGEAPPS
    }

    async fn handle(&self, ctx: &HandlerContext, args: BulkArgs) -> HandlerResult {
        let mut installed = vec![];
        for id in &args.ids {
            let marked = app_dir(ctx, id)
                .and_then(|dir| Ok(std::fs::write(dir.join(INSTALL_MARKER), "")?));
            match marked {
                Ok(()) => installed.push(id.clone()),
                Err(e) => warn!("[EDGEAPPS] Skipping {}: {:#}", id, e),
            }
        }
        if installed.is_empty() {
            return HandlerResult::failed("no edgeapp could be installed");
        }

        info!("[EDGEAPPS] Bulk installing {:?}", installed);
        rebuild_runtime(ctx).await;

        match refresh_edgeapps_list(&ctx.config, ctx.runner.as_ref(), &ctx.options).await {
            Ok(apps) => {
                let apps: Vec<EdgeApp> = apps
                    .into_iter()
                    .filter(|app| installed.contains(&app.id))
                    .collect();
                HandlerResult::json(&apps)
            }
            Err(e) => e.into(),
        }
    }
}

pub struct RemoveEdgeApp;

#[async_trait]
impl TaskHandler for RemoveEdgeApp {
    type Args = AppArgs;

    fn kind(&self) -> &'static str {
        kinds::REMOVE_EDGEAPP
    }

    async fn handle(&self, ctx: &HandlerContext, args: AppArgs) -> HandlerResult {
        let dir = match app_dir(ctx, &args.id) {
            Ok(dir) => dir,
            Err(e) => return e.into(),
        };
        info!("[EDGEAPPS] Removing {}", args.id);
        ctx.runner
            .run_streaming(
                &Cmd::new("./ws")
                    .args(["-r", args.id.as_str()])
                    .current_dir(&ctx.config.paths.ws_path),
            )
            .await;

        for file in [INSTALL_MARKER, ONLINE_ENV_FILE] {
            if let Err(e) = remove_if_present(dir.join(file)) {
                return e.into();
            }
        }
        respond(ctx, &args.id).await
    }
}

pub struct StartEdgeApp;

#[async_trait]
impl TaskHandler for StartEdgeApp {
    type Args = AppArgs;

    fn kind(&self) -> &'static str {
        kinds::START_EDGEAPP
    }

    async fn handle(&self, ctx: &HandlerContext, args: AppArgs) -> HandlerResult {
        if let Err(e) = app_dir(ctx, &args.id) {
            return e.into();
        }
        info!("[EDGEAPPS] Starting {}", args.id);
        ctx.runner.run(&compose(ctx, &args.id, "start")).await;
        respond(ctx, &args.id).await
    }
}

pub struct StopEdgeApp;

#[async_trait]
impl TaskHandler for StopEdgeApp {
    type Args = AppArgs;

    fn kind(&self) -> &'static str {
        kinds::STOP_EDGEAPP
    }

    async fn handle(&self, ctx: &HandlerContext, args: AppArgs) -> HandlerResult {
        if let Err(e) = app_dir(ctx, &args.id) {
            return e.into();
        }
        info!("[EDGEAPPS] Stopping {}", args.id);
        ctx.runner.run(&compose(ctx, &args.id, "stop")).await;
        respond(ctx, &args.id).await
    }
}

fn render_env(options: &BTreeMap<String, String>) -> Result<String> {
    let mut out = String::new();
    for (key, value) in options {
        let valid_key = !key.is_empty()
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_key || value.contains('\n') {
            bail!("invalid option {:?}", key);
        }
        out.push_str(&format!("{}={}\n", key, value));
    }
    Ok(out)
}

/// Writes the application's option env file and rebuilds
pub struct SetEdgeAppOptions;

#[async_trait]
impl TaskHandler for SetEdgeAppOptions {
    type Args = OptionsArgs;

    fn kind(&self) -> &'static str {
        kinds::SET_EDGEAPP_OPTIONS
    }

    async fn handle(&self, ctx: &HandlerContext, args: OptionsArgs) -> HandlerResult {
        let written = app_dir(ctx, &args.id).and_then(|dir| {
            let env = render_env(&args.options)?;
            std::fs::write(dir.join(OPTIONS_ENV_FILE), env)?;
            Ok(())
        });
        if let Err(e) = written {
            return e.into();
        }
        info!("[EDGEAPPS] Set {} options on {}", args.options.len(), args.id);
        rebuild_runtime(ctx).await;
        respond(ctx, &args.id).await
    }
}

pub struct EnableOnline;

#[async_trait]
impl TaskHandler for EnableOnline {
    type Args = OnlineArgs;

    fn kind(&self) -> &'static str {
        kinds::ENABLE_ONLINE
    }

    async fn handle(&self, ctx: &HandlerContext, args: OnlineArgs) -> HandlerResult {
        if args.internet_url.trim().is_empty() || args.internet_url.contains('\n') {
            return HandlerResult::failed("invalid internet url");
        }
        let written = app_dir(ctx, &args.id).and_then(|dir| {
            std::fs::write(
                dir.join(ONLINE_ENV_FILE),
                format!("INTERNET_URL={}\n", args.internet_url.trim()),
            )?;
            Ok(())
        });
        if let Err(e) = written {
            return e.into();
        }
        info!("[EDGEAPPS] {} online at {}", args.id, args.internet_url);
        rebuild_runtime(ctx).await;
        respond(ctx, &args.id).await
    }
}

pub struct DisableOnline;

#[async_trait]
impl TaskHandler for DisableOnline {
    type Args = AppArgs;

    fn kind(&self) -> &'static str {
        kinds::DISABLE_ONLINE
    }

    async fn handle(&self, ctx: &HandlerContext, args: AppArgs) -> HandlerResult {
        let removed = app_dir(ctx, &args.id).and_then(|dir| remove_if_present(dir.join(ONLINE_ENV_FILE)));
        if let Err(e) = removed {
            return e.into();
        }
        info!("[EDGEAPPS] {} offline", args.id);
        rebuild_runtime(ctx).await;
        respond(ctx, &args.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::fake::FakeRunner;
    use crate::status::edgeapps::tests::write_app;
    use crate::task::handlers::testing::context;
    use crate::task::registry::HandlerRegistry;
    use edgebox_shared::EdgeAppState;
    use std::sync::Arc;

    async fn call(ctx: &HandlerContext, kind: &str, args: &str) -> HandlerResult {
        HandlerRegistry::standard()
            .get(kind)
            .unwrap()
            .call(ctx, Some(args))
            .await
            .unwrap()
    }

    fn decode<T: serde::de::DeserializeOwned>(result: &HandlerResult) -> T {
        match result {
            HandlerResult::Completed(json) => serde_json::from_str(json).unwrap(),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_install_marks_rebuilds_and_publishes() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let (ctx, _db) = context(root.path(), runner.clone());
        write_app(&ctx.config.paths.apps_path, "wiki", &["app"], false);

        let result = call(&ctx, kinds::INSTALL_EDGEAPP, r#"{"id":"wiki"}"#).await;

        let app: EdgeApp = decode(&result);
        assert_eq!(app.status, EdgeAppState::Off.into());
        assert!(ctx.config.paths.apps_path.join("wiki").join(INSTALL_MARKER).exists());
        assert_eq!(runner.count("./ws -b"), 1);
        assert_eq!(ctx.options.edgeapps().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bulk_install_rebuilds_and_refreshes_once() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let (ctx, _db) = context(root.path(), runner.clone());
        for id in ["a", "b", "c", "d"] {
            write_app(&ctx.config.paths.apps_path, id, &["app"], false);
        }

        let result = call(
            &ctx,
            kinds::INSTALL_BULK_EDGEAPPS,
            r#"{"ids":["a","b","c","missing"]}"#,
        )
        .await;

        let apps: Vec<EdgeApp> = decode(&result);
        assert_eq!(apps.len(), 3);
        assert_eq!(runner.count("./ws -b"), 1);
        // One list refresh inspects each installed app's services exactly once
        assert_eq!(runner.count("docker inspect"), 3);
        assert!(!ctx.config.paths.apps_path.join("d").join(INSTALL_MARKER).exists());
    }

    #[tokio::test]
    async fn test_start_uses_module_config() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(
            FakeRunner::new()
                .respond("wiki-app-1", "true")
                .respond("wiki-db-1", "true"),
        );
        let (ctx, _db) = context(root.path(), runner.clone());
        write_app(&ctx.config.paths.apps_path, "wiki", &["app", "db"], true);

        let result = call(&ctx, kinds::START_EDGEAPP, r#"{"id":"wiki"}"#).await;

        let app: EdgeApp = decode(&result);
        assert_eq!(app.status, EdgeAppState::On.into());
        let start = runner
            .calls()
            .into_iter()
            .find(|c| c.program == "docker-compose")
            .unwrap();
        assert!(start.args[1].ends_with("module-configs/wiki.yml"));
        assert_eq!(start.args[2], "start");
    }

    #[tokio::test]
    async fn test_unknown_or_unsafe_id_fails() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let (ctx, _db) = context(root.path(), runner.clone());

        let missing = call(&ctx, kinds::STOP_EDGEAPP, r#"{"id":"ghost"}"#).await;
        assert!(!missing.is_success());

        let escape = call(&ctx, kinds::REMOVE_EDGEAPP, r#"{"id":"../ws"}"#).await;
        assert!(!escape.is_success());
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_remove_clears_markers() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let (ctx, _db) = context(root.path(), runner.clone());
        write_app(&ctx.config.paths.apps_path, "blog", &["app"], true);
        let dir = ctx.config.paths.apps_path.join("blog");
        std::fs::write(dir.join(ONLINE_ENV_FILE), "INTERNET_URL=blog.example.com\n").unwrap();

        let result = call(&ctx, kinds::REMOVE_EDGEAPP, r#"{"id":"blog"}"#).await;

        let app: EdgeApp = decode(&result);
        assert_eq!(app.status, EdgeAppState::NotInstalled.into());
        assert!(!app.internet_accessible);
        assert_eq!(runner.count("./ws -r blog"), 1);
    }

    #[tokio::test]
    async fn test_online_toggle() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let (ctx, _db) = context(root.path(), runner.clone());
        write_app(&ctx.config.paths.apps_path, "blog", &["app"], true);

        let enabled = call(
            &ctx,
            kinds::ENABLE_ONLINE,
            r#"{"id":"blog","internet_url":"blog.example.com"}"#,
        )
        .await;
        let app: EdgeApp = decode(&enabled);
        assert_eq!(app.internet_url.as_deref(), Some("blog.example.com"));

        let disabled = call(&ctx, kinds::DISABLE_ONLINE, r#"{"id":"blog"}"#).await;
        let app: EdgeApp = decode(&disabled);
        assert!(app.internet_url.is_none());
    }

    #[tokio::test]
    async fn test_set_options_writes_env_file() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let (ctx, _db) = context(root.path(), runner.clone());
        write_app(&ctx.config.paths.apps_path, "wiki", &["app"], true);

        let ok = call(
            &ctx,
            kinds::SET_EDGEAPP_OPTIONS,
            r#"{"id":"wiki","options":{"ADMIN_USER":"root","THEME":"dark"}}"#,
        )
        .await;
        assert!(ok.is_success());
        let env = std::fs::read_to_string(ctx.config.paths.apps_path.join("wiki").join(OPTIONS_ENV_FILE)).unwrap();
        assert_eq!(env, "ADMIN_USER=root\nTHEME=dark\n");

        let bad = call(
            &ctx,
            kinds::SET_EDGEAPP_OPTIONS,
            r#"{"id":"wiki","options":{"BAD KEY":"x"}}"#,
        )
        .await;
        assert!(!bad.is_success());
    }
}
