//! Encrypted backups of application data through restic

use super::{rebuild_runtime, HandlerContext, HandlerResult};
use crate::runner::Cmd;
use crate::status;
use crate::store::BackupCredentials;
use crate::task::registry::TaskHandler;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use edgebox_shared::{kinds, now_unix, BackupStatus};
use serde::de::IgnoredAny;
use serde::Deserialize;
use tracing::{info, warn};

/// Marker restic prints on a fatal error
const FATAL_MARKER: &str = "Fatal:";

#[derive(Debug, Deserialize)]
pub struct SetupBackupsArgs {
    pub service: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub repository_name: String,
    pub password: String,
}

/// Repository URL for a supported storage provider
pub fn repository_url(service: &str, repository_name: &str) -> Result<String> {
    Ok(match service {
        "s3" => format!("s3:https://s3.amazonaws.com/{}", repository_name),
        "b2" => format!("b2:{}:", repository_name),
        "wasabi" => format!("s3:https://s3.wasabisys.com/{}", repository_name),
        other => bail!("unsupported backup service: {}", other),
    })
}

/// `restic` invocation carrying the provider credentials in its environment
fn restic(ctx: &HandlerContext, credentials: &BackupCredentials) -> Cmd {
    let (id_var, key_var) = match credentials.service.as_str() {
        "b2" => ("B2_ACCOUNT_ID", "B2_ACCOUNT_KEY"),
        _ => ("AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY"),
    };
    Cmd::new("restic")
        .arg("-r")
        .arg(credentials.repository_url.as_str())
        .arg("--password-file")
        .arg(ctx.config.paths.backup_password_file.to_string_lossy())
        .env(id_var, credentials.access_key_id.as_str())
        .env(key_var, credentials.secret_access_key.as_str())
}

fn write_password_file(ctx: &HandlerContext, password: &str) -> Result<()> {
    let path = &ctx.config.paths.backup_password_file;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, password).with_context(|| format!("write {}", path.display()))
}

fn saved_credentials(ctx: &HandlerContext) -> Result<BackupCredentials> {
    match ctx.options.backup_credentials()? {
        Some(credentials) => Ok(credentials),
        None => bail!("backups are not set up"),
    }
}

/// Record a fatal restic run and turn it into a failed result
fn report_fatal(ctx: &HandlerContext, out: String) -> HandlerResult {
    warn!("[BACKUP] {}", out);
    if let Err(e) = ctx.options.set_backup_error(&out) {
        return e.into();
    }
    HandlerResult::failed(out)
}

pub struct SetupBackups;

#[async_trait]
impl TaskHandler for SetupBackups {
    type Args = SetupBackupsArgs;

    fn kind(&self) -> &'static str {
        kinds::SETUP_BACKUPS
    }

    async fn handle(&self, ctx: &HandlerContext, args: SetupBackupsArgs) -> HandlerResult {
        let repository_url = match repository_url(&args.service, &args.repository_name) {
            Ok(url) => url,
            Err(e) => return e.into(),
        };
        let credentials = BackupCredentials {
            service: args.service,
            repository_url,
            access_key_id: args.access_key_id,
            secret_access_key: args.secret_access_key,
        };

        let prepared = ctx
            .options
            .set_backup_status(BackupStatus::Initiating)
            .and_then(|_| write_password_file(ctx, &args.password))
            .and_then(|_| ctx.options.set_backup_credentials(&credentials));
        if let Err(e) = prepared {
            return e.into();
        }

        info!("[BACKUP] Initialising repository {}", credentials.repository_url);
        let out = ctx.runner.run_streaming(&restic(ctx, &credentials).arg("init")).await;

        // An existing repository can be reused as is
        if out.contains(FATAL_MARKER) && !out.contains("already exists") && !out.contains("already initialized") {
            return report_fatal(ctx, out);
        }
        if let Err(e) = ctx.options.set_backup_status(BackupStatus::Working) {
            return e.into();
        }
        HandlerResult::Completed(out)
    }
}

/// Also invoked by the scheduler when the last backup is stale
pub struct StartBackup;

#[async_trait]
impl TaskHandler for StartBackup {
    type Args = IgnoredAny;

    fn kind(&self) -> &'static str {
        kinds::START_BACKUP
    }

    async fn handle(&self, ctx: &HandlerContext, _args: IgnoredAny) -> HandlerResult {
        let credentials = match saved_credentials(ctx) {
            Ok(c) => c,
            Err(e) => return e.into(),
        };
        if let Err(e) = ctx.options.set_backup_status(BackupStatus::InProgress) {
            return e.into();
        }

        info!("[BACKUP] Backing up {}", ctx.config.paths.apps_path.display());
        let apps = ctx.config.paths.apps_path.to_string_lossy().to_string();
        let out = ctx
            .runner
            .run_streaming(&restic(ctx, &credentials).args(["backup", apps.as_str()]))
            .await;

        if out.contains(FATAL_MARKER) {
            return report_fatal(ctx, out);
        }
        let recorded = ctx
            .options
            .set_backup_status(BackupStatus::Working)
            .and_then(|_| ctx.options.set_backup_last_run(now_unix()));
        if let Err(e) = recorded {
            return e.into();
        }
        HandlerResult::Completed(out)
    }
}

pub struct RestoreBackup;

#[async_trait]
impl TaskHandler for RestoreBackup {
    type Args = IgnoredAny;

    fn kind(&self) -> &'static str {
        kinds::RESTORE_BACKUP
    }

    async fn handle(&self, ctx: &HandlerContext, _args: IgnoredAny) -> HandlerResult {
        let credentials = match saved_credentials(ctx) {
            Ok(c) => c,
            Err(e) => return e.into(),
        };
        if let Err(e) = ctx.options.set_backup_status(BackupStatus::Restoring) {
            return e.into();
        }

        info!("[BACKUP] Restoring latest snapshot");
        let out = ctx
            .runner
            .run_streaming(&restic(ctx, &credentials).args(["restore", "latest", "--target", "/"]))
            .await;
        if out.contains(FATAL_MARKER) {
            return report_fatal(ctx, out);
        }

        rebuild_runtime(ctx).await;
        if let Err(e) = ctx.options.set_backup_status(BackupStatus::Working) {
            return e.into();
        }
        if let Err(e) = status::refresh_edgeapps_list(&ctx.config, ctx.runner.as_ref(), &ctx.options).await {
            warn!("[BACKUP] Could not refresh apps after restore: {:#}", e);
        }
        HandlerResult::Completed(out)
    }
}

/// Forgets the repository; snapshots already uploaded are left alone
pub struct DisableBackups;

#[async_trait]
impl TaskHandler for DisableBackups {
    type Args = IgnoredAny;

    fn kind(&self) -> &'static str {
        kinds::DISABLE_BACKUPS
    }

    async fn handle(&self, ctx: &HandlerContext, _args: IgnoredAny) -> HandlerResult {
        let path = &ctx.config.paths.backup_password_file;
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("[BACKUP] Could not remove {}: {}", path.display(), e);
            }
        }
        let cleared = ctx
            .options
            .clear_backup_credentials()
            .and_then(|_| ctx.options.clear_backup_status());
        if let Err(e) = cleared {
            return e.into();
        }
        info!("[BACKUP] Disabled");
        HandlerResult::Completed("OK".into())
    }
}

/// Publish the repository snapshot listing (`BACKUP_INFO`)
///
/// Skipped unless a repository is set up and the last operation succeeded.
pub async fn refresh_backup_info(ctx: &HandlerContext) -> Result<bool> {
    if ctx.options.backup_status()? != Some(BackupStatus::Working) {
        return Ok(false);
    }
    let Some(credentials) = ctx.options.backup_credentials()? else {
        return Ok(false);
    };
    let out = ctx
        .runner
        .run(&restic(ctx, &credentials).args(["snapshots", "--json"]))
        .await;
    if out.contains(FATAL_MARKER) {
        warn!("[BACKUP] Could not list snapshots: {}", out);
        return Ok(false);
    }
    ctx.options.set_backup_info(&out)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::fake::FakeRunner;
    use crate::task::handlers::testing::context;
    use edgebox_shared::OptionKey;
    use std::sync::Arc;

    fn setup_args(service: &str) -> SetupBackupsArgs {
        SetupBackupsArgs {
            service: service.into(),
            access_key_id: "AKIA".into(),
            secret_access_key: "secret".into(),
            repository_name: "box-backups".into(),
            password: "hunter2".into(),
        }
    }

    #[test]
    fn test_repository_url() {
        assert_eq!(repository_url("s3", "r").unwrap(), "s3:https://s3.amazonaws.com/r");
        assert_eq!(repository_url("b2", "r").unwrap(), "b2:r:");
        assert_eq!(repository_url("wasabi", "r").unwrap(), "s3:https://s3.wasabisys.com/r");
        assert!(repository_url("ftp", "r").is_err());
    }

    #[tokio::test]
    async fn test_setup_backups_initialises_repository() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new().respond("init", "created restic repository 5f3a"));
        let (ctx, _db) = context(root.path(), runner.clone());

        let result = SetupBackups.handle(&ctx, setup_args("b2")).await;

        assert!(result.is_success());
        assert_eq!(ctx.options.backup_status().unwrap(), Some(BackupStatus::Working));
        assert_eq!(
            std::fs::read_to_string(&ctx.config.paths.backup_password_file).unwrap(),
            "hunter2"
        );
        let init = &runner.calls()[0];
        assert!(init.env.contains(&("B2_ACCOUNT_ID".to_string(), "AKIA".to_string())));
        assert!(init.args.contains(&"b2:box-backups:".to_string()));
        // Credentials never leak into the rendered command line
        assert!(!runner.rendered()[0].contains("secret"));
    }

    #[tokio::test]
    async fn test_setup_backups_reuses_existing_repository() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new().respond("init", "Fatal: create key in repository failed: config file already exists"));
        let (ctx, _db) = context(root.path(), runner);

        assert!(SetupBackups.handle(&ctx, setup_args("s3")).await.is_success());
        assert_eq!(ctx.options.backup_status().unwrap(), Some(BackupStatus::Working));
    }

    #[tokio::test]
    async fn test_fatal_backup_sets_error_status() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new().respond("backup", "Fatal: wrong password or no key found"));
        let (ctx, _db) = context(root.path(), runner);
        ctx.options
            .set_backup_credentials(&BackupCredentials {
                service: "s3".into(),
                repository_url: "s3:https://s3.amazonaws.com/r".into(),
                access_key_id: "AKIA".into(),
                secret_access_key: "secret".into(),
            })
            .unwrap();
        ctx.options.set_backup_last_run(100).unwrap();

        let result = StartBackup.handle(&ctx, IgnoredAny).await;

        assert!(!result.is_success());
        assert_eq!(ctx.options.backup_status().unwrap(), Some(BackupStatus::Error));
        assert_eq!(ctx.options.backup_last_run().unwrap(), Some(100));
        assert!(ctx
            .options
            .get(OptionKey::BackupErrorMessage)
            .unwrap()
            .unwrap()
            .contains("wrong password"));
    }

    #[tokio::test]
    async fn test_start_backup_records_last_run() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new().respond("init", "created").respond("backup", "snapshot 1a2b saved"));
        let (ctx, _db) = context(root.path(), runner);
        SetupBackups.handle(&ctx, setup_args("wasabi")).await;

        let before = now_unix();
        assert!(StartBackup.handle(&ctx, IgnoredAny).await.is_success());
        assert!(ctx.options.backup_last_run().unwrap().unwrap() >= before);
        assert_eq!(ctx.options.backup_status().unwrap(), Some(BackupStatus::Working));
    }

    #[tokio::test]
    async fn test_start_backup_without_setup_fails() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let (ctx, _db) = context(root.path(), runner.clone());

        assert!(!StartBackup.handle(&ctx, IgnoredAny).await.is_success());
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_disable_backups_forgets_everything() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let (ctx, _db) = context(root.path(), runner);
        SetupBackups.handle(&ctx, setup_args("s3")).await;

        assert!(DisableBackups.handle(&ctx, IgnoredAny).await.is_success());
        assert_eq!(ctx.options.backup_status().unwrap(), None);
        assert_eq!(ctx.options.backup_credentials().unwrap(), None);
        assert!(!ctx.config.paths.backup_password_file.exists());
        assert!(!refresh_backup_info(&ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_refresh_backup_info() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new().respond("snapshots --json", r#"[{"id":"1a2b"}]"#));
        let (ctx, _db) = context(root.path(), runner);
        SetupBackups.handle(&ctx, setup_args("s3")).await;

        assert!(refresh_backup_info(&ctx).await.unwrap());
        assert_eq!(
            ctx.options.get(OptionKey::BackupInfo).unwrap().as_deref(),
            Some(r#"[{"id":"1a2b"}]"#)
        );
    }
}
