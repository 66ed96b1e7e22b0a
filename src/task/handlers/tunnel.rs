//! Public tunnel handlers
//!
//! `setup_tunnel` is the asynchronous one. Its synchronous prefix starts the
//! interactive login and publishes the login link; a continuation then waits
//! for the login certificate and provisions the tunnel:
//!
//! ```text
//! waiting --(cert.pem appears)--> starting --(tunnel, dns, service)--> connected
//!    \                                \
//!     `------------------------------- `--> error
//! ```

use super::{HandlerContext, HandlerResult};
use crate::continuation::{wait_for_any_file, wait_for_exit};
use crate::runner::{ChildProcess, Cmd, CommandRunner};
use crate::store::Options;
use crate::task::registry::TaskHandler;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use edgebox_shared::{kinds, TunnelStatus};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

const LOGIN_CERT: &str = "cert.pem";

#[derive(Debug, Deserialize)]
pub struct SetupTunnelArgs {
    pub domain_name: String,
}

/// Credentials file written by `cloudflared tunnel create`
#[derive(Debug, Deserialize)]
struct TunnelCredentials {
    #[serde(rename = "TunnelID")]
    tunnel_id: String,
}

/// `config.yml` consumed by the tunnel daemon
#[derive(Debug, Serialize)]
struct TunnelConfig {
    url: String,
    tunnel: String,
    #[serde(rename = "credentials-file")]
    credentials_file: String,
}

/// Pull the first URL out of a line of login output
fn extract_url(line: &str) -> Option<String> {
    line.split_whitespace()
        .find(|word| word.starts_with("https://"))
        .map(str::to_string)
}

/// Read login output until the link shows up
async fn scan_for_login_link(child: &mut dyn ChildProcess) -> Option<String> {
    while let Some(line) = child.next_line().await {
        info!("[TUNNEL] {}", line);
        if let Some(url) = extract_url(&line) {
            return Some(url);
        }
    }
    None
}

/// First `*.json` credentials file in `dirs`, with its tunnel id
fn find_tunnel_credentials(dirs: &[PathBuf]) -> Result<(PathBuf, String)> {
    for dir in dirs {
        let Ok(entries) = std::fs::read_dir(dir) else {
            continue;
        };
        let mut candidates: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        candidates.sort();

        if let Some(path) = candidates.into_iter().next() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("read {}", path.display()))?;
            let credentials: TunnelCredentials = serde_json::from_str(&raw)
                .with_context(|| format!("parse {}", path.display()))?;
            return Ok((path, credentials.tunnel_id));
        }
    }
    Err(anyhow!("no tunnel credentials found in {:?}", dirs))
}

fn write_tunnel_config(destination: &Path, tunnel_id: &str, credentials: &Path) -> Result<()> {
    let config = TunnelConfig {
        url: "http://localhost:80".into(),
        tunnel: tunnel_id.into(),
        credentials_file: credentials.to_string_lossy().to_string(),
    };
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let yaml = serde_yaml::to_string(&config)?;
    std::fs::write(destination, yaml)
        .with_context(|| format!("write {}", destination.display()))
}

/// Everything after the login link has been handed out
async fn provision(
    runner: Arc<dyn CommandRunner>,
    options: Options,
    paths: crate::config::PathsConfig,
    poll_interval: Duration,
    limit: Duration,
    mut login: Box<dyn ChildProcess>,
    domain: String,
) -> Result<()> {
    let certs: Vec<PathBuf> = paths.cloudflared_dirs.iter().map(|d| d.join(LOGIN_CERT)).collect();
    let cert = wait_for_any_file(&certs, poll_interval, limit).await?;
    info!("[TUNNEL] Login certificate at {}", cert.display());
    if let Err(e) = wait_for_exit(login.as_mut(), poll_interval * 10).await {
        warn!("[TUNNEL] Login process: {:#}", e);
    }

    options.set_tunnel_status(&TunnelStatus::starting(&domain))?;

    let scripts = &paths.scripts_path;
    runner
        .run_streaming(&Cmd::new("sh").arg(scripts.join("cloudflared_tunnel_delete.sh").to_string_lossy()))
        .await;
    runner
        .run_streaming(&Cmd::new("sh").arg(scripts.join("cloudflared_tunnel_create.sh").to_string_lossy()))
        .await;

    let (credentials, tunnel_id) = find_tunnel_credentials(&paths.cloudflared_dirs)?;
    info!("[TUNNEL] Tunnel id {}", tunnel_id);
    write_tunnel_config(&paths.cloudflared_config, &tunnel_id, &credentials)?;

    let config = paths.cloudflared_config.to_string_lossy().to_string();
    let route = runner
        .run(&Cmd::new("cloudflared").args(["tunnel", "route", "dns", "-f", tunnel_id.as_str(), domain.as_str()]))
        .await;
    if route.contains("failed") || route.contains("error") {
        warn!("[TUNNEL] DNS route: {}", route);
    }
    runner
        .run(&Cmd::new("cloudflared").args(["--config", config.as_str(), "service", "install"]))
        .await;
    runner.run(&Cmd::new("systemctl").args(["start", "cloudflared"])).await;

    options.set_tunnel_status(&TunnelStatus::connected(&domain))?;
    info!("[TUNNEL] {} connected", domain);
    Ok(())
}

pub struct SetupTunnel;

#[async_trait]
impl TaskHandler for SetupTunnel {
    type Args = SetupTunnelArgs;

    fn kind(&self) -> &'static str {
        kinds::SETUP_TUNNEL
    }

    async fn handle(&self, ctx: &HandlerContext, args: SetupTunnelArgs) -> HandlerResult {
        let domain = args.domain_name.trim().to_string();
        if domain.is_empty() {
            return HandlerResult::failed("missing domain name");
        }

        let mut login = match ctx.runner.spawn(&Cmd::new("cloudflared").args(["tunnel", "login"])).await {
            Ok(child) => child,
            Err(e) => {
                let _ = ctx.options.set_tunnel_status(&TunnelStatus::error(format!("{:#}", e)));
                return e.into();
            }
        };

        let timing = &ctx.config.timing;
        let link = match timeout(timing.login_link_timeout(), scan_for_login_link(login.as_mut())).await {
            Ok(Some(link)) => link,
            Ok(None) | Err(_) => {
                let _ = login.kill().await;
                let message = "tunnel login did not produce a login link";
                let _ = ctx.options.set_tunnel_status(&TunnelStatus::error(message));
                return HandlerResult::failed(message);
            }
        };

        let waiting = TunnelStatus::waiting(&link, &domain);
        if let Err(e) = ctx.options.set_tunnel_status(&waiting) {
            return e.into();
        }
        info!("[TUNNEL] Waiting for login at {}", link);

        ctx.continuations.spawn(
            kinds::SETUP_TUNNEL,
            Box::new(|options: &Options, message: &str| {
                options.set_tunnel_status(&TunnelStatus::error(message))
            }),
            provision(
                ctx.runner.clone(),
                ctx.options.clone(),
                ctx.config.paths.clone(),
                timing.poll_interval(),
                timing.continuation_timeout(),
                login,
                domain,
            ),
        );

        HandlerResult::accepted_json(&waiting)
    }
}

pub struct StartTunnel;

#[async_trait]
impl TaskHandler for StartTunnel {
    type Args = IgnoredAny;

    fn kind(&self) -> &'static str {
        kinds::START_TUNNEL
    }

    async fn handle(&self, ctx: &HandlerContext, _args: IgnoredAny) -> HandlerResult {
        let domain = match ctx.options.tunnel_status() {
            Ok(status) => status.and_then(|s| s.domain),
            Err(e) => return e.into(),
        };
        let Some(domain) = domain else {
            return HandlerResult::failed("tunnel has not been set up");
        };

        ctx.runner.run(&Cmd::new("systemctl").args(["start", "cloudflared"])).await;
        let status = TunnelStatus::connected(domain);
        if let Err(e) = ctx.options.set_tunnel_status(&status) {
            return e.into();
        }
        HandlerResult::json(&status)
    }
}

pub struct StopTunnel;

#[async_trait]
impl TaskHandler for StopTunnel {
    type Args = IgnoredAny;

    fn kind(&self) -> &'static str {
        kinds::STOP_TUNNEL
    }

    async fn handle(&self, ctx: &HandlerContext, _args: IgnoredAny) -> HandlerResult {
        ctx.runner.run(&Cmd::new("systemctl").args(["stop", "cloudflared"])).await;

        // Keep the domain so the tunnel can be started again
        let domain = ctx.options.tunnel_status().ok().flatten().and_then(|s| s.domain);
        let status = TunnelStatus {
            domain,
            ..TunnelStatus::stopped()
        };
        if let Err(e) = ctx.options.set_tunnel_status(&status) {
            return e.into();
        }
        HandlerResult::json(&status)
    }
}

/// Uninstalls the tunnel service and deletes its credentials
pub struct DisableTunnel;

#[async_trait]
impl TaskHandler for DisableTunnel {
    type Args = IgnoredAny;

    fn kind(&self) -> &'static str {
        kinds::DISABLE_TUNNEL
    }

    async fn handle(&self, ctx: &HandlerContext, _args: IgnoredAny) -> HandlerResult {
        ctx.runner.run(&Cmd::new("cloudflared").args(["service", "uninstall"])).await;

        let paths = &ctx.config.paths;
        let mut doomed = vec![paths.cloudflared_config.clone()];
        for dir in &paths.cloudflared_dirs {
            doomed.push(dir.join(LOGIN_CERT));
            if let Ok((credentials, _)) = find_tunnel_credentials(std::slice::from_ref(dir)) {
                doomed.push(credentials);
            }
        }
        for path in doomed {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("[TUNNEL] Could not remove {}: {}", path.display(), e);
                }
            }
        }

        let status = TunnelStatus::stopped();
        if let Err(e) = ctx.options.set_tunnel_status(&status) {
            return e.into();
        }
        info!("[TUNNEL] Disabled");
        HandlerResult::json(&status)
    }
}

/// Publish whether the tunnel daemon is running (`TUNNEL_SERVICE_ACTIVE`)
pub async fn refresh_tunnel_service(ctx: &HandlerContext) -> Result<bool> {
    let out = ctx
        .runner
        .run(&Cmd::new("systemctl").args(["is-active", "cloudflared"]))
        .await;
    let active = out.trim() == "active";
    ctx.options.set_tunnel_service_active(active)?;
    Ok(active)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::fake::FakeRunner;
    use crate::task::handlers::testing::{context, settle};
    use edgebox_shared::TunnelState;

    const LOGIN_OUTPUT: &str = "\
Please open the following URL and log in with your Cloudflare account:

https://dash.cloudflare.com/argotunnel?callback=https%3A%2F%2Flogin

Leave cloudflared running to download the cert automatically.";

    #[test]
    fn test_extract_url() {
        assert_eq!(
            extract_url("open https://dash.cloudflare.com/x now").as_deref(),
            Some("https://dash.cloudflare.com/x")
        );
        assert_eq!(extract_url("no link here"), None);
    }

    #[test]
    fn test_credentials_and_config() {
        let root = tempfile::tempdir().unwrap();
        let home = root.path().join("home");
        let admin = root.path().join("admin");
        std::fs::create_dir_all(&admin).unwrap();
        std::fs::write(admin.join("abc.json"), r#"{"AccountTag":"t","TunnelSecret":"s","TunnelID":"abc-123"}"#).unwrap();

        let (path, id) = find_tunnel_credentials(&[home, admin.clone()]).unwrap();
        assert_eq!(id, "abc-123");
        assert_eq!(path, admin.join("abc.json"));

        let config = root.path().join("etc").join("config.yml");
        write_tunnel_config(&config, &id, &path).unwrap();
        let written = std::fs::read_to_string(&config).unwrap();
        assert!(written.contains("url: http://localhost:80"));
        assert!(written.contains("tunnel: abc-123"));
        assert!(written.contains("credentials-file:"));
    }

    #[tokio::test]
    async fn test_setup_tunnel_returns_before_connection() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new().respond("tunnel login", LOGIN_OUTPUT));
        let (ctx, _db) = context(root.path(), runner.clone());

        let result = SetupTunnel
            .handle(&ctx, SetupTunnelArgs { domain_name: "box.example.com".into() })
            .await;

        assert!(matches!(result, HandlerResult::Accepted(_)));
        let status = ctx.options.tunnel_status().unwrap().unwrap();
        assert_eq!(status.status, TunnelState::Waiting);
        assert_eq!(
            status.login_link.as_deref(),
            Some("https://dash.cloudflare.com/argotunnel?callback=https%3A%2F%2Flogin")
        );

        // Operator completes the login, the create script leaves credentials behind
        let cf = &ctx.config.paths.cloudflared_dirs[0];
        std::fs::create_dir_all(cf).unwrap();
        std::fs::write(cf.join("tunnel.json"), r#"{"TunnelID":"t-1"}"#).unwrap();
        std::fs::write(cf.join(LOGIN_CERT), "cert").unwrap();
        settle(&ctx).await;

        let status = ctx.options.tunnel_status().unwrap().unwrap();
        assert_eq!(status, TunnelStatus::connected("box.example.com"));
        assert_eq!(runner.count("route dns -f t-1 box.example.com"), 1);
        assert_eq!(runner.count("service install"), 1);
        assert!(ctx.config.paths.cloudflared_config.exists());
    }

    #[tokio::test]
    async fn test_missing_credentials_reported_through_status() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new().respond("tunnel login", LOGIN_OUTPUT));
        let (ctx, _db) = context(root.path(), runner.clone());
        let cf = &ctx.config.paths.cloudflared_dirs[1];
        std::fs::create_dir_all(cf).unwrap();
        std::fs::write(cf.join(LOGIN_CERT), "cert").unwrap();

        let result = SetupTunnel
            .handle(&ctx, SetupTunnelArgs { domain_name: "box.example.com".into() })
            .await;
        assert!(result.is_success());
        settle(&ctx).await;

        let status = ctx.options.tunnel_status().unwrap().unwrap();
        assert_eq!(status.status, TunnelState::Error);
        assert!(status.error.unwrap().contains("no tunnel credentials"));
    }

    #[tokio::test]
    async fn test_login_without_link_fails() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new().respond("tunnel login", "failed to reach the edge"));
        let (ctx, _db) = context(root.path(), runner);

        let result = SetupTunnel
            .handle(&ctx, SetupTunnelArgs { domain_name: "box.example.com".into() })
            .await;
        assert!(!result.is_success());
        assert_eq!(
            ctx.options.tunnel_status().unwrap().unwrap().status,
            TunnelState::Error
        );
    }

    #[tokio::test]
    async fn test_silent_login_gives_up_after_link_timeout() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(
            FakeRunner::new()
                .respond("tunnel login", "Please wait...")
                .stall("tunnel login"),
        );
        let (mut ctx, _db) = context(root.path(), runner);
        let mut config = (*ctx.config).clone();
        config.timing.continuation_timeout_secs = 3600;
        config.timing.login_link_timeout_ms = 50;
        ctx.config = Arc::new(config);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            SetupTunnel.handle(&ctx, SetupTunnelArgs { domain_name: "box.example.com".into() }),
        )
        .await
        .expect("login scan outlived its own timeout");

        assert!(!result.is_success());
        assert_eq!(
            ctx.options.tunnel_status().unwrap().unwrap().status,
            TunnelState::Error
        );
    }

    #[tokio::test]
    async fn test_stop_then_start_keeps_domain() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let (ctx, _db) = context(root.path(), runner.clone());
        ctx.options.set_tunnel_status(&TunnelStatus::connected("box.example.com")).unwrap();

        StopTunnel.handle(&ctx, IgnoredAny).await;
        assert_eq!(ctx.options.tunnel_status().unwrap().unwrap().status, TunnelState::Stopped);

        let started = StartTunnel.handle(&ctx, IgnoredAny).await;
        assert!(started.is_success());
        assert_eq!(
            ctx.options.tunnel_status().unwrap().unwrap(),
            TunnelStatus::connected("box.example.com")
        );
        assert_eq!(runner.count("systemctl stop cloudflared"), 1);
        assert_eq!(runner.count("systemctl start cloudflared"), 1);
    }

    #[tokio::test]
    async fn test_service_liveness() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new().respond("is-active", "active"));
        let (ctx, _db) = context(root.path(), runner);
        assert!(refresh_tunnel_service(&ctx).await.unwrap());
    }
}
