//! Browser shell session backed by ttyd

use super::{HandlerContext, HandlerResult};
use crate::continuation::wait_for_exit;
use crate::runner::{ChildProcess, Cmd};
use crate::status::local_host;
use crate::store::Options;
use crate::task::registry::TaskHandler;
use anyhow::{bail, Result};
use async_trait::async_trait;
use edgebox_shared::{kinds, OptionKey, ShellStatus};
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct StartShellArgs {
    #[serde(default)]
    pub port: Option<u16>,
}

/// Runs until the session process exits or its lifetime runs out
///
/// A non-zero exit (ttyd could not bind its port, for one) ends up as the
/// error status through the continuation's failure reporter.
async fn supervise_session(options: Options, mut child: Box<dyn ChildProcess>, limit: Duration) -> Result<()> {
    match wait_for_exit(child.as_mut(), limit).await? {
        Some(code) if code != 0 => bail!("shell exited with status {}", code),
        code => info!("[SHELL] Session ended with {:?}", code),
    }
    options.set_shell_status(&ShellStatus::stopped())
}

pub struct StartShell;

#[async_trait]
impl TaskHandler for StartShell {
    /// Absent arguments mean the default port
    type Args = Option<StartShellArgs>;

    fn kind(&self) -> &'static str {
        kinds::START_SHELL
    }

    async fn handle(&self, ctx: &HandlerContext, args: Option<StartShellArgs>) -> HandlerResult {
        let shell = &ctx.config.shell;
        let port = args.and_then(|a| a.port).unwrap_or(shell.default_port);

        let host = match ctx.options.get(OptionKey::IpAddress) {
            Ok(Some(ip)) if !ip.trim().is_empty() => ip.trim().to_string(),
            Ok(_) => match local_host(&ctx.options) {
                Ok(host) => host,
                Err(e) => return e.into(),
            },
            Err(e) => return e.into(),
        };

        let cmd = Cmd::new(shell.program.as_str()).args(["-p", port.to_string().as_str(), "-o", "-W", "bash"]);
        let child = match ctx.runner.spawn(&cmd).await {
            Ok(child) => child,
            Err(e) => {
                let _ = ctx.options.set_shell_status(&ShellStatus::error(format!("{:#}", e)));
                return e.into();
            }
        };

        let running = ShellStatus::running(format!("http://{}:{}", host, port));
        if let Err(e) = ctx.options.set_shell_status(&running) {
            return e.into();
        }
        info!("[SHELL] Session on port {}", port);

        ctx.continuations.spawn(
            kinds::START_SHELL,
            Box::new(|options: &Options, message: &str| {
                options.set_shell_status(&ShellStatus::error(message))
            }),
            supervise_session(ctx.options.clone(), child, ctx.config.timing.shell_session_max()),
        );

        HandlerResult::accepted_json(&running)
    }
}
