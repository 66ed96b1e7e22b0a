//! `tokio::process` backed runner

use super::traits::{ChildProcess, Cmd, CommandRunner};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Runs commands on the host
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }

    fn command(cmd: &Cmd) -> Command {
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args);
        if let Some(dir) = &cmd.dir {
            command.current_dir(dir);
        }
        for (key, value) in &cmd.env {
            command.env(key, value);
        }
        command.stdin(Stdio::null());
        command
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, cmd: &Cmd) -> String {
        debug!("[RUNNER] {}", cmd);

        let output = match Self::command(cmd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!("[RUNNER] Failed to start {}: {}", cmd.program, e);
                return format!("{}: {}", cmd.program, e);
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if output.status.success() {
            return stdout.trim().to_string();
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(
            "[RUNNER] {} exited with {:?}: {}",
            cmd,
            output.status.code(),
            stderr.trim()
        );
        format!("{}\n{}", stdout.trim(), stderr.trim())
            .trim()
            .to_string()
    }

    async fn run_streaming(&self, cmd: &Cmd) -> String {
        let mut child = match self.spawn(cmd).await {
            Ok(child) => child,
            Err(e) => {
                warn!("[RUNNER] {:#}", e);
                return format!("{}: {}", cmd.program, e);
            }
        };

        let mut lines = vec![];
        while let Some(line) = child.next_line().await {
            info!("[{}] {}", cmd.program, line);
            lines.push(line);
        }

        match child.wait().await {
            Ok(Some(0)) => {}
            Ok(code) => warn!("[RUNNER] {} exited with {:?}", cmd, code),
            Err(e) => warn!("[RUNNER] {} wait failed: {:#}", cmd, e),
        }

        lines.join("\n").trim().to_string()
    }

    async fn spawn(&self, cmd: &Cmd) -> Result<Box<dyn ChildProcess>> {
        debug!("[RUNNER] spawn {}", cmd);

        let mut child = Self::command(cmd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn {}", cmd.program))?;

        let (line_tx, line_rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, line_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, line_tx);
        }

        Ok(Box::new(SystemChild { child, line_rx }))
    }
}

/// Pump one output pipe into the shared line channel until EOF
fn forward_lines<R>(pipe: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

struct SystemChild {
    child: Child,
    line_rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl ChildProcess for SystemChild {
    async fn next_line(&mut self) -> Option<String> {
        self.line_rx.recv().await
    }

    async fn wait(&mut self) -> Result<Option<i32>> {
        let status = self.child.wait().await.context("wait for child")?;
        Ok(status.code())
    }

    async fn kill(&mut self) -> Result<()> {
        self.child.kill().await.context("kill child")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let out = SystemRunner::new().run(&Cmd::new("echo").arg("hello")).await;
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn test_run_folds_spawn_error_into_text() {
        let out = SystemRunner::new()
            .run(&Cmd::new("/nonexistent/program"))
            .await;
        assert!(out.starts_with("/nonexistent/program:"));
    }

    #[tokio::test]
    async fn test_run_passes_env_and_dir() {
        let dir = tempfile::tempdir().unwrap();
        let out = SystemRunner::new()
            .run(
                &Cmd::new("sh")
                    .args(["-c", "echo $EDGEBOX_TEST_VALUE; pwd"])
                    .env("EDGEBOX_TEST_VALUE", "42")
                    .current_dir(dir.path()),
            )
            .await;
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "42");
        assert!(lines[1].ends_with(dir.path().file_name().unwrap().to_str().unwrap()));
        assert!(std::env::var("EDGEBOX_TEST_VALUE").is_err());
    }

    #[tokio::test]
    async fn test_run_streaming_includes_stderr() {
        let out = SystemRunner::new()
            .run_streaming(&Cmd::new("sh").args(["-c", "echo Fatal: nope 1>&2; exit 1"]))
            .await;
        assert!(out.contains("Fatal:"));
    }

    #[tokio::test]
    async fn test_spawn_reads_lines_then_exits() {
        let mut child = SystemRunner::new()
            .spawn(&Cmd::new("sh").args(["-c", "echo one; echo two"]))
            .await
            .unwrap();
        let mut lines = vec![];
        while let Some(line) = child.next_line().await {
            lines.push(line);
        }
        assert_eq!(lines, vec!["one", "two"]);
        assert_eq!(child.wait().await.unwrap(), Some(0));
    }
}
