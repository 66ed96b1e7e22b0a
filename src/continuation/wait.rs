//! Bounded waits for external conditions

use crate::runner::ChildProcess;
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::warn;

/// Poll until any of `paths` exists, returning the first one found
pub async fn wait_for_any_file(
    paths: &[PathBuf],
    poll_interval: Duration,
    limit: Duration,
) -> Result<PathBuf> {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(found) = paths.iter().find(|p| p.exists()) {
            return Ok(found.clone());
        }
        if Instant::now() >= deadline {
            bail!("timed out after {:?} waiting for {:?}", limit, paths);
        }
        sleep(poll_interval).await;
    }
}

/// Wait for a child to exit; kill it if it outlives `limit`
pub async fn wait_for_exit(child: &mut dyn ChildProcess, limit: Duration) -> Result<Option<i32>> {
    match timeout(limit, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!("process still running after {:?}, killing it", limit);
            child.kill().await?;
            bail!("process killed after running for {:?}", limit)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{Cmd, CommandRunner, SystemRunner};

    #[tokio::test]
    async fn test_file_appears() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cert.pem");
        let writer = path.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(30)).await;
            std::fs::write(writer, "cert").unwrap();
        });

        let found = wait_for_any_file(&[path.clone()], Duration::from_millis(5), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(found, path);
    }

    #[tokio::test]
    async fn test_first_existing_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("a").join("cert.pem");
        let present = dir.path().join("cert.pem");
        std::fs::write(&present, "cert").unwrap();

        let found = wait_for_any_file(
            &[missing, present.clone()],
            Duration::from_millis(5),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(found, present);
    }

    #[tokio::test]
    async fn test_file_wait_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let result = wait_for_any_file(
            &[dir.path().join("never")],
            Duration::from_millis(5),
            Duration::from_millis(30),
        )
        .await;
        assert!(result.unwrap_err().to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_exit_within_limit() {
        let mut child = SystemRunner::new().spawn(&Cmd::new("true")).await.unwrap();
        let code = wait_for_exit(child.as_mut(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(code, Some(0));
    }

    #[tokio::test]
    async fn test_long_running_child_is_killed() {
        let mut child = SystemRunner::new()
            .spawn(&Cmd::new("sleep").arg("30"))
            .await
            .unwrap();
        let result = wait_for_exit(child.as_mut(), Duration::from_millis(50)).await;
        assert!(result.unwrap_err().to_string().contains("killed"));
    }
}
