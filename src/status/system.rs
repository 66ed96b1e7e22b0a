//! Host facts: uptime, address, hostname, cloud bootstrap

use crate::runner::{Cmd, CommandRunner};
use crate::store::Options;
use anyhow::{Context, Result};
use edgebox_shared::OptionKey;
use std::path::Path;
use tracing::{info, warn};

/// Whole seconds since boot, read from `/proc/uptime`
pub fn uptime_seconds(proc_uptime: &Path) -> Result<u64> {
    let raw = std::fs::read_to_string(proc_uptime)
        .with_context(|| format!("read {}", proc_uptime.display()))?;
    parse_uptime(&raw).with_context(|| format!("parse {}", proc_uptime.display()))
}

fn parse_uptime(raw: &str) -> Option<u64> {
    let seconds: f64 = raw.split_whitespace().next()?.parse().ok()?;
    Some(seconds as u64)
}

/// Human form used in logs
pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3600;
    let minutes = (seconds % 3600) / 60;
    format!("{} days, {} hours, {} minutes", days, hours, minutes)
}

/// First IPv4 address in `ip -o -4 addr list <iface>` output
fn parse_ip(output: &str) -> Option<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(3))
        .filter_map(|cidr| cidr.split('/').next())
        .find(|ip| ip.parse::<std::net::Ipv4Addr>().is_ok())
        .map(str::to_string)
}

/// Address for direct (non-tunnelled) access: wired first, then wireless
pub async fn ip_address(runner: &dyn CommandRunner) -> String {
    for iface in ["eth0", "wlan0"] {
        let out = runner
            .run(&Cmd::new("ip").args(["-o", "-4", "addr", "list", iface]))
            .await;
        if let Some(ip) = parse_ip(&out) {
            return ip;
        }
    }
    String::new()
}

pub async fn hostname(runner: &dyn CommandRunner) -> String {
    runner.run(&Cmd::new("hostname")).await.trim().to_string()
}

/// Import the cloud bootstrap keys from `env_file`, then delete it
///
/// Returns how many options were written. A missing file is not an error:
/// the import has already happened on a previous boot.
pub fn setup_cloud_options(env_file: &Path, options: &Options) -> Result<usize> {
    let iter = match dotenvy::from_path_iter(env_file) {
        Ok(iter) => iter,
        Err(e) => {
            warn!("[SYSTEM] No cloud env file at {}: {}", env_file.display(), e);
            return Ok(0);
        }
    };

    let mut written = 0;
    for item in iter {
        let (name, value) = match item {
            Ok(pair) => pair,
            Err(e) => {
                warn!("[SYSTEM] Skipping unreadable cloud env line: {}", e);
                continue;
            }
        };
        if value.is_empty() {
            continue;
        }
        if let Some(key) = OptionKey::CLOUD_BOOTSTRAP.iter().find(|k| k.as_str() == name) {
            options.set(*key, &value)?;
            written += 1;
        }
    }

    std::fs::remove_file(env_file)
        .with_context(|| format!("remove {}", env_file.display()))?;
    info!("[SYSTEM] Imported {} cloud options", written);
    Ok(written)
}
