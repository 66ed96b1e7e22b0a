//! Storage device enumeration and usage split

use crate::runner::{Cmd, CommandRunner};
use edgebox_shared::{Device, DeviceStatus, Partition, UsageSplit, UsageStat};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Block device the system boots from
pub const MAIN_DEVICE_ID: &str = "mmcblk0";

/// Parse `lsblk --raw --noheadings` into devices and their partitions
///
/// Each line reads `NAME MAJ:MIN RM SIZE RO TYPE [MOUNTPOINT]`.
pub fn parse_lsblk(output: &str) -> Vec<Device> {
    let mut devices: Vec<Device> = vec![];

    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 6 {
            continue;
        }
        let (maj, min) = fields[1].split_once(':').unwrap_or((fields[1], ""));

        if fields[5] == "part" {
            let Some(device) = devices.last_mut() else {
                continue;
            };
            let mountpoint = fields.get(6).map(|m| unescape(m)).unwrap_or_default();
            if !mountpoint.is_empty() {
                device.in_use = true;
                device.status = DeviceStatus::healthy();
            }
            device.partitions.push(Partition {
                id: fields[0].to_string(),
                size: fields[3].to_string(),
                maj: maj.to_string(),
                min: min.to_string(),
                rm: fields[2].to_string(),
                ro: fields[4].to_string(),
                filesystem: String::new(),
                mountpoint,
                usage_stat: UsageStat::default(),
            });
        } else {
            devices.push(Device {
                id: fields[0].to_string(),
                name: fields[0].to_string(),
                size: fields[3].to_string(),
                in_use: false,
                main_device: fields[0] == MAIN_DEVICE_ID,
                maj: maj.to_string(),
                min: min.to_string(),
                rm: fields[2].to_string(),
                ro: fields[4].to_string(),
                partitions: vec![],
                status: DeviceStatus::not_configured(),
                usage_stat: UsageStat::default(),
            });
        }
    }

    devices
}

/// lsblk escapes blanks in raw mode
fn unescape(raw: &str) -> String {
    raw.replace("\\x20", " ")
}

/// Parse `df -B1 --output=size,used,avail <mount>` into `(total, used, free)`
pub fn parse_df(output: &str) -> Option<(u64, u64, u64)> {
    let line = output.lines().rev().find(|l| !l.trim().is_empty())?;
    let mut numbers = line.split_whitespace().map(|n| n.parse::<u64>());
    let total = numbers.next()?.ok()?;
    let used = numbers.next()?.ok()?;
    let free = numbers.next()?.ok()?;
    Some((total, used, free))
}

pub fn percent(used: u64, total: u64) -> String {
    if total == 0 {
        return "0%".to_string();
    }
    format!("{:.0}%", used as f64 * 100.0 / total as f64)
}

/// Whether `mountpoint` is a dedicated (non-root) mount holding the apps dir
fn hosts_apps(mountpoint: &str, apps_path: &Path) -> bool {
    !mountpoint.is_empty() && mountpoint != "/" && apps_path.starts_with(mountpoint)
}

/// Attribute used bytes of one partition by mount point identity
pub fn split_usage(
    mountpoint: &str,
    used: u64,
    apps_path: &Path,
    dedicated_apps_mount: bool,
    apps_bytes: Option<u64>,
) -> UsageSplit {
    if hosts_apps(mountpoint, apps_path) {
        UsageSplit {
            edgeapps: used,
            ..Default::default()
        }
    } else if mountpoint == "/boot" || mountpoint.starts_with("/boot/") {
        UsageSplit {
            os: used,
            ..Default::default()
        }
    } else if mountpoint == "/" {
        let edgeapps = if dedicated_apps_mount {
            0
        } else {
            apps_bytes.unwrap_or(0).min(used)
        };
        UsageSplit {
            os: used - edgeapps,
            edgeapps,
            other: 0,
        }
    } else {
        UsageSplit {
            other: used,
            ..Default::default()
        }
    }
}

/// Sum partition counters into the device; percentage comes from the sums
pub fn aggregate_device_usage(device: &mut Device) {
    let mut stat = UsageStat::default();
    for partition in &device.partitions {
        stat.total += partition.usage_stat.total;
        stat.used += partition.usage_stat.used;
        stat.free += partition.usage_stat.free;
        stat.usage_split.add(&partition.usage_stat.usage_split);
    }
    stat.percent = percent(stat.used, stat.total);
    device.usage_stat = stat;
}

/// Parse `du -sb <path>`
fn parse_du(output: &str) -> Option<u64> {
    output.split_whitespace().next()?.parse().ok()
}

/// Size of the apps directory, re-measured with `du` at most once per `max_age`
///
/// `du` walks every file under the directory, which is slow on SD cards,
/// while `df` is cheap. Storage refreshes run far more often than the apps
/// size meaningfully changes.
pub struct AppsSizeCache {
    max_age: Duration,
    last: Mutex<Option<(Instant, u64)>>,
}

impl AppsSizeCache {
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            last: Mutex::new(None),
        }
    }

    fn fresh(&self) -> Option<u64> {
        let last = self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        (*last)
            .filter(|(at, _)| at.elapsed() < self.max_age)
            .map(|(_, bytes)| bytes)
    }

    pub async fn get(&self, runner: &dyn CommandRunner, apps_path: &Path) -> Option<u64> {
        if let Some(bytes) = self.fresh() {
            return Some(bytes);
        }
        let out = runner
            .run(&Cmd::new("du").arg("-sb").arg(apps_path.to_string_lossy()))
            .await;
        let bytes = parse_du(&out)?;
        *self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some((Instant::now(), bytes));
        Some(bytes)
    }
}

/// Fill in usage counters for every mounted partition of every in-use device
pub async fn compute_device_usage(
    devices: &mut [Device],
    runner: &dyn CommandRunner,
    apps_path: &Path,
    apps_size: &AppsSizeCache,
) {
    let dedicated_apps_mount = devices
        .iter()
        .flat_map(|d| d.partitions.iter())
        .any(|p| hosts_apps(&p.mountpoint, apps_path));

    let apps_bytes = if dedicated_apps_mount {
        None
    } else {
        apps_size.get(runner, apps_path).await
    };

    for device in devices.iter_mut().filter(|d| d.in_use) {
        for partition in device.partitions.iter_mut() {
            if partition.mountpoint.is_empty() {
                continue;
            }
            let out = runner
                .run(
                    &Cmd::new("df")
                        .args(["-B1", "--output=size,used,avail"])
                        .arg(partition.mountpoint.as_str()),
                )
                .await;
            let Some((total, used, free)) = parse_df(&out) else {
                debug!("no usage for {}", partition.mountpoint);
                continue;
            };
            if total == 0 {
                continue;
            }

            partition.usage_stat = UsageStat {
                total,
                used,
                free,
                percent: percent(used, total),
                usage_split: split_usage(
                    &partition.mountpoint,
                    used,
                    apps_path,
                    dedicated_apps_mount,
                    apps_bytes,
                ),
            };
        }
        aggregate_device_usage(device);
    }
}

/// Enumerate devices and compute their usage
pub async fn list_devices(
    runner: &dyn CommandRunner,
    apps_path: &Path,
    apps_size: &AppsSizeCache,
) -> Vec<Device> {
    let out = runner
        .run(&Cmd::new("lsblk").args(["--raw", "--noheadings"]))
        .await;
    let mut devices = parse_lsblk(&out);
    compute_device_usage(&mut devices, runner, apps_path, apps_size).await;
    devices
}
