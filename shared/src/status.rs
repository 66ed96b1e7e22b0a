//! Derived-status snapshots
//!
//! These are never ground truth. The agent recomputes them from live
//! observation and publishes a serialized copy into the option table.

use serde::{Deserialize, Serialize};

/// Classification of an installed application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeAppState {
    /// No install marker present
    NotInstalled,
    /// Installed, zero services running
    Off,
    /// Installed, every declared service running
    On,
    /// Installed, some but not all services running
    Error,
}

/// Status code + description, as shown by dashboards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeAppStatus {
    pub id: i32,
    pub description: String,
}

impl From<EdgeAppState> for EdgeAppStatus {
    fn from(state: EdgeAppState) -> Self {
        let (id, description) = match state {
            EdgeAppState::NotInstalled => (-1, "not-installed"),
            EdgeAppState::Off => (0, "off"),
            EdgeAppState::On => (1, "on"),
            EdgeAppState::Error => (2, "error"),
        };
        Self {
            id,
            description: description.into(),
        }
    }
}

/// A single container that is part of an application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeAppService {
    pub id: String,
    pub is_running: bool,
}

/// An application known to the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeApp {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: EdgeAppStatus,
    pub services: Vec<EdgeAppService>,
    pub internet_accessible: bool,
    pub network_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internet_url: Option<String>,
}

/// Storage device health
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub id: i32,
    pub description: String,
}

impl DeviceStatus {
    pub fn healthy() -> Self {
        Self {
            id: 1,
            description: "healthy".into(),
        }
    }

    pub fn not_configured() -> Self {
        Self {
            id: 0,
            description: "not configured".into(),
        }
    }
}

/// Used bytes attributed to a category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSplit {
    pub os: u64,
    pub edgeapps: u64,
    pub other: u64,
}

impl UsageSplit {
    pub fn add(&mut self, other: &UsageSplit) {
        self.os += other.os;
        self.edgeapps += other.edgeapps;
        self.other += other.other;
    }
}

/// Raw usage counters plus a derived percentage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStat {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub percent: String,
    pub usage_split: UsageSplit,
}

/// A partition / filesystem (empty mountpoint means it is not mounted)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub id: String,
    pub size: String,
    pub maj: String,
    pub min: String,
    pub rm: String,
    pub ro: String,
    pub filesystem: String,
    pub mountpoint: String,
    pub usage_stat: UsageStat,
}

/// A block device and its partitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub size: String,
    pub in_use: bool,
    pub main_device: bool,
    pub maj: String,
    pub min: String,
    pub rm: String,
    pub ro: String,
    pub partitions: Vec<Partition>,
    pub status: DeviceStatus,
    pub usage_stat: UsageStat,
}
