//! Typed accessors over the option table

use super::OptionStore;
use anyhow::{Context, Result};
use edgebox_shared::{
    BackupStatus, Device, EdgeApp, OptionKey, ShellStatus, TunnelStatus,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Backup provider credentials saved by `setup_backups`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupCredentials {
    pub service: String,
    pub repository_url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// One pending system update, as published in `SYSTEM_UPDATES`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTarget {
    pub target: String,
    pub version: String,
}

/// Handle to the option table shared by every handler
#[derive(Clone)]
pub struct Options {
    store: Arc<dyn OptionStore>,
}

impl Options {
    pub fn new(store: Arc<dyn OptionStore>) -> Self {
        Self { store }
    }

    pub fn get(&self, key: OptionKey) -> Result<Option<String>> {
        self.store
            .get_option(key.as_str())
            .with_context(|| format!("read option {}", key.as_str()))
    }

    pub fn set(&self, key: OptionKey, value: impl AsRef<str>) -> Result<()> {
        self.store
            .set_option(key.as_str(), value.as_ref())
            .with_context(|| format!("write option {}", key.as_str()))
    }

    /// Non-empty value, or `None`
    fn get_present(&self, key: OptionKey) -> Result<Option<String>> {
        Ok(self.get(key)?.filter(|v| !v.trim().is_empty()))
    }

    fn get_json<T: DeserializeOwned>(&self, key: OptionKey) -> Result<Option<T>> {
        match self.get_present(key)? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    warn!("option {} holds unreadable JSON: {}", key.as_str(), e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize + ?Sized>(&self, key: OptionKey, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)
            .with_context(|| format!("encode option {}", key.as_str()))?;
        self.set(key, raw)
    }

    fn set_bool(&self, key: OptionKey, value: bool) -> Result<()> {
        self.set(key, if value { "true" } else { "false" })
    }

    // Backups

    pub fn backup_status(&self) -> Result<Option<BackupStatus>> {
        Ok(self
            .get_present(OptionKey::BackupStatus)?
            .and_then(|v| BackupStatus::parse(v.trim())))
    }

    pub fn set_backup_status(&self, status: BackupStatus) -> Result<()> {
        self.set(OptionKey::BackupStatus, status.as_str())
    }

    /// Forget the backup state entirely, as if backups were never set up
    pub fn clear_backup_status(&self) -> Result<()> {
        self.set(OptionKey::BackupStatus, "")?;
        self.set(OptionKey::BackupErrorMessage, "")
    }

    /// Mark the backup subsystem as failed and keep the message for operators
    pub fn set_backup_error(&self, message: &str) -> Result<()> {
        self.set(OptionKey::BackupErrorMessage, message)?;
        self.set_backup_status(BackupStatus::Error)
    }

    /// Unix timestamp of the last successful backup
    pub fn backup_last_run(&self) -> Result<Option<i64>> {
        Ok(self
            .get_present(OptionKey::BackupLastRun)?
            .and_then(|v| v.trim().parse().ok()))
    }

    pub fn set_backup_last_run(&self, unix: i64) -> Result<()> {
        self.set(OptionKey::BackupLastRun, unix.to_string())
    }

    pub fn set_backup_info(&self, info: &str) -> Result<()> {
        self.set(OptionKey::BackupInfo, info)
    }

    pub fn backup_credentials(&self) -> Result<Option<BackupCredentials>> {
        let service = self.get_present(OptionKey::BackupService)?;
        let repository_url = self.get_present(OptionKey::BackupRepositoryUrl)?;
        let access_key_id = self.get_present(OptionKey::BackupAccessKeyId)?;
        let secret_access_key = self.get_present(OptionKey::BackupSecretAccessKey)?;

        Ok(match (service, repository_url, access_key_id, secret_access_key) {
            (Some(service), Some(repository_url), Some(access_key_id), Some(secret_access_key)) => {
                Some(BackupCredentials {
                    service,
                    repository_url,
                    access_key_id,
                    secret_access_key,
                })
            }
            _ => None,
        })
    }

    pub fn set_backup_credentials(&self, credentials: &BackupCredentials) -> Result<()> {
        self.set(OptionKey::BackupService, &credentials.service)?;
        self.set(OptionKey::BackupRepositoryUrl, &credentials.repository_url)?;
        self.set(OptionKey::BackupAccessKeyId, &credentials.access_key_id)?;
        self.set(OptionKey::BackupSecretAccessKey, &credentials.secret_access_key)
    }

    pub fn clear_backup_credentials(&self) -> Result<()> {
        for key in [
            OptionKey::BackupService,
            OptionKey::BackupRepositoryUrl,
            OptionKey::BackupAccessKeyId,
            OptionKey::BackupSecretAccessKey,
        ] {
            self.set(key, "")?;
        }
        Ok(())
    }

    // Tunnel

    pub fn tunnel_status(&self) -> Result<Option<TunnelStatus>> {
        self.get_json(OptionKey::TunnelStatus)
    }

    pub fn set_tunnel_status(&self, status: &TunnelStatus) -> Result<()> {
        self.set_json(OptionKey::TunnelStatus, status)
    }

    pub fn set_tunnel_service_active(&self, active: bool) -> Result<()> {
        self.set_bool(OptionKey::TunnelServiceActive, active)
    }

    // Shell

    #[cfg(test)]
    pub fn shell_status(&self) -> Result<Option<ShellStatus>> {
        self.get_json(OptionKey::ShellStatus)
    }

    pub fn set_shell_status(&self, status: &ShellStatus) -> Result<()> {
        self.set_json(OptionKey::ShellStatus, status)
    }

    // Snapshots

    #[cfg(test)]
    pub fn edgeapps(&self) -> Result<Vec<EdgeApp>> {
        Ok(self.get_json(OptionKey::EdgeAppsList)?.unwrap_or_default())
    }

    pub fn set_edgeapps(&self, apps: &[EdgeApp]) -> Result<()> {
        self.set_json(OptionKey::EdgeAppsList, apps)
    }

    pub fn set_storage_devices(&self, devices: &[Device]) -> Result<()> {
        self.set_json(OptionKey::StorageDevicesList, devices)
    }

    pub fn set_system_updates(&self, targets: &[UpdateTarget]) -> Result<()> {
        self.set_json(OptionKey::SystemUpdates, targets)
    }

    pub fn set_updating_system(&self, updating: bool) -> Result<()> {
        self.set_bool(OptionKey::UpdatingSystem, updating)
    }
}
