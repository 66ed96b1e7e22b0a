//! EdgeApp status aggregation
//!
//! An application lives in `<apps_path>/<id>/` and is recognised by its
//! compose file. Its state is derived from live observation every time:
//!
//! ```text
//! .run marker absent            -> not-installed
//! 0 of N services running       -> off
//! N of N services running       -> on
//! anything in between           -> error
//! ```

use crate::runner::{Cmd, CommandRunner};
use anyhow::{Context, Result};
use edgebox_shared::{EdgeApp, EdgeAppService, EdgeAppState};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const COMPOSE_FILE: &str = "edgebox-compose.yml";
pub const MANIFEST_FILE: &str = "edgebox.yml";
/// Present while the application is installed
pub const INSTALL_MARKER: &str = ".run";
/// Present while the application is exposed online; holds `INTERNET_URL`
pub const ONLINE_ENV_FILE: &str = "myedgeapp.env";
/// Operator-set options handed to the application's containers
pub const OPTIONS_ENV_FILE: &str = "edgeapp.env";

#[derive(Debug, Default, Deserialize)]
struct ComposeFile {
    #[serde(default)]
    services: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct Manifest {
    name: Option<String>,
    description: Option<String>,
}

/// Classify an application from its install marker and service counts
pub fn classify(installed: bool, declared: usize, running: usize) -> EdgeAppState {
    if !installed {
        EdgeAppState::NotInstalled
    } else if running == 0 {
        EdgeAppState::Off
    } else if running >= declared {
        EdgeAppState::On
    } else {
        EdgeAppState::Error
    }
}

/// Reads application directories and asks the container runtime what is up
pub struct EdgeAppInspector<'a> {
    apps_path: &'a Path,
    runner: &'a dyn CommandRunner,
}

impl<'a> EdgeAppInspector<'a> {
    pub fn new(apps_path: &'a Path, runner: &'a dyn CommandRunner) -> Self {
        Self { apps_path, runner }
    }

    pub fn app_dir(&self, id: &str) -> PathBuf {
        self.apps_path.join(id)
    }

    pub fn exists(&self, id: &str) -> bool {
        self.app_dir(id).join(COMPOSE_FILE).is_file()
    }

    pub fn is_installed(&self, id: &str) -> bool {
        self.app_dir(id).join(INSTALL_MARKER).exists()
    }

    /// Ids of every known application, sorted
    pub fn list_ids(&self) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(self.apps_path)
            .with_context(|| format!("read apps dir {}", self.apps_path.display()))?;

        let mut ids = vec![];
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().to_string();
            if self.exists(&id) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Service names declared in the compose file
    pub fn declared_services(&self, id: &str) -> Result<Vec<String>> {
        let path = self.app_dir(id).join(COMPOSE_FILE);
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("read {}", path.display()))?;
        let compose: ComposeFile = serde_yaml::from_str(&raw)
            .with_context(|| format!("parse {}", path.display()))?;
        Ok(compose.services.into_keys().collect())
    }

    fn manifest(&self, id: &str) -> Manifest {
        let path = self.app_dir(id).join(MANIFEST_FILE);
        match std::fs::read_to_string(&path) {
            Ok(raw) => serde_yaml::from_str(&raw).unwrap_or_else(|e| {
                warn!("Unreadable manifest {}: {}", path.display(), e);
                Manifest::default()
            }),
            Err(_) => Manifest::default(),
        }
    }

    /// `INTERNET_URL` from the online env file, if the app is exposed
    pub fn internet_url(&self, id: &str) -> Option<String> {
        let path = self.app_dir(id).join(ONLINE_ENV_FILE);
        let iter = dotenvy::from_path_iter(&path).ok()?;
        iter.filter_map(|item| item.ok())
            .find(|(key, _)| key == "INTERNET_URL")
            .map(|(_, value)| value)
            .filter(|value| !value.is_empty())
    }

    async fn is_service_running(&self, id: &str, service: &str) -> bool {
        let container = format!("{}-{}-1", id, service);
        let out = self
            .runner
            .run(&Cmd::new("docker").args(["inspect", "-f", "{{.State.Running}}", container.as_str()]))
            .await;
        out.trim() == "true"
    }

    /// Classification plus the live state of every declared service
    pub async fn compute_status(&self, id: &str) -> Result<(EdgeAppState, Vec<EdgeAppService>)> {
        let installed = self.is_installed(id);
        let declared = self.declared_services(id)?;

        let mut services = Vec::with_capacity(declared.len());
        for name in declared {
            let is_running = installed && self.is_service_running(id, &name).await;
            services.push(EdgeAppService {
                id: name,
                is_running,
            });
        }

        let running = services.iter().filter(|s| s.is_running).count();
        let state = classify(installed, services.len(), running);
        debug!("edgeapp {}: {}/{} running -> {:?}", id, running, services.len(), state);
        Ok((state, services))
    }

    /// Full snapshot of one application
    pub async fn get(&self, id: &str, host: &str) -> Result<EdgeApp> {
        let (state, services) = self.compute_status(id).await?;
        let manifest = self.manifest(id);
        let internet_url = self.internet_url(id);

        Ok(EdgeApp {
            id: id.to_string(),
            name: manifest.name.unwrap_or_else(|| id.to_string()),
            description: manifest.description.unwrap_or_default(),
            status: state.into(),
            services,
            internet_accessible: internet_url.is_some(),
            network_url: format!("{}.{}.local", id, host),
            internet_url,
        })
    }

    /// Snapshot of every readable application; a broken one is logged and left out
    pub async fn list(&self, host: &str) -> Result<Vec<EdgeApp>> {
        let mut apps = vec![];
        for id in self.list_ids()? {
            match self.get(&id, host).await {
                Ok(app) => apps.push(app),
                Err(e) => warn!("Skipping edgeapp {}: {:#}", id, e),
            }
        }
        Ok(apps)
    }
}
