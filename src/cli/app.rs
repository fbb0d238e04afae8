use crate::domain::ContainerRuntime;
use crate::infra::CliRuntime;
use crate::infra::config::{AppConfig, load_app_config};
use crate::services::{DependentServiceLauncher, LauncherSettings, ServiceManager};
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Wiring shared by every command: loaded config plus a service manager
/// bound to one container runtime.
pub struct App {
    config: AppConfig,
    manager: Arc<ServiceManager>,
}

impl App {
    pub fn new(config_dir: &Path) -> Result<Self> {
        let config = load_app_config(config_dir)?;
        let runtime = Arc::new(CliRuntime::new(
            config.runtime_binary(),
            config.runtime_timeout()?,
        ));
        debug!(
            binary = runtime.binary(),
            timeout = ?runtime.timeout(),
            "Using container runtime"
        );
        Ok(Self::with_runtime(config, runtime))
    }

    pub fn with_runtime(config: AppConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        let manager = ServiceManager::new(runtime)
            .with_images(config.images.clone())
            .with_network(config.runtime.network.clone());

        Self {
            config,
            manager: Arc::new(manager),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn manager(&self) -> &ServiceManager {
        &self.manager
    }

    pub fn launcher(&self, settings: LauncherSettings) -> DependentServiceLauncher {
        DependentServiceLauncher::new(self.manager.clone(), settings)
    }
}
