use super::ServiceManager;
use crate::domain::{Service, ServiceConfig, ServiceError, ServiceRuntimeInfo};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Label downstream log/metric routing uses to attribute data to a module.
pub const MODULE_LABEL: &str = "co.elastic.logs/module";

/// How the sidecar finds the monitored service on the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    /// DNS alias on a shared container network
    #[default]
    Alias,
    /// Raw IP address taken from `inspect`
    Ip,
}

impl DiscoveryMode {
    pub fn host_env_key(self) -> &'static str {
        match self {
            Self::Alias => "MONITORED_HOST",
            Self::Ip => "HOST",
        }
    }

    pub fn default_config_dir(self) -> &'static str {
        match self {
            Self::Alias => "configurations",
            Self::Ip => "configs",
        }
    }

    fn mounts_outputs(self) -> bool {
        matches!(self, Self::Ip)
    }

    fn runs_setup(self) -> bool {
        matches!(self, Self::Alias)
    }
}

impl FromStr for DiscoveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "alias" => Ok(Self::Alias),
            "ip" => Ok(Self::Ip),
            other => Err(format!("unknown discovery mode '{other}' (expected alias or ip)")),
        }
    }
}

impl fmt::Display for DiscoveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alias => write!(f, "alias"),
            Self::Ip => write!(f, "ip"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("could not resolve the working directory")]
    Workdir(#[source] std::io::Error),

    #[error("target service {target} is unavailable")]
    Target {
        target: String,
        #[source]
        source: ServiceError,
    },

    #[error("target service {target} is not running")]
    TargetNotRunning { target: String },

    #[error("target service {target} has no network address")]
    NoAddress { target: String },

    #[error("could not declare the sidecar")]
    Build(#[source] ServiceError),

    #[error("could not configure the sidecar")]
    Configure(#[source] ServiceError),

    #[error("could not run {agent} {version} for {target}")]
    Launch {
        agent: String,
        version: String,
        target: String,
        #[source]
        source: ServiceError,
    },
}

/// The post-launch setup command failed. The sidecar itself is running.
#[derive(Debug, Error)]
#[error("setup command failed in {container}")]
pub struct SetupCommandError {
    pub container: String,
    #[source]
    pub source: ServiceError,
}

/// Runtime facts about the monitored service the sidecar configuration is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFacts {
    pub name: String,
    pub version: String,
    pub alias: String,
    pub address: Option<IpAddr>,
}

impl TargetFacts {
    pub fn new(target: &Service, info: &ServiceRuntimeInfo) -> Self {
        Self {
            name: target.name().to_string(),
            version: target.version().to_string(),
            alias: target.network_alias().to_string(),
            address: info.address(),
        }
    }
}

/// `<agent>-<agentVersion>-<targetName>-<targetVersion>`, the name test
/// assertions look for in the output directory.
pub fn output_file_name(agent: &str, agent_version: &str, target: &str, target_version: &str) -> String {
    format!("{agent}-{agent_version}-{target}-{target_version}")
}

/// Sidecar configuration derived from the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarPlan {
    pub config: ServiceConfig,
}

impl SidecarPlan {
    pub fn derive(
        agent: &str,
        agent_version: &str,
        target: &TargetFacts,
        workdir: &Path,
        config_dir: &str,
        mode: DiscoveryMode,
    ) -> Result<Self, LaunchError> {
        let host = match mode {
            DiscoveryMode::Alias => target.alias.clone(),
            DiscoveryMode::Ip => target
                .address
                .ok_or_else(|| LaunchError::NoAddress {
                    target: target.name.clone(),
                })?
                .to_string(),
        };

        let mut bind_mounts = BTreeMap::new();
        let config_file = workdir.join(config_dir).join(format!("{}.yml", target.name));
        bind_mounts.insert(
            config_file.to_string_lossy().into_owned(),
            format!("/usr/share/{agent}/{agent}.yml"),
        );
        if mode.mounts_outputs() {
            bind_mounts.insert(
                workdir.join("outputs").to_string_lossy().into_owned(),
                "/tmp".to_string(),
            );
        }

        let mut env = BTreeMap::new();
        env.insert("BEAT_STRICT_PERMS".to_string(), "false".to_string());
        env.insert(mode.host_env_key().to_string(), host);
        env.insert(
            "FILE_NAME".to_string(),
            output_file_name(agent, agent_version, &target.name, &target.version),
        );

        let mut labels = BTreeMap::new();
        labels.insert(MODULE_LABEL.to_string(), target.name.clone());

        Ok(Self {
            config: ServiceConfig {
                bind_mounts,
                env,
                labels,
            },
        })
    }
}

#[derive(Debug, Clone)]
pub struct LauncherSettings {
    /// Sidecar service name, e.g. `metricbeat`
    pub agent: String,
    /// Base directory for configuration files and outputs. Current directory when unset.
    pub workdir: Option<PathBuf>,
    /// Overrides [`DiscoveryMode::default_config_dir`]
    pub config_dir: Option<String>,
    pub setup_user: String,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            agent: "metricbeat".to_string(),
            workdir: None,
            config_dir: None,
            setup_user: "root".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct LaunchedSidecar {
    pub service: Service,
    /// Set when the post-launch setup command failed
    pub setup_error: Option<SetupCommandError>,
}

/// Launches a sidecar configured from the runtime facts of an already running service.
pub struct DependentServiceLauncher {
    manager: Arc<ServiceManager>,
    settings: LauncherSettings,
}

impl DependentServiceLauncher {
    pub fn new(manager: Arc<ServiceManager>, settings: LauncherSettings) -> Self {
        Self { manager, settings }
    }

    pub fn settings(&self) -> &LauncherSettings {
        &self.settings
    }

    /// Inspects `target`, derives the sidecar configuration, runs it and, in
    /// alias mode, installs index management. Only inspect and run failures
    /// fail the launch.
    pub fn launch(
        &self,
        version: &str,
        target: &Service,
        mode: DiscoveryMode,
    ) -> Result<LaunchedSidecar, LaunchError> {
        let agent = self.settings.agent.as_str();
        let target_name = target.name().to_string();

        let info = target.inspect().map_err(|source| LaunchError::Target {
            target: target_name.clone(),
            source,
        })?;
        if !info.running {
            return Err(LaunchError::TargetNotRunning {
                target: target_name,
            });
        }

        let workdir = self.workdir()?;
        let config_dir = self
            .settings
            .config_dir
            .as_deref()
            .unwrap_or(mode.default_config_dir());
        let facts = TargetFacts::new(target, &info);
        let plan = SidecarPlan::derive(agent, version, &facts, &workdir, config_dir, mode)?;

        debug!(
            version,
            service = %target_name,
            discovery = %mode,
            "Derived sidecar configuration"
        );

        let mut service = self
            .manager
            .build(agent, version, false)
            .map_err(LaunchError::Build)?;

        let ServiceConfig {
            bind_mounts,
            env,
            labels,
        } = plan.config;
        service
            .set_bind_mounts(bind_mounts)
            .map_err(LaunchError::Configure)?;
        service.set_env(env).map_err(LaunchError::Configure)?;
        service.set_labels(labels).map_err(LaunchError::Configure)?;

        service.run().map_err(|source| LaunchError::Launch {
            agent: agent.to_string(),
            version: version.to_string(),
            target: target_name.clone(),
            source,
        })?;

        info!(
            agent,
            version,
            service = %target_name,
            service_version = target.version(),
            "Agent is running configured for the service"
        );

        let setup_error = if mode.runs_setup() {
            self.setup(&service, version, &target_name).err()
        } else {
            None
        };

        Ok(LaunchedSidecar {
            service,
            setup_error,
        })
    }

    fn setup(&self, service: &Service, version: &str, target: &str) -> Result<(), SetupCommandError> {
        let agent = self.settings.agent.as_str();
        let args = vec![
            agent.to_string(),
            "setup".to_string(),
            "--index-management".to_string(),
        ];

        debug!(version, service = target, "Installing Kibana dashboards");

        match service.exec(&self.settings.setup_user, &args) {
            Ok(_) => {
                debug!(version, service = target, "Kibana dashboards installed");
                Ok(())
            }
            Err(source) => {
                let err = SetupCommandError {
                    container: service.container_name().to_string(),
                    source,
                };
                warn!(
                    agent,
                    version,
                    service = target,
                    error = %err,
                    "Setup command failed, agent keeps running"
                );
                Err(err)
            }
        }
    }

    /// Configured workdir, resolved against the current directory when relative.
    fn workdir(&self) -> Result<PathBuf, LaunchError> {
        match &self.settings.workdir {
            Some(dir) if dir.is_absolute() => Ok(dir.clone()),
            Some(dir) => Ok(std::env::current_dir()
                .map_err(LaunchError::Workdir)?
                .join(dir)),
            None => std::env::current_dir().map_err(LaunchError::Workdir),
        }
    }
}
