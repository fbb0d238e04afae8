use crate::services::{DiscoveryMode, LauncherSettings};
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_CONFIG_TOML_NAME: &str = "beatrunner.toml";
pub const DEFAULT_RUNTIME_BINARY: &str = "docker";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

pub fn default_config_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/root"))
        .join(".config/beatrunner")
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct RuntimeConfig {
    /// `docker` or `podman`
    pub binary: Option<String>,
    /// Deadline for every runtime call, e.g. "90s" or "2m"
    pub timeout: Option<String>,
    pub network: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct LauncherConfig {
    pub agent: Option<String>,
    pub workdir: Option<PathBuf>,
    pub config_dir: Option<String>,
    pub setup_user: Option<String>,
    pub discovery: Option<DiscoveryMode>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub launcher: LauncherConfig,
    /// Image overrides keyed by service name
    #[serde(default)]
    pub images: BTreeMap<String, String>,
}

impl AppConfig {
    /// Merges another AppConfig into self.
    /// Values from `other` overwrite values in `self` if present.
    pub fn merge(&mut self, other: AppConfig) {
        if let Some(binary) = other.runtime.binary {
            self.runtime.binary = Some(binary);
        }
        if let Some(timeout) = other.runtime.timeout {
            self.runtime.timeout = Some(timeout);
        }
        if let Some(network) = other.runtime.network {
            self.runtime.network = Some(network);
        }
        if let Some(agent) = other.launcher.agent {
            self.launcher.agent = Some(agent);
        }
        if let Some(workdir) = other.launcher.workdir {
            self.launcher.workdir = Some(workdir);
        }
        if let Some(dir) = other.launcher.config_dir {
            self.launcher.config_dir = Some(dir);
        }
        if let Some(user) = other.launcher.setup_user {
            self.launcher.setup_user = Some(user);
        }
        if let Some(discovery) = other.launcher.discovery {
            self.launcher.discovery = Some(discovery);
        }

        self.images.extend(other.images);
    }

    pub fn runtime_binary(&self) -> &str {
        self.runtime
            .binary
            .as_deref()
            .unwrap_or(DEFAULT_RUNTIME_BINARY)
    }

    pub fn runtime_timeout(&self) -> Result<Duration> {
        match &self.runtime.timeout {
            Some(raw) => parse_duration(raw),
            None => Ok(DEFAULT_TIMEOUT),
        }
    }

    pub fn discovery(&self) -> DiscoveryMode {
        self.launcher.discovery.unwrap_or_default()
    }

    pub fn launcher_settings(&self) -> LauncherSettings {
        let defaults = LauncherSettings::default();
        LauncherSettings {
            agent: self.launcher.agent.clone().unwrap_or(defaults.agent),
            workdir: self
                .launcher
                .workdir
                .as_ref()
                .map(|dir| PathBuf::from(shellexpand::tilde(&dir.to_string_lossy()).into_owned())),
            config_dir: self.launcher.config_dir.clone(),
            setup_user: self
                .launcher
                .setup_user
                .clone()
                .unwrap_or(defaults.setup_user),
        }
    }
}

fn read_config(path: &Path) -> Result<AppConfig> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading config at {:?}", path))?;
    toml::from_str(&content).with_context(|| format!("parsing config at {:?}", path))
}

/// Loads `beatrunner.toml` from `config_dir`, then merges one from the current
/// directory over it. Missing files fall back to defaults.
pub fn load_app_config(config_dir: &Path) -> Result<AppConfig> {
    let mut app_config = AppConfig::default();

    let global_config_path = config_dir.join(DEFAULT_CONFIG_TOML_NAME);
    if global_config_path.exists() {
        debug!("Loading config from {:?}", global_config_path);
        app_config = read_config(&global_config_path)?;
    }

    let local_config_path = PathBuf::from("./").join(DEFAULT_CONFIG_TOML_NAME);
    if local_config_path.exists() && local_config_path != global_config_path {
        debug!("Merging local config {:?}", local_config_path);
        app_config.merge(read_config(&local_config_path)?);
    }

    Ok(app_config)
}

/// Parses "<n>ms", "<n>s" or "<n>m". Zero is rejected.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let duration = if let Some(stripped) = s.strip_suffix("ms") {
        let millis: u64 = stripped.parse()?;
        Duration::from_millis(millis)
    } else if let Some(stripped) = s.strip_suffix('s') {
        let secs: u64 = stripped.parse()?;
        Duration::from_secs(secs)
    } else if let Some(stripped) = s.strip_suffix('m') {
        let mins: u64 = stripped.parse()?;
        let secs = mins
            .checked_mul(60)
            .with_context(|| format!("duration out of range: {}", s))?;
        Duration::from_secs(secs)
    } else {
        bail!("invalid duration: {}", s)
    };

    if duration.is_zero() {
        bail!("duration must be greater than zero: {}", s);
    }
    Ok(duration)
}
