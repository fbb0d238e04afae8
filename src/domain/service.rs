use super::error::ServiceError;
use super::traits::{ContainerHandle, ContainerRuntime, RunRequest, ServiceRuntimeInfo};
use anyhow::anyhow;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Declared,
    Configured,
    Running,
    Terminated,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Declared => write!(f, "declared"),
            Self::Configured => write!(f, "configured"),
            Self::Running => write!(f, "running"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Immutable identity of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub version: String,
    pub image: String,
    pub container_name: String,
    pub daemon: bool,
    pub network_alias: Option<String>,
}

impl ServiceSpec {
    /// `<image>:<version>`
    pub fn image_reference(&self) -> String {
        format!("{}:{}", self.image, self.version)
    }
}

/// Bind mounts, environment and labels applied when the container is created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceConfig {
    pub bind_mounts: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), String> {
        let mut targets = HashSet::new();

        for (host, container) in &self.bind_mounts {
            if !Path::new(host).is_absolute() {
                return Err(format!("bind mount source '{host}' is not an absolute path"));
            }
            if !container.starts_with('/') {
                return Err(format!(
                    "bind mount target '{container}' is not an absolute path"
                ));
            }
            if !targets.insert(container.as_str()) {
                return Err(format!("bind mount target '{container}' is mounted twice"));
            }
        }

        for (kind, map) in [("environment variable", &self.env), ("label", &self.labels)] {
            for key in map.keys() {
                if key.trim().is_empty() {
                    return Err(format!("empty {kind} name"));
                }
                if key.contains('=') {
                    return Err(format!("{kind} name '{key}' contains '='"));
                }
            }
        }

        Ok(())
    }
}

/// A containerized service and its lifecycle.
///
/// `Declared -> Configured -> Running -> Terminated`. A failed [`Service::run`]
/// leaves the state untouched, nothing leaves `Terminated`.
#[derive(Debug)]
pub struct Service {
    spec: ServiceSpec,
    config: ServiceConfig,
    state: ServiceState,
    handle: Option<ContainerHandle>,
    network: Option<String>,
    runtime: Arc<dyn ContainerRuntime>,
}

impl Service {
    pub fn new(spec: ServiceSpec, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            spec,
            config: ServiceConfig::default(),
            state: ServiceState::Declared,
            handle: None,
            network: None,
            runtime,
        }
    }

    /// Wraps a container that is already running and owned elsewhere.
    pub fn attached(
        spec: ServiceSpec,
        handle: ContainerHandle,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        Self {
            state: ServiceState::Running,
            handle: Some(handle),
            ..Self::new(spec, runtime)
        }
    }

    /// Network the container joins on `run`.
    pub fn with_network(mut self, network: Option<String>) -> Self {
        self.network = network;
        self
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn version(&self) -> &str {
        &self.spec.version
    }

    pub fn container_name(&self) -> &str {
        &self.spec.container_name
    }

    pub fn image(&self) -> &str {
        &self.spec.image
    }

    pub fn image_reference(&self) -> String {
        self.spec.image_reference()
    }

    pub fn is_daemon(&self) -> bool {
        self.spec.daemon
    }

    pub fn network_alias(&self) -> &str {
        self.spec.network_alias.as_deref().unwrap_or(&self.spec.name)
    }

    pub fn spec(&self) -> &ServiceSpec {
        &self.spec
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn handle(&self) -> Option<&ContainerHandle> {
        self.handle.as_ref()
    }

    pub fn bind_mounts(&self) -> &BTreeMap<String, String> {
        &self.config.bind_mounts
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.config.env
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.config.labels
    }

    pub fn set_bind_mounts(&mut self, mounts: BTreeMap<String, String>) -> Result<(), ServiceError> {
        self.ensure_configurable("set bind mounts on")?;
        self.config.bind_mounts = mounts;
        self.state = ServiceState::Configured;
        Ok(())
    }

    pub fn set_env(&mut self, env: BTreeMap<String, String>) -> Result<(), ServiceError> {
        self.ensure_configurable("set environment on")?;
        self.config.env = env;
        self.state = ServiceState::Configured;
        Ok(())
    }

    pub fn set_labels(&mut self, labels: BTreeMap<String, String>) -> Result<(), ServiceError> {
        self.ensure_configurable("set labels on")?;
        self.config.labels = labels;
        self.state = ServiceState::Configured;
        Ok(())
    }

    /// Creates and starts the container in a single runtime call.
    pub fn run(&mut self) -> Result<&ContainerHandle, ServiceError> {
        self.ensure_configurable("run")?;

        self.config
            .validate()
            .map_err(|reason| ServiceError::InvalidConfig {
                container: self.spec.container_name.clone(),
                reason,
            })?;

        let request = RunRequest {
            container_name: &self.spec.container_name,
            image: self.spec.image_reference(),
            daemon: self.spec.daemon,
            network: self.network.as_deref(),
            network_alias: self.spec.network_alias.as_deref(),
            bind_mounts: &self.config.bind_mounts,
            env: &self.config.env,
            labels: &self.config.labels,
        };

        debug!(
            container = %self.spec.container_name,
            image = %request.image,
            mounts = request.bind_mounts.len(),
            "Starting container"
        );

        let handle = match self.runtime.run(&request) {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                return Err(ServiceError::Launch {
                    container: self.spec.container_name.clone(),
                    source: anyhow!("runtime reported success without a container handle"),
                });
            }
            Err(source) => {
                return Err(ServiceError::Launch {
                    container: self.spec.container_name.clone(),
                    source,
                });
            }
        };

        info!(container = %handle, "Container started");
        self.state = ServiceState::Running;
        Ok(self.handle.insert(handle))
    }

    pub fn inspect(&self) -> Result<ServiceRuntimeInfo, ServiceError> {
        let handle = self.running_handle()?;

        self.runtime
            .inspect(handle)
            .map_err(|source| ServiceError::Inspect {
                container: self.spec.container_name.clone(),
                source,
            })
    }

    pub fn exec(&self, user: &str, args: &[String]) -> Result<String, ServiceError> {
        let handle = self.running_handle()?;

        debug!(container = %handle, user, command = ?args, "Executing command");

        self.runtime
            .exec(handle, user, args)
            .map_err(|source| ServiceError::Exec {
                container: self.spec.container_name.clone(),
                command: args.join(" "),
                source,
            })
    }

    pub fn stop(&mut self) -> Result<(), ServiceError> {
        let handle = self.running_handle()?;

        self.runtime
            .stop(handle)
            .map_err(|source| ServiceError::Stop {
                container: self.spec.container_name.clone(),
                source,
            })?;

        info!(container = %self.spec.container_name, "Container stopped");
        self.handle = None;
        self.state = ServiceState::Terminated;
        Ok(())
    }

    fn running_handle(&self) -> Result<&ContainerHandle, ServiceError> {
        match (&self.state, &self.handle) {
            (ServiceState::Running, Some(handle)) => Ok(handle),
            _ => Err(ServiceError::NotRunning {
                container: self.spec.container_name.clone(),
            }),
        }
    }

    fn ensure_configurable(&self, operation: &'static str) -> Result<(), ServiceError> {
        match self.state {
            ServiceState::Declared | ServiceState::Configured => Ok(()),
            state => Err(ServiceError::InvalidState {
                container: self.spec.container_name.clone(),
                operation,
                state,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockRuntime;

    fn spec() -> ServiceSpec {
        ServiceSpec {
            name: "metricbeat".to_string(),
            version: "8.0.0".to_string(),
            image: "docker.elastic.co/beats/metricbeat".to_string(),
            container_name: "metricbeat-8.0.0-1".to_string(),
            daemon: false,
            network_alias: None,
        }
    }

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_setters_replace_instead_of_merge() {
        let mock = Arc::new(MockRuntime::new());
        let mut service = Service::new(spec(), mock);

        service.set_env(map(&[("A", "1"), ("B", "2")])).unwrap();
        service.set_env(map(&[("C", "3")])).unwrap();

        assert_eq!(service.env(), &map(&[("C", "3")]));
        assert_eq!(service.state(), ServiceState::Configured);
    }

    #[test]
    fn test_run_records_handle_and_passes_configuration() {
        let mock = Arc::new(MockRuntime::new());
        let mut service = Service::new(spec(), mock.clone());

        service
            .set_bind_mounts(map(&[("/work/configs/nginx.yml", "/usr/share/metricbeat/metricbeat.yml")]))
            .unwrap();
        service.set_labels(map(&[("co.elastic.logs/module", "nginx")])).unwrap();

        let handle = service.run().unwrap().clone();

        assert_eq!(handle.name, "metricbeat-8.0.0-1");
        assert_eq!(service.state(), ServiceState::Running);
        assert_eq!(service.handle(), Some(&handle));

        let started = mock.get_run("metricbeat-8.0.0-1").unwrap();
        assert_eq!(started.image, "docker.elastic.co/beats/metricbeat:8.0.0");
        assert_eq!(
            started.labels.get("co.elastic.logs/module").map(String::as_str),
            Some("nginx")
        );
    }

    #[test]
    fn test_run_failure_keeps_service_configured() {
        let mock = Arc::new(MockRuntime::new());
        mock.set_fail_on("run");
        let mut service = Service::new(spec(), mock.clone());
        service.set_env(map(&[("A", "1")])).unwrap();

        let err = service.run().unwrap_err();

        assert!(matches!(err, ServiceError::Launch { .. }));
        assert_eq!(service.state(), ServiceState::Configured);
        assert!(service.handle().is_none());

        // The caller may retry once the runtime recovers.
        mock.clear_fail_on();
        assert!(service.run().is_ok());
    }

    #[test]
    fn test_run_without_handle_is_a_launch_error() {
        let mock = Arc::new(MockRuntime::new());
        mock.set_return_no_handle(true);
        let mut service = Service::new(spec(), mock);

        let err = service.run().unwrap_err();

        assert!(matches!(err, ServiceError::Launch { .. }));
        assert!(service.handle().is_none());
        assert_eq!(service.state(), ServiceState::Declared);
    }

    #[test]
    fn test_setters_rejected_once_running() {
        let mock = Arc::new(MockRuntime::new());
        let mut service = Service::new(spec(), mock);
        service.run().unwrap();

        let err = service.set_labels(BTreeMap::new()).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::InvalidState {
                state: ServiceState::Running,
                ..
            }
        ));
        assert!(matches!(service.run(), Err(ServiceError::InvalidState { .. })));
    }

    #[test]
    fn test_invalid_mount_never_reaches_runtime() {
        let mock = Arc::new(MockRuntime::new());
        let mut service = Service::new(spec(), mock.clone());
        service
            .set_bind_mounts(map(&[("configs/nginx.yml", "/usr/share/metricbeat/metricbeat.yml")]))
            .unwrap();

        let err = service.run().unwrap_err();

        assert!(matches!(err, ServiceError::InvalidConfig { .. }));
        assert!(mock.get_commands().is_empty());
    }

    #[test]
    fn test_validate_rejects_bad_keys_and_duplicate_targets() {
        let config = ServiceConfig {
            bind_mounts: map(&[("/a", "/tmp"), ("/b", "/tmp")]),
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().contains("mounted twice"));

        let config = ServiceConfig {
            env: map(&[("A=B", "1")]),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ServiceConfig {
            labels: map(&[(" ", "x")]),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inspect_and_exec_require_running() {
        let mock = Arc::new(MockRuntime::new());
        let service = Service::new(spec(), mock.clone());

        assert!(matches!(service.inspect(), Err(ServiceError::NotRunning { .. })));
        assert!(matches!(
            service.exec("root", &["true".to_string()]),
            Err(ServiceError::NotRunning { .. })
        ));
        assert!(mock.get_commands().is_empty());
    }

    #[test]
    fn test_stop_terminates_for_good() {
        let mock = Arc::new(MockRuntime::new());
        let mut service = Service::new(spec(), mock.clone());
        service.run().unwrap();

        service.stop().unwrap();

        assert_eq!(service.state(), ServiceState::Terminated);
        assert!(service.handle().is_none());
        assert!(matches!(service.stop(), Err(ServiceError::NotRunning { .. })));
        assert!(matches!(service.run(), Err(ServiceError::InvalidState { .. })));
        assert!(matches!(service.inspect(), Err(ServiceError::NotRunning { .. })));
        assert_eq!(service.name(), "metricbeat");
        assert!(mock.get_commands().contains(&"stop:metricbeat-8.0.0-1".to_string()));
    }

    #[test]
    fn test_stop_failure_keeps_running() {
        let mock = Arc::new(MockRuntime::new());
        let mut service = Service::new(spec(), mock.clone());
        service.run().unwrap();
        mock.set_fail_on("stop");

        assert!(matches!(service.stop(), Err(ServiceError::Stop { .. })));
        assert_eq!(service.state(), ServiceState::Running);
    }

    #[test]
    fn test_network_alias_defaults_to_name() {
        let mock = Arc::new(MockRuntime::new());
        let service = Service::new(spec(), mock.clone());
        assert_eq!(service.network_alias(), "metricbeat");

        let aliased = Service::new(
            ServiceSpec {
                network_alias: Some("web-1".to_string()),
                ..spec()
            },
            mock,
        );
        assert_eq!(aliased.network_alias(), "web-1");
    }
}
