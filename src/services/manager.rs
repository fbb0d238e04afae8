use super::token::{ClockTokens, TokenSource};
use crate::domain::{ContainerHandle, ContainerRuntime, Service, ServiceError, ServiceSpec};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

const ELASTIC_REGISTRY: &str = "docker.elastic.co/beats";
const ELASTIC_BEATS: &[&str] = &[
    "auditbeat",
    "filebeat",
    "heartbeat",
    "metricbeat",
    "packetbeat",
];

/// Builds services with deterministic identity fields.
#[derive(Debug)]
pub struct ServiceManager {
    runtime: Arc<dyn ContainerRuntime>,
    tokens: Arc<dyn TokenSource>,
    images: BTreeMap<String, String>,
    network: Option<String>,
}

impl ServiceManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            tokens: Arc::new(ClockTokens),
            images: BTreeMap::new(),
            network: None,
        }
    }

    pub fn with_token_source(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = tokens;
        self
    }

    /// Image overrides keyed by service name
    pub fn with_images(mut self, images: BTreeMap<String, String>) -> Self {
        self.images = images;
        self
    }

    pub fn with_network(mut self, network: Option<String>) -> Self {
        self.network = network;
        self
    }

    pub fn runtime(&self) -> Arc<dyn ContainerRuntime> {
        self.runtime.clone()
    }

    /// Image reference, without tag, for a service name.
    pub fn image_for(&self, name: &str) -> String {
        if let Some(image) = self.images.get(name) {
            return image.clone();
        }
        if ELASTIC_BEATS.contains(&name) {
            return format!("{ELASTIC_REGISTRY}/{name}");
        }
        name.to_string()
    }

    /// Declares a new service. No I/O happens here.
    pub fn build(&self, name: &str, version: &str, daemon: bool) -> Result<Service, ServiceError> {
        let spec = ServiceSpec {
            container_name: format!("{name}-{version}-{}", self.tokens.next_token()),
            ..self.declare(name, version, daemon)?
        };

        debug!(
            service = name,
            version,
            container = %spec.container_name,
            "Service declared"
        );

        Ok(Service::new(spec, self.runtime.clone()).with_network(self.network.clone()))
    }

    /// Wraps a container that something else already started.
    pub fn attach(
        &self,
        name: &str,
        version: &str,
        container: &str,
        alias: Option<&str>,
    ) -> Result<Service, ServiceError> {
        if container.trim().is_empty() {
            return Err(ServiceError::InvalidSpec(
                "container name must not be empty".to_string(),
            ));
        }

        let spec = ServiceSpec {
            container_name: container.to_string(),
            network_alias: alias.map(str::to_string),
            ..self.declare(name, version, true)?
        };
        let handle = ContainerHandle::new(container, container);

        Ok(Service::attached(spec, handle, self.runtime.clone()))
    }

    fn declare(&self, name: &str, version: &str, daemon: bool) -> Result<ServiceSpec, ServiceError> {
        if name.trim().is_empty() {
            return Err(ServiceError::InvalidSpec(
                "service name must not be empty".to_string(),
            ));
        }
        if version.trim().is_empty() {
            return Err(ServiceError::InvalidSpec(format!(
                "version of {name} must not be empty"
            )));
        }

        Ok(ServiceSpec {
            name: name.to_string(),
            version: version.to_string(),
            image: self.image_for(name),
            container_name: String::new(),
            daemon,
            network_alias: None,
        })
    }
}
