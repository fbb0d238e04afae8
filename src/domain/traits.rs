use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::net::IpAddr;

/// Opaque reference to a container started (or attached to) by a [`Service`](super::Service).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
}

impl ContainerHandle {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Identifier passed to the runtime CLI. Names are stable across
    /// restarts, ids are not always known (attached containers).
    pub fn reference(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.id == self.name {
            write!(f, "{}", self.name)
        } else {
            let short = self.id.get(..12).unwrap_or(&self.id);
            write!(f, "{} ({short})", self.name)
        }
    }
}

/// Everything the runtime needs to materialize a container in one call.
#[derive(Debug, Clone)]
pub struct RunRequest<'a> {
    pub container_name: &'a str,
    pub image: String,
    pub daemon: bool,
    pub network: Option<&'a str>,
    pub network_alias: Option<&'a str>,
    pub bind_mounts: &'a BTreeMap<String, String>,
    pub env: &'a BTreeMap<String, String>,
    pub labels: &'a BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkEndpoint {
    pub ip_address: Option<IpAddr>,
    pub aliases: Vec<String>,
}

/// Live facts about a running container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceRuntimeInfo {
    pub container_id: String,
    pub running: bool,
    pub ip_address: Option<IpAddr>,
    pub networks: BTreeMap<String, NetworkEndpoint>,
}

impl ServiceRuntimeInfo {
    /// The default bridge address, or the first network address when the
    /// container only lives on user-defined networks.
    pub fn address(&self) -> Option<IpAddr> {
        self.ip_address
            .or_else(|| self.networks.values().find_map(|n| n.ip_address))
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.networks
            .values()
            .flat_map(|n| n.aliases.iter().map(String::as_str))
    }
}

/// Trait for the container runtime collaborator.
///
/// Every call is blocking and may take seconds. Implementations are expected
/// to bound each call with their own deadline.
pub trait ContainerRuntime: Send + Sync + Debug {
    /// Create and start a container. `Ok(None)` means the runtime reported
    /// success without identifying the container.
    fn run(&self, request: &RunRequest) -> Result<Option<ContainerHandle>>;

    /// Query live facts for a container
    fn inspect(&self, handle: &ContainerHandle) -> Result<ServiceRuntimeInfo>;

    /// Execute a command inside a container as `user`, returning its stdout
    fn exec(&self, handle: &ContainerHandle, user: &str, args: &[String]) -> Result<String>;

    /// Stop a container
    fn stop(&self, handle: &ContainerHandle) -> Result<()>;
}
