use crate::domain::traits::NetworkEndpoint;
use crate::domain::{ContainerHandle, ContainerRuntime, RunRequest, ServiceRuntimeInfo};
use crate::services::TokenSource;
use anyhow::{Result, bail};
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Owned copy of a [`RunRequest`] seen by the mock.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct MockRun {
    pub image: String,
    pub daemon: bool,
    pub network: Option<String>,
    pub network_alias: Option<String>,
    pub bind_mounts: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug)]
pub struct MockRuntime {
    runs: RwLock<HashMap<String, MockRun>>,
    inspections: RwLock<HashMap<String, ServiceRuntimeInfo>>,
    commands: RwLock<Vec<String>>,
    fail_on: RwLock<Option<String>>,
    no_handle: RwLock<bool>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            inspections: RwLock::new(HashMap::new()),
            commands: RwLock::new(Vec::new()),
            fail_on: RwLock::new(None),
            no_handle: RwLock::new(false),
        }
    }

    /// Facts returned by `inspect` for the given container name.
    pub fn set_inspect_info(&self, name: &str, info: ServiceRuntimeInfo) {
        self.inspections
            .write()
            .unwrap()
            .insert(name.to_string(), info);
    }

    /// Shorthand for a running container reachable at `ip` on `network`.
    pub fn set_address(&self, name: &str, network: &str, ip: IpAddr, aliases: &[&str]) {
        let mut networks = BTreeMap::new();
        networks.insert(
            network.to_string(),
            NetworkEndpoint {
                ip_address: Some(ip),
                aliases: aliases.iter().map(|a| a.to_string()).collect(),
            },
        );
        self.set_inspect_info(
            name,
            ServiceRuntimeInfo {
                container_id: format!("{name}-id"),
                running: true,
                ip_address: None,
                networks,
            },
        );
    }

    pub fn set_fail_on(&self, operation: &str) {
        *self.fail_on.write().unwrap() = Some(operation.to_string());
    }

    pub fn clear_fail_on(&self) {
        *self.fail_on.write().unwrap() = None;
    }

    /// Makes `run` report success without a handle.
    pub fn set_return_no_handle(&self, enabled: bool) {
        *self.no_handle.write().unwrap() = enabled;
    }

    pub fn get_commands(&self) -> Vec<String> {
        self.commands.read().unwrap().clone()
    }

    pub fn get_run(&self, name: &str) -> Option<MockRun> {
        self.runs.read().unwrap().get(name).cloned()
    }

    pub fn run_count(&self) -> usize {
        self.runs.read().unwrap().len()
    }

    fn record_command(&self, cmd: &str) {
        self.commands.write().unwrap().push(cmd.to_string());
    }

    fn check_fail(&self, operation: &str) -> Result<()> {
        if let Some(ref fail_on) = *self.fail_on.read().unwrap() {
            if fail_on == operation {
                bail!("Mock failure on: {}", operation);
            }
        }
        Ok(())
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerRuntime for MockRuntime {
    fn run(&self, request: &RunRequest) -> Result<Option<ContainerHandle>> {
        self.record_command(&format!("run:{}", request.container_name));
        self.check_fail("run")?;

        if *self.no_handle.read().unwrap() {
            return Ok(None);
        }

        self.runs.write().unwrap().insert(
            request.container_name.to_string(),
            MockRun {
                image: request.image.clone(),
                daemon: request.daemon,
                network: request.network.map(str::to_string),
                network_alias: request.network_alias.map(str::to_string),
                bind_mounts: request.bind_mounts.clone(),
                env: request.env.clone(),
                labels: request.labels.clone(),
            },
        );

        Ok(Some(ContainerHandle::new(
            format!("{}-id", request.container_name),
            request.container_name,
        )))
    }

    fn inspect(&self, handle: &ContainerHandle) -> Result<ServiceRuntimeInfo> {
        self.record_command(&format!("inspect:{}", handle.name));
        self.check_fail("inspect")?;

        let info = self
            .inspections
            .read()
            .unwrap()
            .get(&handle.name)
            .cloned()
            .unwrap_or_else(|| ServiceRuntimeInfo {
                container_id: handle.id.clone(),
                running: true,
                ..Default::default()
            });

        Ok(info)
    }

    fn exec(&self, handle: &ContainerHandle, user: &str, args: &[String]) -> Result<String> {
        self.record_command(&format!("exec:{}:{}:{}", handle.name, user, args.join(" ")));
        self.check_fail("exec")?;
        Ok(String::new())
    }

    fn stop(&self, handle: &ContainerHandle) -> Result<()> {
        self.record_command(&format!("stop:{}", handle.name));
        self.check_fail("stop")?;

        if let Some(info) = self.inspections.write().unwrap().get_mut(&handle.name) {
            info.running = false;
        }
        Ok(())
    }
}

/// Deterministic container name tokens: `1`, `2`, `3`, ...
#[derive(Debug, Default)]
pub struct SequenceTokens {
    next: AtomicU64,
}

impl SequenceTokens {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenSource for SequenceTokens {
    fn next_token(&self) -> String {
        (self.next.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }
}
