use crate::domain::{
    ContainerHandle, ContainerRuntime, NetworkEndpoint, RunRequest, ServiceRuntimeInfo,
};
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Read;
use std::net::IpAddr;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Drives the `docker` or `podman` CLI. Every invocation is bounded by `timeout`.
#[derive(Debug, Clone)]
pub struct CliRuntime {
    binary: String,
    timeout: Duration,
}

impl CliRuntime {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Arguments for a detached `run` of the request.
    pub fn run_args(request: &RunRequest) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--name".into(),
            request.container_name.into(),
        ];

        if request.daemon {
            args.push("--restart".into());
            args.push("unless-stopped".into());
        }
        if let Some(net) = request.network {
            args.push("--network".into());
            args.push(net.into());

            if let Some(alias) = request.network_alias {
                args.push("--network-alias".into());
                args.push(alias.into());
            }
        }

        for (host, container) in request.bind_mounts {
            args.push("-v".into());
            args.push(format!("{host}:{container}"));
        }

        for (key, value) in request.env {
            args.push("-e".into());
            args.push(format!("{key}={value}"));
        }

        for (key, value) in request.labels {
            args.push("-l".into());
            args.push(format!("{key}={value}"));
        }

        args.push(request.image.clone());
        args
    }

    pub fn remove_args(container_name: &str) -> Vec<String> {
        vec!["rm".into(), "-f".into(), container_name.into()]
    }

    /// Best-effort removal of a container a failed or timed-out `run` may
    /// have created, so the name is free again.
    fn remove_leftover(&self, container_name: &str) {
        let args = Self::remove_args(container_name);
        match self.invoke(&args, &format!("removing container {container_name}")) {
            Ok(_) => warn!(container = container_name, "Removed container left by a failed run"),
            Err(e) => warn!(
                container = container_name,
                error = %e,
                "Could not remove container left by a failed run"
            ),
        }
    }

    /// Runs the CLI and returns its stdout, failing on non-zero exit or when
    /// the deadline passes (the child is killed).
    fn invoke(&self, args: &[String], context: &str) -> Result<String> {
        debug!(binary = %self.binary, ?args, "Invoking container runtime");

        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawning {} ({context})", self.binary))?;

        let mut stdout = child.stdout.take().context("capturing stdout")?;
        let mut stderr = child.stderr.take().context("capturing stderr")?;
        let out_reader = thread::spawn(move || {
            let mut buf = String::new();
            let _ = stdout.read_to_string(&mut buf);
            buf
        });
        let err_reader = thread::spawn(move || {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf);
            buf
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child
                .try_wait()
                .with_context(|| format!("waiting on {} ({context})", self.binary))?
            {
                Some(status) => break status,
                None if Instant::now() >= deadline => {
                    warn!(binary = %self.binary, "Runtime call timed out, killing it ({context})");
                    let _ = child.kill();
                    let _ = child.wait();
                    bail!(
                        "{} timed out after {:?} ({context})",
                        self.binary,
                        self.timeout
                    );
                }
                None => thread::sleep(POLL_INTERVAL),
            }
        };

        let out = out_reader.join().unwrap_or_default();
        let err = err_reader.join().unwrap_or_default();

        if !status.success() {
            bail!(
                "{} returned status {:?} ({context}): {}",
                self.binary,
                status.code(),
                err.trim()
            );
        }

        Ok(out)
    }
}

impl Default for CliRuntime {
    fn default() -> Self {
        Self::new("docker", Duration::from_secs(120))
    }
}

impl ContainerRuntime for CliRuntime {
    fn run(&self, request: &RunRequest) -> Result<Option<ContainerHandle>> {
        let args = Self::run_args(request);
        let out = match self.invoke(
            &args,
            &format!("running container {}", request.container_name),
        ) {
            Ok(out) => out,
            Err(e) => {
                self.remove_leftover(request.container_name);
                return Err(e);
            }
        };

        let id = out.lines().last().unwrap_or_default().trim();
        if id.is_empty() {
            self.remove_leftover(request.container_name);
            return Ok(None);
        }

        Ok(Some(ContainerHandle::new(id, request.container_name)))
    }

    fn inspect(&self, handle: &ContainerHandle) -> Result<ServiceRuntimeInfo> {
        let args = vec![
            "container".to_string(),
            "inspect".to_string(),
            handle.reference().to_string(),
        ];
        let out = self.invoke(&args, &format!("inspecting container {handle}"))?;

        parse_inspect(&out).with_context(|| format!("reading inspect output of {handle}"))
    }

    fn exec(&self, handle: &ContainerHandle, user: &str, args: &[String]) -> Result<String> {
        let mut full: Vec<String> = vec![
            "exec".into(),
            "-u".into(),
            user.into(),
            handle.reference().into(),
        ];
        full.extend(args.iter().cloned());

        self.invoke(
            &full,
            &format!("executing `{}` in {handle}", args.join(" ")),
        )
    }

    fn stop(&self, handle: &ContainerHandle) -> Result<()> {
        let args = vec!["stop".to_string(), handle.reference().to_string()];
        self.invoke(&args, &format!("stopping container {handle}"))?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectOutput {
    id: String,
    #[serde(default)]
    state: InspectState,
    #[serde(default)]
    network_settings: InspectNetworkSettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    #[serde(default)]
    running: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectNetworkSettings {
    #[serde(default, rename = "IPAddress")]
    ip_address: Option<String>,
    #[serde(default)]
    networks: Option<BTreeMap<String, InspectNetwork>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectNetwork {
    #[serde(default, rename = "IPAddress")]
    ip_address: Option<String>,
    #[serde(default)]
    aliases: Option<Vec<String>>,
}

fn parse_ip(raw: Option<&str>) -> Option<IpAddr> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse().ok())
}

/// Parses the JSON array printed by `container inspect`.
pub fn parse_inspect(json: &str) -> Result<ServiceRuntimeInfo> {
    let mut entries: Vec<InspectOutput> = serde_json::from_str(json)?;
    if entries.is_empty() {
        bail!("inspect returned no containers");
    }
    let entry = entries.swap_remove(0);

    let networks = entry
        .network_settings
        .networks
        .unwrap_or_default()
        .into_iter()
        .map(|(name, net)| {
            let endpoint = NetworkEndpoint {
                ip_address: parse_ip(net.ip_address.as_deref()),
                aliases: net.aliases.unwrap_or_default(),
            };
            (name, endpoint)
        })
        .collect();

    Ok(ServiceRuntimeInfo {
        container_id: entry.id,
        running: entry.state.running,
        ip_address: parse_ip(entry.network_settings.ip_address.as_deref()),
        networks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_run_args() {
        let mounts = map(&[("/work/configs/nginx.yml", "/usr/share/metricbeat/metricbeat.yml")]);
        let env = map(&[("HOST", "10.0.0.5")]);
        let labels = map(&[("co.elastic.logs/module", "nginx")]);
        let request = RunRequest {
            container_name: "metricbeat-8.0.0-1",
            image: "docker.elastic.co/beats/metricbeat:8.0.0".to_string(),
            daemon: false,
            network: Some("elastic"),
            network_alias: Some("beat"),
            bind_mounts: &mounts,
            env: &env,
            labels: &labels,
        };

        let args = CliRuntime::run_args(&request);

        assert_eq!(
            args,
            vec![
                "run",
                "-d",
                "--name",
                "metricbeat-8.0.0-1",
                "--network",
                "elastic",
                "--network-alias",
                "beat",
                "-v",
                "/work/configs/nginx.yml:/usr/share/metricbeat/metricbeat.yml",
                "-e",
                "HOST=10.0.0.5",
                "-l",
                "co.elastic.logs/module=nginx",
                "docker.elastic.co/beats/metricbeat:8.0.0",
            ]
        );
    }

    #[test]
    fn test_run_args_daemon_without_network() {
        let empty = BTreeMap::new();
        let request = RunRequest {
            container_name: "nginx-1.19-1",
            image: "nginx:1.19".to_string(),
            daemon: true,
            network: None,
            network_alias: Some("web-1"),
            bind_mounts: &empty,
            env: &empty,
            labels: &empty,
        };

        let args = CliRuntime::run_args(&request);

        assert!(args.contains(&"unless-stopped".to_string()));
        assert!(!args.contains(&"--network-alias".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("nginx:1.19"));
    }

    #[test]
    fn test_parse_inspect_user_network() {
        let json = r#"[{
            "Id": "abc123",
            "State": {"Running": true, "Status": "running"},
            "NetworkSettings": {
                "IPAddress": "",
                "Networks": {
                    "elastic": {"IPAddress": "10.0.0.5", "Aliases": ["web-1", "abc123"]}
                }
            }
        }]"#;

        let info = parse_inspect(json).unwrap();

        assert_eq!(info.container_id, "abc123");
        assert!(info.running);
        assert_eq!(info.ip_address, None);
        assert_eq!(info.address(), Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))));
        assert!(info.aliases().any(|a| a == "web-1"));
    }

    #[test]
    fn test_parse_inspect_default_bridge_with_null_aliases() {
        let json = r#"[{
            "Id": "def456",
            "State": {"Running": false},
            "NetworkSettings": {
                "IPAddress": "172.17.0.3",
                "Networks": {"bridge": {"IPAddress": "172.17.0.3", "Aliases": null}}
            }
        }]"#;

        let info = parse_inspect(json).unwrap();

        assert!(!info.running);
        assert_eq!(info.ip_address, Some(IpAddr::V4(Ipv4Addr::new(172, 17, 0, 3))));
        assert!(info.networks["bridge"].aliases.is_empty());
    }

    #[test]
    fn test_parse_inspect_rejects_empty_and_garbage() {
        assert!(parse_inspect("[]").is_err());
        assert!(parse_inspect("Error: no such container").is_err());
    }

    #[test]
    fn test_missing_binary_fails() {
        let runtime = CliRuntime::new("beatrunner-no-such-binary", Duration::from_secs(1));
        let handle = ContainerHandle::new("x", "x");

        assert!(runtime.stop(&handle).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_deadline_kills_hanging_call() {
        let runtime = CliRuntime::new("sleep", Duration::from_millis(100));
        let start = Instant::now();

        let err = runtime.invoke(&["5".to_string()], "sleeping").unwrap_err();

        assert!(err.to_string().contains("timed out"));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_remove_args() {
        assert_eq!(
            CliRuntime::remove_args("metricbeat-8.0.0-1"),
            vec!["rm", "-f", "metricbeat-8.0.0-1"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_run_removes_leftover_container() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempfile::tempdir().unwrap();
        let log = temp_dir.path().join("calls.log");
        let script = temp_dir.path().join("fake-runtime");
        std::fs::write(
            &script,
            format!("#!/bin/sh\necho \"$@\" >> {}\nexit 1\n", log.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let runtime = CliRuntime::new(script.to_string_lossy(), Duration::from_secs(5));
        let empty = BTreeMap::new();
        let request = RunRequest {
            container_name: "metricbeat-8.0.0-1",
            image: "docker.elastic.co/beats/metricbeat:8.0.0".to_string(),
            daemon: false,
            network: None,
            network_alias: None,
            bind_mounts: &empty,
            env: &empty,
            labels: &empty,
        };

        assert!(runtime.run(&request).is_err());

        let calls = std::fs::read_to_string(&log).unwrap();
        let calls: Vec<&str> = calls.lines().collect();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("run -d --name metricbeat-8.0.0-1"));
        assert_eq!(calls[1], "rm -f metricbeat-8.0.0-1");
    }

    #[cfg(unix)]
    #[test]
    fn test_invoke_returns_stdout() {
        let runtime = CliRuntime::new("echo", Duration::from_secs(5));

        let out = runtime.invoke(&["abc123".to_string()], "echoing").unwrap();

        assert_eq!(out.trim(), "abc123");
    }
}
