use super::App;
use crate::services::{DiscoveryMode, LaunchedSidecar};
use anyhow::{Context, Result};
use clap::Args;

#[derive(Args, Debug, Clone)]
pub struct LaunchArgs {
    /// Container name of the already running service to monitor
    #[arg(long)]
    pub target: String,
    /// Service name of the target, e.g. nginx
    #[arg(long)]
    pub target_name: String,
    #[arg(long)]
    pub target_version: String,
    /// Network alias of the target (alias discovery). Defaults to its service name
    #[arg(long)]
    pub alias: Option<String>,
    /// Version of the agent to launch
    #[arg(long)]
    pub version: String,
    /// Agent to launch (default from config, otherwise metricbeat)
    #[arg(long)]
    pub agent: Option<String>,
    /// alias | ip
    #[arg(long)]
    pub discovery: Option<DiscoveryMode>,
}

pub fn run(args: LaunchArgs, app: &App) -> Result<LaunchedSidecar> {
    let target = app
        .manager()
        .attach(
            &args.target_name,
            &args.target_version,
            &args.target,
            args.alias.as_deref(),
        )
        .with_context(|| format!("attaching to target {}", args.target))?;

    let mut settings = app.config().launcher_settings();
    if let Some(agent) = args.agent {
        settings.agent = agent;
    }
    let mode = args.discovery.unwrap_or_else(|| app.config().discovery());

    let launched = app.launcher(settings).launch(&args.version, &target, mode)?;
    Ok(launched)
}
