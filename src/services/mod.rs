mod launcher;
mod manager;
mod token;

pub use launcher::{
    DependentServiceLauncher, DiscoveryMode, LaunchError, LaunchedSidecar, LauncherSettings,
    MODULE_LABEL, SetupCommandError, SidecarPlan, TargetFacts, output_file_name,
};
pub use manager::ServiceManager;
pub use token::{ClockTokens, TokenSource};
