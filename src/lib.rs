pub mod cli;
pub mod domain;
pub mod infra;
pub mod services;

// Exposed for integration tests; no runtime code depends on it.
pub mod test_support;

pub use domain::{
    ContainerHandle, ContainerRuntime, Service, ServiceError, ServiceRuntimeInfo, ServiceSpec,
    ServiceState,
};
pub use infra::CliRuntime;
pub use services::{
    DependentServiceLauncher, DiscoveryMode, LaunchError, LaunchedSidecar, LauncherSettings,
    ServiceManager,
};
