pub mod error;
mod service;
pub mod traits;

pub use error::ServiceError;
pub use service::{Service, ServiceConfig, ServiceSpec, ServiceState};
pub use traits::{
    ContainerHandle, ContainerRuntime, NetworkEndpoint, RunRequest, ServiceRuntimeInfo,
};
