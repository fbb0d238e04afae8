use super::App;
use crate::domain::{Service, ServiceRuntimeInfo};
use anyhow::{Context, Result};
use tracing::info;

const UNKNOWN_VERSION: &str = "unknown";

fn attach(app: &App, container: &str) -> Result<Service> {
    app.manager()
        .attach(container, UNKNOWN_VERSION, container, None)
        .with_context(|| format!("attaching to {container}"))
}

pub fn inspect(app: &App, container: &str) -> Result<ServiceRuntimeInfo> {
    let service = attach(app, container)?;
    Ok(service.inspect()?)
}

pub fn stop(app: &App, container: &str) -> Result<()> {
    let mut service = attach(app, container)?;
    service.stop()?;
    info!(container, "Stopped");
    Ok(())
}
