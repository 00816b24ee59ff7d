//! Isolation profile inspection.

use aicli_isolation::sandbox::{IsolationLevel, IsolationManager, Workspace};
use aicli_isolation::Settings;
use anyhow::{Context, Result};
use bollard::container::Config as ContainerConfig;
use bollard::service::HostConfig;
use tracing::info;

use super::print_json;

/// Build the profile for a workspace, validate it and print it.
pub fn run(
    settings: &Settings,
    workspace_id: &str,
    level: IsolationLevel,
    host_config: bool,
) -> Result<()> {
    let manager = IsolationManager::new(settings.isolation.clone());
    let workspace = Workspace::new(workspace_id);

    let isolation = manager
        .create_workspace_isolation_with_level(Some(&workspace), level)
        .with_context(|| format!("Failed to build isolation for workspace {workspace_id}"))?;
    manager
        .validate_isolation(Some(&isolation))
        .context("Isolation profile failed validation")?;
    info!("Isolation profile for {} is valid", workspace_id);

    if !host_config {
        return print_json(&isolation);
    }

    let mut container = ContainerConfig::<String>::default();
    let mut host = HostConfig::default();
    manager
        .apply_to_container(Some(&isolation), Some(&mut container), Some(&mut host))
        .context("Failed to apply isolation to container config")?;
    print_json(&host)
}
