//! Workload-tuned limit calculation.

use aicli_isolation::sandbox::{ResourceManager, ResourceMetrics, WorkloadType};
use aicli_isolation::Settings;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use super::print_json;

/// Print limits for a workload, tuned by an optional history file.
pub fn run(settings: &Settings, workload: &str, history: Option<&Path>) -> Result<()> {
    let workload: WorkloadType = workload.parse()?;

    let samples: Vec<ResourceMetrics> = match history {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read history file: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse history file: {}", path.display()))?
        }
        None => Vec::new(),
    };

    let manager = ResourceManager::new(settings.isolation.clone());
    let limits = manager.calculate_optimal_limits(workload, &samples);
    manager.validate_resource_limits(&limits)?;
    print_json(&limits)
}
