//! Resource preset listing.

use aicli_isolation::sandbox::{ResourceLimits, ResourceManager, PRESET_NAMES};
use aicli_isolation::Settings;
use anyhow::Result;
use colored::Colorize;

const MIB: i64 = 1024 * 1024;

/// Print one preset, or all of them.
pub fn run(settings: &Settings, name: Option<&str>) -> Result<()> {
    let manager = ResourceManager::new(settings.isolation.clone());

    match name {
        Some(name) => {
            if !PRESET_NAMES.contains(&name.to_lowercase().as_str()) {
                println!(
                    "{} unknown preset '{}', showing policy defaults",
                    "warning:".yellow(),
                    name
                );
            }
            print_limits(name, &manager.get_resource_limit_preset(name));
        }
        None => {
            for name in PRESET_NAMES {
                print_limits(name, &manager.get_resource_limit_preset(name));
            }
        }
    }
    Ok(())
}

fn print_limits(name: &str, limits: &ResourceLimits) {
    println!("{}", name.bold());
    println!("  CPU:       {:.2} cores (quota {})", limits.cpu_cores(), limits.cpu_quota);
    println!("  Memory:    {} MiB ({} bytes)", limits.memory / MIB, limits.memory);
    println!("  PIDs:      {}", limits.pids_limit);
    println!(
        "  I/O:       {} / {} IOPS",
        limits.io_max_bandwidth, limits.io_max_iops
    );
}
