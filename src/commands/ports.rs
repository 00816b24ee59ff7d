//! Port mapping validation.

use aicli_isolation::sandbox::{NetworkManager, PortMappingRequest};
use aicli_isolation::Settings;
use anyhow::{Context, Result};
use colored::Colorize;
use std::collections::HashMap;

/// Validate HOST:CONTAINER mappings and print the resulting Docker tables.
pub fn run(
    settings: &Settings,
    mappings: &[String],
    bind: bool,
    host_ip: Option<String>,
) -> Result<()> {
    let mut ports = HashMap::new();
    for mapping in mappings {
        let (host, container) = mapping
            .split_once(':')
            .with_context(|| format!("Invalid mapping '{mapping}', expected HOST:CONTAINER"))?;
        ports.insert(host.to_string(), container.to_string());
    }

    let manager = NetworkManager::new(settings.isolation.clone());
    let request = PortMappingRequest {
        ports,
        bind_to_host: bind,
        host_ip,
    };
    let (exposed, bindings) = manager.create_port_mapping(&request)?;

    println!("{} port mapping is allowed", "ok:".green());
    let mut exposed: Vec<_> = exposed.keys().collect();
    exposed.sort();
    for port in exposed {
        match bindings.get(port).and_then(Option::as_ref) {
            Some(targets) => {
                for target in targets {
                    println!(
                        "  {} <- {}:{}",
                        port,
                        target.host_ip.as_deref().unwrap_or("0.0.0.0"),
                        target.host_port.as_deref().unwrap_or("")
                    );
                }
            }
            None => println!("  {port} (not published)"),
        }
    }
    Ok(())
}
