//! Workspace network inspection.

use aicli_isolation::sandbox::NetworkManager;
use aicli_isolation::Settings;
use anyhow::Result;
use colored::Colorize;

/// Print the network a workspace would be given.
pub fn run(settings: &Settings, workspace_id: &str) -> Result<()> {
    let manager = NetworkManager::new(settings.isolation.clone());
    let info = manager.create_workspace_network(workspace_id)?;

    println!("{}", "Workspace network".bold());
    println!("  Name:     {}", info.name.cyan());
    println!("  ID:       {}", info.id);
    println!("  Subnet:   {}", info.subnet.green());
    println!("  Gateway:  {}", info.gateway);
    println!("  Driver:   {}", info.driver);
    println!(
        "  Isolated: {}",
        if info.isolated {
            "yes".green()
        } else {
            "no".yellow()
        }
    );
    Ok(())
}
