pub mod monitor;
pub mod network;
pub mod ports;
pub mod preset;
pub mod profile;
pub mod workload;

use anyhow::{Context, Result};
use serde::Serialize;

/// Print a value as pretty JSON on stdout.
pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render JSON")?;
    println!("{rendered}");
    Ok(())
}
