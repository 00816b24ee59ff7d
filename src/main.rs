//! Operator CLI for workspace isolation profiles, networks and monitoring.

use aicli_isolation::sandbox::IsolationLevel;
use aicli_isolation::Settings;
use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

mod commands;

#[derive(Parser)]
#[command(name = "aicli-isolation")]
#[command(
    author,
    version,
    about = "Per-workspace container isolation, resource governance and security monitoring"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the isolation config file
    #[arg(short, long, global = true, env = "AICLI_ISOLATION_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute, validate and render the isolation profile for a workspace
    Profile {
        /// Workspace identifier
        workspace_id: String,

        /// Isolation level
        #[arg(short, long, default_value = "standard")]
        level: IsolationLevel,

        /// Print the rendered Docker host config instead of the profile
        #[arg(long)]
        host_config: bool,
    },

    /// Show the deterministic network assignment for a workspace
    Network {
        /// Workspace identifier
        workspace_id: String,
    },

    /// Show resource limit presets
    Preset {
        /// Preset name (minimal, small, medium, large); lists all when omitted
        name: Option<String>,
    },

    /// Validate a port mapping against the blocked-port policy
    Ports {
        /// Mappings as HOST:CONTAINER, e.g. 8080:8000 or 5353/udp:53/udp
        #[arg(required = true)]
        mappings: Vec<String>,

        /// Also bind the ports on the host
        #[arg(long)]
        bind: bool,

        /// Host interface to bind (default: all)
        #[arg(long)]
        host_ip: Option<String>,
    },

    /// Compute limits for a workload type, optionally tuned by usage history
    Workload {
        /// development, build, test or production
        workload: String,

        /// JSON file with an array of usage samples
        #[arg(long)]
        history: Option<PathBuf>,
    },

    /// Run the security monitor and print alerts as they arrive
    Monitor {
        /// Stop after this many seconds (0 = until Ctrl-C)
        #[arg(short, long, default_value = "0")]
        duration: u64,

        /// Seconds between checks (overrides config)
        #[arg(short, long)]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("aicli_isolation=debug")
    } else {
        EnvFilter::new("aicli_isolation=info")
    };

    let fmt_layer = match cli.log_format {
        LogFormat::Text => fmt::layer().with_writer(std::io::stderr).boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .init();

    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Profile {
            workspace_id,
            level,
            host_config,
        } => {
            commands::profile::run(&settings, &workspace_id, level, host_config)?;
        }
        Commands::Network { workspace_id } => {
            commands::network::run(&settings, &workspace_id)?;
        }
        Commands::Preset { name } => {
            commands::preset::run(&settings, name.as_deref())?;
        }
        Commands::Ports {
            mappings,
            bind,
            host_ip,
        } => {
            commands::ports::run(&settings, &mappings, bind, host_ip)?;
        }
        Commands::Workload { workload, history } => {
            commands::workload::run(&settings, &workload, history.as_deref())?;
        }
        Commands::Monitor { duration, interval } => {
            commands::monitor::run(settings, duration, interval).await?;
        }
    }

    Ok(())
}
