use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use pifleet::config::DiscoveryMethod;

#[derive(Parser)]
#[command(
    name = "pifleet",
    version,
    about = "Node discovery and fleet membership for single-board computer clusters",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); environment variables are used when absent
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run discovery and reconcile membership into the node registry
    Run {
        /// Discovery method (broadcast, probe, static)
        #[arg(short, long)]
        method: Option<DiscoveryMethod>,

        /// Restrict discovery to one network interface
        #[arg(short, long)]
        interface: Option<String>,

        /// Also announce this node
        #[arg(long, default_value = "false")]
        announce: bool,

        /// Disable the status server
        #[arg(long, default_value = "false")]
        no_status: bool,
    },

    /// Announce this node until interrupted
    Announce {
        /// Instance name (defaults to the host name)
        #[arg(short, long)]
        name: Option<String>,

        /// Advertised port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Sample the network once and print what is visible
    Scan {
        /// Discovery method (broadcast, probe, static)
        #[arg(short, long)]
        method: Option<DiscoveryMethod>,

        /// Restrict discovery to one network interface
        #[arg(short, long)]
        interface: Option<String>,

        /// Seconds to listen before sampling (broadcast)
        #[arg(short, long, default_value = "3")]
        wait: u64,

        /// Print JSON instead of a table
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// List nodes in the durable registry
    Nodes {
        /// Print JSON instead of a table
        #[arg(long, default_value = "false")]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging
    setup_tracing(&cli.log_format, cli.verbose)?;

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            method,
            interface,
            announce,
            no_status,
        } => {
            tracing::info!(
                method = ?method,
                interface = ?interface,
                announce = %announce,
                "Starting run command"
            );
            let params = commands::RunParams {
                method,
                interface,
                announce,
                status: !no_status,
            };
            commands::run(config, params).await?;
        }

        Commands::Announce { name, port } => {
            tracing::info!(name = ?name, port = ?port, "Starting announce command");
            commands::announce(config, name, port).await?;
        }

        Commands::Scan {
            method,
            interface,
            wait,
            json,
        } => {
            tracing::info!(method = ?method, wait = %wait, "Starting scan command");
            commands::scan(config, method, interface, wait, json).await?;
        }

        Commands::Nodes { json } => {
            commands::nodes(config, json)?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, verbose: bool) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            tracing_subscriber::EnvFilter::new("pifleet=debug,info")
        } else {
            tracing_subscriber::EnvFilter::new("pifleet=info,warn")
        }
    });

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
