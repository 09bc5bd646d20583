//! elastic CLI
//!
//! Runs the autoscaling control loop against a compute fleet.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// elastic - hysteresis autoscaler for bursty compute fleets
#[derive(Parser, Debug)]
#[command(name = "elastic")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to elastic.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one autoscaling cycle
    AutoScale,

    /// Probe the fleet and print node states without scoring
    DumpState,

    /// Add nodes, bypassing the decision engine
    Expand {
        /// Number of nodes to add
        #[arg(long, default_value_t = 1)]
        count: u32,
    },

    /// Remove the oldest nodes, bypassing the decision engine
    Shrink {
        /// Number of nodes to remove
        #[arg(long, default_value_t = 1)]
        count: u32,
    },

    /// Run autoscaling cycles until interrupted
    Watch {
        /// Seconds between cycles
        #[arg(long, default_value_t = 60)]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;

    // Initialize logging; RUST_LOG wins over the configured level
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let scaler = commands::build_autoscaler(&config)?;

    match cli.command {
        Commands::AutoScale => {
            commands::auto_scale(&scaler).await?;
        }
        Commands::DumpState => {
            commands::dump_state(&scaler).await?;
        }
        Commands::Expand { count } => {
            commands::expand(&scaler, count).await?;
        }
        Commands::Shrink { count } => {
            commands::shrink(&scaler, count).await?;
        }
        Commands::Watch { interval } => {
            commands::watch(&scaler, interval).await?;
        }
    }

    Ok(())
}
