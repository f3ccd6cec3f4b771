//! Mixcast CLI: drive the composition engine against a simulated host.
//!
//! Usage:
//!   mixcast demo               Run a scripted session and print snapshots
//!   mixcast run <PATH>         Dispatch a JSON array of requests
//!   mixcast config             Show the effective configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use mixcast_common::config::{EngineConfig, LoggingConfig};
use mixcast_common::logging::init_logging;

mod commands;

#[derive(Parser)]
#[command(
    name = "mixcast",
    about = "Extra video compositions and outputs on top of a host broadcast engine",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the standard location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted session against the simulated host
    Demo {
        /// Host canvas width
        #[arg(long, default_value = "1920")]
        width: u32,

        /// Host canvas height
        #[arg(long, default_value = "1080")]
        height: u32,
    },

    /// Dispatch every request in a JSON file and print the responses
    Run {
        /// Path to a JSON array of requests
        path: PathBuf,

        /// Print responses as compact single-line JSON
        #[arg(long)]
        compact: bool,
    },

    /// Print the effective configuration
    Config,
}

// The engine handle blocks on replies, so main stays synchronous.
fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load_from(path)
            .map_err(|e| anyhow::anyhow!("Failed to load config {}: {e}", path.display()))?,
        None => EngineConfig::load(),
    };

    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    init_logging(&LoggingConfig {
        level,
        ..config.logging.clone()
    });

    match cli.command {
        Commands::Demo { width, height } => commands::demo::run(config, width, height),
        Commands::Run { path, compact } => commands::run::run(config, path, compact),
        Commands::Config => commands::config::run(&config),
    }
}
