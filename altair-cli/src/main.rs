//! Altair CLI — Alpaca device-control server.
//!
//! Run with a config file:
//!
//! ```bash
//! altair serve --config observatory.toml
//! ```
//!
//! See `altair --help` for all available commands and options.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use altair_core::config::AltairConfig;
use altair_core::logging;
use altair_core::server::AltairServer;

#[derive(Parser)]
#[command(
    name = "altair",
    about = "Alpaca device-control server for astronomical instruments",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Serve {
        /// Path to the TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the HTTP listen port
        #[arg(long)]
        port: Option<u16>,

        /// Log every command, not just failures
        #[arg(long)]
        verbose: bool,
    },

    /// Parse and validate a configuration file, then exit
    CheckConfig {
        /// Path to the TOML configuration file
        config: PathBuf,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AltairConfig> {
    match path {
        Some(p) => AltairConfig::load(p),
        None => {
            let mut config = AltairConfig::default();
            config.apply_env_vars();
            config.validate()?;
            Ok(config)
        }
    }
}

fn serve(config: Option<PathBuf>, port: Option<u16>, verbose: bool) -> anyhow::Result<()> {
    let mut config = load_config(config.as_ref())?;
    if let Some(port) = port {
        config.server.port = port;
    }
    if verbose {
        config.server.verbose_logging = true;
    }

    logging::init(&config.logging).context("installing logger")?;
    log::info!("altair {} starting", env!("CARGO_PKG_VERSION"));

    let server = AltairServer::new(config).context("building server")?;
    server.run().context("running server")?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve { config, port, verbose } => serve(config, port, verbose),
        Commands::CheckConfig { config } => AltairConfig::load(&config).map(|c| {
            println!(
                "ok: {} device(s), http port {}, discovery {}",
                c.devices.len(),
                c.server.port,
                if c.discovery.enabled { "on" } else { "off" }
            );
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
