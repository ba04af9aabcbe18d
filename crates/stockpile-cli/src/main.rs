//! CLI entry point for Stockpile.
//!
//! This binary provides the `stockpile` command: `serve` runs the HTTP and
//! Discord gateways over one shared inventory, `check` validates the
//! configuration and snapshot.

mod cli;
mod config;
mod runtime;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::config::Config;

// Everything runs on one cooperative thread; tasks interleave only at
// `.await` points.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // A missing .env file is fine.
    let _ = dotenvy::dotenv();
    init_tracing("info");

    let config = Config::load(&cli.config)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => runtime::serve(config).await,
        Commands::Check => runtime::check(&config).await,
    }
}

/// Initialize the tracing subscriber; `RUST_LOG` overrides `default_level`.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
