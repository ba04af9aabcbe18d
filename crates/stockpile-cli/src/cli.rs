//! CLI argument definitions for Stockpile.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Stockpile -- a shared inventory of items stored at world coordinates.
#[derive(Debug, Parser)]
#[command(
    name = "stockpile",
    version,
    about = "Stockpile -- shared coordinate inventory with Discord and HTTP front ends",
    long_about = "Keeps track of what is stored where in a block world. Players update the \
                  inventory from Discord chat commands or over a small HTTP API; the \
                  inventory is saved to disk and restored on restart."
)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(long, short, global = true, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// Run the HTTP and Discord gateways (the default).
    Serve,

    /// Validate the configuration and snapshot, then exit.
    Check,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_is_default_and_config_has_default_path() {
        let cli = Cli::try_parse_from(["stockpile"]).unwrap();
        assert_eq!(cli.command, None);
        assert_eq!(cli.config, PathBuf::from("config.toml"));
    }

    #[test]
    fn config_flag_works_after_subcommand() {
        let cli = Cli::try_parse_from(["stockpile", "check", "--config", "/etc/stockpile.toml"])
            .unwrap();
        assert_eq!(cli.command, Some(Commands::Check));
        assert_eq!(cli.config, PathBuf::from("/etc/stockpile.toml"));
    }
}
