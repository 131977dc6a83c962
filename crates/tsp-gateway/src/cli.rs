//! Command line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Telegram session provisioning gateway
#[derive(Debug, Parser)]
#[command(name = "tsp-gateway", version, about)]
pub struct Cli {
    /// Configuration file (default: ./tsp-gateway.toml if present, else environment)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the provisioning API, plus the bot when a token is configured
    Serve,
    /// Run only the bot against a remote provisioning API
    Bot,
    /// Print a fresh base64 encryption key for the credential store
    GenKey,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Serve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_serve() {
        let cli = Cli::parse_from(["tsp-gateway"]);
        assert_eq!(cli.command(), Command::Serve);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_subcommands_and_config() {
        let cli = Cli::parse_from(["tsp-gateway", "bot", "--config", "prod.toml"]);
        assert_eq!(cli.command(), Command::Bot);
        assert_eq!(cli.config, Some(PathBuf::from("prod.toml")));

        let cli = Cli::parse_from(["tsp-gateway", "gen-key"]);
        assert_eq!(cli.command(), Command::GenKey);
    }
}
