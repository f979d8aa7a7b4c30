use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Parser)]
#[command(name = "edgecache", about = "Edge caching reverse proxy and origin file store")]
pub struct Cli {
    /// Path to the configuration file (defaults to ./edgecache.toml if present).
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Serve clients from the FIFO cache, forwarding misses to the origin (default).
    Edge,
    /// Serve files out of the storage directory.
    Origin,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Edge)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_edge_role() {
        let cli = Cli::parse_from(["edgecache"]);
        assert_eq!(cli.command(), Command::Edge);
        assert!(cli.config.is_none());
    }

    #[test]
    fn parses_origin_role_and_config() {
        let cli = Cli::parse_from(["edgecache", "--config", "/tmp/edge.toml", "origin"]);
        assert_eq!(cli.command(), Command::Origin);
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/tmp/edge.toml")));
    }
}
