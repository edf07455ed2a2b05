//! # archsync CLI Module
//!
//! ## Available Commands
//!
//! - `serve` - Start the development version-store server
//! - `show` - Print an environment version
//! - `apply` - Apply a constraint file to the current version
//! - `previous` / `next` - Step through version history
//! - `select` - Make a version the environment's current one
//! - `diff` / `insync` - Compare two environments
//! - `constraints` - List the constraints behind the current version

mod commands;

use crate::config::Config;
use archsync_core::{ArchsyncError, DEFAULT_ENVIRONMENT, Direction};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// archsync - architecture version & constraint reconciliation
///
/// Stages constraint changes against an environment version, applies them
/// through the version store and walks the resulting history.
#[derive(Parser, Debug)]
#[command(name = "archsync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress the startup banner
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Configuration file (default: ./archsync.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Version store base URL (overrides ARCHSYNC_URL)
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Bearer key (overrides ARCHSYNC_API_KEY)
    #[arg(long, global = true)]
    pub api_key: Option<String>,

    /// Architecture ID
    #[arg(short, long, global = true)]
    pub architecture: Option<String>,

    /// Environment ID
    #[arg(short, long, global = true, default_value = DEFAULT_ENVIRONMENT)]
    pub environment: String,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the development server
    Serve {
        /// Host to bind to
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,

        /// JSON array of environment versions to preload
        #[arg(long)]
        seed: Option<PathBuf>,
    },

    /// Print an environment version
    Show {
        /// Version number (default: current)
        #[arg(long)]
        version: Option<u64>,
    },

    /// Apply a JSON array of constraints to the current version
    Apply {
        /// Path to the constraints file
        #[arg(short, long)]
        file: PathBuf,

        /// Overwrite a newer server version instead of failing
        #[arg(long)]
        force: bool,
    },

    /// Step back one version
    Previous {
        /// Step from this version (default: current)
        #[arg(long)]
        version: Option<u64>,

        /// Also make the version reached the current one
        #[arg(long)]
        select: bool,
    },

    /// Step forward one version
    Next {
        /// Step from this version (default: current)
        #[arg(long)]
        version: Option<u64>,

        /// Also make the version reached the current one
        #[arg(long)]
        select: bool,
    },

    /// Make a version the environment's current one
    Select {
        /// Version number
        version: u64,
    },

    /// Diff two environments of the architecture
    Diff {
        /// Environment compared from
        #[arg(short, long)]
        source: String,

        /// Environment compared to
        #[arg(short, long)]
        target: String,
    },

    /// Check whether two environments are equivalent
    Insync {
        /// Environment compared from
        #[arg(short, long)]
        source: String,

        /// Environment compared to
        #[arg(short, long)]
        target: String,
    },

    /// List the constraints behind the current version
    Constraints,
}

impl Cli {
    /// Configuration with this invocation's flags applied on top.
    pub fn resolve_config(&self) -> Result<Config, ArchsyncError> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(url) = &self.url {
            config.client.base_url.clone_from(url);
        }
        if let Some(key) = &self.api_key {
            config.client.api_key = Some(key.clone());
            config.server.api_key = Some(key.clone());
        }
        Ok(config)
    }
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

fn require_architecture(architecture: Option<&str>) -> Result<&str, ArchsyncError> {
    architecture.ok_or_else(|| ArchsyncError::InvalidInput("--architecture is required".to_string()))
}

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), ArchsyncError> {
    let config = cli.resolve_config()?;
    let Cli {
        quiet,
        json_mode,
        architecture,
        environment,
        command,
        ..
    } = cli;
    let connect = || {
        Connection::open(
            &config.client,
            require_architecture(architecture.as_deref())?,
            &environment,
        )
    };

    match command {
        Commands::Serve { host, port, seed } => {
            let mut server = config.server.clone();
            if let Some(host) = host {
                server.host = host;
            }
            if let Some(port) = port {
                server.port = port;
            }
            cmd_serve(&server, seed.as_deref(), quiet).await
        }
        Commands::Show { version } => cmd_show(&connect()?, version, json_mode).await,
        Commands::Apply { file, force } => cmd_apply(&connect()?, &file, force, json_mode).await,
        Commands::Previous { version, select } => {
            cmd_step(&connect()?, version, Direction::Previous, select, json_mode).await
        }
        Commands::Next { version, select } => {
            cmd_step(&connect()?, version, Direction::Next, select, json_mode).await
        }
        Commands::Select { version } => cmd_select(&connect()?, version, json_mode).await,
        Commands::Diff { source, target } => {
            cmd_diff(&connect()?, &source, &target, json_mode).await
        }
        Commands::Insync { source, target } => {
            cmd_insync(&connect()?, &source, &target, json_mode).await
        }
        Commands::Constraints => cmd_constraints(&connect()?, json_mode).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse_into_commands() {
        let cli = Cli::parse_from([
            "archsync", "-a", "arch", "-e", "dev", "apply", "--file", "c.json", "--force",
        ]);
        assert_eq!(cli.architecture.as_deref(), Some("arch"));
        assert_eq!(cli.environment, "dev");
        assert!(matches!(cli.command, Commands::Apply { force: true, .. }));
    }

    #[test]
    fn environment_defaults() {
        let cli = Cli::parse_from(["archsync", "-a", "arch", "show"]);
        assert_eq!(cli.environment, DEFAULT_ENVIRONMENT);
        assert!(matches!(cli.command, Commands::Show { version: None }));
    }

    #[test]
    fn architecture_is_required_for_environment_commands() {
        let cli = Cli::parse_from(["archsync", "constraints"]);
        assert!(matches!(
            require_architecture(cli.architecture.as_deref()),
            Err(ArchsyncError::InvalidInput(_))
        ));
    }
}
