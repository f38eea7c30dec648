//! CLI definition and command handling

pub mod commands;
pub mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use commands::{MigrateCommand, NotarizeCommand};

/// asc - App Store Connect metadata migration CLI
#[derive(Debug, Parser)]
#[command(name = "asc")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Working directory
    #[arg(short = 'C', long, global = true)]
    pub directory: Option<PathBuf>,

    /// Path to asc.toml (default: nearest asc.toml from the working directory)
    #[arg(long, global = true, env = "ASC_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
    /// Markdown tables
    Markdown,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Move metadata between fastlane files and App Store Connect
    Migrate(MigrateCommand),

    /// Notarize macOS artifacts with notarytool
    Notarize(NotarizeCommand),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> anyhow::Result<()> {
        // Change to specified directory if provided
        if let Some(dir) = &self.directory {
            std::env::set_current_dir(dir)?;
        }

        let rt = tokio::runtime::Runtime::new()?;
        let cancel = CancellationToken::new();

        // Ctrl-C cancels in-flight calls and poll waits
        let on_interrupt = cancel.clone();
        rt.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, canceling");
                on_interrupt.cancel();
            }
        });

        let result = match &self.command {
            Commands::Migrate(cmd) => rt.block_on(cmd.execute(&self, &cancel)),
            Commands::Notarize(cmd) => rt.block_on(cmd.execute(&self, &cancel)),
        };
        rt.shutdown_background();
        result
    }

    /// The working directory commands resolve paths against.
    pub fn workdir(&self) -> anyhow::Result<PathBuf> {
        Ok(std::env::current_dir()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_import() {
        let cli = Cli::try_parse_from([
            "asc",
            "--format",
            "json",
            "migrate",
            "import",
            "--version-id",
            "v1",
            "--fastlane-dir",
            "fastlane",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(matches!(cli.command, Commands::Migrate(_)));
    }
}
