//! Notarization CLI commands

use std::path::PathBuf;

use clap::{Args, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use asc_connect::notarize::{notarize, wait_for_notarization, NotaryService, Notarytool};
use asc_connect::{ConnectConfig, NotarizationResult};

use crate::cli::{output, Cli, OutputFormat};

/// Notarization commands
#[derive(Debug, Args)]
pub struct NotarizeCommand {
    #[command(subcommand)]
    pub command: NotarizeSubcommand,
}

/// Notarize subcommands
#[derive(Debug, Subcommand)]
pub enum NotarizeSubcommand {
    /// Submit an artifact (.zip, .dmg or .pkg) and wait for the verdict
    Submit(SubmitCommand),

    /// Show the status of a submission
    Status(StatusCommand),
}

/// Submit an artifact for notarization
#[derive(Debug, Args)]
pub struct SubmitCommand {
    /// Artifact to notarize
    pub path: PathBuf,

    /// Print the submission ID without waiting
    #[arg(long)]
    pub no_wait: bool,
}

/// Show a submission's status
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Submission ID
    pub submission_id: String,

    /// Wait until the submission is accepted or rejected
    #[arg(long)]
    pub wait: bool,
}

impl NotarizeCommand {
    /// Execute the notarize command
    pub async fn execute(&self, cli: &Cli, cancel: &CancellationToken) -> anyhow::Result<()> {
        let config = ConnectConfig::load(cli.config.as_deref(), &cli.workdir()?)?;
        let service = Notarytool::new(&config.credentials()?)?;

        match &self.command {
            NotarizeSubcommand::Submit(cmd) => cmd.execute(cli, &service, &config, cancel).await,
            NotarizeSubcommand::Status(cmd) => cmd.execute(cli, &service, &config, cancel).await,
        }
    }
}

impl SubmitCommand {
    async fn execute(
        &self,
        cli: &Cli,
        service: &dyn NotaryService,
        config: &ConnectConfig,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        if self.no_wait {
            let submission_id = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(asc_connect::ConnectError::Canceled {
                        operation: "notarization submit".to_string(),
                        id: self.path.display().to_string(),
                    }
                    .into());
                }
                id = service.submit(&self.path) => id?,
            };
            info!(submission_id = %submission_id, "notarization submitted");

            match cli.format {
                OutputFormat::Json => {
                    output::json(&serde_json::json!({ "submission_id": submission_id }))?
                }
                _ => {
                    if cli.quiet {
                        println!("{}", submission_id);
                    } else {
                        output::success(&format!("Submitted {}", self.path.display()));
                        println!("{}", output::key_value("Submission ID", &submission_id));
                    }
                }
            }
            return Ok(());
        }

        if !cli.quiet && cli.format == OutputFormat::Text {
            output::info(&format!("Notarizing {}", self.path.display()));
        }
        let result = notarize(service, &self.path, &config.notarization, cancel).await?;
        render_result(cli, &result)
    }
}

impl StatusCommand {
    async fn execute(
        &self,
        cli: &Cli,
        service: &dyn NotaryService,
        config: &ConnectConfig,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        let result = if self.wait {
            wait_for_notarization(service, &self.submission_id, &config.notarization, cancel)
                .await?
        } else {
            service.status(&self.submission_id).await?
        };
        render_result(cli, &result)
    }
}

fn render_result(cli: &Cli, result: &NotarizationResult) -> anyhow::Result<()> {
    match cli.format {
        OutputFormat::Json => output::json(result),
        OutputFormat::Markdown => {
            let rows = vec![vec![
                result.submission_id.clone(),
                result.status.to_string(),
                result.message.clone().unwrap_or_default(),
            ]];
            println!(
                "{}",
                output::markdown_table(&["Submission", "Status", "Message"], &rows)
            );
            Ok(())
        }
        OutputFormat::Text => {
            if cli.quiet {
                return Ok(());
            }
            println!("{}", output::header("Notarization"));
            println!("{}", output::key_value("Submission ID", &result.submission_id));
            println!("{}", output::key_value("Status", &result.status.to_string()));
            if let Some(message) = &result.message {
                println!("{}", output::key_value("Message", message));
            }
            println!(
                "{}",
                output::key_value("Checked", &result.timestamp.to_rfc3339())
            );
            Ok(())
        }
    }
}
