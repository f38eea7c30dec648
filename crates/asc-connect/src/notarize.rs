//! Notarization using notarytool
//!
//! Submission transfers the artifact, then the same poll-to-terminal loop as
//! screenshot delivery waits for a verdict.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Credentials;
use crate::error::{ConnectError, Result};
use crate::poll::{poll_until_deadline, with_deadline, PollConfig, PollStatus};
use crate::types::{NotarizationResult, NotarizationStatus};

/// A service that accepts artifacts for notarization.
#[async_trait]
pub trait NotaryService: Send + Sync {
    /// Uploads `path` and returns the submission ID.
    async fn submit(&self, path: &Path) -> Result<String>;

    /// Current status of a submission.
    async fn status(&self, submission_id: &str) -> Result<NotarizationResult>;

    /// The developer log for a finished submission.
    async fn log(&self, submission_id: &str) -> Result<String>;
}

/// `xcrun notarytool` with App Store Connect API key credentials
pub struct Notarytool {
    key_id: String,
    issuer_id: String,
    key_path: PathBuf,
    team_id: Option<String>,
    /// Holds the key on disk when it was configured inline
    _key_file: Option<tempfile::NamedTempFile>,
}

impl Notarytool {
    pub fn new(credentials: &Credentials) -> Result<Self> {
        let (key_path, key_file) = match &credentials.private_key_path {
            Some(path) if path.is_file() => (path.clone(), None),
            _ => {
                // notarytool only accepts a key file
                let mut file = tempfile::Builder::new()
                    .prefix("AuthKey_")
                    .suffix(".p8")
                    .tempfile()?;
                std::io::Write::write_all(&mut file, credentials.private_key.as_bytes())?;
                (file.path().to_path_buf(), Some(file))
            }
        };

        Ok(Self {
            key_id: credentials.key_id.clone(),
            issuer_id: credentials.issuer_id.clone(),
            key_path,
            team_id: credentials.team_id.clone(),
            _key_file: key_file,
        })
    }

    /// Build base notarytool command with credentials
    fn build_command(&self, subcommand: &str) -> Command {
        let mut cmd = Command::new("xcrun");
        cmd.arg("notarytool").arg(subcommand);
        cmd.arg("--key-id").arg(&self.key_id);
        cmd.arg("--issuer").arg(&self.issuer_id);
        cmd.arg("--key").arg(&self.key_path);
        if let Some(team_id) = &self.team_id {
            cmd.arg("--team-id").arg(team_id);
        }
        cmd.kill_on_drop(true);
        cmd
    }

    async fn run(&self, mut cmd: Command, what: &str) -> Result<String> {
        let output = cmd
            .output()
            .await
            .map_err(|e| ConnectError::CommandFailed(format!("notarytool {} failed: {}", what, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(what, stdout = %stdout, "notarytool output");

        if !output.status.success() {
            return Err(ConnectError::CommandFailed(format!(
                "notarytool {} exited with {}: {}",
                what,
                output.status,
                stderr.trim()
            )));
        }
        Ok(stdout)
    }
}

#[async_trait]
impl NotaryService for Notarytool {
    async fn submit(&self, path: &Path) -> Result<String> {
        info!("Submitting {} for notarization", path.display());
        let mut cmd = self.build_command("submit");
        cmd.arg(path).args(["--output-format", "json"]);
        let stdout = self.run(cmd, "submit").await?;
        parse_submission_id(&stdout)
    }

    async fn status(&self, submission_id: &str) -> Result<NotarizationResult> {
        let mut cmd = self.build_command("info");
        cmd.arg(submission_id).args(["--output-format", "json"]);
        let stdout = self.run(cmd, "info").await?;
        parse_status(submission_id, &stdout)
    }

    async fn log(&self, submission_id: &str) -> Result<String> {
        let mut cmd = self.build_command("log");
        cmd.arg(submission_id);
        self.run(cmd, "log").await
    }
}

fn parse_json(stdout: &str) -> Result<serde_json::Value> {
    serde_json::from_str(stdout.trim()).map_err(|e| {
        ConnectError::CommandFailed(format!("unparseable notarytool output: {}", e))
    })
}

/// Extracts the submission ID from `notarytool submit --output-format json`.
pub fn parse_submission_id(stdout: &str) -> Result<String> {
    let json = parse_json(stdout)?;
    json.get("id")
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| ConnectError::CommandFailed("no submission ID in response".to_string()))
}

/// Parses `notarytool info --output-format json`.
pub fn parse_status(submission_id: &str, stdout: &str) -> Result<NotarizationResult> {
    let json = parse_json(stdout)?;
    let status = json
        .get("status")
        .and_then(|v| v.as_str())
        .map(NotarizationStatus::from_notarytool)
        .unwrap_or(NotarizationStatus::InProgress);
    let message = json
        .get("message")
        .and_then(|v| v.as_str())
        .map(String::from);

    Ok(NotarizationResult {
        submission_id: submission_id.to_string(),
        status,
        message,
        timestamp: chrono::Utc::now(),
    })
}

async fn check_submission(
    service: &dyn NotaryService,
    submission_id: &str,
) -> Result<PollStatus<NotarizationResult>> {
    let result = service.status(submission_id).await?;
    match result.status {
        NotarizationStatus::InProgress => Ok(PollStatus::Pending(result.status.to_string())),
        NotarizationStatus::Accepted => Ok(PollStatus::Done(result)),
        NotarizationStatus::Invalid | NotarizationStatus::Rejected => {
            let detail = match service.log(submission_id).await {
                Ok(log) if !log.trim().is_empty() => log,
                Ok(_) => failure_summary(&result),
                Err(e) => {
                    warn!(submission_id, error = %e, "could not fetch notarization log");
                    failure_summary(&result)
                }
            };
            Ok(PollStatus::Failed(ConnectError::NotarizationFailed {
                submission_id: submission_id.to_string(),
                detail,
            }))
        }
    }
}

fn failure_summary(result: &NotarizationResult) -> String {
    match &result.message {
        Some(message) => format!("{}: {}", result.status, message),
        None => result.status.to_string(),
    }
}

/// Polls an existing submission until it is accepted or rejected.
pub async fn wait_for_notarization(
    service: &dyn NotaryService,
    submission_id: &str,
    config: &PollConfig,
    cancel: &CancellationToken,
) -> Result<NotarizationResult> {
    let deadline = Instant::now() + config.timeout;
    poll_until_deadline(
        "notarization",
        submission_id,
        config.interval,
        deadline,
        cancel,
        || check_submission(service, submission_id),
    )
    .await
}

/// Submits `path` and waits for the verdict. The deadline covers both the
/// submission and the wait.
pub async fn notarize(
    service: &dyn NotaryService,
    path: &Path,
    config: &PollConfig,
    cancel: &CancellationToken,
) -> Result<NotarizationResult> {
    let meta = tokio::fs::symlink_metadata(path).await?;
    if meta.file_type().is_symlink() {
        return Err(ConnectError::InvalidAsset {
            path: path.display().to_string(),
            message: "refusing to follow symlink".to_string(),
        });
    }

    let deadline = Instant::now() + config.timeout;
    let label = path.display().to_string();
    let submission_id = with_deadline(
        "notarization submit",
        &label,
        deadline,
        cancel,
        service.submit(path),
    )
    .await?;
    info!(submission_id = %submission_id, "notarization submitted");

    let result = poll_until_deadline(
        "notarization",
        &submission_id,
        config.interval,
        deadline,
        cancel,
        || check_submission(service, &submission_id),
    )
    .await?;

    info!(submission_id = %submission_id, "notarization accepted");
    Ok(result)
}
