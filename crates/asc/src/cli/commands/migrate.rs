//! Migrate CLI commands

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Subcommand};
use console::style;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use asc_connect::{AppStoreApi, ConnectClient, ConnectConfig};
use asc_metadata::readers::{
    build_screenshot_plans, read_app_info_localizations, read_review_information,
    read_version_localizations,
};
use asc_metadata::types::{ScreenshotPlan, SkippedItem, UploadAction};
use asc_metadata::{
    discover_deliverfile, export_metadata, export_metadata_dir, parse_deliverfile,
    resolve_import_inputs, resolve_target, run_import, validate_localizations, DeliverfileConfig, ExportReport,
    ExportRequest, ImportInputs, ImportReport, ImportRequest, ResolveRequest, Target,
    ValidationReport,
};

use super::ValidationFailed;
use crate::cli::{output, Cli, OutputFormat};

/// Metadata migration commands
#[derive(Debug, Args)]
pub struct MigrateCommand {
    #[command(subcommand)]
    pub command: MigrateSubcommand,
}

/// Migrate subcommands
#[derive(Debug, Subcommand)]
pub enum MigrateSubcommand {
    /// Upload fastlane metadata and screenshots to an App Store version
    Import(ImportCommand),

    /// Write an App Store version's metadata as fastlane text files
    Export(ExportCommand),

    /// Check fastlane metadata offline
    Validate(ValidateCommand),
}

/// Where to find the fastlane files
#[derive(Debug, Clone, Args)]
pub struct SourceArgs {
    /// fastlane directory (holds Deliverfile, metadata/ and screenshots/)
    #[arg(long)]
    pub fastlane_dir: Option<PathBuf>,

    /// Metadata directory, overrides the fastlane directory and Deliverfile
    #[arg(long)]
    pub metadata_dir: Option<PathBuf>,

    /// Screenshots directory, overrides the fastlane directory and Deliverfile
    #[arg(long)]
    pub screenshots_dir: Option<PathBuf>,
}

/// Which app and version to work on
#[derive(Debug, Clone, Args)]
pub struct TargetArgs {
    /// App Store version ID [default: looked up from the Deliverfile's
    /// app_identifier, app_version and platform]
    #[arg(long, env = "ASC_VERSION_ID")]
    pub version_id: Option<String>,

    /// App ID, needed for app info localizations (name, subtitle, privacy URL)
    /// [default: looked up from the Deliverfile's app_identifier]
    #[arg(long, env = "ASC_APP_ID")]
    pub app_id: Option<String>,
}

/// Upload fastlane metadata and screenshots
#[derive(Debug, Args)]
pub struct ImportCommand {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub target: TargetArgs,

    /// Compute and report actions without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Skip text metadata
    #[arg(long)]
    pub skip_metadata: bool,

    /// Skip screenshots
    #[arg(long)]
    pub skip_screenshots: bool,
}

/// Write remote metadata to fastlane files
#[derive(Debug, Args)]
pub struct ExportCommand {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub target: TargetArgs,
}

/// Check fastlane metadata without network calls
#[derive(Debug, Args)]
pub struct ValidateCommand {
    #[command(flatten)]
    pub source: SourceArgs,
}

impl MigrateCommand {
    /// Execute the migrate command
    pub async fn execute(&self, cli: &Cli, cancel: &CancellationToken) -> anyhow::Result<()> {
        match &self.command {
            MigrateSubcommand::Import(cmd) => cmd.execute(cli, cancel).await,
            MigrateSubcommand::Export(cmd) => cmd.execute(cli, cancel).await,
            MigrateSubcommand::Validate(cmd) => cmd.execute(cli).await,
        }
    }
}

impl SourceArgs {
    /// Finds and parses the Deliverfile, then builds the resolve request.
    fn resolve_request(&self, cli: &Cli) -> anyhow::Result<ResolveRequest> {
        let workdir = cli.workdir()?;
        let deliverfile = match discover_deliverfile(&workdir, self.fastlane_dir.as_deref()) {
            Some(path) => {
                debug!(path = %path.display(), "using Deliverfile");
                Some(parse_deliverfile(&path)?)
            }
            None => None,
        };

        Ok(ResolveRequest {
            workdir,
            fastlane_dir: self.fastlane_dir.clone(),
            metadata_dir: self.metadata_dir.clone(),
            screenshots_dir: self.screenshots_dir.clone(),
            deliverfile,
        })
    }
}

impl TargetArgs {
    /// Flags first, then lookups from the Deliverfile.
    async fn resolve(
        &self,
        api: &dyn AppStoreApi,
        deliverfile: Option<&DeliverfileConfig>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Target> {
        let target = resolve_target(
            api,
            self.app_id.as_deref(),
            self.version_id.as_deref(),
            deliverfile,
            cancel,
        )
        .await?;
        Ok(target)
    }
}

fn connect_client(cli: &Cli) -> anyhow::Result<(ConnectClient, ConnectConfig)> {
    let config = ConnectConfig::load(cli.config.as_deref(), &cli.workdir()?)?;
    let client = ConnectClient::new(&config).context("failed to create App Store Connect client")?;
    Ok((client, config))
}

fn skip_flag(
    cli_flag: bool,
    deliverfile: Option<&DeliverfileConfig>,
    pick: fn(&DeliverfileConfig) -> Option<bool>,
) -> bool {
    cli_flag || deliverfile.and_then(pick).unwrap_or(false)
}

impl ImportCommand {
    async fn execute(&self, cli: &Cli, cancel: &CancellationToken) -> anyhow::Result<()> {
        let request = self.source.resolve_request(cli)?;
        let inputs = resolve_import_inputs(&request)?;
        let deliverfile = request.deliverfile.as_ref();
        let (client, config) = connect_client(cli)?;
        let target = self.target.resolve(&client, deliverfile, cancel).await?;

        let import = ImportRequest {
            version_id: target.version_id,
            app_id: target.app_id,
            inputs,
            skip_metadata: skip_flag(self.skip_metadata, deliverfile, |d| d.skip_metadata),
            skip_screenshots: skip_flag(self.skip_screenshots, deliverfile, |d| d.skip_screenshots),
            dry_run: self.dry_run,
            poll: config.upload,
        };

        info!(version_id = %import.version_id, dry_run = import.dry_run, "starting import");
        let report = run_import(&client, &import, cancel).await?;

        render_import(cli, &report)?;

        if !report.is_valid() {
            return Err(ValidationFailed(report.validation.error_count()).into());
        }
        Ok(())
    }
}

impl ExportCommand {
    async fn execute(&self, cli: &Cli, cancel: &CancellationToken) -> anyhow::Result<()> {
        let request = self.source.resolve_request(cli)?;
        let metadata_dir = export_metadata_dir(&request);
        let (client, _) = connect_client(cli)?;
        let target = self
            .target
            .resolve(&client, request.deliverfile.as_ref(), cancel)
            .await?;

        let export = ExportRequest {
            version_id: target.version_id,
            app_id: target.app_id,
        };

        info!(version_id = %export.version_id, dir = %metadata_dir.display(), "starting export");
        let report = export_metadata(&client, &export, &metadata_dir, cancel).await?;

        render_export(cli, &report)
    }
}

/// Result of an offline validation run
#[derive(Debug, Serialize)]
struct ValidateOutput {
    inputs: ImportInputs,
    validation: ValidationReport,
    screenshot_sets: Vec<ScreenshotPlan>,
    skipped: Vec<SkippedItem>,
}

impl ValidateCommand {
    async fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let request = self.source.resolve_request(cli)?;
        let inputs = resolve_import_inputs(&request)?;

        let mut validation = ValidationReport::default();
        let skipped = inputs.skipped.clone();
        if let Some(dir) = &inputs.metadata {
            let version = read_version_localizations(&dir.path).await?;
            let app_info = read_app_info_localizations(&dir.path).await?;
            // Surfaces malformed review files
            read_review_information(&dir.path).await?;
            validation = validate_localizations(&version, &app_info);
        }

        let mut screenshot_sets = Vec::new();
        if let Some(dir) = &inputs.screenshots {
            screenshot_sets = build_screenshot_plans(&dir.path)?;
        }

        let result = ValidateOutput {
            inputs,
            validation,
            screenshot_sets,
            skipped,
        };
        render_validate(cli, &result)?;

        if !result.validation.is_valid() {
            return Err(ValidationFailed(result.validation.error_count()).into());
        }
        Ok(())
    }
}

fn render_import(cli: &Cli, report: &ImportReport) -> anyhow::Result<()> {
    match cli.format {
        OutputFormat::Json => output::json(report),
        OutputFormat::Markdown => {
            let rows: Vec<Vec<String>> = report
                .localizations
                .iter()
                .map(|item| {
                    vec![
                        item.kind.to_string(),
                        item.locale.clone(),
                        item.field_count.to_string(),
                        item.action.to_string(),
                    ]
                })
                .collect();
            println!("{}", output::markdown_table(&["Kind", "Locale", "Fields", "Action"], &rows));

            let rows: Vec<Vec<String>> = report
                .screenshots
                .iter()
                .map(|item| {
                    vec![
                        item.locale.clone(),
                        item.display_type.to_string(),
                        item.file_name.clone(),
                        item.action.to_string(),
                        item.reason.clone().unwrap_or_default(),
                    ]
                })
                .collect();
            println!(
                "{}",
                output::markdown_table(&["Locale", "Display type", "File", "Action", "Reason"], &rows)
            );
            print_issues_markdown(&report.validation);
            Ok(())
        }
        OutputFormat::Text => {
            if cli.quiet {
                return Ok(());
            }
            let title = if report.dry_run { "Import (dry run)" } else { "Import" };
            println!("{}", output::header(title));
            print_inputs(&report.inputs);
            print_issues(&report.validation);

            if !report.is_valid() {
                output::error("Blocking validation issues, nothing was imported");
                return Ok(());
            }

            println!();
            println!(
                "{}",
                output::key_value(
                    "Localizations",
                    &format!(
                        "{} created, {} updated, {} unchanged",
                        report.localization_count(UploadAction::Create),
                        report.localization_count(UploadAction::Update),
                        report.localization_count(UploadAction::Skip),
                    )
                )
            );
            if let Some(review) = &report.review {
                println!("{}", output::key_value("Review information", &review.action.to_string()));
            }
            println!(
                "{}",
                output::key_value(
                    "Screenshots",
                    &format!(
                        "{} uploaded, {} skipped",
                        report.screenshot_count(UploadAction::Create),
                        report.screenshot_count(UploadAction::Skip),
                    )
                )
            );
            if cli.verbose {
                for item in &report.screenshots {
                    println!(
                        "    {} {}/{}/{}",
                        style(item.action).dim(),
                        item.locale,
                        item.display_type,
                        item.file_name
                    );
                }
            }
            print_skipped(&report.skipped);

            println!();
            if report.dry_run {
                output::info("Dry run, no changes were made");
            } else {
                output::success("Import complete");
            }
            Ok(())
        }
    }
}

fn render_export(cli: &Cli, report: &ExportReport) -> anyhow::Result<()> {
    match cli.format {
        OutputFormat::Json => output::json(report),
        OutputFormat::Markdown => {
            let rows: Vec<Vec<String>> = report
                .files
                .iter()
                .map(|f| vec![f.display().to_string()])
                .collect();
            println!("{}", output::markdown_table(&["File"], &rows));
            Ok(())
        }
        OutputFormat::Text => {
            if cli.quiet {
                return Ok(());
            }
            println!("{}", output::header("Export"));
            println!("{}", output::key_value("Directory", &report.metadata_dir.display().to_string()));
            println!("{}", output::key_value("Locales", &report.locales.join(", ")));
            println!("{}", output::key_value("Files", &report.files.len().to_string()));
            println!();
            output::success("Export complete");
            Ok(())
        }
    }
}

fn render_validate(cli: &Cli, result: &ValidateOutput) -> anyhow::Result<()> {
    match cli.format {
        OutputFormat::Json => output::json(result),
        OutputFormat::Markdown => {
            let rows: Vec<Vec<String>> = result
                .screenshot_sets
                .iter()
                .map(|plan| {
                    vec![
                        plan.locale.to_string(),
                        plan.display_type.to_string(),
                        plan.files.len().to_string(),
                    ]
                })
                .collect();
            println!("{}", output::markdown_table(&["Locale", "Display type", "Files"], &rows));
            print_issues_markdown(&result.validation);
            Ok(())
        }
        OutputFormat::Text => {
            if cli.quiet && result.validation.is_valid() {
                return Ok(());
            }
            println!("{}", output::header("Validate"));
            print_inputs(&result.inputs);
            println!(
                "{}",
                output::key_value("Screenshot sets", &result.screenshot_sets.len().to_string())
            );
            print_issues(&result.validation);
            print_skipped(&result.skipped);

            println!();
            if result.validation.is_valid() {
                output::success("Metadata is valid");
            } else {
                output::error(&format!(
                    "{} error(s), {} warning(s)",
                    result.validation.error_count(),
                    result.validation.warning_count()
                ));
            }
            Ok(())
        }
    }
}

fn print_inputs(inputs: &ImportInputs) {
    if let Some(path) = &inputs.deliverfile {
        println!("{}", output::key_value("Deliverfile", &path.display().to_string()));
    }
    for (label, dir) in [("Metadata", &inputs.metadata), ("Screenshots", &inputs.screenshots)] {
        if let Some(dir) = dir {
            println!(
                "{}",
                output::key_value(label, &format!("{} ({})", dir.path.display(), dir.source))
            );
        }
    }
}

fn print_issues(report: &ValidationReport) {
    if report.issues.is_empty() {
        return;
    }
    println!();
    for issue in report.errors() {
        println!("  {} {}", style("✗").red(), issue);
    }
    for issue in report.warnings() {
        println!("  {} {}", style("!").yellow(), issue);
    }
}

fn print_issues_markdown(report: &ValidationReport) {
    if report.issues.is_empty() {
        return;
    }
    let rows: Vec<Vec<String>> = report
        .issues
        .iter()
        .map(|issue| {
            vec![
                issue.severity.to_string(),
                issue.locale.clone(),
                issue.field.clone(),
                issue.message.clone(),
            ]
        })
        .collect();
    println!(
        "{}",
        output::markdown_table(&["Severity", "Locale", "Field", "Message"], &rows)
    );
}

fn print_skipped(skipped: &[SkippedItem]) {
    for item in skipped {
        output::warning(&format!("skipped {}: {}", item.path, item.reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Commands;
    use asc_connect::fake::FakeAppStore;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_skip_flag_merges_deliverfile() {
        let deliverfile = DeliverfileConfig {
            skip_screenshots: Some(true),
            ..Default::default()
        };
        assert!(skip_flag(false, Some(&deliverfile), |d| d.skip_screenshots));
        assert!(!skip_flag(false, Some(&deliverfile), |d| d.skip_metadata));
        assert!(skip_flag(true, None, |d| d.skip_metadata));
        assert!(!skip_flag(false, None, |d| d.skip_metadata));
    }

    #[test]
    fn test_resolve_request_reads_deliverfile() {
        let temp = tempfile::TempDir::new().unwrap();
        let fastlane = temp.path().join("fastlane");
        std::fs::create_dir_all(fastlane.join("meta")).unwrap();
        std::fs::write(fastlane.join("Deliverfile"), "metadata_path \"meta\"\n").unwrap();

        let cli = parse(&[
            "asc",
            "migrate",
            "validate",
            "--fastlane-dir",
            fastlane.to_str().unwrap(),
        ]);
        let Commands::Migrate(MigrateCommand {
            command: MigrateSubcommand::Validate(cmd),
        }) = &cli.command
        else {
            panic!("expected migrate validate");
        };

        let request = cmd.source.resolve_request(&cli).unwrap();
        let deliverfile = request.deliverfile.as_ref().unwrap();
        assert_eq!(deliverfile.metadata_dir(), Some(fastlane.join("meta")));
    }

    #[test]
    fn test_import_version_id_is_optional() {
        let cli = parse(&["asc", "migrate", "import", "--version-id", "v1", "--dry-run"]);
        let Commands::Migrate(MigrateCommand {
            command: MigrateSubcommand::Import(cmd),
        }) = &cli.command
        else {
            panic!("expected migrate import");
        };
        assert_eq!(cmd.target.version_id.as_deref(), Some("v1"));
        assert!(cmd.dry_run);

        std::env::remove_var("ASC_VERSION_ID");
        assert!(Cli::try_parse_from(["asc", "migrate", "export"]).is_ok());
    }

    #[tokio::test]
    async fn test_target_falls_back_to_deliverfile() {
        let api = FakeAppStore::new();
        let app = api.seed_app("com.example.app");
        let version = api.seed_app_store_version(&app, "2.1.0", "IOS");
        let deliverfile = DeliverfileConfig {
            app_identifier: Some("com.example.app".to_string()),
            app_version: Some("2.1.0".to_string()),
            platform: Some("ios".to_string()),
            ..Default::default()
        };
        let cancel = CancellationToken::new();

        let target = TargetArgs {
            version_id: None,
            app_id: None,
        }
        .resolve(&api, Some(&deliverfile), &cancel)
        .await
        .unwrap();
        assert_eq!(target.app_id, Some(app));
        assert_eq!(target.version_id, version);

        let target = TargetArgs {
            version_id: Some("explicit".to_string()),
            app_id: Some("app-explicit".to_string()),
        }
        .resolve(&api, Some(&deliverfile), &cancel)
        .await
        .unwrap();
        assert_eq!(target.version_id, "explicit");
        assert_eq!(api.calls("find_version_id"), 1);
    }
}
