//! Export remote metadata into the fastlane layout.
//!
//! One file per non-empty field. An empty remote value removes the field's
//! file, so the next import reads the field as unset.

use std::path::{Path, PathBuf};

use asc_connect::{AppInfoLocalizationAttributes, AppStoreApi, VersionLocalizationAttributes};
use serde::Serialize;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{MigrateError, Result};
use crate::locale::Locale;
use crate::readers::REVIEW_DIR;
use crate::reconcile::cancellable;
use crate::select::select_app_info;
use crate::types::ReviewInformation;

/// What to export.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub version_id: String,
    /// Needed for app-info localizations; without it only version text and
    /// review information are written.
    pub app_id: Option<String>,
}

/// Files written by an export.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportReport {
    pub metadata_dir: PathBuf,
    pub locales: Vec<String>,
    pub files: Vec<PathBuf>,
}

struct Writer {
    files: Vec<PathBuf>,
}

impl Writer {
    async fn field(&mut self, dir: &Path, file: &str, value: Option<&str>) -> Result<()> {
        let path = dir.join(file);
        let write_err = |e: std::io::Error| MigrateError::Write {
            path: path.clone(),
            message: e.to_string(),
        };

        let Some(value) = value.filter(|v| !v.trim().is_empty()) else {
            return match fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(file = %path.display(), "removed cleared field");
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(write_err(e)),
            };
        };

        fs::create_dir_all(dir).await.map_err(write_err)?;
        fs::write(&path, value).await.map_err(write_err)?;
        debug!(file = %path.display(), "wrote field");
        self.files.push(path);
        Ok(())
    }

    async fn version_fields(&mut self, dir: &Path, fields: &VersionLocalizationAttributes) -> Result<()> {
        self.field(dir, "description.txt", fields.description.as_deref()).await?;
        self.field(dir, "keywords.txt", fields.keywords.as_deref()).await?;
        self.field(dir, "release_notes.txt", fields.whats_new.as_deref()).await?;
        self.field(dir, "promotional_text.txt", fields.promotional_text.as_deref()).await?;
        self.field(dir, "support_url.txt", fields.support_url.as_deref()).await?;
        self.field(dir, "marketing_url.txt", fields.marketing_url.as_deref()).await
    }

    async fn app_info_fields(&mut self, dir: &Path, fields: &AppInfoLocalizationAttributes) -> Result<()> {
        self.field(dir, "name.txt", fields.name.as_deref()).await?;
        self.field(dir, "subtitle.txt", fields.subtitle.as_deref()).await?;
        self.field(dir, "privacy_url.txt", fields.privacy_policy_url.as_deref()).await
    }

    async fn review(&mut self, dir: &Path, info: &ReviewInformation) -> Result<()> {
        self.field(dir, "first_name.txt", info.first_name.as_deref()).await?;
        self.field(dir, "last_name.txt", info.last_name.as_deref()).await?;
        self.field(dir, "phone_number.txt", info.phone_number.as_deref()).await?;
        self.field(dir, "email_address.txt", info.email_address.as_deref()).await?;
        self.field(dir, "demo_user.txt", info.demo_user.as_deref()).await?;
        self.field(dir, "demo_password.txt", info.demo_password.as_deref()).await?;
        self.field(dir, "notes.txt", info.notes.as_deref()).await?;
        let required = info.demo_account_required.map(|b| b.to_string());
        self.field(dir, "demo_account_required.txt", required.as_deref()).await?;
        // Older layouts spell it demo_required.txt; the reader falls back to it
        self.field(dir, "demo_required.txt", None).await
    }
}

fn locale_dir(metadata_dir: &Path, remote_locale: &str) -> Option<(Locale, PathBuf)> {
    match Locale::parse(remote_locale) {
        Ok(locale) => {
            let dir = metadata_dir.join(locale.as_str());
            Some((locale, dir))
        }
        Err(e) => {
            warn!(locale = remote_locale, error = %e, "skipping remote localization");
            None
        }
    }
}

/// Writes the version's localizations, the app's editable app-info
/// localizations and the review information under `metadata_dir`.
pub async fn export_metadata(
    api: &dyn AppStoreApi,
    request: &ExportRequest,
    metadata_dir: &Path,
    cancel: &CancellationToken,
) -> Result<ExportReport> {
    let mut writer = Writer { files: Vec::new() };
    let mut locales: Vec<String> = Vec::new();
    let mut note_locale = |locale: &Locale| {
        if !locales.iter().any(|l| l == locale.as_str()) {
            locales.push(locale.to_string());
        }
    };

    let version_locs = cancellable(
        cancel,
        "list version localizations",
        &request.version_id,
        api.list_version_localizations(&request.version_id),
    )
    .await?;
    for loc in &version_locs {
        if let Some((locale, dir)) = locale_dir(metadata_dir, &loc.locale) {
            writer.version_fields(&dir, &loc.attributes).await?;
            note_locale(&locale);
        }
    }

    if let Some(app_id) = &request.app_id {
        let infos = cancellable(cancel, "list app infos", app_id, api.list_app_infos(app_id)).await?;
        match select_app_info(&infos) {
            Some(app_info) => {
                let app_locs = cancellable(
                    cancel,
                    "list app info localizations",
                    &app_info.id,
                    api.list_app_info_localizations(&app_info.id),
                )
                .await?;
                for loc in &app_locs {
                    if let Some((locale, dir)) = locale_dir(metadata_dir, &loc.locale) {
                        writer.app_info_fields(&dir, &loc.attributes).await?;
                        note_locale(&locale);
                    }
                }
            }
            None => warn!(app_id = %app_id, "app has no app info"),
        }
    }

    let review = cancellable(
        cancel,
        "get review information",
        &request.version_id,
        api.get_review_detail(&request.version_id),
    )
    .await?;
    // No remote review detail clears every review file
    let info = review
        .map(|detail| ReviewInformation::from_attributes(&detail.attributes))
        .unwrap_or_default();
    writer.review(&metadata_dir.join(REVIEW_DIR), &info).await?;

    locales.sort();
    info!(
        dir = %metadata_dir.display(),
        locales = locales.len(),
        files = writer.files.len(),
        "exported metadata"
    );
    Ok(ExportReport {
        metadata_dir: metadata_dir.to_path_buf(),
        locales,
        files: writer.files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readers::{read_app_info_localizations, read_review_information, read_version_localizations};
    use asc_connect::fake::FakeAppStore;
    use asc_connect::{AppStoreApi, ReviewDetailAttributes};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_export_writes_non_empty_fields() {
        let api = FakeAppStore::new();
        api.seed_version_localization(
            "v1",
            "en-US",
            VersionLocalizationAttributes {
                description: Some("Hello".to_string()),
                keywords: Some(String::new()),
                whats_new: Some("Bug fixes".to_string()),
                ..Default::default()
            },
        );
        let info = api.seed_app_info("app", Some("PREPARE_FOR_SUBMISSION"));
        api.seed_app_info_localization(
            &info.id,
            "en_us",
            AppInfoLocalizationAttributes {
                name: Some("Example".to_string()),
                ..Default::default()
            },
        );
        api.seed_review_detail(
            "v1",
            ReviewDetailAttributes {
                contact_email: Some("review@example.com".to_string()),
                demo_account_required: Some(false),
                ..Default::default()
            },
        );

        let temp = TempDir::new().unwrap();
        let request = ExportRequest {
            version_id: "v1".to_string(),
            app_id: Some("app".to_string()),
        };
        let report = export_metadata(&api, &request, temp.path(), &CancellationToken::new()).await.unwrap();
        assert_eq!(report.locales, vec!["en-US"]);
        assert_eq!(report.files.len(), 5);

        let en = temp.path().join("en-US");
        assert_eq!(std::fs::read_to_string(en.join("description.txt")).unwrap(), "Hello");
        assert!(!en.join("keywords.txt").exists());
        assert!(!en.join("promotional_text.txt").exists());
        assert_eq!(std::fs::read_to_string(en.join("name.txt")).unwrap(), "Example");
        assert_eq!(
            std::fs::read_to_string(temp.path().join("review_information/demo_account_required.txt"))
                .unwrap(),
            "false"
        );
        assert_eq!(api.writes(), 0);
    }

    #[tokio::test]
    async fn test_export_then_read_back() {
        let api = FakeAppStore::new();
        let attributes = VersionLocalizationAttributes {
            description: Some("Beschreibung".to_string()),
            support_url: Some("https://example.com/de".to_string()),
            ..Default::default()
        };
        api.seed_version_localization("v1", "de-DE", attributes.clone());
        api.seed_review_detail(
            "v1",
            ReviewDetailAttributes {
                contact_first_name: Some("Ada".to_string()),
                ..Default::default()
            },
        );

        let temp = TempDir::new().unwrap();
        let request = ExportRequest {
            version_id: "v1".to_string(),
            app_id: None,
        };
        export_metadata(&api, &request, temp.path(), &CancellationToken::new()).await.unwrap();

        let locs = read_version_localizations(temp.path()).await.unwrap();
        assert_eq!(locs.len(), 1);
        assert_eq!(locs[0].locale.as_str(), "de-DE");
        assert_eq!(locs[0].fields, attributes);
        assert!(read_app_info_localizations(temp.path()).await.unwrap().is_empty());

        let review = read_review_information(temp.path()).await.unwrap().unwrap();
        assert_eq!(review.first_name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn test_reexport_removes_cleared_fields() {
        let api = FakeAppStore::new();
        let loc = api.seed_version_localization(
            "v1",
            "en-US",
            VersionLocalizationAttributes {
                description: Some("Hello".to_string()),
                keywords: Some("old,kw".to_string()),
                ..Default::default()
            },
        );
        api.seed_review_detail(
            "v1",
            ReviewDetailAttributes {
                notes: Some("Use the demo account".to_string()),
                demo_account_required: Some(true),
                ..Default::default()
            },
        );

        let temp = TempDir::new().unwrap();
        let request = ExportRequest {
            version_id: "v1".to_string(),
            app_id: None,
        };
        let cancel = CancellationToken::new();
        export_metadata(&api, &request, temp.path(), &cancel).await.unwrap();
        assert!(temp.path().join("en-US/keywords.txt").exists());

        api.update_version_localization(
            &loc.id,
            &VersionLocalizationAttributes {
                keywords: Some(String::new()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let review = api.review_detail("v1").unwrap();
        api.update_review_detail(
            &review.id,
            &ReviewDetailAttributes {
                notes: Some("  ".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let report = export_metadata(&api, &request, temp.path(), &cancel).await.unwrap();
        assert!(!temp.path().join("en-US/keywords.txt").exists());
        assert!(!report.files.iter().any(|f| f.ends_with("keywords.txt")));

        let locs = read_version_localizations(temp.path()).await.unwrap();
        assert_eq!(locs[0].fields.keywords, None);
        assert_eq!(locs[0].fields.description.as_deref(), Some("Hello"));

        let review = read_review_information(temp.path()).await.unwrap().unwrap();
        assert_eq!(review.notes, None);
        assert_eq!(review.demo_account_required, Some(true));
    }

    #[tokio::test]
    async fn test_export_without_review_detail_clears_review_files() {
        let api = FakeAppStore::new();
        let temp = TempDir::new().unwrap();
        let review_dir = temp.path().join(REVIEW_DIR);
        std::fs::create_dir_all(&review_dir).unwrap();
        std::fs::write(review_dir.join("first_name.txt"), "Stale").unwrap();
        std::fs::write(review_dir.join("demo_required.txt"), "true").unwrap();

        let request = ExportRequest {
            version_id: "v1".to_string(),
            app_id: None,
        };
        export_metadata(&api, &request, temp.path(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(read_review_information(temp.path()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_export_canceled() {
        let api = FakeAppStore::new();
        api.seed_version_localization("v1", "en-US", VersionLocalizationAttributes::default());
        let temp = TempDir::new().unwrap();
        let request = ExportRequest {
            version_id: "v1".to_string(),
            app_id: None,
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = export_metadata(&api, &request, temp.path(), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_canceled());
        assert_eq!(api.calls("list_version_localizations"), 0);
    }

    #[tokio::test]
    async fn test_export_remote_failure() {
        let api = FakeAppStore::new();
        api.fail_on("list_version_localizations");
        let temp = TempDir::new().unwrap();
        let request = ExportRequest {
            version_id: "v1".to_string(),
            app_id: None,
        };
        let err = export_metadata(&api, &request, temp.path(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, MigrateError::RemoteFailure { .. }));
    }
}
