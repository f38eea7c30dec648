//! Flat-file readers for the fastlane `deliver` layout.
//!
//! ```text
//! metadata/
//! ├── default/                 # fills fields a locale leaves unset
//! ├── review_information/
//! │   ├── first_name.txt ... notes.txt
//! │   └── demo_account_required.txt (or demo_required.txt)
//! └── {locale}/
//!     ├── description.txt, keywords.txt, release_notes.txt
//!     ├── promotional_text.txt, support_url.txt, marketing_url.txt
//!     └── name.txt, subtitle.txt, privacy_url.txt
//! screenshots/
//! └── {locale}/**/*.png|jpg|jpeg
//! ```
//!
//! Symlinks are never followed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use asc_connect::{AppInfoLocalizationAttributes, VersionLocalizationAttributes};
use tokio::fs;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{MigrateError, Result};
use crate::locale::Locale;
use crate::screenshots::{classify_screenshot, DisplayType};
use crate::types::{AppInfoLocalization, ReviewInformation, ScreenshotPlan, VersionLocalization};

/// Directory names under `metadata/` and `screenshots/` that are not locales.
pub const RESERVED_DIRS: &[&str] = &[
    "default",
    "review_information",
    "trade_representative_contact_information",
];

pub const DEFAULT_DIR: &str = "default";
pub const REVIEW_DIR: &str = "review_information";

const SCREENSHOT_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Read a text file, trimmed. Missing and blank files are `None`; a symlink
/// is an error.
pub async fn read_text_file(path: &Path) -> Result<Option<String>> {
    match fs::symlink_metadata(path).await {
        Ok(meta) if meta.file_type().is_symlink() => {
            return Err(MigrateError::read(path, "refusing to follow symlink"));
        }
        Ok(meta) if !meta.is_file() => {
            return Err(MigrateError::read(path, "not a regular file"));
        }
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(MigrateError::read(path, e.to_string())),
    }

    let content = fs::read_to_string(path)
        .await
        .map_err(|e| MigrateError::read(path, e.to_string()))?;
    let trimmed = content.trim();
    Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
}

/// Locale directories directly under `dir`, sorted by normalized locale.
///
/// Reserved and hidden directories are skipped. Any other directory must
/// be named after a locale.
async fn locale_dirs(dir: &Path) -> Result<Vec<(Locale, PathBuf)>> {
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| MigrateError::read(dir, e.to_string()))?;

    let mut found: BTreeMap<Locale, PathBuf> = BTreeMap::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| MigrateError::read(dir, e.to_string()))?
    {
        let path = entry.path();
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| MigrateError::read(&path, e.to_string()))?;
        if file_type.is_symlink() {
            return Err(MigrateError::read(&path, "refusing to follow symlink"));
        }
        if !file_type.is_dir() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || RESERVED_DIRS.contains(&name.as_str()) {
            continue;
        }

        let locale = Locale::parse(&name)?;

        if let Some(previous) = found.get(&locale) {
            return Err(MigrateError::read(
                &path,
                format!(
                    "locale {} is also provided by {}",
                    locale,
                    previous.display()
                ),
            ));
        }
        found.insert(locale, path);
    }

    Ok(found.into_iter().collect())
}

async fn read_version_fields(dir: &Path) -> Result<VersionLocalizationAttributes> {
    Ok(VersionLocalizationAttributes {
        description: read_text_file(&dir.join("description.txt")).await?,
        keywords: read_text_file(&dir.join("keywords.txt")).await?,
        whats_new: read_text_file(&dir.join("release_notes.txt")).await?,
        promotional_text: read_text_file(&dir.join("promotional_text.txt")).await?,
        support_url: read_text_file(&dir.join("support_url.txt")).await?,
        marketing_url: read_text_file(&dir.join("marketing_url.txt")).await?,
    })
}

async fn read_app_info_fields(dir: &Path) -> Result<AppInfoLocalizationAttributes> {
    Ok(AppInfoLocalizationAttributes {
        name: read_text_file(&dir.join("name.txt")).await?,
        subtitle: read_text_file(&dir.join("subtitle.txt")).await?,
        privacy_policy_url: read_text_file(&dir.join("privacy_url.txt")).await?,
    })
}

fn or_default(value: Option<String>, fallback: &Option<String>) -> Option<String> {
    value.or_else(|| fallback.clone())
}

/// Reads every locale's version-level text. Locales with no version fields,
/// even after applying `default/`, are left out.
pub async fn read_version_localizations(metadata_dir: &Path) -> Result<Vec<VersionLocalization>> {
    let defaults = read_version_fields(&metadata_dir.join(DEFAULT_DIR)).await?;
    let mut localizations = Vec::new();

    for (locale, dir) in locale_dirs(metadata_dir).await? {
        let own = read_version_fields(&dir).await?;
        let fields = VersionLocalizationAttributes {
            description: or_default(own.description, &defaults.description),
            keywords: or_default(own.keywords, &defaults.keywords),
            whats_new: or_default(own.whats_new, &defaults.whats_new),
            promotional_text: or_default(own.promotional_text, &defaults.promotional_text),
            support_url: or_default(own.support_url, &defaults.support_url),
            marketing_url: or_default(own.marketing_url, &defaults.marketing_url),
        };

        if fields.field_count() == 0 {
            debug!(locale = %locale, "no version fields");
            continue;
        }
        localizations.push(VersionLocalization { locale, fields });
    }

    debug!(count = localizations.len(), "read version localizations");
    Ok(localizations)
}

/// Reads every locale's app-level text (name, subtitle, privacy URL).
pub async fn read_app_info_localizations(metadata_dir: &Path) -> Result<Vec<AppInfoLocalization>> {
    let defaults = read_app_info_fields(&metadata_dir.join(DEFAULT_DIR)).await?;
    let mut localizations = Vec::new();

    for (locale, dir) in locale_dirs(metadata_dir).await? {
        let own = read_app_info_fields(&dir).await?;
        let fields = AppInfoLocalizationAttributes {
            name: or_default(own.name, &defaults.name),
            subtitle: or_default(own.subtitle, &defaults.subtitle),
            privacy_policy_url: or_default(own.privacy_policy_url, &defaults.privacy_policy_url),
        };

        if fields.field_count() == 0 {
            continue;
        }
        localizations.push(AppInfoLocalization { locale, fields });
    }

    debug!(count = localizations.len(), "read app info localizations");
    Ok(localizations)
}

async fn read_bool_file(path: &Path) -> Result<Option<bool>> {
    let Some(value) = read_text_file(path).await? else {
        return Ok(None);
    };
    if value.eq_ignore_ascii_case("true") {
        Ok(Some(true))
    } else if value.eq_ignore_ascii_case("false") {
        Ok(Some(false))
    } else {
        Err(MigrateError::Parse {
            path: path.to_path_buf(),
            line: 1,
            message: format!("invalid boolean {:?}", value),
        })
    }
}

/// Reads `review_information/`. `None` when the directory is missing or
/// every file in it is absent or blank.
pub async fn read_review_information(metadata_dir: &Path) -> Result<Option<ReviewInformation>> {
    let dir = metadata_dir.join(REVIEW_DIR);
    match fs::symlink_metadata(&dir).await {
        Ok(meta) if meta.file_type().is_symlink() => {
            return Err(MigrateError::read(&dir, "refusing to follow symlink"));
        }
        Ok(meta) if meta.is_dir() => {}
        _ => return Ok(None),
    }

    let demo_account_required = match read_bool_file(&dir.join("demo_account_required.txt")).await? {
        Some(flag) => Some(flag),
        None => read_bool_file(&dir.join("demo_required.txt")).await?,
    };

    let info = ReviewInformation {
        first_name: read_text_file(&dir.join("first_name.txt")).await?,
        last_name: read_text_file(&dir.join("last_name.txt")).await?,
        phone_number: read_text_file(&dir.join("phone_number.txt")).await?,
        email_address: read_text_file(&dir.join("email_address.txt")).await?,
        demo_user: read_text_file(&dir.join("demo_user.txt")).await?,
        demo_password: read_text_file(&dir.join("demo_password.txt")).await?,
        demo_account_required,
        notes: read_text_file(&dir.join("notes.txt")).await?,
    };

    Ok((!info.is_empty()).then_some(info))
}

fn is_screenshot(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SCREENSHOT_EXTENSIONS.iter().any(|s| ext.eq_ignore_ascii_case(s)))
}

/// Scans `screenshots/<locale>/**` and groups image files by locale and
/// inferred display type. Plans come out sorted by locale then display type,
/// and files within a plan by file name.
pub fn build_screenshot_plans(screenshots_dir: &Path) -> Result<Vec<ScreenshotPlan>> {
    let mut groups: BTreeMap<(Locale, DisplayType), Vec<PathBuf>> = BTreeMap::new();
    let mut seen_locales: BTreeMap<Locale, PathBuf> = BTreeMap::new();

    let top = std::fs::read_dir(screenshots_dir)
        .map_err(|e| MigrateError::read(screenshots_dir, e.to_string()))?;

    for entry in top {
        let entry = entry.map_err(|e| MigrateError::read(screenshots_dir, e.to_string()))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| MigrateError::read(&path, e.to_string()))?;
        if file_type.is_symlink() {
            return Err(MigrateError::read(&path, "refusing to follow symlink"));
        }
        if !file_type.is_dir() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || RESERVED_DIRS.contains(&name.as_str()) {
            continue;
        }
        let locale = Locale::parse(&name)?;
        if let Some(previous) = seen_locales.insert(locale.clone(), path.clone()) {
            return Err(MigrateError::read(
                &path,
                format!("locale {} is also provided by {}", locale, previous.display()),
            ));
        }

        for item in WalkDir::new(&path).follow_links(false).sort_by_file_name() {
            let item = item.map_err(|e| MigrateError::read(&path, e.to_string()))?;
            if item.path_is_symlink() {
                return Err(MigrateError::read(item.path(), "refusing to follow symlink"));
            }
            if !item.file_type().is_file() || !is_screenshot(item.path()) {
                continue;
            }

            let display_type = classify_screenshot(item.path())?;
            debug!(locale = %locale, display_type = %display_type, file = %item.path().display(), "planned screenshot");
            groups
                .entry((locale.clone(), display_type))
                .or_default()
                .push(item.into_path());
        }
    }

    Ok(groups
        .into_iter()
        .map(|((locale, display_type), mut files)| {
            files.sort_by(|a, b| a.file_name().cmp(&b.file_name()).then_with(|| a.cmp(b)));
            ScreenshotPlan {
                locale,
                display_type,
                files,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn png(root: &Path, rel: &str, width: u32, height: u32) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        image::RgbImage::new(width, height).save(path).unwrap();
    }

    #[tokio::test]
    async fn test_read_version_localizations() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root, "en-US/description.txt", "  An app.\n");
        write(root, "en-US/keywords.txt", "one,two");
        write(root, "en-US/name.txt", "Example");
        write(root, "de_de/release_notes.txt", "Fehlerbehebungen");
        write(root, "fr-FR/name.txt", "Exemple");
        write(root, "review_information/notes.txt", "n/a");

        let locs = read_version_localizations(root).await.unwrap();
        let locales: Vec<_> = locs.iter().map(|l| l.locale.as_str()).collect();
        assert_eq!(locales, vec!["de-DE", "en-US"]);

        let en = &locs[1];
        assert_eq!(en.fields.description.as_deref(), Some("An app."));
        assert_eq!(en.fields.keywords.as_deref(), Some("one,two"));
        assert_eq!(en.fields.whats_new, None);
        assert_eq!(locs[0].fields.whats_new.as_deref(), Some("Fehlerbehebungen"));
    }

    #[tokio::test]
    async fn test_directory_that_is_not_a_locale_rejected() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root, "en-US/description.txt", "An app.");
        write(root, "not a locale/description.txt", "stray");

        let err = read_version_localizations(root).await.unwrap_err();
        match err {
            MigrateError::InvalidLocale { input } => assert_eq!(input, "not a locale"),
            other => panic!("expected invalid locale, got {:?}", other),
        }
    }

    #[test]
    fn test_screenshot_directory_that_is_not_a_locale_rejected() {
        let temp = TempDir::new().unwrap();
        png(temp.path(), "x/iphone65_1.png", 1242, 2688);

        let err = build_screenshot_plans(temp.path()).unwrap_err();
        assert!(matches!(err, MigrateError::InvalidLocale { .. }));
    }

    #[tokio::test]
    async fn test_default_locale_fills_gaps() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root, "default/support_url.txt", "https://example.com/support");
        write(root, "default/name.txt", "Default Name");
        write(root, "en-US/description.txt", "English");
        write(root, "en-US/support_url.txt", "https://example.com/en");
        write(root, "ja/description.txt", "Japanese");

        let locs = read_version_localizations(root).await.unwrap();
        assert_eq!(locs.len(), 2);
        assert_eq!(locs[0].fields.support_url.as_deref(), Some("https://example.com/en"));
        assert_eq!(locs[1].locale.as_str(), "ja");
        assert_eq!(locs[1].fields.support_url.as_deref(), Some("https://example.com/support"));

        let infos = read_app_info_localizations(root).await.unwrap();
        assert_eq!(infos.len(), 2);
        assert!(infos.iter().all(|i| i.fields.name.as_deref() == Some("Default Name")));
    }

    #[tokio::test]
    async fn test_blank_file_is_unset() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "blank.txt", "  \n\n");
        assert_eq!(read_text_file(&temp.path().join("blank.txt")).await.unwrap(), None);
        assert_eq!(read_text_file(&temp.path().join("missing.txt")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_locale_spellings_rejected() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "en-US/description.txt", "a");
        write(temp.path(), "en_us/description.txt", "b");
        let err = read_version_localizations(temp.path()).await.unwrap_err();
        assert!(matches!(err, MigrateError::Read { .. }));
    }

    #[tokio::test]
    async fn test_read_review_information() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        assert_eq!(read_review_information(root).await.unwrap(), None);

        write(root, "review_information/first_name.txt", "Ada");
        write(root, "review_information/email_address.txt", "ada@example.com");
        write(root, "review_information/demo_required.txt", "TRUE");
        let info = read_review_information(root).await.unwrap().unwrap();
        assert_eq!(info.first_name.as_deref(), Some("Ada"));
        assert_eq!(info.email_address.as_deref(), Some("ada@example.com"));
        assert_eq!(info.demo_account_required, Some(true));
        assert_eq!(info.notes, None);

        write(root, "review_information/demo_account_required.txt", "sometimes");
        let err = read_review_information(root).await.unwrap_err();
        assert!(matches!(err, MigrateError::Parse { line: 1, .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_file_refused() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "outside.txt", "secret");
        std::fs::create_dir_all(temp.path().join("en-US")).unwrap();
        std::os::unix::fs::symlink(
            temp.path().join("outside.txt"),
            temp.path().join("en-US/description.txt"),
        )
        .unwrap();

        let err = read_version_localizations(temp.path()).await.unwrap_err();
        assert!(err.to_string().contains("symlink"));
    }

    #[test]
    fn test_build_screenshot_plans() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        png(root, "en-US/02.png", 1242, 2688);
        png(root, "en-US/01.png", 2688, 1242);
        png(root, "en-US/ipad/01.png", 2048, 2732);
        png(root, "de-DE/iPhone 6.5-home.jpg", 10, 10);
        write(root, "en-US/README.txt", "not an image");
        png(root, "default/01.png", 1242, 2688);

        let plans = build_screenshot_plans(root).unwrap();
        let summary: Vec<_> = plans
            .iter()
            .map(|p| (p.locale.as_str(), p.display_type.as_str(), p.files.len()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("de-DE", "APP_IPHONE_65", 1),
                ("en-US", "APP_IPHONE_65", 2),
                ("en-US", "APP_IPAD_PRO_3GEN_129", 1),
            ]
        );

        let names: Vec<_> = plans[1]
            .files
            .iter()
            .map(|f| f.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["01.png", "02.png"]);
    }

    #[test]
    fn test_unclassifiable_screenshot_fails() {
        let temp = TempDir::new().unwrap();
        png(temp.path(), "en-US/odd.png", 33, 44);
        let err = build_screenshot_plans(temp.path()).unwrap_err();
        assert!(matches!(err, MigrateError::ClassificationFailed { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_screenshot_refused() {
        let temp = TempDir::new().unwrap();
        png(temp.path(), "real.png", 1242, 2688);
        std::fs::create_dir_all(temp.path().join("en-US")).unwrap();
        std::os::unix::fs::symlink(temp.path().join("real.png"), temp.path().join("en-US/01.png"))
            .unwrap();
        let err = build_screenshot_plans(temp.path()).unwrap_err();
        assert!(err.to_string().contains("symlink"));
    }
}
