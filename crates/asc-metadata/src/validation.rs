//! Length checks for localized metadata.
//!
//! Pure and offline. Lengths are counted in Unicode scalar values, which is
//! how App Store Connect counts characters.
//!
//! ## Example
//!
//! ```rust
//! use asc_metadata::validation::validate_localizations;
//!
//! let report = validate_localizations(&[], &[]);
//! assert!(report.is_valid());
//! ```

use std::fmt;

use serde::Serialize;

use crate::types::{AppInfoLocalization, VersionLocalization};

/// App name limit.
pub const NAME_MAX: usize = 30;
/// Subtitle limit.
pub const SUBTITLE_MAX: usize = 30;
/// Description limit.
pub const DESCRIPTION_MAX: usize = 4000;
/// Keywords limit (comma-separated, total).
pub const KEYWORDS_MAX: usize = 100;
/// What's new limit.
pub const WHATS_NEW_MAX: usize = 4000;
/// Promotional text limit.
pub const PROMOTIONAL_TEXT_MAX: usize = 170;

/// Validation issue severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Blocks the import.
    Error,
    /// Reported, never blocking.
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Warning => write!(f, "WARNING"),
        }
    }
}

/// A single rule violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub locale: String,
    pub field: String,
    pub severity: Severity,
    pub message: String,
    /// Observed length in characters
    pub length: Option<usize>,
    pub limit: Option<usize>,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}.{}: {}", self.severity, self.locale, self.field, self.message)
    }
}

/// All issues found in one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// Valid when no issue has error severity. Warnings do not count.
    pub fn is_valid(&self) -> bool {
        self.error_count() == 0
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings().count()
    }

    fn check_length(&mut self, locale: &str, field: &str, value: Option<&str>, limit: usize) {
        let Some(value) = value else { return };
        let length = value.chars().count();
        if length > limit {
            self.issues.push(ValidationIssue {
                locale: locale.to_string(),
                field: field.to_string(),
                severity: Severity::Error,
                message: format!("{} characters exceeds the limit of {}", length, limit),
                length: Some(length),
                limit: Some(limit),
            });
        }
    }
}

/// Checks field lengths of every localization.
pub fn validate_localizations(
    version: &[VersionLocalization],
    app_info: &[AppInfoLocalization],
) -> ValidationReport {
    let mut report = ValidationReport::default();

    for loc in version {
        let locale = loc.locale.as_str();
        let fields = &loc.fields;

        if fields.description.as_deref().map_or(true, str::is_empty) {
            report.issues.push(ValidationIssue {
                locale: locale.to_string(),
                field: "description".to_string(),
                severity: Severity::Warning,
                message: "description is empty".to_string(),
                length: Some(0),
                limit: Some(DESCRIPTION_MAX),
            });
        }

        report.check_length(locale, "description", fields.description.as_deref(), DESCRIPTION_MAX);
        report.check_length(locale, "keywords", fields.keywords.as_deref(), KEYWORDS_MAX);
        report.check_length(locale, "whats_new", fields.whats_new.as_deref(), WHATS_NEW_MAX);
        report.check_length(
            locale,
            "promotional_text",
            fields.promotional_text.as_deref(),
            PROMOTIONAL_TEXT_MAX,
        );
    }

    for loc in app_info {
        let locale = loc.locale.as_str();
        report.check_length(locale, "name", loc.fields.name.as_deref(), NAME_MAX);
        report.check_length(locale, "subtitle", loc.fields.subtitle.as_deref(), SUBTITLE_MAX);
    }

    report
}
