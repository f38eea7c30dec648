//! Local metadata records and per-item outcomes.

use std::path::PathBuf;

use asc_connect::{AppInfoLocalizationAttributes, ReviewDetailAttributes, VersionLocalizationAttributes};
use serde::Serialize;

use crate::locale::Locale;
use crate::screenshots::DisplayType;

/// Something a run deliberately left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedItem {
    pub path: String,
    pub reason: String,
}

impl SkippedItem {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Version-level text for one locale, as read from `metadata/<locale>/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionLocalization {
    pub locale: Locale,
    #[serde(flatten)]
    pub fields: VersionLocalizationAttributes,
}

/// App-level text for one locale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppInfoLocalization {
    pub locale: Locale,
    #[serde(flatten)]
    pub fields: AppInfoLocalizationAttributes,
}

/// Contents of `metadata/review_information/`. Every field is optional and
/// only the ones present take part in comparisons.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReviewInformation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub demo_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub demo_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub demo_account_required: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl ReviewInformation {
    /// Number of fields that are set.
    pub fn field_count(&self) -> usize {
        let text = [
            &self.first_name,
            &self.last_name,
            &self.phone_number,
            &self.email_address,
            &self.demo_user,
            &self.demo_password,
            &self.notes,
        ]
        .iter()
        .filter(|v| v.is_some())
        .count();
        text + usize::from(self.demo_account_required.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.field_count() == 0
    }

    pub fn to_attributes(&self) -> ReviewDetailAttributes {
        ReviewDetailAttributes {
            contact_first_name: self.first_name.clone(),
            contact_last_name: self.last_name.clone(),
            contact_phone: self.phone_number.clone(),
            contact_email: self.email_address.clone(),
            demo_account_name: self.demo_user.clone(),
            demo_account_password: self.demo_password.clone(),
            demo_account_required: self.demo_account_required,
            notes: self.notes.clone(),
        }
    }

    pub fn from_attributes(attributes: &ReviewDetailAttributes) -> Self {
        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
        Self {
            first_name: non_empty(&attributes.contact_first_name),
            last_name: non_empty(&attributes.contact_last_name),
            phone_number: non_empty(&attributes.contact_phone),
            email_address: non_empty(&attributes.contact_email),
            demo_user: non_empty(&attributes.demo_account_name),
            demo_password: non_empty(&attributes.demo_account_password),
            demo_account_required: attributes.demo_account_required,
            notes: non_empty(&attributes.notes),
        }
    }

    /// True if every field set here has the same value remotely. Unset
    /// local fields never cause a mismatch.
    pub fn matches(&self, remote: &ReviewDetailAttributes) -> bool {
        fn same(local: &Option<String>, remote: &Option<String>) -> bool {
            match local {
                Some(value) => remote.as_deref() == Some(value.as_str()),
                None => true,
            }
        }

        same(&self.first_name, &remote.contact_first_name)
            && same(&self.last_name, &remote.contact_last_name)
            && same(&self.phone_number, &remote.contact_phone)
            && same(&self.email_address, &remote.contact_email)
            && same(&self.demo_user, &remote.demo_account_name)
            && same(&self.demo_password, &remote.demo_account_password)
            && same(&self.notes, &remote.notes)
            && self
                .demo_account_required
                .map_or(true, |required| remote.demo_account_required == Some(required))
    }
}

/// Files to upload into one (locale, display type) screenshot set, in
/// upload order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScreenshotPlan {
    pub locale: Locale,
    pub display_type: DisplayType,
    pub files: Vec<PathBuf>,
}

/// What reconciliation did, or would do in a dry run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadAction {
    Create,
    Update,
    Skip,
}

impl std::fmt::Display for UploadAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadAction::Create => write!(f, "create"),
            UploadAction::Update => write!(f, "update"),
            UploadAction::Skip => write!(f, "skip"),
        }
    }
}

/// Which remote collection a localization belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalizationKind {
    Version,
    AppInfo,
}

impl std::fmt::Display for LocalizationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocalizationKind::Version => write!(f, "version"),
            LocalizationKind::AppInfo => write!(f, "app info"),
        }
    }
}

/// Outcome for one localization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalizationUploadItem {
    pub kind: LocalizationKind,
    pub locale: String,
    pub field_count: usize,
    pub action: UploadAction,
    /// `None` only for creates in a dry run
    pub remote_id: Option<String>,
}

/// Outcome for the review information resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewUploadItem {
    pub field_count: usize,
    pub action: UploadAction,
    pub remote_id: Option<String>,
}

/// Outcome for one screenshot file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScreenshotUploadItem {
    pub locale: String,
    pub display_type: DisplayType,
    pub file_name: String,
    pub action: UploadAction,
    pub asset_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_review_matches_only_specified_fields() {
        let local = ReviewInformation {
            email_address: Some("review@example.com".to_string()),
            demo_account_required: Some(false),
            ..Default::default()
        };
        let remote = ReviewDetailAttributes {
            contact_first_name: Some("Ada".to_string()),
            contact_email: Some("review@example.com".to_string()),
            demo_account_required: Some(false),
            notes: Some("anything".to_string()),
            ..Default::default()
        };
        assert!(local.matches(&remote));

        let changed = ReviewInformation {
            notes: Some("new notes".to_string()),
            ..local.clone()
        };
        assert!(!changed.matches(&remote));

        let required = ReviewInformation {
            demo_account_required: Some(true),
            ..Default::default()
        };
        assert!(!required.matches(&ReviewDetailAttributes::default()));
    }

    #[test]
    fn test_review_attribute_mapping() {
        let info = ReviewInformation {
            first_name: Some("Ada".to_string()),
            demo_user: Some("demo".to_string()),
            demo_account_required: Some(true),
            ..Default::default()
        };
        let attributes = info.to_attributes();
        assert_eq!(attributes.contact_first_name.as_deref(), Some("Ada"));
        assert_eq!(attributes.demo_account_name.as_deref(), Some("demo"));
        assert_eq!(ReviewInformation::from_attributes(&attributes), info);
        assert_eq!(info.field_count(), 3);
        assert!(ReviewInformation::default().is_empty());
    }

    #[test]
    fn test_localization_serializes_flat() {
        let loc = VersionLocalization {
            locale: Locale::parse("en_us").unwrap(),
            fields: VersionLocalizationAttributes {
                keywords: Some("a,b".to_string()),
                ..Default::default()
            },
        };
        let json = serde_json::to_value(&loc).unwrap();
        assert_eq!(json["locale"], "en-US");
        assert_eq!(json["keywords"], "a,b");
        assert!(json.get("description").is_none());
    }
}
