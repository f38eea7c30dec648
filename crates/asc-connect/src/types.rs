//! Resource types exchanged with App Store Connect

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Text attributes of an App Store version localization.
///
/// Every field is optional: `None` means "leave the remote value alone" when
/// sending and "unset" when receiving.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionLocalizationAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whats_new: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotional_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketing_url: Option<String>,
}

impl VersionLocalizationAttributes {
    /// Number of fields that carry a non-empty value.
    pub fn field_count(&self) -> usize {
        [
            &self.description,
            &self.keywords,
            &self.whats_new,
            &self.promotional_text,
            &self.support_url,
            &self.marketing_url,
        ]
        .iter()
        .filter(|v| v.as_deref().is_some_and(|s| !s.is_empty()))
        .count()
    }
}

/// A version localization as it exists remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionLocalization {
    pub id: String,
    pub locale: String,
    pub attributes: VersionLocalizationAttributes,
}

/// Text attributes of an app-info localization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfoLocalizationAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy_policy_url: Option<String>,
}

impl AppInfoLocalizationAttributes {
    /// Number of fields that carry a non-empty value.
    pub fn field_count(&self) -> usize {
        [&self.name, &self.subtitle, &self.privacy_policy_url]
            .iter()
            .filter(|v| v.as_deref().is_some_and(|s| !s.is_empty()))
            .count()
    }
}

/// An app-info localization as it exists remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfoLocalization {
    pub id: String,
    pub locale: String,
    pub attributes: AppInfoLocalizationAttributes,
}

/// An app-info resource. An app usually has one live and at most one
/// editable app info.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    pub id: String,
    /// `appStoreState` as reported by the API
    pub state: Option<String>,
}

/// App review contact and demo account attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewDetailAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demo_account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demo_account_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demo_account_required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// The review detail attached to an App Store version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewDetail {
    pub id: String,
    pub attributes: ReviewDetailAttributes,
}

/// A screenshot set: one display type under one version localization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenshotSet {
    pub id: String,
    pub display_type: String,
}

/// One HTTP header an upload operation must carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpHeader {
    pub name: String,
    pub value: String,
}

/// Describes one chunk of an asset upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOperation {
    pub method: String,
    pub url: String,
    pub offset: u64,
    pub length: u64,
    #[serde(default)]
    pub request_headers: Vec<HttpHeader>,
}

/// An error or warning attached to an asset delivery state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetStateError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default, alias = "message")]
    pub description: Option<String>,
}

/// Processing state of an uploaded asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDeliveryState {
    pub state: String,
    #[serde(default)]
    pub errors: Vec<AssetStateError>,
    #[serde(default)]
    pub warnings: Vec<AssetStateError>,
}

impl AssetDeliveryState {
    pub const COMPLETE: &'static str = "COMPLETE";
    pub const FAILED: &'static str = "FAILED";

    pub fn is_complete(&self) -> bool {
        self.state == Self::COMPLETE
    }

    pub fn is_failed(&self) -> bool {
        self.state == Self::FAILED
    }

    /// Human-readable failure text: `code: description` pairs joined with
    /// `; `, or "unknown error" when the remote sent none.
    pub fn failure_detail(&self) -> String {
        let parts: Vec<String> = self
            .errors
            .iter()
            .filter_map(|e| match (e.code.as_deref(), e.description.as_deref()) {
                (Some(code), Some(desc)) if !code.is_empty() && !desc.is_empty() => {
                    Some(format!("{}: {}", code, desc))
                }
                (Some(code), _) if !code.is_empty() => Some(code.to_string()),
                (_, Some(desc)) if !desc.is_empty() => Some(desc.to_string()),
                _ => None,
            })
            .collect();

        if parts.is_empty() {
            "unknown error".to_string()
        } else {
            parts.join("; ")
        }
    }
}

/// A screenshot resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Screenshot {
    pub id: String,
    pub file_name: String,
    pub file_size: u64,
    /// Present on reservation responses
    pub upload_operations: Vec<UploadOperation>,
    pub delivery_state: Option<AssetDeliveryState>,
}

/// Notarization status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotarizationStatus {
    /// Submitted, waiting for processing
    InProgress,
    /// Successfully notarized
    Accepted,
    /// Notarization failed
    Invalid,
    /// Rejected
    Rejected,
}

impl NotarizationStatus {
    /// Maps the status string printed by `notarytool`.
    pub fn from_notarytool(value: &str) -> Self {
        match value {
            "Accepted" => Self::Accepted,
            "Invalid" => Self::Invalid,
            "Rejected" => Self::Rejected,
            _ => Self::InProgress,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl std::fmt::Display for NotarizationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotarizationStatus::InProgress => write!(f, "In Progress"),
            NotarizationStatus::Accepted => write!(f, "Accepted"),
            NotarizationStatus::Invalid => write!(f, "Invalid"),
            NotarizationStatus::Rejected => write!(f, "Rejected"),
        }
    }
}

/// Notarization result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotarizationResult {
    /// Submission ID
    pub submission_id: String,

    /// Status
    pub status: NotarizationStatus,

    /// Status message from the notary service, if any
    pub message: Option<String>,

    /// When this status was observed
    pub timestamp: DateTime<Utc>,
}
