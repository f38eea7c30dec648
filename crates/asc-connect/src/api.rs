//! The App Store Connect contract used by the migration engine

use crate::error::Result;
use crate::types::*;
use async_trait::async_trait;
use std::path::Path;

/// Remote operations needed to reconcile metadata and upload screenshots.
///
/// Implemented by [`crate::client::ConnectClient`] against the real API and
/// by `FakeAppStore` for tests.
#[async_trait]
pub trait AppStoreApi: Send + Sync {
    // Lookups by the identifiers a Deliverfile carries

    /// App ID for a bundle identifier, if an app has it.
    async fn find_app_id(&self, bundle_id: &str) -> Result<Option<String>>;

    /// App Store version ID for a version string. `platform` uses the API's
    /// spelling (`IOS`, `MAC_OS`, ...); `None` matches any platform.
    async fn find_version_id(
        &self,
        app_id: &str,
        version_string: &str,
        platform: Option<&str>,
    ) -> Result<Option<String>>;

    // Version localizations, scoped by App Store version ID

    async fn list_version_localizations(&self, version_id: &str)
        -> Result<Vec<VersionLocalization>>;

    async fn create_version_localization(
        &self,
        version_id: &str,
        locale: &str,
        attributes: &VersionLocalizationAttributes,
    ) -> Result<VersionLocalization>;

    async fn update_version_localization(
        &self,
        localization_id: &str,
        attributes: &VersionLocalizationAttributes,
    ) -> Result<VersionLocalization>;

    // App infos and their localizations, scoped by app ID

    async fn list_app_infos(&self, app_id: &str) -> Result<Vec<AppInfo>>;

    async fn list_app_info_localizations(
        &self,
        app_info_id: &str,
    ) -> Result<Vec<AppInfoLocalization>>;

    async fn create_app_info_localization(
        &self,
        app_info_id: &str,
        locale: &str,
        attributes: &AppInfoLocalizationAttributes,
    ) -> Result<AppInfoLocalization>;

    async fn update_app_info_localization(
        &self,
        localization_id: &str,
        attributes: &AppInfoLocalizationAttributes,
    ) -> Result<AppInfoLocalization>;

    // Review detail, at most one per version

    async fn get_review_detail(&self, version_id: &str) -> Result<Option<ReviewDetail>>;

    async fn create_review_detail(
        &self,
        version_id: &str,
        attributes: &ReviewDetailAttributes,
    ) -> Result<ReviewDetail>;

    async fn update_review_detail(
        &self,
        review_detail_id: &str,
        attributes: &ReviewDetailAttributes,
    ) -> Result<ReviewDetail>;

    // Screenshot sets and screenshots, scoped by version localization ID

    async fn list_screenshot_sets(&self, localization_id: &str) -> Result<Vec<ScreenshotSet>>;

    async fn create_screenshot_set(
        &self,
        localization_id: &str,
        display_type: &str,
    ) -> Result<ScreenshotSet>;

    async fn list_screenshots(&self, set_id: &str) -> Result<Vec<Screenshot>>;

    /// Creates the screenshot resource and returns its upload operations.
    async fn reserve_screenshot(
        &self,
        set_id: &str,
        file_name: &str,
        file_size: u64,
    ) -> Result<Screenshot>;

    /// Marks the screenshot as uploaded with its MD5 checksum.
    async fn commit_screenshot(&self, screenshot_id: &str, checksum: &str) -> Result<Screenshot>;

    /// Fetches a screenshot including its delivery state.
    async fn get_screenshot(&self, screenshot_id: &str) -> Result<Screenshot>;

    /// Sends the file's bytes according to the upload operations.
    async fn upload_asset(&self, operations: &[UploadOperation], path: &Path) -> Result<()>;
}
