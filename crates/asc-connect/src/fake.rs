//! In-memory App Store Connect for tests
//!
//! Keeps resources in plain vectors, hands out sequential IDs
//! (`version-loc-1`, `screenshot-3`, ...) and counts every call so tests can
//! assert which writes happened.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::api::AppStoreApi;
use crate::error::{ConnectError, Result};
use crate::types::*;

#[derive(Default)]
struct State {
    next_id: u64,
    apps: Vec<(String, String)>,
    app_store_versions: Vec<AppStoreVersionRecord>,
    version_localizations: Vec<(String, VersionLocalization)>,
    app_infos: Vec<(String, AppInfo)>,
    app_info_localizations: Vec<(String, AppInfoLocalization)>,
    review_details: Vec<(String, ReviewDetail)>,
    screenshot_sets: Vec<(String, ScreenshotSet)>,
    screenshots: Vec<(String, Screenshot)>,
    delivery_script: VecDeque<AssetDeliveryState>,
    delivery_fallback: Option<AssetDeliveryState>,
    reserve_without_operations: bool,
    failing: HashSet<String>,
    calls: HashMap<&'static str, usize>,
}

struct AppStoreVersionRecord {
    app_id: String,
    id: String,
    version_string: String,
    platform: String,
}

impl State {
    fn next_id(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", kind, self.next_id)
    }

    fn record(&mut self, call: &'static str) -> Result<()> {
        *self.calls.entry(call).or_default() += 1;
        if self.failing.contains(call) {
            return Err(ConnectError::Api {
                status: 500,
                message: format!("{} failed", call),
            });
        }
        Ok(())
    }

    fn count(&self, call: &str) -> usize {
        self.calls.get(call).copied().unwrap_or(0)
    }
}

/// In-memory [`AppStoreApi`].
#[derive(Default)]
pub struct FakeAppStore {
    state: Mutex<State>,
}

fn not_found(kind: &str, id: &str) -> ConnectError {
    ConnectError::Api {
        status: 404,
        message: format!("{} {} not found", kind, id),
    }
}

/// Calls that change remote state.
const WRITE_CALLS: &[&str] = &[
    "create_version_localization",
    "update_version_localization",
    "create_app_info_localization",
    "update_app_info_localization",
    "create_review_detail",
    "update_review_detail",
    "create_screenshot_set",
    "reserve_screenshot",
    "upload_asset",
    "commit_screenshot",
];

impl FakeAppStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // Seeding

    /// Registers an app under `bundle_id` and returns its ID.
    pub fn seed_app(&self, bundle_id: &str) -> String {
        let mut state = self.state();
        let id = state.next_id("app");
        state.apps.push((id.clone(), bundle_id.to_string()));
        id
    }

    /// Adds an App Store version to an app and returns its ID.
    pub fn seed_app_store_version(&self, app_id: &str, version_string: &str, platform: &str) -> String {
        let mut state = self.state();
        let id = state.next_id("version");
        state.app_store_versions.push(AppStoreVersionRecord {
            app_id: app_id.to_string(),
            id: id.clone(),
            version_string: version_string.to_string(),
            platform: platform.to_string(),
        });
        id
    }

    pub fn seed_version_localization(
        &self,
        version_id: &str,
        locale: &str,
        attributes: VersionLocalizationAttributes,
    ) -> VersionLocalization {
        let mut state = self.state();
        let loc = VersionLocalization {
            id: state.next_id("version-loc"),
            locale: locale.to_string(),
            attributes,
        };
        state
            .version_localizations
            .push((version_id.to_string(), loc.clone()));
        loc
    }

    pub fn seed_app_info(&self, app_id: &str, state_name: Option<&str>) -> AppInfo {
        let mut state = self.state();
        let info = AppInfo {
            id: state.next_id("app-info"),
            state: state_name.map(String::from),
        };
        state.app_infos.push((app_id.to_string(), info.clone()));
        info
    }

    pub fn seed_app_info_localization(
        &self,
        app_info_id: &str,
        locale: &str,
        attributes: AppInfoLocalizationAttributes,
    ) -> AppInfoLocalization {
        let mut state = self.state();
        let loc = AppInfoLocalization {
            id: state.next_id("app-info-loc"),
            locale: locale.to_string(),
            attributes,
        };
        state
            .app_info_localizations
            .push((app_info_id.to_string(), loc.clone()));
        loc
    }

    pub fn seed_review_detail(
        &self,
        version_id: &str,
        attributes: ReviewDetailAttributes,
    ) -> ReviewDetail {
        let mut state = self.state();
        let detail = ReviewDetail {
            id: state.next_id("review"),
            attributes,
        };
        state
            .review_details
            .push((version_id.to_string(), detail.clone()));
        detail
    }

    pub fn seed_screenshot_set(&self, localization_id: &str, display_type: &str) -> ScreenshotSet {
        let mut state = self.state();
        let set = ScreenshotSet {
            id: state.next_id("screenshot-set"),
            display_type: display_type.to_string(),
        };
        state
            .screenshot_sets
            .push((localization_id.to_string(), set.clone()));
        set
    }

    pub fn seed_screenshot(&self, set_id: &str, file_name: &str) -> Screenshot {
        let mut state = self.state();
        let shot = Screenshot {
            id: state.next_id("screenshot"),
            file_name: file_name.to_string(),
            file_size: 0,
            upload_operations: Vec::new(),
            delivery_state: Some(AssetDeliveryState {
                state: AssetDeliveryState::COMPLETE.to_string(),
                ..Default::default()
            }),
        };
        state.screenshots.push((set_id.to_string(), shot.clone()));
        shot
    }

    // Behaviour

    /// Delivery states returned by successive `get_screenshot` calls.
    /// `COMPLETE` once the script runs out.
    pub fn script_delivery(&self, states: Vec<AssetDeliveryState>) {
        self.state().delivery_script = states.into();
    }

    /// Returns `state` from every `get_screenshot` call once any script is
    /// exhausted.
    pub fn script_delivery_forever(&self, state: AssetDeliveryState) {
        self.state().delivery_fallback = Some(state);
    }

    /// Makes reservations come back without upload operations.
    pub fn reserve_without_operations(&self) {
        self.state().reserve_without_operations = true;
    }

    /// Makes every call to the named trait method fail with a 500.
    pub fn fail_on(&self, call: &str) {
        self.state().failing.insert(call.to_string());
    }

    // Inspection

    pub fn calls(&self, call: &str) -> usize {
        self.state().count(call)
    }

    /// Total number of calls that would have changed remote state.
    pub fn writes(&self) -> usize {
        let state = self.state();
        WRITE_CALLS.iter().map(|c| state.count(c)).sum()
    }

    pub fn reservations(&self) -> usize {
        self.calls("reserve_screenshot")
    }

    pub fn transfers(&self) -> usize {
        self.calls("upload_asset")
    }

    pub fn commits(&self) -> usize {
        self.calls("commit_screenshot")
    }

    pub fn delivery_checks(&self) -> usize {
        self.calls("get_screenshot")
    }

    pub fn version_localizations(&self, version_id: &str) -> Vec<VersionLocalization> {
        self.state()
            .version_localizations
            .iter()
            .filter(|(owner, _)| owner == version_id)
            .map(|(_, l)| l.clone())
            .collect()
    }

    pub fn app_info_localizations(&self, app_info_id: &str) -> Vec<AppInfoLocalization> {
        self.state()
            .app_info_localizations
            .iter()
            .filter(|(owner, _)| owner == app_info_id)
            .map(|(_, l)| l.clone())
            .collect()
    }

    pub fn review_detail(&self, version_id: &str) -> Option<ReviewDetail> {
        self.state()
            .review_details
            .iter()
            .find(|(owner, _)| owner == version_id)
            .map(|(_, d)| d.clone())
    }

    pub fn screenshot_sets(&self, localization_id: &str) -> Vec<ScreenshotSet> {
        self.state()
            .screenshot_sets
            .iter()
            .filter(|(owner, _)| owner == localization_id)
            .map(|(_, s)| s.clone())
            .collect()
    }

    pub fn screenshots(&self, set_id: &str) -> Vec<Screenshot> {
        self.state()
            .screenshots
            .iter()
            .filter(|(owner, _)| owner == set_id)
            .map(|(_, s)| s.clone())
            .collect()
    }
}

fn merge_version(target: &mut VersionLocalizationAttributes, src: &VersionLocalizationAttributes) {
    macro_rules! take {
        ($($field:ident),*) => {
            $(if src.$field.is_some() { target.$field = src.$field.clone(); })*
        };
    }
    take!(description, keywords, whats_new, promotional_text, support_url, marketing_url);
}

fn merge_app_info(target: &mut AppInfoLocalizationAttributes, src: &AppInfoLocalizationAttributes) {
    macro_rules! take {
        ($($field:ident),*) => {
            $(if src.$field.is_some() { target.$field = src.$field.clone(); })*
        };
    }
    take!(name, subtitle, privacy_policy_url);
}

fn merge_review(target: &mut ReviewDetailAttributes, src: &ReviewDetailAttributes) {
    macro_rules! take {
        ($($field:ident),*) => {
            $(if src.$field.is_some() { target.$field = src.$field.clone(); })*
        };
    }
    take!(
        contact_first_name,
        contact_last_name,
        contact_phone,
        contact_email,
        demo_account_name,
        demo_account_password,
        demo_account_required,
        notes
    );
}

#[async_trait]
impl AppStoreApi for FakeAppStore {
    async fn find_app_id(&self, bundle_id: &str) -> Result<Option<String>> {
        let mut state = self.state();
        state.record("find_app_id")?;
        Ok(state
            .apps
            .iter()
            .find(|(_, b)| b == bundle_id)
            .map(|(id, _)| id.clone()))
    }

    async fn find_version_id(
        &self,
        app_id: &str,
        version_string: &str,
        platform: Option<&str>,
    ) -> Result<Option<String>> {
        let mut state = self.state();
        state.record("find_version_id")?;
        Ok(state
            .app_store_versions
            .iter()
            .find(|v| {
                v.app_id == app_id
                    && v.version_string == version_string
                    && platform.map_or(true, |p| v.platform == p)
            })
            .map(|v| v.id.clone()))
    }

    async fn list_version_localizations(&self, version_id: &str) -> Result<Vec<VersionLocalization>> {
        self.state().record("list_version_localizations")?;
        Ok(self.version_localizations(version_id))
    }

    async fn create_version_localization(
        &self,
        version_id: &str,
        locale: &str,
        attributes: &VersionLocalizationAttributes,
    ) -> Result<VersionLocalization> {
        self.state().record("create_version_localization")?;
        Ok(self.seed_version_localization(version_id, locale, attributes.clone()))
    }

    async fn update_version_localization(
        &self,
        localization_id: &str,
        attributes: &VersionLocalizationAttributes,
    ) -> Result<VersionLocalization> {
        let mut state = self.state();
        state.record("update_version_localization")?;
        let (_, loc) = state
            .version_localizations
            .iter_mut()
            .find(|(_, l)| l.id == localization_id)
            .ok_or_else(|| not_found("appStoreVersionLocalization", localization_id))?;
        merge_version(&mut loc.attributes, attributes);
        Ok(loc.clone())
    }

    async fn list_app_infos(&self, app_id: &str) -> Result<Vec<AppInfo>> {
        let mut state = self.state();
        state.record("list_app_infos")?;
        Ok(state
            .app_infos
            .iter()
            .filter(|(owner, _)| owner == app_id)
            .map(|(_, i)| i.clone())
            .collect())
    }

    async fn list_app_info_localizations(&self, app_info_id: &str) -> Result<Vec<AppInfoLocalization>> {
        self.state().record("list_app_info_localizations")?;
        Ok(self.app_info_localizations(app_info_id))
    }

    async fn create_app_info_localization(
        &self,
        app_info_id: &str,
        locale: &str,
        attributes: &AppInfoLocalizationAttributes,
    ) -> Result<AppInfoLocalization> {
        self.state().record("create_app_info_localization")?;
        Ok(self.seed_app_info_localization(app_info_id, locale, attributes.clone()))
    }

    async fn update_app_info_localization(
        &self,
        localization_id: &str,
        attributes: &AppInfoLocalizationAttributes,
    ) -> Result<AppInfoLocalization> {
        let mut state = self.state();
        state.record("update_app_info_localization")?;
        let (_, loc) = state
            .app_info_localizations
            .iter_mut()
            .find(|(_, l)| l.id == localization_id)
            .ok_or_else(|| not_found("appInfoLocalization", localization_id))?;
        merge_app_info(&mut loc.attributes, attributes);
        Ok(loc.clone())
    }

    async fn get_review_detail(&self, version_id: &str) -> Result<Option<ReviewDetail>> {
        self.state().record("get_review_detail")?;
        Ok(self.review_detail(version_id))
    }

    async fn create_review_detail(
        &self,
        version_id: &str,
        attributes: &ReviewDetailAttributes,
    ) -> Result<ReviewDetail> {
        self.state().record("create_review_detail")?;
        Ok(self.seed_review_detail(version_id, attributes.clone()))
    }

    async fn update_review_detail(
        &self,
        review_detail_id: &str,
        attributes: &ReviewDetailAttributes,
    ) -> Result<ReviewDetail> {
        let mut state = self.state();
        state.record("update_review_detail")?;
        let (_, detail) = state
            .review_details
            .iter_mut()
            .find(|(_, d)| d.id == review_detail_id)
            .ok_or_else(|| not_found("appStoreReviewDetail", review_detail_id))?;
        merge_review(&mut detail.attributes, attributes);
        Ok(detail.clone())
    }

    async fn list_screenshot_sets(&self, localization_id: &str) -> Result<Vec<ScreenshotSet>> {
        self.state().record("list_screenshot_sets")?;
        Ok(self.screenshot_sets(localization_id))
    }

    async fn create_screenshot_set(
        &self,
        localization_id: &str,
        display_type: &str,
    ) -> Result<ScreenshotSet> {
        self.state().record("create_screenshot_set")?;
        Ok(self.seed_screenshot_set(localization_id, display_type))
    }

    async fn list_screenshots(&self, set_id: &str) -> Result<Vec<Screenshot>> {
        self.state().record("list_screenshots")?;
        Ok(self.screenshots(set_id))
    }

    async fn reserve_screenshot(
        &self,
        set_id: &str,
        file_name: &str,
        file_size: u64,
    ) -> Result<Screenshot> {
        let mut state = self.state();
        state.record("reserve_screenshot")?;
        if !state.screenshot_sets.iter().any(|(_, s)| s.id == set_id) {
            return Err(not_found("appScreenshotSet", set_id));
        }

        let id = state.next_id("screenshot");
        let upload_operations = if state.reserve_without_operations {
            Vec::new()
        } else {
            vec![UploadOperation {
                method: "PUT".to_string(),
                url: format!("https://upload.example.test/{}", id),
                offset: 0,
                length: file_size,
                request_headers: vec![HttpHeader {
                    name: "Content-Type".to_string(),
                    value: "image/png".to_string(),
                }],
            }]
        };
        let shot = Screenshot {
            id,
            file_name: file_name.to_string(),
            file_size,
            upload_operations,
            delivery_state: Some(AssetDeliveryState {
                state: "AWAITING_UPLOAD".to_string(),
                ..Default::default()
            }),
        };
        state.screenshots.push((set_id.to_string(), shot.clone()));
        Ok(shot)
    }

    async fn commit_screenshot(&self, screenshot_id: &str, _checksum: &str) -> Result<Screenshot> {
        let mut state = self.state();
        state.record("commit_screenshot")?;
        let (_, shot) = state
            .screenshots
            .iter_mut()
            .find(|(_, s)| s.id == screenshot_id)
            .ok_or_else(|| not_found("appScreenshot", screenshot_id))?;
        shot.delivery_state = Some(AssetDeliveryState {
            state: "UPLOAD_COMPLETE".to_string(),
            ..Default::default()
        });
        Ok(shot.clone())
    }

    async fn get_screenshot(&self, screenshot_id: &str) -> Result<Screenshot> {
        let mut state = self.state();
        state.record("get_screenshot")?;
        let scripted = state.delivery_script.pop_front();
        let next = scripted
            .or_else(|| state.delivery_fallback.clone())
            .unwrap_or_else(|| AssetDeliveryState {
                state: AssetDeliveryState::COMPLETE.to_string(),
                ..Default::default()
            });
        let (_, shot) = state
            .screenshots
            .iter_mut()
            .find(|(_, s)| s.id == screenshot_id)
            .ok_or_else(|| not_found("appScreenshot", screenshot_id))?;
        shot.delivery_state = Some(next);
        Ok(shot.clone())
    }

    async fn upload_asset(&self, operations: &[UploadOperation], path: &Path) -> Result<()> {
        self.state().record("upload_asset")?;
        if operations.is_empty() {
            return Err(ConnectError::Transfer("no operations".to_string()));
        }
        let len = std::fs::metadata(path)?.len();
        let covered: u64 = operations.iter().map(|op| op.length).sum();
        if covered != len {
            return Err(ConnectError::Transfer(format!(
                "operations cover {} of {} bytes",
                covered, len
            )));
        }
        Ok(())
    }
}
