//! Import reconciliation.
//!
//! Remote state is fetched once per collection and indexed by normalized
//! locale (screenshots: by display type, then file name). Each local record
//! then becomes a create, an update or a skip. The first failing API call
//! aborts the run.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::Path;

use asc_connect::upload::upload_screenshot;
use asc_connect::{
    AppStoreApi, ConnectError, PollConfig, ScreenshotSet, VersionLocalizationAttributes,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{MigrateError, Result};
use crate::locale::Locale;
use crate::paths::ImportInputs;
use crate::readers::{
    build_screenshot_plans, read_app_info_localizations, read_review_information,
    read_version_localizations,
};
use crate::screenshots::DisplayType;
use crate::select::select_app_info;
use crate::types::*;
use crate::validation::{validate_localizations, ValidationReport};

/// Indexes remote records by normalized locale. Remote locales that do not
/// normalize are left out.
fn index_by_locale<'a>(records: impl Iterator<Item = (&'a str, &'a str)>) -> HashMap<Locale, String> {
    let mut index = HashMap::new();
    for (locale, id) in records {
        match Locale::parse(locale) {
            Ok(locale) => {
                index.insert(locale, id.to_string());
            }
            Err(e) => warn!(remote_id = id, error = %e, "ignoring remote localization"),
        }
    }
    index
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Runs one API call unless `cancel` fires first.
pub(crate) async fn cancellable<T, Fut>(
    cancel: &CancellationToken,
    operation: &str,
    id: &str,
    fut: Fut,
) -> Result<T>
where
    Fut: Future<Output = asc_connect::Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(MigrateError::Canceled {
            operation: operation.to_string(),
            id: id.to_string(),
        }),
        res = fut => res.map_err(|e| MigrateError::remote(operation, e)),
    }
}

/// Reconciles local records against one App Store version.
///
/// Holds the locale to localization ID map for a single run; create a new
/// reconciler per run.
pub struct Reconciler<'a> {
    api: &'a dyn AppStoreApi,
    version_id: String,
    app_id: Option<String>,
    dry_run: bool,
    poll: PollConfig,
    cancel: CancellationToken,
    version_ids: Option<HashMap<Locale, String>>,
}

impl<'a> Reconciler<'a> {
    pub fn new(api: &'a dyn AppStoreApi, version_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            api,
            version_id: version_id.into(),
            app_id: None,
            dry_run: false,
            poll: PollConfig::screenshots(),
            cancel,
            version_ids: None,
        }
    }

    /// App ID, needed for app-info localizations.
    pub fn with_app_id(mut self, app_id: Option<String>) -> Self {
        self.app_id = app_id;
        self
    }

    /// Compute actions without issuing any write.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Poll interval and deadline for each screenshot upload.
    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    async fn call<T, Fut>(&self, operation: &str, id: &str, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = asc_connect::Result<T>>,
    {
        cancellable(&self.cancel, operation, id, fut).await
    }

    async fn version_localization_ids(&mut self) -> Result<&HashMap<Locale, String>> {
        if self.version_ids.is_none() {
            let remote = self
                .call(
                    "list version localizations",
                    &self.version_id,
                    self.api.list_version_localizations(&self.version_id),
                )
                .await?;
            debug!(count = remote.len(), "fetched version localizations");
            self.version_ids = Some(index_by_locale(
                remote.iter().map(|r| (r.locale.as_str(), r.id.as_str())),
            ));
        }
        Ok(self.version_ids.get_or_insert_with(HashMap::new))
    }

    fn remember_version_localization(&mut self, locale: Locale, id: String) {
        self.version_ids.get_or_insert_with(HashMap::new).insert(locale, id);
    }

    /// Creates or updates one version localization per local record.
    pub async fn import_version_localizations(
        &mut self,
        locals: &[VersionLocalization],
    ) -> Result<Vec<LocalizationUploadItem>> {
        self.version_localization_ids().await?;
        let mut items = Vec::with_capacity(locals.len());

        for local in locals {
            let locale = local.locale.as_str();
            let field_count = local.fields.field_count();
            let existing = self
                .version_ids
                .as_ref()
                .and_then(|ids| ids.get(&local.locale))
                .cloned();

            let (action, remote_id) = match existing {
                Some(id) => {
                    if !self.dry_run {
                        self.call(
                            "update version localization",
                            locale,
                            self.api.update_version_localization(&id, &local.fields),
                        )
                        .await?;
                    }
                    (UploadAction::Update, Some(id))
                }
                None if self.dry_run => (UploadAction::Create, None),
                None => {
                    let created = self
                        .call(
                            "create version localization",
                            locale,
                            self.api
                                .create_version_localization(&self.version_id, locale, &local.fields),
                        )
                        .await?;
                    self.remember_version_localization(local.locale.clone(), created.id.clone());
                    (UploadAction::Create, Some(created.id))
                }
            };

            info!(locale, action = %action, fields = field_count, "version localization");
            items.push(LocalizationUploadItem {
                kind: LocalizationKind::Version,
                locale: locale.to_string(),
                field_count,
                action,
                remote_id,
            });
        }

        Ok(items)
    }

    /// Creates or updates app-info localizations on the editable app info.
    pub async fn import_app_info_localizations(
        &mut self,
        locals: &[AppInfoLocalization],
    ) -> Result<Vec<LocalizationUploadItem>> {
        if locals.is_empty() {
            return Ok(Vec::new());
        }
        let Some(app_id) = self.app_id.clone() else {
            return Err(MigrateError::RemoteFailure {
                operation: "select app info".to_string(),
                source: ConnectError::Configuration(
                    "an app ID is required to import app info localizations".to_string(),
                ),
            });
        };

        let infos = self
            .call("list app infos", &app_id, self.api.list_app_infos(&app_id))
            .await?;
        let app_info = select_app_info(&infos).cloned().ok_or_else(|| MigrateError::RemoteFailure {
            operation: "select app info".to_string(),
            source: ConnectError::UnexpectedResponse(format!("app {} has no app info", app_id)),
        })?;
        debug!(app_info_id = %app_info.id, state = ?app_info.state, "selected app info");

        let remote = self
            .call(
                "list app info localizations",
                &app_info.id,
                self.api.list_app_info_localizations(&app_info.id),
            )
            .await?;
        let mut ids = index_by_locale(remote.iter().map(|r| (r.locale.as_str(), r.id.as_str())));
        let mut items = Vec::with_capacity(locals.len());

        for local in locals {
            let locale = local.locale.as_str();
            let field_count = local.fields.field_count();

            let (action, remote_id) = match ids.get(&local.locale).cloned() {
                Some(id) => {
                    if !self.dry_run {
                        self.call(
                            "update app info localization",
                            locale,
                            self.api.update_app_info_localization(&id, &local.fields),
                        )
                        .await?;
                    }
                    (UploadAction::Update, Some(id))
                }
                None if self.dry_run => (UploadAction::Create, None),
                None => {
                    let created = self
                        .call(
                            "create app info localization",
                            locale,
                            self.api
                                .create_app_info_localization(&app_info.id, locale, &local.fields),
                        )
                        .await?;
                    ids.insert(local.locale.clone(), created.id.clone());
                    (UploadAction::Create, Some(created.id))
                }
            };

            info!(locale, action = %action, fields = field_count, "app info localization");
            items.push(LocalizationUploadItem {
                kind: LocalizationKind::AppInfo,
                locale: locale.to_string(),
                field_count,
                action,
                remote_id,
            });
        }

        Ok(items)
    }

    /// Creates the review detail, updates it, or skips when every field the
    /// local record sets already matches.
    pub async fn import_review_information(
        &mut self,
        local: &ReviewInformation,
    ) -> Result<ReviewUploadItem> {
        let field_count = local.field_count();
        let remote = self
            .call(
                "get review information",
                &self.version_id,
                self.api.get_review_detail(&self.version_id),
            )
            .await?;

        let (action, remote_id) = match remote {
            Some(detail) if local.matches(&detail.attributes) => (UploadAction::Skip, Some(detail.id)),
            Some(detail) => {
                if !self.dry_run {
                    self.call(
                        "update review information",
                        &detail.id,
                        self.api.update_review_detail(&detail.id, &local.to_attributes()),
                    )
                    .await?;
                }
                (UploadAction::Update, Some(detail.id))
            }
            None if self.dry_run => (UploadAction::Create, None),
            None => {
                let created = self
                    .call(
                        "create review information",
                        &self.version_id,
                        self.api
                            .create_review_detail(&self.version_id, &local.to_attributes()),
                    )
                    .await?;
                (UploadAction::Create, Some(created.id))
            }
        };

        info!(action = %action, fields = field_count, "review information");
        Ok(ReviewUploadItem {
            field_count,
            action,
            remote_id,
        })
    }

    /// Localization ID for screenshots of `locale`, creating an empty
    /// localization when the version has none. `None` only in a dry run.
    async fn localization_for(&mut self, locale: &Locale) -> Result<Option<String>> {
        if let Some(id) = self.version_localization_ids().await?.get(locale).cloned() {
            return Ok(Some(id));
        }
        if self.dry_run {
            return Ok(None);
        }

        let created = self
            .call(
                "create version localization",
                locale.as_str(),
                self.api.create_version_localization(
                    &self.version_id,
                    locale.as_str(),
                    &VersionLocalizationAttributes::default(),
                ),
            )
            .await?;
        info!(locale = %locale, "created version localization for screenshots");
        self.remember_version_localization(locale.clone(), created.id.clone());
        Ok(Some(created.id))
    }

    async fn screenshot_set(
        &self,
        localization_id: &str,
        display_type: DisplayType,
        cache: &mut HashMap<String, Vec<ScreenshotSet>>,
    ) -> Result<Option<String>> {
        if !cache.contains_key(localization_id) {
            let sets = self
                .call(
                    "list screenshot sets",
                    localization_id,
                    self.api.list_screenshot_sets(localization_id),
                )
                .await?;
            cache.insert(localization_id.to_string(), sets);
        }
        let sets = cache.entry(localization_id.to_string()).or_default();

        if let Some(set) = sets.iter().find(|s| s.display_type == display_type.as_str()) {
            return Ok(Some(set.id.clone()));
        }
        if self.dry_run {
            return Ok(None);
        }

        let created = self
            .call(
                "create screenshot set",
                display_type.as_str(),
                self.api
                    .create_screenshot_set(localization_id, display_type.as_str()),
            )
            .await?;
        info!(display_type = %display_type, set_id = %created.id, "created screenshot set");
        let id = created.id.clone();
        sets.push(created);
        Ok(Some(id))
    }

    /// Uploads every planned file whose name is not already in its set.
    /// Files go one at a time in locale, display type, file name order.
    pub async fn import_screenshots(
        &mut self,
        plans: &[ScreenshotPlan],
    ) -> Result<Vec<ScreenshotUploadItem>> {
        let mut ordered: Vec<&ScreenshotPlan> = plans.iter().collect();
        ordered.sort_by(|a, b| (&a.locale, a.display_type).cmp(&(&b.locale, b.display_type)));

        let mut set_cache: HashMap<String, Vec<ScreenshotSet>> = HashMap::new();
        let mut items = Vec::new();

        for plan in ordered {
            let locale = plan.locale.as_str();
            let set_id = match self.localization_for(&plan.locale).await? {
                Some(localization_id) => {
                    self.screenshot_set(&localization_id, plan.display_type, &mut set_cache)
                        .await?
                }
                None => None,
            };

            let mut existing: HashSet<String> = match &set_id {
                Some(id) => self
                    .call("list screenshots", id, self.api.list_screenshots(id))
                    .await?
                    .into_iter()
                    .map(|s| s.file_name)
                    .collect(),
                None => HashSet::new(),
            };

            let mut files = plan.files.clone();
            files.sort_by_key(|f| file_name_of(f));

            for file in &files {
                let file_name = file_name_of(file);
                let mut item = ScreenshotUploadItem {
                    locale: locale.to_string(),
                    display_type: plan.display_type,
                    file_name: file_name.clone(),
                    action: UploadAction::Skip,
                    asset_id: None,
                    reason: None,
                };

                if !existing.insert(file_name.clone()) {
                    debug!(locale, file = %file_name, "screenshot already exists");
                    item.reason = Some("already exists".to_string());
                    items.push(item);
                    continue;
                }

                item.action = UploadAction::Create;
                match set_id.as_deref() {
                    Some(set_id) if !self.dry_run => {
                        let shot = upload_screenshot(self.api, set_id, file, &self.poll, &self.cancel)
                            .await
                            .map_err(|e| MigrateError::remote("upload screenshot", e))?;
                        info!(locale, display_type = %plan.display_type, file = %file_name, asset_id = %shot.id, "uploaded screenshot");
                        item.asset_id = Some(shot.id);
                    }
                    _ => debug!(locale, file = %file_name, "would upload screenshot"),
                }
                items.push(item);
            }
        }

        Ok(items)
    }
}

/// Everything an import run needs.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub version_id: String,
    pub app_id: Option<String>,
    pub inputs: ImportInputs,
    pub skip_metadata: bool,
    pub skip_screenshots: bool,
    pub dry_run: bool,
    pub poll: PollConfig,
}

/// Outcome of an import run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub dry_run: bool,
    pub inputs: ImportInputs,
    pub validation: ValidationReport,
    pub localizations: Vec<LocalizationUploadItem>,
    pub review: Option<ReviewUploadItem>,
    pub screenshots: Vec<ScreenshotUploadItem>,
    pub skipped: Vec<SkippedItem>,
}

impl ImportReport {
    /// False when blocking validation issues stopped the run before any
    /// remote call.
    pub fn is_valid(&self) -> bool {
        self.validation.is_valid()
    }

    pub fn localization_count(&self, action: UploadAction) -> usize {
        self.localizations.iter().filter(|i| i.action == action).count()
    }

    pub fn screenshot_count(&self, action: UploadAction) -> usize {
        self.screenshots.iter().filter(|i| i.action == action).count()
    }
}

/// Reads the resolved directories, validates, then reconciles metadata and
/// screenshots against the version.
pub async fn run_import(
    api: &dyn AppStoreApi,
    request: &ImportRequest,
    cancel: &CancellationToken,
) -> Result<ImportReport> {
    let mut report = ImportReport {
        dry_run: request.dry_run,
        inputs: request.inputs.clone(),
        skipped: request.inputs.skipped.clone(),
        ..Default::default()
    };

    let mut metadata = None;
    if let Some(dir) = &request.inputs.metadata {
        if request.skip_metadata {
            report
                .skipped
                .push(SkippedItem::new(dir.path.display().to_string(), "metadata skipped"));
        } else {
            let version = read_version_localizations(&dir.path).await?;
            let app_info = read_app_info_localizations(&dir.path).await?;
            let review = read_review_information(&dir.path).await?;
            info!(
                dir = %dir.path.display(),
                version_localizations = version.len(),
                app_info_localizations = app_info.len(),
                review = review.is_some(),
                "read metadata"
            );
            metadata = Some((version, app_info, review));
        }
    }

    let mut plans = Vec::new();
    if let Some(dir) = &request.inputs.screenshots {
        if request.skip_screenshots {
            report
                .skipped
                .push(SkippedItem::new(dir.path.display().to_string(), "screenshots skipped"));
        } else {
            plans = build_screenshot_plans(&dir.path)?;
            info!(dir = %dir.path.display(), sets = plans.len(), "planned screenshots");
        }
    }

    if let Some((version, app_info, _)) = &metadata {
        report.validation = validate_localizations(version, app_info);
        if !report.validation.is_valid() {
            warn!(
                errors = report.validation.error_count(),
                "blocking validation issues, nothing imported"
            );
            return Ok(report);
        }
    }

    let mut reconciler = Reconciler::new(api, request.version_id.clone(), cancel.clone())
        .with_app_id(request.app_id.clone())
        .with_poll_config(request.poll)
        .dry_run(request.dry_run);

    if let Some((version, app_info, review)) = metadata {
        report
            .localizations
            .extend(reconciler.import_version_localizations(&version).await?);

        if !app_info.is_empty() {
            if request.app_id.is_some() {
                report
                    .localizations
                    .extend(reconciler.import_app_info_localizations(&app_info).await?);
            } else {
                warn!("no app ID given, skipping app info localizations");
                report.skipped.push(SkippedItem::new(
                    "app info localizations",
                    "no app ID given",
                ));
            }
        }

        if let Some(review) = review {
            report.review = Some(reconciler.import_review_information(&review).await?);
        }
    }

    if !plans.is_empty() {
        report.screenshots = reconciler.import_screenshots(&plans).await?;
    }

    info!(
        created = report.localization_count(UploadAction::Create),
        updated = report.localization_count(UploadAction::Update),
        uploaded = report.screenshot_count(UploadAction::Create),
        skipped_screenshots = report.screenshot_count(UploadAction::Skip),
        dry_run = request.dry_run,
        "import finished"
    );
    Ok(report)
}
