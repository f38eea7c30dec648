//! Choosing the app, version and editable app info a run works on.

use asc_connect::{AppInfo, AppStoreApi};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::deliverfile::DeliverfileConfig;
use crate::error::{MigrateError, Result};
use crate::reconcile::cancellable;

/// The editable state App Store Connect gives a new app info.
pub const PREPARE_FOR_SUBMISSION: &str = "PREPARE_FOR_SUBMISSION";

/// States of an app info that is live or being replaced.
pub const LIVE_STATES: &[&str] = &[
    "READY_FOR_SALE",
    "READY_FOR_DISTRIBUTION",
    "PROCESSING_FOR_DISTRIBUTION",
    "REPLACED_WITH_NEW_INFO",
];

/// Picks the app info to edit: one in `PREPARE_FOR_SUBMISSION`, else the
/// first that is not live, else the first one.
pub fn select_app_info(infos: &[AppInfo]) -> Option<&AppInfo> {
    infos
        .iter()
        .find(|i| i.state.as_deref() == Some(PREPARE_FOR_SUBMISSION))
        .or_else(|| {
            infos
                .iter()
                .find(|i| !i.state.as_deref().is_some_and(|s| LIVE_STATES.contains(&s)))
        })
        .or_else(|| infos.first())
}

/// The app and App Store version a run works on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// `None` when neither a flag nor the Deliverfile names the app.
    pub app_id: Option<String>,
    pub version_id: String,
}

/// Fills in missing IDs from the Deliverfile.
///
/// An explicit ID always wins. Otherwise the app is looked up by
/// `app_identifier` and the version by `app_version` and `platform`.
pub async fn resolve_target(
    api: &dyn AppStoreApi,
    app_id: Option<&str>,
    version_id: Option<&str>,
    deliverfile: Option<&DeliverfileConfig>,
    cancel: &CancellationToken,
) -> Result<Target> {
    let app_id = match (app_id, deliverfile.and_then(|d| d.app_identifier.as_deref())) {
        (Some(id), _) => Some(id.to_string()),
        (None, Some(bundle_id)) => {
            let found = cancellable(cancel, "find app", bundle_id, api.find_app_id(bundle_id)).await?;
            let id = found.ok_or_else(|| MigrateError::Unresolved {
                what: "app".to_string(),
                message: format!("no app with bundle ID {}", bundle_id),
            })?;
            debug!(bundle_id, app_id = %id, "resolved app from Deliverfile");
            Some(id)
        }
        (None, None) => None,
    };

    if let Some(id) = version_id {
        return Ok(Target {
            app_id,
            version_id: id.to_string(),
        });
    }

    let version_string = deliverfile.and_then(|d| d.app_version.as_deref());
    let (Some(app), Some(version_string)) = (app_id.as_deref(), version_string) else {
        return Err(MigrateError::Unresolved {
            what: "version".to_string(),
            message: "no version ID given, and no app ID and Deliverfile app_version to look it up"
                .to_string(),
        });
    };

    let platform = deliverfile.and_then(DeliverfileConfig::api_platform);
    let found = cancellable(
        cancel,
        "find version",
        version_string,
        api.find_version_id(app, version_string, platform),
    )
    .await?;
    let version_id = found.ok_or_else(|| MigrateError::Unresolved {
        what: "version".to_string(),
        message: match platform {
            Some(p) => format!("app {} has no {} version {}", app, p, version_string),
            None => format!("app {} has no version {}", app, version_string),
        },
    })?;
    debug!(app_id = app, version = version_string, version_id = %version_id, "resolved version from Deliverfile");

    Ok(Target {
        app_id,
        version_id,
    })
}
