//! Screenshot upload pipeline
//!
//! Reserved -> Transferring -> Committed -> Polling, with a single deadline
//! covering the whole sequence.

use std::fmt;
use std::path::Path;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::AppStoreApi;
use crate::error::{ConnectError, Result};
use crate::poll::{poll_until_deadline, with_deadline, PollConfig, PollStatus};
use crate::transfer::md5_file;
use crate::types::Screenshot;

const OPERATION: &str = "screenshot upload";

/// Stage of a single asset upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Reserved,
    Transferring,
    Committed,
    Polling,
}

impl fmt::Display for UploadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UploadStage::Reserved => "reserved",
            UploadStage::Transferring => "transferring",
            UploadStage::Committed => "committed",
            UploadStage::Polling => "polling",
        };
        f.write_str(s)
    }
}

/// Uploads `path` into the screenshot set `set_id` and waits for App Store
/// Connect to finish processing it.
///
/// Symlinks are refused. A reservation without upload operations fails
/// before anything is transferred.
pub async fn upload_screenshot(
    api: &dyn AppStoreApi,
    set_id: &str,
    path: &Path,
    config: &PollConfig,
    cancel: &CancellationToken,
) -> Result<Screenshot> {
    let deadline = Instant::now() + config.timeout;
    let (file_name, file_size) = inspect_asset(path).await?;

    let reserved = with_deadline(
        OPERATION,
        &file_name,
        deadline,
        cancel,
        api.reserve_screenshot(set_id, &file_name, file_size),
    )
    .await?;
    let asset_id = reserved.id.clone();
    debug!(
        asset_id = %asset_id,
        stage = %UploadStage::Reserved,
        operations = reserved.upload_operations.len(),
        "asset reserved"
    );

    if reserved.upload_operations.is_empty() {
        return Err(ConnectError::NoUploadOperations { asset_id });
    }

    debug!(asset_id = %asset_id, stage = %UploadStage::Transferring, bytes = file_size, "sending asset");
    with_deadline(
        OPERATION,
        &asset_id,
        deadline,
        cancel,
        api.upload_asset(&reserved.upload_operations, path),
    )
    .await?;

    let checksum = md5_file(path).await?;
    with_deadline(
        OPERATION,
        &asset_id,
        deadline,
        cancel,
        api.commit_screenshot(&asset_id, &checksum),
    )
    .await?;
    debug!(asset_id = %asset_id, stage = %UploadStage::Committed, checksum = %checksum, "asset committed");

    debug!(asset_id = %asset_id, stage = %UploadStage::Polling, "waiting for delivery");
    let screenshot = poll_until_deadline(
        "screenshot delivery",
        &asset_id,
        config.interval,
        deadline,
        cancel,
        || delivery_status(api, &asset_id),
    )
    .await?;

    info!(asset_id = %asset_id, file = %file_name, "screenshot processed");
    Ok(screenshot)
}

async fn delivery_status(api: &dyn AppStoreApi, asset_id: &str) -> Result<PollStatus<Screenshot>> {
    let screenshot = api.get_screenshot(asset_id).await?;
    let not_done = match &screenshot.delivery_state {
        Some(state) if state.is_complete() => None,
        Some(state) if state.is_failed() => Some(PollStatus::Failed(ConnectError::DeliveryFailed {
            asset_id: asset_id.to_string(),
            detail: state.failure_detail(),
        })),
        Some(state) => Some(PollStatus::Pending(state.state.clone())),
        None => Some(PollStatus::Pending("UNKNOWN".to_string())),
    };
    Ok(match not_done {
        Some(status) => status,
        None => PollStatus::Done(screenshot),
    })
}

/// Returns the base file name and size of a regular, non-symlink file.
async fn inspect_asset(path: &Path) -> Result<(String, u64)> {
    let invalid = |message: &str| ConnectError::InvalidAsset {
        path: path.display().to_string(),
        message: message.to_string(),
    };

    let meta = tokio::fs::symlink_metadata(path)
        .await
        .map_err(|e| invalid(&e.to_string()))?;
    if meta.file_type().is_symlink() {
        return Err(invalid("refusing to follow symlink"));
    }
    if !meta.is_file() {
        return Err(invalid("not a regular file"));
    }

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| invalid("file name is not valid UTF-8"))?
        .to_string();

    Ok((file_name, meta.len()))
}
