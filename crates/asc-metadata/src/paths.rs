//! Source directory resolution for imports.
//!
//! For each of `metadata` and `screenshots`, first match wins:
//!
//! 1. the explicit directory flag
//! 2. `<fastlane-dir>/<kind>` when a fastlane directory flag is given
//! 3. the Deliverfile directive, relative to the Deliverfile
//! 4. `<base>/<kind>`, where base is the Deliverfile's directory or the
//!    working directory
//!
//! A missing directory from 1-3 is an error. A missing default is skipped.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::deliverfile::DeliverfileConfig;
use crate::error::{MigrateError, Result};
use crate::types::SkippedItem;

/// Where a resolved directory came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PathSource {
    Flag,
    Deliverfile,
    Default,
}

impl fmt::Display for PathSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSource::Flag => write!(f, "flag"),
            PathSource::Deliverfile => write!(f, "Deliverfile"),
            PathSource::Default => write!(f, "default"),
        }
    }
}

/// A directory chosen for the run, with its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedDir {
    pub path: PathBuf,
    pub source: PathSource,
}

/// What the caller asked for.
#[derive(Debug, Clone, Default)]
pub struct ResolveRequest {
    pub workdir: PathBuf,
    pub fastlane_dir: Option<PathBuf>,
    pub metadata_dir: Option<PathBuf>,
    pub screenshots_dir: Option<PathBuf>,
    pub deliverfile: Option<DeliverfileConfig>,
}

/// Effective source directories for an import run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportInputs {
    pub metadata: Option<ResolvedDir>,
    pub screenshots: Option<ResolvedDir>,
    pub deliverfile: Option<PathBuf>,
    /// Default directories that did not exist
    pub skipped: Vec<SkippedItem>,
}

/// Looks for a Deliverfile. With a fastlane directory only
/// `<fastlane-dir>/Deliverfile` is checked, otherwise `<workdir>/Deliverfile`
/// then `<workdir>/fastlane/Deliverfile`.
pub fn discover_deliverfile(workdir: &Path, fastlane_dir: Option<&Path>) -> Option<PathBuf> {
    let candidates = match fastlane_dir {
        Some(dir) => vec![absolutize(workdir, dir).join("Deliverfile")],
        None => vec![
            workdir.join("Deliverfile"),
            workdir.join("fastlane").join("Deliverfile"),
        ],
    };

    let found = candidates.into_iter().find(|c| c.is_file());
    match &found {
        Some(path) => info!(path = %path.display(), "found Deliverfile"),
        None => debug!(workdir = %workdir.display(), "no Deliverfile found"),
    }
    found
}

fn absolutize(workdir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workdir.join(path)
    }
}

/// Resolves the metadata and screenshots directories.
pub fn resolve_import_inputs(request: &ResolveRequest) -> Result<ImportInputs> {
    let deliverfile = request.deliverfile.as_ref();
    let default_base = deliverfile
        .map(|d| d.base_dir().to_path_buf())
        .unwrap_or_else(|| request.workdir.clone());

    let mut inputs = ImportInputs {
        deliverfile: deliverfile.map(|d| d.path.clone()),
        ..Default::default()
    };

    inputs.metadata = resolve_dir(
        "metadata",
        request,
        request.metadata_dir.as_deref(),
        deliverfile.and_then(DeliverfileConfig::metadata_dir),
        &default_base,
        &mut inputs.skipped,
    )?;
    inputs.screenshots = resolve_dir(
        "screenshots",
        request,
        request.screenshots_dir.as_deref(),
        deliverfile.and_then(DeliverfileConfig::screenshots_dir),
        &default_base,
        &mut inputs.skipped,
    )?;

    Ok(inputs)
}

/// Directory an export writes to: same precedence as an import, without
/// requiring the directory to exist.
pub fn export_metadata_dir(request: &ResolveRequest) -> PathBuf {
    if let Some(dir) = &request.metadata_dir {
        return absolutize(&request.workdir, dir);
    }
    if let Some(fastlane) = &request.fastlane_dir {
        return absolutize(&request.workdir, fastlane).join("metadata");
    }
    let deliverfile = request.deliverfile.as_ref();
    if let Some(dir) = deliverfile.and_then(DeliverfileConfig::metadata_dir) {
        return dir;
    }
    deliverfile
        .map(|d| d.base_dir().to_path_buf())
        .unwrap_or_else(|| request.workdir.clone())
        .join("metadata")
}

fn resolve_dir(
    kind: &str,
    request: &ResolveRequest,
    explicit: Option<&Path>,
    declared: Option<PathBuf>,
    default_base: &Path,
    skipped: &mut Vec<SkippedItem>,
) -> Result<Option<ResolvedDir>> {
    let (path, source) = if let Some(dir) = explicit {
        (absolutize(&request.workdir, dir), PathSource::Flag)
    } else if let Some(fastlane) = &request.fastlane_dir {
        (absolutize(&request.workdir, fastlane).join(kind), PathSource::Flag)
    } else if let Some(dir) = declared {
        (dir, PathSource::Deliverfile)
    } else {
        (default_base.join(kind), PathSource::Default)
    };

    if path.is_dir() {
        debug!(kind, path = %path.display(), source = %source, "resolved directory");
        return Ok(Some(ResolvedDir { path, source }));
    }

    if source == PathSource::Default {
        info!(kind, path = %path.display(), "default directory not found, skipping");
        skipped.push(SkippedItem {
            path: path.display().to_string(),
            reason: "default directory not found".to_string(),
        });
        return Ok(None);
    }

    Err(MigrateError::PathMissing {
        kind: kind.to_string(),
        path,
        origin: source,
    })
}
