//! Fastlane metadata migration for App Store Connect.
//!
//! This crate converts between a fastlane `deliver` directory layout and an
//! App Store version's remote metadata:
//!
//! - [`deliverfile`] and [`paths`] decide which directories a run reads
//! - [`readers`] turn those directories into [`types`] records, using
//!   [`locale`] and [`screenshots`] to key and classify them
//! - [`validation`] checks field lengths offline
//! - [`reconcile`] imports records idempotently; [`export`] goes the other way

pub mod deliverfile;
pub mod error;
pub mod export;
pub mod locale;
pub mod paths;
pub mod readers;
pub mod reconcile;
pub mod screenshots;
pub mod select;
pub mod types;
pub mod validation;

pub use deliverfile::{parse_deliverfile, DeliverfileConfig};
pub use error::{MigrateError, Result};
pub use export::{export_metadata, ExportReport, ExportRequest};
pub use locale::{normalize_locale, Locale};
pub use paths::{
    discover_deliverfile, export_metadata_dir, resolve_import_inputs, ImportInputs, PathSource,
    ResolveRequest,
};
pub use reconcile::{run_import, ImportReport, ImportRequest, Reconciler};
pub use screenshots::{classify_screenshot, DisplayType};
pub use select::{resolve_target, Target};
pub use validation::{validate_localizations, Severity, ValidationIssue, ValidationReport};
