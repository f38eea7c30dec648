//! CLI command implementations

mod migrate;
mod notarize;

pub use migrate::MigrateCommand;
pub use notarize::NotarizeCommand;

/// Returned when blocking validation issues stopped a run.
#[derive(Debug, thiserror::Error)]
#[error("validation failed with {0} error(s)")]
pub struct ValidationFailed(pub usize);
