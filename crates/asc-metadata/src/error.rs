//! Error types for migration operations.

use std::path::PathBuf;

use asc_connect::ConnectError;
use thiserror::Error;

use crate::paths::PathSource;

/// Errors that can occur while importing, exporting or validating metadata.
///
/// Messages start with the phase that failed (`parse`, `resolve`, `read`,
/// `classify`, `reconcile`, `upload`, `poll`, `export`).
#[derive(Debug, Error)]
pub enum MigrateError {
    /// Malformed Deliverfile or flat-file value.
    #[error("parse: {}:{line}: {message}", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// A directory that was asked for explicitly does not exist.
    #[error("resolve: {kind} directory from {origin} not found: {}", .path.display())]
    PathMissing {
        kind: String,
        path: PathBuf,
        origin: PathSource,
    },

    /// The app or version a run targets could not be determined.
    #[error("resolve: {what}: {message}")]
    Unresolved { what: String, message: String },

    /// Locale string that does not have the canonical shape.
    #[error("classify: invalid locale {input:?}")]
    InvalidLocale { input: String },

    /// Screenshot whose display type cannot be inferred.
    #[error("classify: {}: {message}", .path.display())]
    ClassificationFailed { path: PathBuf, message: String },

    /// A local file could not be read (including refused symlinks).
    #[error("read: {}: {message}", .path.display())]
    Read { path: PathBuf, message: String },

    /// A local file could not be written during export.
    #[error("export: {}: {message}", .path.display())]
    Write { path: PathBuf, message: String },

    /// An API call failed; the run stops at the first one.
    #[error("reconcile: {operation}: {source}")]
    RemoteFailure {
        operation: String,
        #[source]
        source: ConnectError,
    },

    /// App Store Connect reported the asset as FAILED.
    #[error("upload: asset {asset_id} delivery failed: {detail}")]
    DeliveryFailed { asset_id: String, detail: String },

    /// Gave up waiting.
    #[error("poll: {operation} {id} timed out")]
    Timeout { operation: String, id: String },

    /// Cancellation fired.
    #[error("poll: {operation} {id} canceled")]
    Canceled { operation: String, id: String },
}

impl MigrateError {
    /// Wraps a connect error, keeping delivery failures, timeouts and
    /// cancellation as their own variants.
    pub fn remote(operation: impl Into<String>, err: ConnectError) -> Self {
        match err {
            ConnectError::DeliveryFailed { asset_id, detail } => {
                MigrateError::DeliveryFailed { asset_id, detail }
            }
            ConnectError::Timeout { operation, id } => MigrateError::Timeout { operation, id },
            ConnectError::Canceled { operation, id } => MigrateError::Canceled { operation, id },
            other => MigrateError::RemoteFailure {
                operation: operation.into(),
                source: other,
            },
        }
    }

    pub(crate) fn read(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        MigrateError::Read {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, MigrateError::Canceled { .. })
    }

    /// Configuration and path problems, as opposed to runtime failures.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            MigrateError::Parse { .. }
                | MigrateError::PathMissing { .. }
                | MigrateError::Unresolved { .. }
        )
    }
}

impl From<ConnectError> for MigrateError {
    fn from(err: ConnectError) -> Self {
        MigrateError::remote("api", err)
    }
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_failure_keeps_detail() {
        let err = MigrateError::remote(
            "upload screenshot",
            ConnectError::DeliveryFailed {
                asset_id: "s1".to_string(),
                detail: "IMAGE_TOOL_FAILURE: corrupt".to_string(),
            },
        );
        assert!(matches!(err, MigrateError::DeliveryFailed { .. }));
        assert!(err.to_string().contains("IMAGE_TOOL_FAILURE: corrupt"));
    }

    #[test]
    fn test_timeout_distinct_from_remote_failure() {
        let err: MigrateError = ConnectError::Timeout {
            operation: "screenshot delivery".to_string(),
            id: "s2".to_string(),
        }
        .into();
        assert!(matches!(err, MigrateError::Timeout { .. }));

        let err = MigrateError::remote(
            "create version localization",
            ConnectError::Api {
                status: 409,
                message: "conflict".to_string(),
            },
        );
        assert_eq!(
            err.to_string(),
            "reconcile: create version localization: api: 409 - conflict"
        );
    }

    #[test]
    fn test_parse_message_has_line() {
        let err = MigrateError::Parse {
            path: PathBuf::from("fastlane/Deliverfile"),
            line: 4,
            message: "empty value for key `platform`".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "parse: fastlane/Deliverfile:4: empty value for key `platform`"
        );
    }
}
