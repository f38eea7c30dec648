//! Exit codes for the CLI

use asc_connect::ConnectError;
use asc_metadata::MigrateError;

use crate::cli::commands::ValidationFailed;

/// Success
pub const SUCCESS: i32 = 0;

/// General or remote error
pub const ERROR: i32 = 1;

/// Configuration or path error
pub const CONFIG_ERROR: i32 = 2;

/// Blocking validation issues
pub const VALIDATION_ERROR: i32 = 5;

/// User cancelled
pub const CANCELLED: i32 = 130;

/// Maps a command failure to the process exit code.
pub fn for_error(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if cause.downcast_ref::<ValidationFailed>().is_some() {
            return VALIDATION_ERROR;
        }
        if let Some(err) = cause.downcast_ref::<MigrateError>() {
            if err.is_canceled() {
                return CANCELLED;
            }
            if err.is_input_error() {
                return CONFIG_ERROR;
            }
        }
        if let Some(err) = cause.downcast_ref::<ConnectError>() {
            match err {
                ConnectError::Canceled { .. } => return CANCELLED,
                ConnectError::Configuration(_) | ConnectError::InvalidCredentials(_) => {
                    return CONFIG_ERROR
                }
                _ => {}
            }
        }
    }
    ERROR
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_exit_codes() {
        let canceled = anyhow::Error::new(MigrateError::Canceled {
            operation: "screenshot upload".to_string(),
            id: "screenshot-1".to_string(),
        });
        assert_eq!(for_error(&canceled), CANCELLED);

        let parse = anyhow::Error::new(MigrateError::Parse {
            path: PathBuf::from("Deliverfile"),
            line: 1,
            message: "empty value".to_string(),
        })
        .context("reading Deliverfile");
        assert_eq!(for_error(&parse), CONFIG_ERROR);

        let config = anyhow::Error::new(ConnectError::Configuration("missing key".to_string()));
        assert_eq!(for_error(&config), CONFIG_ERROR);

        assert_eq!(for_error(&anyhow::Error::new(ValidationFailed(2))), VALIDATION_ERROR);
        assert_eq!(for_error(&anyhow::anyhow!("boom")), ERROR);
    }
}
