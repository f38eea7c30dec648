//! Connect error types

use thiserror::Error;

/// Errors raised while talking to App Store Connect or the notary service.
///
/// Every message starts with the phase it came from so that multi-step
/// failures can be attributed without inspecting the variant.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Missing or malformed configuration
    #[error("config: {0}")]
    Configuration(String),

    /// Credentials were present but could not be used
    #[error("config: invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Non-success response from the API
    #[error("api: {status} - {message}")]
    Api { status: u16, message: String },

    /// Rate limited after exhausting retries
    #[error("api: rate limited, retry after {retry_after:?} seconds")]
    RateLimited { retry_after: Option<u64> },

    /// Response parsed but missed data the caller needed
    #[error("api: unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Local asset cannot be uploaded (missing, not a file, symlink)
    #[error("upload: invalid asset {path}: {message}")]
    InvalidAsset { path: String, message: String },

    /// Reservation came back without anything to transfer
    #[error("upload: reservation for asset {asset_id} returned no upload operations")]
    NoUploadOperations { asset_id: String },

    /// A chunk of the asset was rejected by the upload destination
    #[error("upload: transfer failed: {0}")]
    Transfer(String),

    /// The asset reached the FAILED delivery state
    #[error("poll: asset {asset_id} delivery failed: {detail}")]
    DeliveryFailed { asset_id: String, detail: String },

    /// Notarization finished as Invalid or Rejected
    #[error("notarize: submission {submission_id} failed: {detail}")]
    NotarizationFailed { submission_id: String, detail: String },

    /// Deadline elapsed before a terminal state was observed
    #[error("poll: {operation} {id} timed out")]
    Timeout { operation: String, id: String },

    /// Cancellation fired while waiting
    #[error("poll: {operation} {id} canceled")]
    Canceled { operation: String, id: String },

    /// External tool could not be executed
    #[error("notarize: command failed: {0}")]
    CommandFailed(String),

    /// IO error
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("api: http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("api: json error: {0}")]
    Json(#[from] serde_json::Error),

    /// JWT error
    #[error("config: jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// TOML parsing error
    #[error("config: toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ConnectError {
    /// Returns true if the error means we stopped waiting rather than the
    /// remote side rejecting something.
    pub fn is_timeout_or_canceled(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Canceled { .. })
    }
}

/// Result type for connect operations
pub type Result<T> = std::result::Result<T, ConnectError>;
