//! App Store Connect access for asc
//!
//! This crate provides the remote half of metadata migration:
//!
//! - [`AppStoreApi`]: the operations the migration engine needs, implemented
//!   by [`ConnectClient`] (JWT auth, JSON:API, rate-limit retry, pagination)
//! - [`upload::upload_screenshot`]: reserve, transfer, commit and poll an
//!   asset until App Store Connect finishes processing it
//! - [`notarize::notarize`]: the same submit-and-poll shape for notarytool
//! - [`ConnectConfig`]: credentials and timeouts from `asc.toml` and the
//!   environment
//!
//! ## Usage
//!
//! ```ignore
//! use asc_connect::{ConnectClient, ConnectConfig, upload::upload_screenshot};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = ConnectConfig::load(None, &workdir)?;
//! let client = ConnectClient::new(&config)?;
//! let shot = upload_screenshot(&client, &set_id, &path, &config.upload, &CancellationToken::new()).await?;
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod notarize;
pub mod poll;
pub mod transfer;
pub mod types;
pub mod upload;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use api::AppStoreApi;
pub use client::ConnectClient;
pub use config::ConnectConfig;
pub use error::{ConnectError, Result};
pub use poll::{PollConfig, PollStatus};
pub use types::*;

pub use tokio_util::sync::CancellationToken;
