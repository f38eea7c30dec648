//! Connection configuration
//!
//! Sources, lowest to highest precedence: built-in defaults, an `asc.toml`
//! file, `APP_STORE_CONNECT_*` environment variables. Command-line flags are
//! applied on top by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{ConnectError, Result};
use crate::poll::PollConfig;

/// Name of the configuration file searched for in the working directory and
/// its parents.
pub const CONFIG_FILE_NAME: &str = "asc.toml";

/// Default API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.appstoreconnect.apple.com";

pub const ENV_KEY_ID: &str = "APP_STORE_CONNECT_API_KEY_ID";
pub const ENV_ISSUER_ID: &str = "APP_STORE_CONNECT_ISSUER_ID";
pub const ENV_API_KEY: &str = "APP_STORE_CONNECT_API_KEY";
pub const ENV_API_KEY_PATH: &str = "APP_STORE_CONNECT_API_KEY_PATH";
pub const ENV_TEAM_ID: &str = "APP_STORE_CONNECT_TEAM_ID";

/// Resolved configuration for talking to App Store Connect.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    pub key_id: Option<String>,
    pub issuer_id: Option<String>,
    /// PEM contents of the `.p8` key
    pub private_key: Option<String>,
    /// Path to the `.p8` key, used when `private_key` is unset
    pub private_key_path: Option<PathBuf>,
    pub team_id: Option<String>,
    pub base_url: String,
    /// Deadline for ordinary API calls
    pub request_timeout: Duration,
    /// Poll interval and overall deadline for screenshot uploads
    pub upload: PollConfig,
    /// Poll interval and overall deadline for notarization
    pub notarization: PollConfig,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            key_id: None,
            issuer_id: None,
            private_key: None,
            private_key_path: None,
            team_id: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            upload: PollConfig::screenshots(),
            notarization: PollConfig::notarization(),
        }
    }
}

/// Credentials ready for signing API tokens.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub key_id: String,
    pub issuer_id: String,
    pub private_key: String,
    pub private_key_path: Option<PathBuf>,
    pub team_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    api: ApiSection,
    timeouts: TimeoutSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ApiSection {
    key_id: Option<String>,
    issuer_id: Option<String>,
    private_key_path: Option<PathBuf>,
    team_id: Option<String>,
    base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TimeoutSection {
    request_secs: Option<u64>,
    upload_secs: Option<u64>,
    screenshot_poll_secs: Option<u64>,
    notary_poll_secs: Option<u64>,
    notary_timeout_secs: Option<u64>,
}

impl ConnectConfig {
    /// Loads defaults, then the config file (explicit path or discovered from
    /// `workdir`), then the process environment.
    pub fn load(explicit: Option<&Path>, workdir: &Path) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match find_config(workdir) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parses an `asc.toml` file on top of the defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "loading config");
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConnectError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_toml_str(&content, base_dir)
    }

    /// Parses TOML content; a relative key path resolves against `base_dir`.
    pub fn from_toml_str(content: &str, base_dir: &Path) -> Result<Self> {
        let file: FileConfig = toml::from_str(content)?;
        let mut config = Self::default();

        config.key_id = file.api.key_id;
        config.issuer_id = file.api.issuer_id;
        config.team_id = file.api.team_id;
        config.private_key_path = file.api.private_key_path.map(|p| {
            let p = expand_home(&p);
            if p.is_absolute() {
                p
            } else {
                base_dir.join(p)
            }
        });
        if let Some(url) = file.api.base_url {
            config.base_url = url;
        }

        let t = file.timeouts;
        if let Some(secs) = t.request_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = t.upload_secs {
            config.upload.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = t.screenshot_poll_secs {
            config.upload.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = t.notary_poll_secs {
            config.notarization.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = t.notary_timeout_secs {
            config.notarization.timeout = Duration::from_secs(secs);
        }

        debug!(upload = ?config.upload, notarization = ?config.notarization, "config parsed");
        Ok(config)
    }

    /// Overrides fields from `APP_STORE_CONNECT_*` environment variables.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Same as [`apply_env`](Self::apply_env) with an injectable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_KEY_ID) {
            self.key_id = Some(v);
        }
        if let Some(v) = get(ENV_ISSUER_ID) {
            self.issuer_id = Some(v);
        }
        if let Some(v) = get(ENV_TEAM_ID) {
            self.team_id = Some(v);
        }
        if let Some(v) = get(ENV_API_KEY_PATH) {
            self.private_key_path = Some(expand_home(Path::new(&v)));
            self.private_key = None;
        }
        // Either the key contents or a path to the key file
        if let Some(v) = get(ENV_API_KEY) {
            if Path::new(&v).is_file() {
                self.private_key_path = Some(PathBuf::from(v));
                self.private_key = None;
            } else {
                self.private_key = Some(v);
            }
        }
    }

    /// Checks poll intervals and deadlines are usable.
    pub fn validate(&self) -> Result<()> {
        if self.upload.interval.is_zero() || self.notarization.interval.is_zero() {
            return Err(ConnectError::Configuration(
                "poll intervals must be greater than zero".to_string(),
            ));
        }
        if self.upload.timeout < self.upload.interval {
            return Err(ConnectError::Configuration(
                "upload timeout must not be shorter than the poll interval".to_string(),
            ));
        }
        if self.notarization.timeout < self.notarization.interval {
            return Err(ConnectError::Configuration(
                "notarization timeout must not be shorter than the poll interval".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns usable credentials or a configuration error naming what is
    /// missing.
    pub fn credentials(&self) -> Result<Credentials> {
        let key_id = self
            .key_id
            .clone()
            .ok_or_else(|| ConnectError::Configuration(format!("{} not set", ENV_KEY_ID)))?;
        let issuer_id = self
            .issuer_id
            .clone()
            .ok_or_else(|| ConnectError::Configuration(format!("{} not set", ENV_ISSUER_ID)))?;

        let private_key = match (&self.private_key, &self.private_key_path) {
            (Some(pem), _) => pem.clone(),
            (None, Some(path)) => std::fs::read_to_string(path).map_err(|e| {
                ConnectError::Configuration(format!(
                    "failed to read API key {}: {}",
                    path.display(),
                    e
                ))
            })?,
            (None, None) => {
                return Err(ConnectError::Configuration(format!(
                    "{} or {} not set",
                    ENV_API_KEY, ENV_API_KEY_PATH
                )))
            }
        };

        Ok(Credentials {
            key_id,
            issuer_id,
            private_key,
            private_key_path: self.private_key_path.clone(),
            team_id: self.team_id.clone(),
        })
    }
}

/// Replaces a leading `~` with the home directory.
fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Finds `asc.toml` in `start_dir` or the nearest parent that has one.
pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
    debug!(start_dir = %start_dir.display(), "searching for config file");
    let mut current = start_dir.to_path_buf();

    loop {
        let candidate = current.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            info!(path = %candidate.display(), "found config file");
            return Some(candidate);
        }
        if !current.pop() {
            break;
        }
    }

    debug!("no config file found");
    None
}
