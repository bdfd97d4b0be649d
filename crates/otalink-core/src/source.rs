//! Static status source abstraction.
//!
//! Link status and the access-point list come from an external provider.
//! The provider differs per platform:
//! - Linux: JSON files on disk (`FileStatusSource`)
//! - Device: the radio driver
//!
//! By abstracting the source, the store and the HTTP handlers stay the
//! same on every platform.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::model::{AccessPoint, LinkStatus};

/// Errors that can occur while reading configuration or status sources.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The source does not exist.
    #[error("Configuration not found: {0}")]
    NotFound(String),

    /// The source exists but could not be read.
    #[error("Read error: {0}")]
    ReadError(String),

    /// The source was read but its content is not what we expect.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Provider of link status and nearby access points.
///
/// All methods are synchronous so they can be backed by flash or driver
/// calls on embedded targets.
pub trait StatusSource: Send + Sync {
    /// Load the current link-status fields (a flat JSON object).
    fn load_link_status(&self) -> Result<LinkStatus, ConfigError>;

    /// Load the list of visible access points.
    fn load_access_points(&self) -> Result<Vec<AccessPoint>, ConfigError>;
}

/// Status source backed by two JSON files.
#[derive(Debug, Clone)]
pub struct FileStatusSource {
    status_path: PathBuf,
    ap_path: PathBuf,
}

impl FileStatusSource {
    pub fn new(status_path: impl Into<PathBuf>, ap_path: impl Into<PathBuf>) -> Self {
        Self {
            status_path: status_path.into(),
            ap_path: ap_path.into(),
        }
    }

    pub fn status_path(&self) -> &Path {
        &self.status_path
    }

    pub fn ap_path(&self) -> &Path {
        &self.ap_path
    }
}

impl StatusSource for FileStatusSource {
    fn load_link_status(&self) -> Result<LinkStatus, ConfigError> {
        match read_json::<Value>(&self.status_path)? {
            Value::Object(fields) => Ok(LinkStatus::new(fields)),
            other => Err(ConfigError::InvalidData(format!(
                "{}: expected a JSON object, found {}",
                self.status_path.display(),
                json_kind(&other)
            ))),
        }
    }

    fn load_access_points(&self) -> Result<Vec<AccessPoint>, ConfigError> {
        read_json(&self.ap_path)
    }
}

/// Read and parse a JSON file, mapping failures onto `ConfigError`.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ConfigError::NotFound(path.display().to_string()),
        _ => ConfigError::ReadError(format!("{}: {}", path.display(), e)),
    })?;
    serde_json::from_str(&text)
        .map_err(|e| ConfigError::InvalidData(format!("{}: {}", path.display(), e)))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
