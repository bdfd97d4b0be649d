//! Service configuration.
//!
//! Settings are read from a JSON file. Every field has a default so a
//! partial (or empty) file is valid:
//!
//! ```json
//! {
//!   "bindAddr": "0.0.0.0:8080",
//!   "tickIntervalMs": 5000,
//!   "statusPath": "config/status.json",
//!   "apPath": "config/ap.json",
//!   "imagePath": "firmware.bin"
//! }
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::machine::TransitionPolicy;
use crate::model::FirmwareDescriptor;
use crate::source::{read_json, ConfigError, FileStatusSource};

/// Top-level service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceConfig {
    /// Address the HTTP server binds to.
    pub bind_addr: SocketAddr,

    /// Milliseconds between broadcaster ticks.
    pub tick_interval_ms: u64,

    /// JSON object with the link-status fields.
    pub status_path: PathBuf,

    /// JSON array with visible access points.
    pub ap_path: PathBuf,

    /// Where a received firmware image is stored.
    pub image_path: PathBuf,

    /// Directory served at `/`, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_root: Option<PathBuf>,

    /// Version reported in `firmware` events.
    pub firmware_version: String,

    /// Tick batches buffered per observer before it counts as stalled.
    pub observer_queue_depth: usize,

    /// Upper bound for an uploaded image, in bytes.
    pub max_image_bytes: u64,

    /// Enforce state machine preconditions.
    pub strict_transitions: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            tick_interval_ms: 5000,
            status_path: PathBuf::from("config/status.json"),
            ap_path: PathBuf::from("config/ap.json"),
            image_path: PathBuf::from("firmware.bin"),
            web_root: None,
            firmware_version: "0.1.0".to_string(),
            observer_queue_depth: 16,
            max_image_bytes: 4 * 1024 * 1024,
            strict_transitions: false,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = read_json(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidData(
                "tickIntervalMs must be greater than zero".to_string(),
            ));
        }
        if self.observer_queue_depth == 0 {
            return Err(ConfigError::InvalidData(
                "observerQueueDepth must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn transition_policy(&self) -> TransitionPolicy {
        if self.strict_transitions {
            TransitionPolicy::Strict
        } else {
            TransitionPolicy::Permissive
        }
    }

    pub fn firmware(&self) -> FirmwareDescriptor {
        FirmwareDescriptor::new(self.firmware_version.clone())
    }

    pub fn status_source(&self) -> FileStatusSource {
        FileStatusSource::new(&self.status_path, &self.ap_path)
    }
}
