//! Device status data model.
//!
//! These types describe everything an observer can see about the device:
//! - Link status fields sourced from configuration
//! - The firmware descriptor
//! - The update phase and the broadcast progress counter

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Value at which the progress counter wraps back to zero.
pub const PROGRESS_WRAP: u8 = 100;

/// Link status fields, kept exactly as the status source provided them.
///
/// The field set is opaque to the core: whatever flat JSON object the source
/// returns is stored and re-serialized without loss.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkStatus(Map<String, Value>);

impl LinkStatus {
    /// Create link status from a JSON object.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Get a single field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Borrow all fields.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for LinkStatus {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// Bounded loop counter cycling through `0..PROGRESS_WRAP`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgressCounter(u8);

impl ProgressCounter {
    /// Create a counter, reducing out-of-range values into `0..PROGRESS_WRAP`.
    pub fn new(value: u8) -> Self {
        Self(value % PROGRESS_WRAP)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// The value following this one; 99 wraps to 0.
    pub fn next(self) -> Self {
        Self((self.0 + 1) % PROGRESS_WRAP)
    }
}

/// Link status plus the progress counter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Link state fields from the status source.
    pub link: LinkStatus,

    /// Broadcast loop counter.
    pub counter: ProgressCounter,
}

/// Firmware currently running on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareDescriptor {
    pub version: String,
}

impl FirmwareDescriptor {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }
}

/// Stage of the firmware update workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdatePhase {
    #[default]
    Initial,
    Connected,
    Downloading,
    Downloaded,
    Failed,
}

impl UpdatePhase {
    /// Label used in the `status` field of `update` events.
    pub fn label(self) -> &'static str {
        match self {
            UpdatePhase::Initial => "initial",
            UpdatePhase::Connected => "connected",
            UpdatePhase::Downloading => "downloading",
            UpdatePhase::Downloaded => "downloaded",
            UpdatePhase::Failed => "failed",
        }
    }
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Consistent view of the whole store, taken under one lock acquisition.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceView {
    pub status: StatusSnapshot,
    pub firmware: FirmwareDescriptor,
    pub phase: UpdatePhase,
}

/// A Wi-Fi access point as listed by `/ap.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessPoint {
    pub ssid: String,

    /// Primary channel.
    pub chan: u8,

    /// Signal strength in dBm.
    pub rssi: i16,

    /// Authentication mode as reported by the radio driver.
    pub auth: u8,
}
