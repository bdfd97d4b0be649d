//! Event stream records and control request bodies.
//!
//! Every tick produces one `TickBatch` of four events, always in this order:
//!
//! ```text
//! data: tick 7 at 2026-10-16T10:00:35.000Z: phase downloading, 2 observers
//!
//! event: status
//! data: {"ssid":"home","ip":"192.168.4.2","if_status":true}
//!
//! event: firmware
//! data: {"version":"0.1.0"}
//!
//! event: update
//! data: {"progress":7,"status":"downloading"}
//! ```

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use otalink_core::{Command, DeviceView, FirmwareDescriptor, LinkStatus, UpdatePhase};
use serde::{Deserialize, Serialize};

/// Payload of the `update` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProgress {
    /// Broadcast loop counter, `0..100`.
    pub progress: u8,

    /// Phase label.
    pub status: String,
}

/// One record on the event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Free-text line sent without an event name.
    Diagnostic(String),

    /// Link status fields.
    Status(LinkStatus),

    /// Firmware descriptor.
    Firmware(FirmwareDescriptor),

    /// Counter and phase label.
    Update(UpdateProgress),
}

impl ServerEvent {
    /// SSE event name; `None` for the unnamed diagnostic line.
    pub fn name(&self) -> Option<&'static str> {
        match self {
            ServerEvent::Diagnostic(_) => None,
            ServerEvent::Status(_) => Some("status"),
            ServerEvent::Firmware(_) => Some("firmware"),
            ServerEvent::Update(_) => Some("update"),
        }
    }
}

/// The four events of one tick, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub struct TickBatch {
    tick: u64,
    events: [ServerEvent; 4],
}

impl TickBatch {
    /// Compose a batch from a store view.
    pub fn compose(tick: u64, view: &DeviceView, diagnostic: impl Into<String>) -> Self {
        Self {
            tick,
            events: [
                ServerEvent::Diagnostic(diagnostic.into()),
                ServerEvent::Status(view.status.link.clone()),
                ServerEvent::Firmware(view.firmware.clone()),
                ServerEvent::Update(UpdateProgress {
                    progress: view.status.counter.value(),
                    status: view.phase.label().to_string(),
                }),
            ],
        }
    }

    /// Broadcaster tick number this batch belongs to.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn events(&self) -> &[ServerEvent; 4] {
        &self.events
    }

    /// The `update` payload of this batch.
    pub fn update(&self) -> &UpdateProgress {
        match &self.events[3] {
            ServerEvent::Update(progress) => progress,
            _ => unreachable!("update is always the fourth event"),
        }
    }
}

/// Text of the diagnostic line.
#[derive(Debug, Clone)]
pub struct DiagnosticLine {
    pub tick: u64,
    pub at: DateTime<Utc>,
    pub phase: UpdatePhase,
    pub observers: usize,

    /// Observers dropped as stalled since start.
    pub dropped: u64,
}

impl fmt::Display for DiagnosticLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tick {} at {}: phase {}, {} observer{}",
            self.tick,
            self.at.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.phase,
            self.observers,
            if self.observers == 1 { "" } else { "s" }
        )?;
        if self.dropped > 0 {
            write!(f, " ({} dropped)", self.dropped)?;
        }
        Ok(())
    }
}

/// Body of `POST /connect.json`.
#[derive(Clone, Default, Deserialize)]
pub struct ConnectRequest {
    #[serde(default)]
    pub ssid: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("ssid", &self.ssid)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Body of `POST /restart.json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RestartRequest {
    /// Restart into the update flow.
    #[serde(default)]
    pub update: Option<bool>,
}

/// Which control endpoint a body was posted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Connect,
    Restart,
    TriggerUpdate,
}

/// A decoded control request.
#[derive(Debug, Clone)]
pub enum ControlRequest {
    Connect(ConnectRequest),
    Restart(RestartRequest),
    TriggerUpdate,
}

impl ControlRequest {
    /// State machine command carried by this request.
    pub fn command(&self) -> Command {
        match self {
            ControlRequest::Connect(_) => Command::Connect,
            ControlRequest::Restart(req) => Command::Restart {
                update: req.update.unwrap_or(false),
            },
            ControlRequest::TriggerUpdate => Command::BeginTransfer,
        }
    }
}

/// Response body for accepted control requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub status: String,
    pub phase: UpdatePhase,
}

impl CommandResponse {
    pub fn ok(phase: UpdatePhase) -> Self {
        Self {
            status: "ok".to_string(),
            phase,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use otalink_core::{ProgressCounter, StatusSnapshot};

    fn view(counter: u8, phase: UpdatePhase) -> DeviceView {
        let link = serde_json::json!({ "ssid": "home" });
        DeviceView {
            status: StatusSnapshot {
                link: serde_json::from_value(link).unwrap(),
                counter: ProgressCounter::new(counter),
            },
            firmware: FirmwareDescriptor::new("1.2.3"),
            phase,
        }
    }

    #[test]
    fn test_compose_orders_events() {
        let batch = TickBatch::compose(4, &view(4, UpdatePhase::Downloading), "hello");
        let names: Vec<_> = batch.events().iter().map(ServerEvent::name).collect();
        assert_eq!(names, vec![None, Some("status"), Some("firmware"), Some("update")]);
        assert_eq!(batch.tick(), 4);
        assert_eq!(
            batch.update(),
            &UpdateProgress {
                progress: 4,
                status: "downloading".to_string()
            }
        );
    }

    #[test]
    fn test_diagnostic_line_format() {
        let line = DiagnosticLine {
            tick: 3,
            at: Utc.with_ymd_and_hms(2026, 10, 16, 10, 0, 0).unwrap(),
            phase: UpdatePhase::Connected,
            observers: 1,
            dropped: 0,
        };
        assert_eq!(
            line.to_string(),
            "tick 3 at 2026-10-16T10:00:00.000Z: phase connected, 1 observer"
        );

        let line = DiagnosticLine {
            observers: 2,
            dropped: 1,
            ..line
        };
        assert_eq!(
            line.to_string(),
            "tick 3 at 2026-10-16T10:00:00.000Z: phase connected, 2 observers (1 dropped)"
        );
    }

    #[test]
    fn test_connect_request_debug_hides_password() {
        let req = ConnectRequest {
            ssid: Some("home".to_string()),
            password: Some("hunter2".to_string()),
        };
        let debug = format!("{:?}", req);
        assert!(debug.contains("home"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_request_commands() {
        assert_eq!(
            ControlRequest::Restart(RestartRequest { update: Some(true) }).command(),
            Command::Restart { update: true }
        );
        assert_eq!(
            ControlRequest::Restart(RestartRequest::default()).command(),
            Command::Restart { update: false }
        );
        assert_eq!(ControlRequest::TriggerUpdate.command(), Command::BeginTransfer);
    }
}
