//! Wire codec for the event stream and control requests.
//!
//! Events use the `text/event-stream` format: an optional `event:` line, one
//! `data:` line per payload line, and a terminating blank line. Control
//! requests are JSON bodies.

use serde_json::Value;
use thiserror::Error;

use crate::messages::{CommandKind, ConnectRequest, ControlRequest, RestartRequest, ServerEvent, TickBatch};

/// Errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON serialization failed.
    #[error("Failed to serialize event: {0}")]
    SerializeError(#[from] serde_json::Error),

    /// Control request body is not valid JSON or violates the schema.
    #[error("Malformed command: {0}")]
    MalformedCommand(String),
}

/// Encode one event as an SSE frame.
pub fn encode_event(event: &ServerEvent) -> Result<String, CodecError> {
    let data = match event {
        ServerEvent::Diagnostic(text) => text.clone(),
        ServerEvent::Status(link) => serde_json::to_string(link)?,
        ServerEvent::Firmware(firmware) => serde_json::to_string(firmware)?,
        ServerEvent::Update(progress) => serde_json::to_string(progress)?,
    };

    let mut frame = String::with_capacity(data.len() + 32);
    if let Some(name) = event.name() {
        frame.push_str("event: ");
        frame.push_str(name);
        frame.push('\n');
    }
    for line in data.split('\n') {
        frame.push_str("data: ");
        frame.push_str(line.strip_suffix('\r').unwrap_or(line));
        frame.push('\n');
    }
    frame.push('\n');
    Ok(frame)
}

/// Encode a whole tick as one chunk, so it is written in a single piece.
pub fn encode_batch(batch: &TickBatch) -> Result<String, CodecError> {
    let mut out = String::new();
    for event in batch.events() {
        out.push_str(&encode_event(event)?);
    }
    Ok(out)
}

/// Decode a control request body posted to the endpoint for `kind`.
///
/// The body must be valid JSON. Fields that are present must have the
/// expected type; a non-object body carries no fields.
pub fn decode_command(kind: CommandKind, body: &[u8]) -> Result<ControlRequest, CodecError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| CodecError::MalformedCommand(format!("body is not valid JSON: {}", e)))?;

    match kind {
        CommandKind::Connect => Ok(ControlRequest::Connect(fields_or_default::<ConnectRequest>(
            value,
        )?)),
        CommandKind::Restart => Ok(ControlRequest::Restart(fields_or_default::<RestartRequest>(
            value,
        )?)),
        CommandKind::TriggerUpdate => Ok(ControlRequest::TriggerUpdate),
    }
}

fn fields_or_default<T>(value: Value) -> Result<T, CodecError>
where
    T: serde::de::DeserializeOwned + Default,
{
    match value {
        Value::Object(_) => serde_json::from_value(value)
            .map_err(|e| CodecError::MalformedCommand(e.to_string())),
        _ => Ok(T::default()),
    }
}

/// A parsed SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE parser for clients reading the stream in chunks.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every frame it completes.
    pub fn push(&mut self, chunk: &str) -> Vec<SseFrame> {
        self.buffer.push_str(&chunk.replace("\r\n", "\n"));

        let mut frames = Vec::new();
        while let Some(end) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..end + 2).collect();
            if let Some(frame) = parse_block(&block) {
                frames.push(frame);
            }
        }
        frames
    }
}

fn parse_block(block: &str) -> Option<SseFrame> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }

    if event.is_none() && data.is_empty() {
        return None;
    }
    Some(SseFrame {
        event,
        data: data.join("\n"),
    })
}
