//! Control routes.
//!
//! # Endpoints
//!
//! ### `POST /connect.json`
//! Join a network. Body: `{ "ssid": "...", "password": "..." }`, both optional.
//!
//! ### `POST /restart.json`
//! Restart, optionally into the update flow. Body: `{ "update": true }`.
//!
//! ### `POST /update.json`
//! Start an update transfer.
//!
//! Every body must be valid JSON. Accepted requests answer with
//! ```json
//! { "status": "ok", "phase": "connected" }
//! ```

use axum::{body::Bytes, extract::State, response::Json, routing::post, Router};
use tracing::info;

use otalink_protocol::{decode_command, CommandKind, CommandResponse, ControlRequest};

use crate::{ApiError, AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/connect.json", post(connect))
        .route("/restart.json", post(restart))
        .route("/update.json", post(trigger_update))
}

/// POST /connect.json
async fn connect(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<CommandResponse>, ApiError> {
    apply(&state, CommandKind::Connect, &body)
}

/// POST /restart.json
async fn restart(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<CommandResponse>, ApiError> {
    apply(&state, CommandKind::Restart, &body)
}

/// POST /update.json
async fn trigger_update(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<CommandResponse>, ApiError> {
    apply(&state, CommandKind::TriggerUpdate, &body)
}

fn apply(
    state: &AppState,
    kind: CommandKind,
    body: &[u8],
) -> Result<Json<CommandResponse>, ApiError> {
    let request = decode_command(kind, body)?;

    match &request {
        ControlRequest::Connect(req) => info!(
            "Connect requested (ssid: {})",
            req.ssid.as_deref().unwrap_or("<unchanged>")
        ),
        ControlRequest::Restart(req) => {
            info!("Restart requested (update: {})", req.update.unwrap_or(false))
        }
        ControlRequest::TriggerUpdate => info!("Update requested"),
    }

    let transition = state.machine.apply_command(request.command())?;
    Ok(Json(CommandResponse::ok(transition.current)))
}
