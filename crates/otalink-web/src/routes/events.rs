//! `GET /events` - server-sent event stream.
//!
//! Every tick the client receives, in order:
//!
//! ```text
//! data: tick 7 at 2024-01-01T00:00:35.000Z: phase downloading, 1 observer
//!
//! event: status
//! data: {"ssid":"home","if_status":true}
//!
//! event: firmware
//! data: {"version":"0.1.0"}
//!
//! event: update
//! data: {"progress":7,"status":"downloading"}
//! ```
//!
//! The observer is deregistered as soon as the response body is dropped.

use axum::{
    body::Body,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::StreamExt;
use tracing::debug;

use otalink_protocol::encode_batch;

use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/events", get(events))
}

async fn events(State(state): State<AppState>) -> Response {
    let observer = state.broadcaster.subscribe();
    debug!("Event stream opened for observer {}", observer.id());

    let frames = observer
        .into_stream()
        .map(|batch| encode_batch(&batch));

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(frames),
    )
        .into_response()
}
