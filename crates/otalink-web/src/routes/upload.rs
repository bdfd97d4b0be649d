//! `POST /upload` - firmware image upload.
//!
//! The raw request body is the image. When a `Content-Length` is sent the
//! whole declared length must arrive. Once the receiver is done the phase
//! moves to `downloaded`, or to `failed` if the transfer did not complete.
//!
//! ```json
//! { "bytes": 1048576 }
//! ```

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap},
    response::Json,
    routing::post,
    Router,
};
use serde::Serialize;
use tracing::{info, warn};

use otalink_core::Command;
use otalink_server::ImageError;

use crate::{ApiError, AppState};

/// Response to a completed upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    pub bytes: u64,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/upload", post(upload))
}

async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<UploadResponse>, ApiError> {
    let declared_len = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    info!(
        "Receiving image into {} ({} bytes declared)",
        state.receiver.image_path().display(),
        declared_len.map_or_else(|| "no length".to_string(), |n| n.to_string())
    );

    match state
        .receiver
        .receive(body.into_data_stream(), declared_len)
        .await
    {
        Ok(bytes) => {
            state.machine.apply_command(Command::TransferComplete)?;
            Ok(Json(UploadResponse { bytes }))
        }
        Err(ImageError::Rejected(e)) => Err(ImageError::Rejected(e).into()),
        Err(e) => {
            if let Err(rejected) = state.machine.apply_command(Command::TransferFailed) {
                warn!("Could not record failed transfer: {}", rejected);
            }
            Err(e.into())
        }
    }
}
