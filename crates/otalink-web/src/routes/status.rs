//! Status routes.
//!
//! # Endpoints
//!
//! ### `GET /status.json`
//! Current link status as a flat JSON object, reloaded from the source on
//! every request.
//!
//! ### `GET /ap.json`
//! Visible access points:
//! ```json
//! [{ "ssid": "home", "chan": 6, "rssi": -52, "auth": 3 }]
//! ```
//!
//! Both responses carry `Cache-Control: no-store` so the UI never shows a
//! cached status. Sources are read on the blocking pool.

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};

use otalink_core::ConfigError;

use crate::{ApiError, AppState};

const NO_STORE: [(header::HeaderName, &str); 2] = [
    (header::CACHE_CONTROL, "no-store, no-cache, must-revalidate, max-age=0"),
    (header::PRAGMA, "no-cache"),
];

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/status.json", get(get_status))
        .route("/ap.json", get(get_access_points))
}

/// GET /status.json
async fn get_status(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let link = tokio::task::spawn_blocking(move || {
        state.store.load_static_snapshot(state.source.as_ref())?;
        Ok::<_, ConfigError>(state.store.link_status())
    })
    .await??;
    Ok((NO_STORE, Json(link)))
}

/// GET /ap.json
async fn get_access_points(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let access_points =
        tokio::task::spawn_blocking(move || state.source.load_access_points()).await??;
    Ok((NO_STORE, Json(access_points)))
}
