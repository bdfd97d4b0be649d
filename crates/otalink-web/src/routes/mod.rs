//! HTTP route handlers.
//!
//! Paths follow the device's web UI, which polls the `.json` endpoints and
//! listens on `/events`.

pub mod control;
pub mod events;
pub mod status;
pub mod upload;

use axum::Router;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppState;

/// Create the main Axum router with all routes.
///
/// Routes are organized as:
/// - `/status.json`, `/ap.json` - Link status and access points
/// - `/connect.json`, `/restart.json`, `/update.json` - Control commands
/// - `/events` - Server-sent event stream
/// - `/upload` - Firmware image upload
/// - `/` - Static web UI, when a web root is configured
pub fn create_router(state: AppState) -> Router {
    let web_root = state.web_root.clone();

    let router = Router::new()
        .merge(status::routes())
        .merge(control::routes())
        .merge(events::routes())
        .merge(upload::routes())
        .with_state(state);

    let router = match web_root {
        Some(root) => {
            info!("Serving web UI from {}", root.display());
            router.fallback_service(ServeDir::new(root))
        }
        None => router,
    };

    router.layer(TraceLayer::new_for_http())
}
