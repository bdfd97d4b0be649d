//! # otalink-web
//!
//! HTTP control API and event stream for the otalink service.
//!
//! This crate provides:
//! - JSON endpoints reporting link status and the access-point list
//! - Control endpoints that drive the update state machine
//! - The `/events` server-sent event stream
//! - Firmware image upload
//! - Optional static file serving for a web UI
//!
//! ## Usage
//!
//! ```rust,ignore
//! use otalink_web::{create_router, ServerState};
//!
//! let state = Arc::new(ServerState::from_config(&config));
//! tokio::spawn(state.broadcaster.clone().run(shutdown_rx));
//!
//! let listener = TcpListener::bind(config.bind_addr).await?;
//! axum::serve(listener, create_router(state)).await?;
//! ```

pub mod error;
pub mod routes;

// Re-exports
pub use error::ApiError;
pub use routes::create_router;

use std::path::PathBuf;
use std::sync::Arc;

use otalink_core::{ServiceConfig, StatusSource, StatusStore, UpdateStateMachine};
use otalink_server::{BroadcasterConfig, EventBroadcaster, ImageReceiver};

/// Shared server state for all route handlers.
pub struct ServerState {
    pub store: Arc<StatusStore>,
    pub machine: UpdateStateMachine,
    pub broadcaster: EventBroadcaster,
    pub receiver: ImageReceiver,
    pub source: Arc<dyn StatusSource>,
    pub web_root: Option<PathBuf>,
}

impl ServerState {
    /// Wire every component around one store.
    pub fn new(
        store: Arc<StatusStore>,
        source: Arc<dyn StatusSource>,
        config: &ServiceConfig,
    ) -> Self {
        let machine = UpdateStateMachine::new(store.clone(), config.transition_policy());
        let broadcaster = EventBroadcaster::new(store.clone(), BroadcasterConfig::from(config))
            .with_source(source.clone());
        let receiver = ImageReceiver::new(
            machine.clone(),
            config.image_path.clone(),
            config.max_image_bytes,
        );

        Self {
            store,
            machine,
            broadcaster,
            receiver,
            source,
            web_root: config.web_root.clone(),
        }
    }

    /// Build state reading status and access points from the configured files.
    pub fn from_config(config: &ServiceConfig) -> Self {
        let store = Arc::new(StatusStore::new(config.firmware()));
        Self::new(store, Arc::new(config.status_source()), config)
    }
}

/// Type alias for shared state in Axum handlers.
pub type AppState = Arc<ServerState>;
