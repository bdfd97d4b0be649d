//! # otalink-server
//!
//! Update-status broadcasting and firmware image reception on tokio.
//!
//! - `EventBroadcaster` pushes a four-event batch to every observer per tick
//! - `ObserverHandle` is one subscribed client
//! - `ImageReceiver` streams an uploaded image to storage

pub mod broadcaster;
pub mod image;
pub mod observer;
pub mod statistics;

pub use broadcaster::{BroadcasterConfig, EventBroadcaster};
pub use image::{ImageError, ImageReceiver};
pub use observer::{ObserverError, ObserverHandle, ObserverId};
pub use statistics::BroadcastStats;

pub use otalink_core::{StatusStore, UpdateStateMachine};
