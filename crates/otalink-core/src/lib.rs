//! # otalink-core
//!
//! Core device status model, store and update state machine.
//!
//! This crate provides:
//! - Data model types (link status, firmware descriptor, update phase)
//! - The shared `StatusStore`
//! - The `UpdateStateMachine` that applies control commands
//! - Status source and configuration loading
//!
//! This crate is intentionally runtime-agnostic and contains no async code,
//! so the same logic runs behind tokio on Linux and on the device itself.

pub mod config;
pub mod machine;
pub mod model;
pub mod source;
pub mod store;

pub use config::ServiceConfig;
pub use machine::{Command, CommandError, Transition, TransitionPolicy, UpdateStateMachine};
pub use model::*;
pub use source::{ConfigError, FileStatusSource, StatusSource};
pub use store::StatusStore;
