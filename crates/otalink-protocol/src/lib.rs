//! # otalink-protocol
//!
//! Event stream records, the SSE codec and control request decoding.

pub mod codec;
pub mod messages;

pub use codec::*;
pub use messages::*;
