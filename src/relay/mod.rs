//! # Relay Core
//!
//! Transport-neutral pieces of a relay session:
//! - [`frame`]: the frames and close codes both websockets speak
//! - [`envelope`]: the JSON `{type, data}` messages the relay itself produces
//! - [`session`]: the per-connection state machine
//! - [`upstream`]: the outbound websocket to the realtime service
//!
//! The actix actor in `websocket.rs` is the only place that knows about actix types.

pub mod envelope;
pub mod frame;
pub mod session;
pub mod upstream;
