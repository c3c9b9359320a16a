//! WebSocket interview sessions.
//!
//! - `session`: the connection lifecycle and the runtime that executes the
//!   interview state machine's commands.
//! - `speech`: synthesized speech streamed to the client as binary frames.

pub mod session;
pub mod speech;

pub use session::ws_handler;
