//! Interview API Library Crate
//!
//! This library contains the web service around the interview engine: the
//! application state, configuration, REST handlers, the WebSocket session
//! runtime and routing. The `api` binary is a thin wrapper around it.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
