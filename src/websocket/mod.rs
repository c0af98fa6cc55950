//! WebSocket module for opsgate
//!
//! Provides the real-time endpoint:
//! - /ws/terminal - Authenticated interactive command session

pub mod terminal;

pub use terminal::terminal_handler;

use axum::{routing::get, Router};

/// Create the WebSocket router
pub fn websocket_router() -> Router {
    Router::new().route("/ws/terminal", get(terminal_handler))
}
