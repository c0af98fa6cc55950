//! Middleware module for the opsgate HTTP server
//!
//! Provides the bearer-credential extractor shared by the REST endpoints
//! and the WebSocket upgrade handler.

pub mod auth;
