//! REST API module for opsgate
//!
//! Provides:
//! - Health endpoints (`/health`, `/health/detailed`)
//! - Host metrics (`/monitor/stats`)
//! - Synchronous command execution (`/run`)

pub mod health;
pub mod monitor;
pub mod run;

pub use health::health_routes;
pub use monitor::monitor_routes;
pub use run::run_routes;
