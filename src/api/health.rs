//! Health check endpoints with component-level diagnostics.
//!
//! Provides:
//! - `/health` — simple "healthy" + version (for load balancers)
//! - `/health/detailed` — per-component status (history store, event bus, sessions)

use std::sync::Arc;
use std::time::Instant;

use axum::extract::Extension;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;

use opsgate_core::event_bus::EventBus;
use opsgate_core::history::HistoryStore;
use opsgate_core::registry::SessionRegistry;

use crate::middleware::auth::RequireAuth;

/// Simple health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Detailed health response with per-component checks
#[derive(Debug, Serialize)]
pub struct DetailedHealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub checks: HealthChecks,
}

/// All component health checks
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub history: ComponentHealth,
    pub event_bus: ComponentHealth,
    pub sessions: ComponentHealth,
}

/// Individual component health status
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ComponentHealth {
    fn healthy(latency_ms: u64) -> Self {
        Self {
            status: "healthy",
            latency_ms: Some(latency_ms),
            error: None,
            details: None,
        }
    }

    fn healthy_with_details(details: serde_json::Value) -> Self {
        Self {
            status: "healthy",
            latency_ms: None,
            error: None,
            details: Some(details),
        }
    }

    fn unhealthy(error: String) -> Self {
        Self {
            status: "unhealthy",
            latency_ms: None,
            error: Some(error),
            details: None,
        }
    }
}

/// Create the health router
pub fn health_routes() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/detailed", get(health_detailed))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn health_detailed(
    RequireAuth(_claims): RequireAuth,
    Extension(history): Extension<Arc<dyn HistoryStore>>,
    Extension(event_bus): Extension<Arc<EventBus>>,
    Extension(registry): Extension<Arc<SessionRegistry>>,
) -> Json<DetailedHealthResponse> {
    let start = Instant::now();
    let history_check = match history.ping().await {
        Ok(()) => ComponentHealth::healthy(start.elapsed().as_millis() as u64),
        Err(e) => ComponentHealth::unhealthy(e.to_string()),
    };

    let event_bus_check = ComponentHealth::healthy_with_details(serde_json::json!({
        "subscribers": event_bus.subscriber_count(),
    }));
    let sessions_check = ComponentHealth::healthy_with_details(serde_json::json!({
        "active": registry.active_count().await,
    }));

    let status = if history_check.status == "healthy" {
        "healthy"
    } else {
        "degraded"
    };

    Json(DetailedHealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        checks: HealthChecks {
            history: history_check,
            event_bus: event_bus_check,
            sessions: sessions_check,
        },
    })
}
