//! Host metrics endpoint.

use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tracing::error;

use opsgate_exec::metrics::{self, SystemStats};

use crate::middleware::auth::RequireAuth;

/// `{ success, data }` envelope for the stats endpoint
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<SystemStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Create the monitor router
pub fn monitor_routes() -> Router {
    Router::new().route("/monitor/stats", get(stats))
}

/// One metrics sample; the request is held open for the CPU measurement
/// window.
async fn stats(RequireAuth(_claims): RequireAuth) -> (StatusCode, Json<StatsResponse>) {
    match metrics::sample().await {
        Ok(stats) => (
            StatusCode::OK,
            Json(StatsResponse {
                success: true,
                data: Some(stats),
                message: None,
            }),
        ),
        Err(e) => {
            error!(error = %e, "metrics sampling failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(StatsResponse {
                    success: false,
                    data: None,
                    message: Some("Internal Server Error".to_string()),
                }),
            )
        }
    }
}
