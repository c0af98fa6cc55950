//! Server initialization and run loop.
//!
//! Wires the auth gate, history store, event bus and session registry into
//! the axum router and serves until Ctrl-C/SIGTERM.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, Method};
use axum::{routing::get, Extension, Router};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use opsgate_core::auth::AuthGate;
use opsgate_core::event_bus::EventBus;
use opsgate_core::history::{HistoryStore, SqliteHistoryStore};
use opsgate_core::registry::SessionRegistry;

use super::config::AppConfig;

/// Run the server
pub async fn run(config: AppConfig) -> Result<()> {
    let jwks_url = config.auth.resolve_jwks_url()?;
    let auth_gate = Arc::new(AuthGate::new(jwks_url));

    let history: Arc<dyn HistoryStore> = Arc::new(
        SqliteHistoryStore::from_path(&config.history.database_path)
            .await
            .context("Failed to open history store")?,
    );
    let event_bus = Arc::new(EventBus::default());
    let registry = Arc::new(SessionRegistry::new());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    let cors = cors_layer(&config.server.cors_allowed_origins);
    let config = Arc::new(config);

    let app = Router::new()
        // Health endpoints (/health public for LB, /health/detailed requires auth)
        .merge(crate::api::health_routes())
        // REST surface (auth applied per-handler via RequireAuth extractor)
        .merge(crate::api::monitor_routes())
        .merge(crate::api::run_routes())
        // WebSocket routes
        .merge(crate::websocket::websocket_router())
        .route("/", get(|| async { "opsgate" }))
        // Layers (applied to all routes)
        .layer(Extension(auth_gate))
        .layer(Extension(history))
        .layer(Extension(event_bus))
        .layer(Extension(registry))
        .layer(Extension(config))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    info!("HTTP server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("opsgate shutdown complete");
    Ok(())
}

/// CORS restricted to the configured origins; permissive when none are set.
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring unparsable CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(parsed))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
