//! Terminal WebSocket module

pub mod protocol;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::ws::WebSocketUpgrade, response::IntoResponse, Extension};

use opsgate_core::event_bus::EventBus;
use opsgate_core::history::HistoryStore;
use opsgate_core::registry::SessionRegistry;

use crate::middleware::auth::RequireAuth;
use crate::server::AppConfig;

/// WebSocket upgrade handler. Authentication happens before the upgrade:
/// a rejected credential never reaches the session loop and no session
/// state is created for it.
pub async fn terminal_handler(
    RequireAuth(claims): RequireAuth,
    ws: WebSocketUpgrade,
    Extension(history): Extension<Arc<dyn HistoryStore>>,
    Extension(event_bus): Extension<Arc<EventBus>>,
    Extension(registry): Extension<Arc<SessionRegistry>>,
    Extension(config): Extension<Arc<AppConfig>>,
) -> impl IntoResponse {
    let metrics_interval = Duration::from_secs(config.metrics.interval_secs.max(1));
    ws.on_upgrade(move |socket| {
        session::handle_socket(socket, claims, history, event_bus, registry, metrics_interval)
    })
}
