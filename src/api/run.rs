//! Synchronous command execution over REST.
//!
//! Appends the command to the shared history, runs it to completion,
//! notifies connected sessions of the history change and returns the
//! captured output. The non-interactive sibling of the WebSocket flow.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::post;
use axum::{Extension, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use opsgate_core::event_bus::{BroadcastEvent, EventBus};
use opsgate_core::history::{CommandRecord, HistoryStore};
use opsgate_exec::process::{self, ProcessEvent};

use crate::middleware::auth::RequireAuth;

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub command: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    pub output: String,
    pub exit_code: Option<i32>,
    pub stored_commands: Vec<CommandRecord>,
}

#[derive(Debug, Serialize)]
pub struct RunErrorResponse {
    pub error: &'static str,
    pub message: String,
}

type RunError = (StatusCode, Json<RunErrorResponse>);

/// Create the run router
pub fn run_routes() -> Router {
    Router::new().route("/run", post(run_command))
}

async fn run_command(
    RequireAuth(claims): RequireAuth,
    Extension(history): Extension<Arc<dyn HistoryStore>>,
    Extension(event_bus): Extension<Arc<EventBus>>,
    Json(request): Json<RunRequest>,
) -> Result<Json<RunResponse>, RunError> {
    let text = request.command.trim();
    let (command, args) = process::split_command(text).map_err(bad_request)?;

    let record = history.append(text).await.map_err(internal)?;
    info!(user = %claims.display_name(), command = %text, "run request accepted");

    let cwd = std::env::current_dir().map_err(internal)?;
    let mut handle = process::spawn(&command, &args, &cwd);

    let mut output = String::new();
    let mut exit_code = None;
    while let Some(event) = handle.recv().await {
        match event {
            ProcessEvent::Stdout(line) => {
                output.push_str(&line);
                output.push('\n');
            }
            ProcessEvent::Stderr(line) => {
                output.push_str("ERROR: ");
                output.push_str(&line);
                output.push('\n');
            }
            ProcessEvent::Exited { code, .. } => exit_code = code,
            ProcessEvent::Failed { message } => {
                // The record is already committed; sessions still need the
                // history notification.
                notify(&event_bus, &record);
                return Err((
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(RunErrorResponse {
                        error: "Command execution failed",
                        message,
                    }),
                ));
            }
        }
    }

    notify(&event_bus, &record);
    let stored_commands = history.list_all().await.map_err(internal)?;

    Ok(Json(RunResponse {
        output,
        exit_code,
        stored_commands,
    }))
}

fn notify(event_bus: &EventBus, record: &CommandRecord) {
    event_bus.publish(BroadcastEvent::HistoryAppended {
        record_id: record.id.clone(),
    });
}

fn bad_request(e: impl std::fmt::Display) -> RunError {
    (
        StatusCode::BAD_REQUEST,
        Json(RunErrorResponse {
            error: "Invalid command",
            message: e.to_string(),
        }),
    )
}

fn internal(e: impl std::fmt::Display) -> RunError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(RunErrorResponse {
            error: "Command execution failed",
            message: e.to_string(),
        }),
    )
}
