//! Terminal WebSocket session management
//!
//! One session per connection: a working-directory cursor, at most one
//! in-flight command process, a periodic metrics push and the shared
//! history broadcast, all multiplexed on a single event loop. Every
//! teardown path leaves the loop through the same exit: the session is
//! de-registered, the metrics interval dropped and any live child killed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use opsgate_core::auth::Claims;
use opsgate_core::event_bus::{BroadcastEvent, EventBus};
use opsgate_core::history::HistoryStore;
use opsgate_core::registry::SessionRegistry;
use opsgate_exec::metrics;
use opsgate_exec::process::{self, ProcessEvent, ProcessHandle};

use super::protocol::{ClientEvent, ServerEvent};

type WsSink = SplitSink<WebSocket, Message>;

/// One in-flight command and the history record it was committed under.
struct ActiveCommand {
    handle: ProcessHandle,
    record_id: String,
}

/// Server-side state bound to one live connection.
struct Session {
    id: Uuid,
    claims: Claims,
    cwd: PathBuf,
    active: Option<ActiveCommand>,
    history: Arc<dyn HistoryStore>,
    event_bus: Arc<EventBus>,
}

/// Handle one WebSocket connection for its whole lifetime.
pub async fn handle_socket(
    socket: WebSocket,
    claims: Claims,
    history: Arc<dyn HistoryStore>,
    event_bus: Arc<EventBus>,
    registry: Arc<SessionRegistry>,
    metrics_interval: Duration,
) {
    let session_id = Uuid::new_v4();
    info!(session_id = %session_id, user = %claims.display_name(), "terminal session opened");
    registry.insert(session_id, claims.display_name()).await;

    let leftover = run_session(
        socket,
        session_id,
        claims,
        history,
        event_bus,
        metrics_interval,
    )
    .await;

    // Teardown: the same path for client close, protocol error and
    // network loss.
    if let Some(active) = leftover {
        debug!(session_id = %session_id, "terminating in-flight command process");
        active.handle.abort();
    }
    registry.remove(session_id).await;
    info!(session_id = %session_id, "terminal session closed");
}

/// The session event loop. Returns the still-running command, if any, so
/// the caller can terminate it.
async fn run_session(
    socket: WebSocket,
    session_id: Uuid,
    claims: Claims,
    history: Arc<dyn HistoryStore>,
    event_bus: Arc<EventBus>,
    metrics_interval: Duration,
) -> Option<ActiveCommand> {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Subscribe before the snapshot so no history change can fall between
    // the initial read and the first broadcast this session observes.
    let mut broadcast_rx = event_bus.subscribe();

    // Internal channel for events produced by spawned tasks (metrics samples)
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<ServerEvent>();

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    let mut session = Session {
        id: session_id,
        claims,
        cwd,
        active: None,
        history,
        event_bus,
    };

    // Initial snapshot: host description + full history, before any other event
    if !send_event(&mut ws_tx, &system_info_event(&session.cwd)).await {
        return session.active;
    }
    if !session.push_history(&mut ws_tx).await {
        return session.active;
    }

    // The first tick fires one full interval after connect, so the
    // snapshot is always the first thing a client sees.
    let mut stats_interval = time::interval_at(Instant::now() + metrics_interval, metrics_interval);
    stats_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            // Client events
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(ClientEvent::Command { text }) => {
                                if !session.handle_command(text.trim(), &mut ws_tx).await {
                                    break;
                                }
                            }
                            Ok(ClientEvent::Ping) => {
                                if !send_event(&mut ws_tx, &ServerEvent::Pong).await {
                                    break;
                                }
                            }
                            Err(e) => {
                                let event = ServerEvent::Error {
                                    message: format!("Invalid message format: {e}"),
                                };
                                if !send_event(&mut ws_tx, &event).await {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(session_id = %session.id, "client closed connection");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Err(e)) => {
                        warn!(session_id = %session.id, error = %e, "websocket error");
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }
            // Events from spawned tasks (metrics samples)
            event = events_rx.recv() => {
                match event {
                    Some(event) => {
                        if !send_event(&mut ws_tx, &event).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            // Output and exit of the in-flight command process
            event = async {
                match session.active.as_mut() {
                    Some(active) => active.handle.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                if !session.handle_process_event(event, &mut ws_tx).await {
                    break;
                }
            }
            // Shared history changed (any session, or the REST surface)
            update = broadcast_rx.recv() => {
                match update {
                    Ok(BroadcastEvent::HistoryAppended { .. }) => {
                        if !session.push_history(&mut ws_tx).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Missed notifications collapse into one re-read;
                        // the snapshot carries the full log either way.
                        warn!(session_id = %session.id, lagged = n, "history subscriber lagged");
                        if !session.push_history(&mut ws_tx).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            // Metrics push, independent of command activity
            _ = stats_interval.tick() => {
                let tx = events_tx.clone();
                let session_id = session.id;
                tokio::spawn(async move {
                    match metrics::sample().await {
                        Ok(stats) => {
                            let _ = tx.send(ServerEvent::SystemStats { stats });
                        }
                        // Log and keep sampling on the next tick.
                        Err(e) => warn!(session_id = %session_id, error = %e, "metrics sample failed"),
                    }
                });
            }
        }
    }

    session.active
}

impl Session {
    /// Dispatch one submitted line: directory change or command execution.
    /// Returns false once the connection is no longer writable.
    async fn handle_command(&mut self, text: &str, ws_tx: &mut WsSink) -> bool {
        let (command, args) = match process::split_command(text) {
            Ok(parts) => parts,
            Err(e) => {
                let event = ServerEvent::Error {
                    message: format!("Invalid command: {e}"),
                };
                return send_event(ws_tx, &event).await;
            }
        };

        if command == "cd" {
            return self.change_directory(&args, ws_tx).await;
        }
        self.execute(text, &command, args, ws_tx).await
    }

    /// `cd` mutates only this session's cursor; failure leaves it untouched.
    async fn change_directory(&mut self, args: &[String], ws_tx: &mut WsSink) -> bool {
        let target = self.cwd.join(args.join(" "));
        match resolve_directory(&target).await {
            Ok(path) => {
                self.cwd = path;
                debug!(session_id = %self.id, cwd = %self.cwd.display(), "directory changed");
                send_event(ws_tx, &system_info_event(&self.cwd)).await
            }
            Err(message) => {
                let event = ServerEvent::Error {
                    message: format!("Error changing directory: {message}"),
                };
                send_event(ws_tx, &event).await
            }
        }
    }

    /// Append to the shared history and start the command process.
    async fn execute(
        &mut self,
        text: &str,
        command: &str,
        args: Vec<String>,
        ws_tx: &mut WsSink,
    ) -> bool {
        if self.active.is_some() {
            let event = ServerEvent::Error {
                message: "A command is already running on this session".to_string(),
            };
            return send_event(ws_tx, &event).await;
        }

        let record = match self.history.append(text).await {
            Ok(record) => record,
            Err(e) => {
                error!(session_id = %self.id, error = %e, "history append failed");
                let event = ServerEvent::Error {
                    message: format!("Command execution failed: {e}"),
                };
                return send_event(ws_tx, &event).await;
            }
        };

        info!(
            session_id = %self.id,
            user = %self.claims.display_name(),
            command = %text,
            "command accepted"
        );
        let handle = process::spawn(command, &args, &self.cwd);
        self.active = Some(ActiveCommand {
            handle,
            record_id: record.id,
        });
        true
    }

    /// Route one event from the in-flight process. Returns false once the
    /// connection is no longer writable.
    async fn handle_process_event(
        &mut self,
        event: Option<ProcessEvent>,
        ws_tx: &mut WsSink,
    ) -> bool {
        let Some(event) = event else {
            // Stream closed without a terminal event; free the slot.
            self.active = None;
            return true;
        };

        match event {
            ProcessEvent::Stdout(line) | ProcessEvent::Stderr(line) => {
                send_event(ws_tx, &ServerEvent::Output { data: line }).await
            }
            ProcessEvent::Exited { code, success } => {
                let finished = self.active.take();
                let mut writable = true;
                if !success {
                    let message = match code {
                        Some(code) => format!("Command exited with code {code}"),
                        None => "Command terminated by signal".to_string(),
                    };
                    writable = send_event(ws_tx, &ServerEvent::Error { message }).await;
                }
                // Other sessions still get the history update even if this
                // connection just went away.
                self.publish_history_change(finished);
                writable
            }
            ProcessEvent::Failed { message } => {
                let finished = self.active.take();
                let event = ServerEvent::Error {
                    message: format!("Command execution failed: {message}"),
                };
                let writable = send_event(ws_tx, &event).await;
                self.publish_history_change(finished);
                writable
            }
        }
    }

    fn publish_history_change(&self, finished: Option<ActiveCommand>) {
        if let Some(finished) = finished {
            self.event_bus.publish(BroadcastEvent::HistoryAppended {
                record_id: finished.record_id,
            });
        }
    }

    /// Send this session the current history snapshot.
    async fn push_history(&self, ws_tx: &mut WsSink) -> bool {
        match self.history.list_all().await {
            Ok(commands) => send_event(ws_tx, &ServerEvent::StoredCommands { commands }).await,
            Err(e) => {
                error!(session_id = %self.id, error = %e, "failed to read command history");
                let event = ServerEvent::Error {
                    message: format!("Failed to load command history: {e}"),
                };
                send_event(ws_tx, &event).await
            }
        }
    }
}

/// Fresh host snapshot for the given cursor.
fn system_info_event(cwd: &Path) -> ServerEvent {
    ServerEvent::SystemInfo {
        info: metrics::host_info(),
        path: cwd.display().to_string(),
    }
}

/// Serialize and send one event; false when the socket is gone.
async fn send_event(ws_tx: &mut WsSink, event: &ServerEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => ws_tx.send(Message::Text(json)).await.is_ok(),
        Err(e) => {
            error!(error = %e, "failed to serialize server event");
            true
        }
    }
}

/// Canonicalize a `cd` target; it must exist and be a directory.
async fn resolve_directory(target: &Path) -> Result<PathBuf, String> {
    let path = tokio::fs::canonicalize(target)
        .await
        .map_err(|e| e.to_string())?;
    let meta = tokio::fs::metadata(&path).await.map_err(|e| e.to_string())?;
    if !meta.is_dir() {
        return Err(format!("{} is not a directory", path.display()));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cd_target_resolves_relative_components() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        tokio::fs::create_dir_all(&nested).await.unwrap();

        let resolved = resolve_directory(&nested.join("..")).await.unwrap();
        assert_eq!(resolved, dir.path().join("a").canonicalize().unwrap());
    }

    #[tokio::test]
    async fn cd_to_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = resolve_directory(&dir.path().join("nope")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn cd_to_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        tokio::fs::write(&file, b"x").await.unwrap();

        let result = resolve_directory(&file).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("not a directory"));
    }
}
