//! Terminal WebSocket protocol definitions
//!
//! Wire names are camelCase to match the channel contract
//! (`systemInfo`, `storedCommands`, `systemStats`, `output`, `error`).
//! Both enums are closed: unknown inbound types are rejected with an
//! `error` event rather than ignored.

use serde::{Deserialize, Serialize};

use opsgate_core::history::CommandRecord;
use opsgate_exec::metrics::{HostInfo, SystemStats};

/// Events from the client
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Submit a command line (`cd <path>` mutates the session cursor,
    /// anything else is executed)
    Command { text: String },
    /// Keepalive
    Ping,
}

/// Events to the client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Host description plus this session's working directory
    SystemInfo {
        #[serde(flatten)]
        info: HostInfo,
        path: String,
    },
    /// Full command history, oldest first
    StoredCommands { commands: Vec<CommandRecord> },
    /// Periodic utilization sample
    SystemStats {
        #[serde(flatten)]
        stats: SystemStats,
    },
    /// One line of process output (stdout or stderr)
    Output { data: String },
    /// Human-readable failure, local to this session
    Error { message: String },
    /// Keepalive reply
    Pong,
}
