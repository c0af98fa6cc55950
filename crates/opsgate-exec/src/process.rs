//! Command process supervision.
//!
//! One child process per submitted command line: spawned in the caller's
//! working directory, stdout and stderr streamed line-by-line in arrival
//! order, terminated by exactly one `Exited` or `Failed` event after all
//! output has been delivered. Spawn-level OS errors arrive on the same
//! channel as a `Failed` event, so no failure mode is a silent drop. The
//! supervisor does not retry.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{Error, Result};

/// Buffered events per process before the pumps apply backpressure.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Output and lifecycle events of one supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A line of standard output
    Stdout(String),
    /// A line of standard error
    Stderr(String),
    /// The process terminated. Sent exactly once, after all output.
    Exited { code: Option<i32>, success: bool },
    /// The process could not be started or waited on
    Failed { message: String },
}

impl ProcessEvent {
    /// Whether this event ends the stream.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessEvent::Exited { .. } | ProcessEvent::Failed { .. }
        )
    }
}

/// Handle to one running command process, exclusively owned by its spawner.
pub struct ProcessHandle {
    events: mpsc::Receiver<ProcessEvent>,
    supervisor: JoinHandle<()>,
}

impl ProcessHandle {
    /// Next event; `None` once the stream is exhausted.
    pub async fn recv(&mut self) -> Option<ProcessEvent> {
        self.events.recv().await
    }

    /// Terminate the child and stop streaming. Aborting the supervisor
    /// task drops the child, which kills it (`kill_on_drop`). Safe to
    /// call more than once.
    pub fn abort(&self) {
        self.supervisor.abort();
    }
}

/// Split a raw command line into an executable and its arguments.
pub fn split_command(text: &str) -> Result<(String, Vec<String>)> {
    let words = shell_words::split(text).map_err(|e| Error::InvalidCommand(e.to_string()))?;
    let mut words = words.into_iter();
    match words.next() {
        Some(command) => Ok((command, words.collect())),
        None => Err(Error::InvalidCommand("empty command".to_string())),
    }
}

/// Start one child process bound to the given working directory and
/// stream its output.
pub fn spawn(command: &str, args: &[String], cwd: &Path) -> ProcessHandle {
    let (tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let command = command.to_string();
    let args = args.to_vec();
    let cwd: PathBuf = cwd.to_path_buf();

    let supervisor = tokio::spawn(async move {
        let mut cmd = Command::new(&command);
        cmd.args(&args)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let _ = tx
                    .send(ProcessEvent::Failed {
                        message: format!("failed to start {command}: {e}"),
                    })
                    .await;
                return;
            }
        };
        debug!(command = %command, pid = ?child.id(), "child process started");

        let out_pump = child
            .stdout
            .take()
            .map(|out| tokio::spawn(pump(out, tx.clone(), OutputStream::Stdout)));
        let err_pump = child
            .stderr
            .take()
            .map(|err| tokio::spawn(pump(err, tx.clone(), OutputStream::Stderr)));

        let status = child.wait().await;

        // Drain both pumps first so every output line precedes the
        // terminal event.
        if let Some(pump) = out_pump {
            let _ = pump.await;
        }
        if let Some(pump) = err_pump {
            let _ = pump.await;
        }

        let event = match status {
            Ok(status) => ProcessEvent::Exited {
                code: status.code(),
                success: status.success(),
            },
            Err(e) => ProcessEvent::Failed {
                message: format!("wait failed: {e}"),
            },
        };
        let _ = tx.send(event).await;
    });

    ProcessHandle { events, supervisor }
}

#[derive(Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

async fn pump<R>(reader: R, tx: mpsc::Sender<ProcessEvent>, stream: OutputStream)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let event = match stream {
                    OutputStream::Stdout => ProcessEvent::Stdout(line),
                    OutputStream::Stderr => ProcessEvent::Stderr(line),
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = tx
                    .send(ProcessEvent::Stderr(format!("output read error: {e}")))
                    .await;
                break;
            }
        }
    }
}
