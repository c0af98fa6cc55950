//! Process execution and host metrics for the opsgate server.
//!
//! - [`process`] — one supervised child process per submitted command line,
//!   output streamed live, exactly one terminal event
//! - [`metrics`] — windowed CPU/memory/load sampling and host description

pub mod error;
pub mod metrics;
pub mod process;

pub use error::{Error, Result};
pub use metrics::{HostInfo, LoadAverages, SystemStats};
pub use process::{ProcessEvent, ProcessHandle};
