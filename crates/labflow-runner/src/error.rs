//! Error types for process sessions

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Failed to allocate a pseudo-terminal: {reason}")]
    PtyUnavailable { reason: String },

    #[error("Failed to start '{program}': {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("Session for PID {pid} is closed")]
    SessionClosed { pid: u32 },

    #[error("Failed to terminate process group {pid}: {reason}")]
    TerminationFailed { pid: u32, reason: String },

    #[error("Interactive sessions are not supported on {platform}")]
    Unsupported { platform: String },

    #[error("IO error in process session: {0}")]
    Io(#[from] std::io::Error),
}
