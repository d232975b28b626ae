use crate::command_spec::CommandSpec;
use crate::error::RunnerError;
use std::fs::File;
use std::process::{Child, ExitStatus};

#[cfg(unix)]
mod unix;

/// A child attached to the slave side of a pseudo-terminal.
pub(crate) struct PtyChild {
    pub child: Child,
    /// Master side; reads yield the child's output, writes become its input.
    pub master: File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GroupSignal {
    Terminate,
    Kill,
}

pub(crate) fn spawn_on_pty(spec: &CommandSpec, rows: u16, cols: u16) -> Result<PtyChild, RunnerError> {
    #[cfg(unix)]
    {
        unix::spawn_on_pty(spec, rows, cols)
    }

    #[cfg(not(unix))]
    {
        let _ = (spec, rows, cols);
        Err(RunnerError::Unsupported {
            platform: std::env::consts::OS.to_string(),
        })
    }
}

/// Signal every process in the group led by `pid`.
///
/// Returns `false` when the group no longer exists.
pub(crate) fn signal_group(pid: u32, signal: GroupSignal) -> Result<bool, RunnerError> {
    #[cfg(unix)]
    {
        unix::signal_group(pid, signal)
    }

    #[cfg(not(unix))]
    {
        let _ = (pid, signal);
        Ok(false)
    }
}

/// Signal number that ended the process, if it was killed by one.
pub(crate) fn exit_signal(status: &ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    }

    #[cfg(not(unix))]
    {
        let _ = status;
        None
    }
}
