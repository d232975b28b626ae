use super::{GroupSignal, PtyChild};
use crate::command_spec::CommandSpec;
use crate::error::RunnerError;
use nix::errno::Errno;
use nix::pty::{OpenptyResult, Winsize, openpty};
use nix::sys::signal::{Signal, killpg};
use nix::sys::termios::Termios;
use nix::unistd::Pid;
use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::process::CommandExt;
use std::process::Stdio;

pub(crate) fn spawn_on_pty(spec: &CommandSpec, rows: u16, cols: u16) -> Result<PtyChild, RunnerError> {
    let winsize = Winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let OpenptyResult { master, slave } =
        openpty(&winsize, None::<&Termios>).map_err(|e| RunnerError::PtyUnavailable {
            reason: e.to_string(),
        })?;

    // The child must not inherit the master side.
    // SAFETY: plain fcntl on a descriptor we own.
    if unsafe { libc::fcntl(master.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) } == -1 {
        return Err(RunnerError::PtyUnavailable {
            reason: io::Error::last_os_error().to_string(),
        });
    }

    // Scoped so the parent's copies of the slave close right after spawn;
    // otherwise the master never reports end of output.
    let child = {
        let mut cmd = spec.to_command();
        cmd.stdin(Stdio::from(slave.try_clone()?))
            .stdout(Stdio::from(slave.try_clone()?))
            .stderr(Stdio::from(slave));

        // SAFETY: only async-signal-safe calls between fork and exec.
        unsafe {
            cmd.pre_exec(|| {
                // New session, so the child leads its own process group and
                // the pty becomes its controlling terminal.
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                if libc::ioctl(0, libc::TIOCSCTTY as _, 0) == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        cmd.spawn().map_err(|e| RunnerError::SpawnFailed {
            program: spec.program.to_string_lossy().into_owned(),
            reason: e.to_string(),
        })?
    };

    Ok(PtyChild {
        child,
        master: File::from(master),
    })
}

pub(crate) fn signal_group(pid: u32, signal: GroupSignal) -> Result<bool, RunnerError> {
    let raw = i32::try_from(pid).map_err(|_| RunnerError::TerminationFailed {
        pid,
        reason: "pid out of range".to_string(),
    })?;
    let sig = match signal {
        GroupSignal::Terminate => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    match killpg(Pid::from_raw(raw), sig) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(RunnerError::TerminationFailed {
            pid,
            reason: e.to_string(),
        }),
    }
}
