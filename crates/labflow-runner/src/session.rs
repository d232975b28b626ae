//! Interactive process sessions.
//!
//! Output is pumped off the pty master by a background thread into a pending
//! buffer (drained by [`ProcessSession::read_available_output`]), a bounded
//! transcript and an optional transcript log file. Everything else happens on
//! the caller's thread.

use crate::command_spec::CommandSpec;
use crate::error::RunnerError;
use crate::platform::{self, GroupSignal};
use crate::ring_buffer::RingBuffer;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, ExitStatus};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Tunables for a single session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Time between SIGTERM and SIGKILL.
    pub grace_period: Duration,
    pub poll_interval: Duration,
    pub transcript_cap_bytes: usize,
    /// Append every output byte to this file as well.
    pub transcript_log: Option<PathBuf>,
    /// File whose presence after exit counts as the executable's success claim.
    pub success_marker: Option<PathBuf>,
    /// Upper bound on waiting for the output pump after the child is gone.
    pub reader_join_timeout: Duration,
    pub rows: u16,
    pub cols: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            poll_interval: Duration::from_millis(50),
            transcript_cap_bytes: 1024 * 1024,
            transcript_log: None,
            success_marker: None,
            reader_join_timeout: Duration::from_secs(2),
            rows: 24,
            cols: 80,
        }
    }
}

/// How a finished session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionResult {
    pub exit_code: Option<i32>,
    /// Set when the process was ended by a signal.
    pub signal: Option<i32>,
    pub marker_observed: bool,
}

impl SessionResult {
    /// Dual verification: clean exit AND the success marker.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.exit_code, Some(0)) && self.marker_observed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationReport {
    pub pid: u32,
    /// The process had already exited before termination was requested.
    pub already_exited: bool,
    /// SIGKILL was needed after the grace period.
    pub forced: bool,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
}

#[derive(Debug)]
struct OutputState {
    pending: Vec<u8>,
    transcript: RingBuffer,
}

struct Pump {
    handle: JoinHandle<()>,
    done: mpsc::Receiver<()>,
}

/// One running executable attached to a pseudo-terminal.
pub struct ProcessSession {
    pid: u32,
    program: String,
    child: Child,
    writer: Option<File>,
    output: Arc<Mutex<OutputState>>,
    pump: Option<Pump>,
    status: Option<ExitStatus>,
    config: SessionConfig,
}

impl ProcessSession {
    /// Launch `spec` on a fresh pseudo-terminal.
    pub fn start(spec: &CommandSpec, config: SessionConfig) -> Result<Self, RunnerError> {
        let platform::PtyChild { child, master } =
            platform::spawn_on_pty(spec, config.rows, config.cols)?;
        let pid = child.id();

        let output = Arc::new(Mutex::new(OutputState {
            pending: Vec::new(),
            transcript: RingBuffer::new(config.transcript_cap_bytes),
        }));

        let log = config.transcript_log.as_ref().and_then(|path| {
            let opened = path
                .parent()
                .map_or(Ok(()), fs::create_dir_all)
                .and_then(|()| File::create(path));
            match opened {
                Ok(f) => Some(f),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "transcript log disabled");
                    None
                }
            }
        });

        let reader = master.try_clone()?;
        let (done_tx, done_rx) = mpsc::channel();
        let shared = Arc::clone(&output);
        let handle = thread::Builder::new()
            .name(format!("labflow-pty-{pid}"))
            .spawn(move || pump_output(reader, &shared, log, &done_tx))?;

        tracing::info!(pid, command = %spec.display(), "session started");

        Ok(Self {
            pid,
            program: spec.program.to_string_lossy().into_owned(),
            child,
            writer: Some(master),
            output,
            pump: Some(Pump {
                handle,
                done: done_rx,
            }),
            status: None,
            config,
        })
    }

    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Output produced since the previous call. Never blocks.
    #[must_use]
    pub fn read_available_output(&self) -> Vec<u8> {
        std::mem::take(&mut lock(&self.output).pending)
    }

    /// Everything captured so far, bounded by `transcript_cap_bytes`.
    #[must_use]
    pub fn transcript(&self) -> RingBuffer {
        lock(&self.output).transcript.clone()
    }

    /// Forward operator input to the executable.
    pub fn send_input(&mut self, bytes: &[u8]) -> Result<(), RunnerError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or(RunnerError::SessionClosed { pid: self.pid })?;
        writer.write_all(bytes)?;
        writer.flush()?;
        Ok(())
    }

    pub fn is_alive(&mut self) -> Result<bool, RunnerError> {
        Ok(self.try_status()?.is_none())
    }

    /// Wait for the executable to exit. Whatever it left running in its
    /// process group is killed.
    ///
    /// `None` as timeout waits indefinitely. Returns `Ok(None)` if the
    /// process is still running when the timeout elapses.
    pub fn wait_result(&mut self, timeout: Option<Duration>) -> Result<Option<SessionResult>, RunnerError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(status) = self.try_status()? {
                self.kill_stragglers();
                self.close_channel();
                return Ok(Some(self.result_from(status)));
            }
            let mut nap = self.config.poll_interval;
            if let Some(deadline) = deadline {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    return Ok(None);
                }
                nap = nap.min(left);
            }
            thread::sleep(nap);
        }
    }

    /// Stop the whole process group: SIGTERM, grace period, SIGKILL.
    ///
    /// The channel is closed and the output pump released whether or not
    /// signalling succeeded.
    pub fn terminate(&mut self) -> Result<TerminationReport, RunnerError> {
        let outcome = self.stop_group();
        self.close_channel();
        outcome
    }

    fn stop_group(&mut self) -> Result<TerminationReport, RunnerError> {
        if let Some(status) = self.try_status()? {
            self.kill_stragglers();
            return Ok(self.report(status, true, false));
        }

        tracing::info!(pid = self.pid, "sending SIGTERM to process group");
        platform::signal_group(self.pid, GroupSignal::Terminate)?;

        let deadline = Instant::now() + self.config.grace_period;
        while Instant::now() < deadline {
            if let Some(status) = self.try_status()? {
                // Stragglers that ignored SIGTERM still go.
                let _ = platform::signal_group(self.pid, GroupSignal::Kill);
                return Ok(self.report(status, false, false));
            }
            thread::sleep(self.config.poll_interval);
        }

        tracing::warn!(
            pid = self.pid,
            grace_ms = self.config.grace_period.as_millis() as u64,
            "process group ignored SIGTERM; sending SIGKILL"
        );
        platform::signal_group(self.pid, GroupSignal::Kill)?;
        let status = self.child.wait()?;
        self.status = Some(status);
        Ok(self.report(status, false, true))
    }

    /// SIGKILL what is left of the process group once the leader is gone.
    fn kill_stragglers(&self) {
        match platform::signal_group(self.pid, GroupSignal::Kill) {
            Ok(true) => tracing::info!(pid = self.pid, "killed processes left behind in the group"),
            Ok(false) => {}
            Err(e) => tracing::warn!(pid = self.pid, error = %e, "failed to signal leftover process group"),
        }
    }

    fn try_status(&mut self) -> Result<Option<ExitStatus>, RunnerError> {
        if self.status.is_none() {
            self.status = self.child.try_wait()?;
        }
        Ok(self.status)
    }

    fn result_from(&self, status: ExitStatus) -> SessionResult {
        SessionResult {
            exit_code: status.code(),
            signal: platform::exit_signal(&status),
            marker_observed: self
                .config
                .success_marker
                .as_ref()
                .is_some_and(|p| p.exists()),
        }
    }

    fn report(&self, status: ExitStatus, already_exited: bool, forced: bool) -> TerminationReport {
        TerminationReport {
            pid: self.pid,
            already_exited,
            forced,
            exit_code: status.code(),
            signal: platform::exit_signal(&status),
        }
    }

    /// Drop the write side and give the pump a bounded chance to drain.
    fn close_channel(&mut self) {
        self.writer = None;
        let Some(pump) = self.pump.take() else {
            return;
        };
        match pump.done.recv_timeout(self.config.reader_join_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = pump.handle.join();
            }
            Err(RecvTimeoutError::Timeout) => {
                // A descendant still holds the terminal open; leave the pump detached.
                tracing::warn!(pid = self.pid, "output pump did not finish; detaching");
            }
        }
    }
}

impl std::fmt::Debug for ProcessSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSession")
            .field("pid", &self.pid)
            .field("program", &self.program)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        if matches!(self.try_status(), Ok(None)) {
            tracing::warn!(pid = self.pid, "session dropped while running; killing process group");
            let _ = platform::signal_group(self.pid, GroupSignal::Kill);
            let _ = self.child.wait();
        } else {
            self.kill_stragglers();
        }
        self.writer = None;
    }
}

fn lock(output: &Mutex<OutputState>) -> MutexGuard<'_, OutputState> {
    output.lock().unwrap_or_else(PoisonError::into_inner)
}

fn pump_output(
    mut src: File,
    output: &Mutex<OutputState>,
    mut log: Option<File>,
    done: &mpsc::Sender<()>,
) {
    let mut buf = [0u8; 4096];
    loop {
        match src.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let chunk = &buf[..n];
                if let Some(file) = log.as_mut()
                    && let Err(e) = file.write_all(chunk)
                {
                    tracing::warn!(error = %e, "transcript log write failed; disabling");
                    log = None;
                }
                let mut state = lock(output);
                state.pending.extend_from_slice(chunk);
                state.transcript.write(chunk);
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            // EIO once every slave descriptor is closed.
            Err(_) => break,
        }
    }
    let _ = done.send(());
}
