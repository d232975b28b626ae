use camino::Utf8Path;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::thread;
use std::time::{Duration, Instant};

use labflow_config::Config;
use labflow_lock::ProjectLock;
use labflow_runner::{ProcessSession, SessionConfig, SessionResult};
use labflow_snapshot::{Exclusions, SnapshotKey, SnapshotStore};
use labflow_state::{StateDocument, StateStore};
use labflow_utils::error::{Result, StepError};
use labflow_utils::logging;
use labflow_utils::paths::ProjectPaths;
use labflow_utils::types::StepStatus;
use labflow_workflow::{Step, Workflow};

use crate::diagnose::{self, DiagnoseOutput};
use crate::launch;
use crate::outcome::RunOutcome;
use crate::view::{self, RunningView, WorkflowView};

/// The run currently in flight. Its status is not persisted; the state
/// document keeps the status the step had before it started.
struct ActiveRun {
    step_id: String,
    run: u32,
    marker: camino::Utf8PathBuf,
    session: ProcessSession,
    started: Instant,
    span: tracing::Span,
}

/// One row of `labflow snapshots`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotSummary {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub entries: usize,
    pub bytes: u64,
}

/// Drives one project: the only writer of its state document and snapshots.
///
/// Methods that change the project take `&mut self`; a coordinator is used
/// from one thread. Holding it holds the project lock.
pub struct Coordinator {
    pub(crate) config: Config,
    pub(crate) paths: ProjectPaths,
    pub(crate) workflow: Workflow,
    pub(crate) state: StateStore,
    pub(crate) snapshots: SnapshotStore,
    active: Option<ActiveRun>,
    leftover: Vec<u8>,
    _lock: ProjectLock,
}

impl Coordinator {
    /// Lock the project, load its definition and its recorded progress.
    ///
    /// `force_lock` takes over a lock left behind by another process.
    pub fn open(config: Config, force_lock: bool) -> Result<Self> {
        config.validate()?;
        let paths = ProjectPaths::new(config.project_root.clone());
        let lock = ProjectLock::acquire(paths.root(), force_lock, Some(config.lock.ttl_seconds))?;

        let definition = config.definition_path();
        let workflow = Workflow::load(&definition)?;
        let exclusions = Exclusions::new(
            definition
                .strip_prefix(paths.root())
                .ok()
                .map(Utf8Path::to_path_buf),
            config.exclude_globset()?,
        );
        let state = StateStore::load(paths.state_file())?;
        if let Some(recorded) = state.document().definition_hash.as_deref()
            && recorded != workflow.content_hash()
        {
            tracing::warn!(
                definition = %definition,
                "workflow definition changed since progress was last recorded"
            );
        }
        let snapshots = SnapshotStore::new(&paths, exclusions);

        tracing::debug!(
            project = %paths.root(),
            steps = workflow.len(),
            completed = state.get_completion_order().len(),
            "coordinator opened"
        );
        Ok(Self {
            config,
            paths,
            workflow,
            state,
            snapshots,
            active: None,
            leftover: Vec::new(),
            _lock: lock,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn paths(&self) -> &ProjectPaths {
        &self.paths
    }

    #[must_use]
    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    #[must_use]
    pub fn state(&self) -> &StateDocument {
        self.state.document()
    }

    pub fn status(&self, step_id: &str) -> Result<StepStatus, StepError> {
        self.step(step_id)?;
        Ok(self.state.get_status(step_id))
    }

    #[must_use]
    pub fn completion_order(&self) -> &[String] {
        self.state.get_completion_order()
    }

    #[must_use]
    pub fn current_running_step_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.step_id.as_str())
    }

    pub(crate) fn step(&self, step_id: &str) -> Result<&Step, StepError> {
        self.workflow.step(step_id).ok_or_else(|| StepError::UnknownStep {
            id: step_id.to_string(),
        })
    }

    pub(crate) fn ensure_idle(&self) -> Result<(), StepError> {
        match &self.active {
            Some(active) => Err(StepError::AlreadyRunning {
                running: active.step_id.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Apply `f` to the state document and persist it, stamping the
    /// definition hash the change was made under.
    pub(crate) fn commit<T>(&mut self, f: impl FnOnce(&mut StateDocument) -> T) -> Result<T> {
        let hash = self.workflow.content_hash().to_string();
        Ok(self.state.update(|doc| {
            doc.definition_hash = Some(hash);
            f(doc)
        })?)
    }

    /// Start a run of `step_id` and return its run number.
    ///
    /// The step must be `pending`, or `completed` with `allow_rerun`. The
    /// before-snapshot is taken and the stale marker cleared before the
    /// executable starts.
    pub fn start_step(&mut self, step_id: &str, inputs: &BTreeMap<String, String>) -> Result<u32> {
        self.ensure_idle()?;
        let step = self.step(step_id)?.clone();
        let status = self.state.get_status(step_id);
        let runnable = status == StepStatus::Pending || (status == StepStatus::Completed && step.allow_rerun);
        if !runnable {
            return Err(StepError::NotRunnable {
                id: step_id.to_string(),
                status,
            }
            .into());
        }

        let argv = step.command_args(inputs)?;
        self.paths.ensure_layout()?;
        let run = self.snapshots.next_run_number(step_id)?;
        let command = launch::command_for(&self.config, &self.paths, &step, run, argv)?;

        let span = logging::run_span(step_id, run);
        let entered = span.enter();

        self.snapshots
            .create_before_snapshot(step_id, run, &step.snapshot_scope)?;
        let marker = self.paths.marker_for(&step.executable_ref);
        remove_marker(&marker)?;

        let session_config = SessionConfig {
            grace_period: self.config.grace_period(),
            poll_interval: self.config.poll_interval(),
            transcript_cap_bytes: self.config.runner.transcript_cap_bytes,
            transcript_log: self
                .config
                .runner
                .write_transcripts
                .then(|| self.paths.transcript_log(step_id, run).into_std_path_buf()),
            success_marker: Some(marker.clone().into_std_path_buf()),
            ..SessionConfig::default()
        };

        logging::log_run_start(step_id, run, &command.display());
        let session = match ProcessSession::start(&command, session_config) {
            Ok(session) => session,
            Err(e) => {
                if let Err(rollback) = self.roll_back(step_id, run) {
                    tracing::error!(error = %rollback, "rollback after failed start also failed");
                }
                return Err(e.into());
            }
        };

        drop(entered);
        self.active = Some(ActiveRun {
            step_id: step_id.to_string(),
            run,
            marker,
            session,
            started: Instant::now(),
            span,
        });
        Ok(run)
    }

    /// Output produced since the previous call, including whatever the run
    /// printed after its last poll. Never blocks.
    pub fn read_output(&mut self) -> Vec<u8> {
        let mut out = std::mem::take(&mut self.leftover);
        if let Some(active) = &self.active {
            out.extend(active.session.read_available_output());
        }
        out
    }

    /// Forward operator input to the running step.
    pub fn send_input(&mut self, step_id: &str, bytes: &[u8]) -> Result<()> {
        let active = self.active_for(step_id)?;
        active.session.send_input(bytes)?;
        Ok(())
    }

    /// Check whether the running step has exited; if so verify and settle it.
    pub fn poll_run(&mut self) -> Result<Option<RunOutcome>> {
        let active = self.active.as_mut().ok_or(StepError::Idle)?;
        match active.session.wait_result(Some(Duration::ZERO))? {
            Some(result) => self.finish(result).map(Some),
            None => Ok(None),
        }
    }

    /// Block until the running step exits, then verify and settle it.
    pub fn wait_run(&mut self) -> Result<RunOutcome> {
        let result = loop {
            let active = self.active.as_mut().ok_or(StepError::Idle)?;
            if let Some(result) = active.session.wait_result(None)? {
                break result;
            }
        };
        self.finish(result)
    }

    /// Start `step_id` and drive it to the end, handing output to `sink`.
    ///
    /// Operator input cannot be forwarded from here; interactive callers
    /// use [`start_step`](Self::start_step) and friends instead.
    pub fn run_step(
        &mut self,
        step_id: &str,
        inputs: &BTreeMap<String, String>,
        mut sink: impl FnMut(&[u8]),
    ) -> Result<RunOutcome> {
        self.start_step(step_id, inputs)?;
        loop {
            let output = self.read_output();
            if !output.is_empty() {
                sink(&output);
            }
            if let Some(outcome) = self.poll_run()? {
                let tail = self.read_output();
                if !tail.is_empty() {
                    sink(&tail);
                }
                return Ok(outcome);
            }
            thread::sleep(self.config.poll_interval());
        }
    }

    /// Stop the running step's whole process tree and roll the project back.
    pub fn terminate_running(&mut self, step_id: &str) -> Result<RunOutcome> {
        self.active_for(step_id)?;
        let Some(ActiveRun {
            step_id,
            run,
            marker,
            mut session,
            started,
            span,
        }) = self.active.take()
        else {
            return Err(StepError::Idle.into());
        };
        let _entered = span.entered();

        match session.terminate() {
            Ok(report) => tracing::info!(
                pid = report.pid,
                forced = report.forced,
                already_exited = report.already_exited,
                "step terminated by operator"
            ),
            // Dropping the session below still kills the group.
            Err(e) => tracing::warn!(error = %e, "termination reported an error"),
        }
        self.leftover.extend(session.read_available_output());
        drop(session);

        remove_marker(&marker)?;
        self.roll_back(&step_id, run)?;
        let outcome = RunOutcome::Terminated { run };
        logging::log_run_finished(&step_id, run, outcome.label(), started.elapsed());
        Ok(outcome)
    }

    fn active_for(&mut self, step_id: &str) -> Result<&mut ActiveRun, StepError> {
        match self.active.as_mut() {
            Some(active) if active.step_id == step_id => Ok(active),
            _ => Err(StepError::NoActiveRun {
                id: step_id.to_string(),
            }),
        }
    }

    /// Settle an exited run: dual verification, then either record the
    /// completion or restore the before-snapshot.
    fn finish(&mut self, result: SessionResult) -> Result<RunOutcome> {
        let ActiveRun {
            step_id,
            run,
            session,
            started,
            span,
            ..
        } = self.active.take().ok_or(StepError::Idle)?;
        let _entered = span.entered();
        self.leftover.extend(session.read_available_output());
        drop(session);

        let outcome = if result.success() {
            let triggered: Vec<String> = self
                .workflow
                .triggered_by(&step_id)
                .into_iter()
                .map(|s| s.id.clone())
                .collect();
            let awaiting = self.commit(|doc| {
                doc.set_status(&step_id, StepStatus::Completed);
                doc.append_run(&step_id, run);
                let mut awaiting = Vec::new();
                for id in triggered {
                    // An answered gate stays answered across reruns.
                    if doc.status(&id) == StepStatus::Pending && !doc.decisions.contains_key(&id) {
                        doc.set_status(&id, StepStatus::AwaitingDecision);
                        awaiting.push(id);
                    }
                }
                awaiting
            })?;
            for id in &awaiting {
                tracing::info!(step_id = %id, trigger = %step_id, "step awaiting decision");
            }
            RunOutcome::Completed { run }
        } else {
            tracing::debug!(
                exit_code = ?result.exit_code,
                signal = ?result.signal,
                marker_present = result.marker_observed,
                "run failed verification"
            );
            self.roll_back(&step_id, run)?;
            RunOutcome::Failed {
                run,
                exit_code: result.exit_code,
                marker_present: result.marker_observed,
            }
        };

        logging::log_run_finished(&step_id, run, outcome.label(), started.elapsed());
        Ok(outcome)
    }

    /// Restore the before-snapshot of `run` and discard it, so the next
    /// attempt reuses the run number.
    fn roll_back(&self, step_id: &str, run: u32) -> Result<()> {
        let key = SnapshotKey::run(step_id, run);
        self.snapshots.restore_snapshot(&key)?;
        self.snapshots.delete_snapshot(&key)?;
        Ok(())
    }

    /// Render model of the whole workflow.
    pub fn view(&mut self) -> Result<WorkflowView> {
        let surviving = self.surviving_runs()?;
        let running = match self.active.as_mut() {
            Some(active) => Some(RunningView {
                step_id: active.step_id.clone(),
                run: active.run,
                pid: active.session.pid(),
                alive: active.session.is_alive()?,
            }),
            None => None,
        };
        Ok(view::build_view(
            &self.workflow,
            self.state.document(),
            &surviving,
            running,
        ))
    }

    /// Report inconsistencies between state, markers and snapshots.
    /// Nothing is corrected.
    pub fn diagnose(&self) -> Result<DiagnoseOutput> {
        let keys = self.snapshots.list_keys()?;
        let markers = self.present_markers()?;
        Ok(diagnose::diagnose(
            &self.workflow,
            self.state.document(),
            &keys,
            &markers,
        ))
    }

    pub fn list_snapshots(&self) -> Result<Vec<SnapshotSummary>> {
        self.snapshots
            .list_keys()?
            .iter()
            .map(|key| -> Result<SnapshotSummary> {
                let manifest = self.snapshots.manifest(key)?;
                Ok(SnapshotSummary {
                    key: key.to_string(),
                    created_at: manifest.created_at,
                    entries: manifest.entries.len(),
                    bytes: manifest.total_bytes(),
                })
            })
            .collect()
    }

    fn surviving_runs(&self) -> Result<BTreeMap<String, Vec<u32>>> {
        let mut surviving: BTreeMap<String, Vec<u32>> = BTreeMap::new();
        for key in self.snapshots.list_keys()? {
            if let SnapshotKey::Run { step_id, run } = key {
                surviving.entry(step_id).or_default().push(run);
            }
        }
        Ok(surviving)
    }

    fn present_markers(&self) -> Result<BTreeSet<String>> {
        let dir = self.paths.markers_dir();
        let read = match fs::read_dir(&dir) {
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = BTreeSet::new();
        for dirent in read {
            if let Some(name) = dirent?.file_name().to_str() {
                names.insert(name.to_string());
            }
        }
        Ok(names)
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("project", &self.paths.root())
            .field("running", &self.current_running_step_id())
            .finish_non_exhaustive()
    }
}

fn remove_marker(marker: &Utf8Path) -> io::Result<()> {
    match fs::remove_file(marker) {
        Ok(()) => {
            tracing::debug!(marker = %marker, "cleared success marker");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
