//! End-to-end workflow scenarios against real `sh` steps.
//!
//! Each test builds a throwaway project, drives a [`Coordinator`] through
//! runs, decisions, skips and undos, and compares the project tree (outside
//! `.labflow/`) with what it looked like at known points.

#![cfg(unix)]

use std::collections::BTreeMap;
use std::fs;
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use labflow::{
    Config, Coordinator, Decision, LabflowError, RunOutcome, StepStatus, UndoKind,
};
use labflow_utils::error::{SnapshotError, StepError};
use labflow_utils::test_support::{TestProject, failing_body, succeeding_body};

type Tree = BTreeMap<String, Vec<u8>>;

/// Every file outside `.labflow/`, keyed by project-relative path.
fn tree(root: &Utf8Path) -> Tree {
    fn walk(root: &Utf8Path, dir: &Utf8Path, out: &mut Tree) {
        for entry in dir.read_dir_utf8().unwrap() {
            let entry = entry.unwrap();
            let path = entry.path();
            let rel = path.strip_prefix(root).unwrap();
            if rel.as_str() == ".labflow" {
                continue;
            }
            if entry.file_type().unwrap().is_dir() {
                walk(root, path, out);
            } else {
                out.insert(rel.to_string(), fs::read(path).unwrap());
            }
        }
    }
    let mut out = Tree::new();
    walk(root, root, &mut out);
    out
}

fn open(p: &TestProject) -> Coordinator {
    let config = Config::builder(p.root())
        .poll_interval(Duration::from_millis(10))
        .grace_period(Duration::from_secs(1))
        .build()
        .unwrap();
    Coordinator::open(config, false).unwrap()
}

fn run(c: &mut Coordinator, id: &str) -> RunOutcome {
    c.run_step(id, &BTreeMap::new(), |_| {}).unwrap()
}

fn snapshot_keys(c: &Coordinator) -> Vec<String> {
    c.list_snapshots().unwrap().into_iter().map(|s| s.key).collect()
}

fn drop_snapshot(p: &TestProject, key: &str) {
    fs::remove_dir_all(p.root().join(".labflow/snapshots").join(key)).unwrap();
}

#[test]
fn test_step_without_rerun_runs_again_only_after_undo() {
    let p = TestProject::new();
    p.workflow("steps:\n  - {id: a, script: a.sh}\n");
    p.script("a.sh", &succeeding_body("a.txt", "done"));
    let mut c = open(&p);

    assert!(run(&mut c, "a").is_success());
    let err = c.start_step("a", &BTreeMap::new()).unwrap_err();
    assert!(matches!(err, LabflowError::Step(StepError::NotRunnable { .. })));
    assert_eq!(err.to_exit_code(), labflow::ExitCode::STEP_REJECTED);

    let report = c.undo().unwrap();
    assert_eq!(report.kind, UndoKind::Run { run: 1 });
    assert_eq!(report.status_after, StepStatus::Pending);
    assert!(!p.exists("a.txt"));

    assert_eq!(run(&mut c, "a"), RunOutcome::Completed { run: 1 });
    assert_eq!(p.read("a.txt").unwrap(), "done\n");
}

#[test]
fn test_three_reruns_undo_one_at_a_time() {
    let p = TestProject::new();
    p.workflow("steps:\n  - {id: b, script: b.sh, allow_rerun: true}\n");
    p.script("b.sh", &succeeding_body("b.txt", "pass"));
    let mut c = open(&p);

    let pre_run_1 = tree(p.root());
    run(&mut c, "b");
    let end_of_run_1 = tree(p.root());
    run(&mut c, "b");
    let end_of_run_2 = tree(p.root());
    assert_eq!(run(&mut c, "b"), RunOutcome::Completed { run: 3 });
    assert_eq!(c.completion_order(), ["b", "b", "b"]);

    let first = c.undo().unwrap();
    assert_eq!(first.kind, UndoKind::Run { run: 3 });
    assert_eq!(first.restored.as_deref(), Some("b_run_3"));
    assert!(!first.degraded);
    assert_eq!(c.status("b").unwrap(), StepStatus::Completed);
    assert_eq!(tree(p.root()), end_of_run_2);

    c.undo().unwrap();
    assert_eq!(c.status("b").unwrap(), StepStatus::Completed);
    assert_eq!(tree(p.root()), end_of_run_1);

    let last = c.undo().unwrap();
    assert_eq!(last.status_after, StepStatus::Pending);
    assert_eq!(tree(p.root()), pre_run_1);
    assert!(c.completion_order().is_empty());
    assert!(c.list_snapshots().unwrap().is_empty());

    let err = c.undo().unwrap_err();
    assert!(matches!(err, LabflowError::Step(StepError::NothingToUndo)));
}

const CONDITIONAL: &str = "\
steps:
  - {id: trim, script: trim.sh}
  - id: review
    script: review.sh
    conditional: {trigger_step: trim, prompt: 'Keep the trimmed reads?', target_step: retrim}
  - id: publish
    script: publish.sh
    conditional: {depends_on: review}
  - {id: retrim, script: retrim.sh}
";

fn conditional_project() -> TestProject {
    let p = TestProject::new();
    p.workflow(CONDITIONAL);
    for (id, file) in [("trim", "trimmed.txt"), ("review", "review.txt"), ("publish", "published.txt"), ("retrim", "retrimmed.txt")] {
        p.script(&format!("{id}.sh"), &succeeding_body(file, id));
    }
    p
}

#[test]
fn test_decision_no_then_undo() {
    let p = conditional_project();
    let mut c = open(&p);

    run(&mut c, "trim");
    assert_eq!(c.status("review").unwrap(), StepStatus::AwaitingDecision);
    let view = c.view().unwrap();
    assert_eq!(view.step("review").unwrap().prompt.as_deref(), Some("Keep the trimmed reads?"));
    let before_decision = tree(p.root());

    let outcome = c.resolve_decision("review", Decision::No).unwrap();
    assert_eq!(outcome.skipped, ["review", "publish"]);
    assert_eq!(outcome.safety_snapshot.as_deref(), Some("_safety_decision_review"));
    assert_eq!(c.status("review").unwrap(), StepStatus::SkippedByDecision);
    assert_eq!(c.status("publish").unwrap(), StepStatus::SkippedByDecision);
    assert_eq!(c.status("retrim").unwrap(), StepStatus::Pending);
    assert_eq!(c.completion_order(), ["trim", "review"]);

    run(&mut c, "retrim");
    // retrim's run is the tail now; undo it first, then the decision.
    c.undo().unwrap();
    assert_eq!(c.status("retrim").unwrap(), StepStatus::Pending);

    let report = c.undo().unwrap();
    assert_eq!(report.kind, UndoKind::Decision);
    assert_eq!(report.status_after, StepStatus::AwaitingDecision);
    assert_eq!(c.status("publish").unwrap(), StepStatus::Pending);
    assert_eq!(c.completion_order(), ["trim"]);
    assert_eq!(tree(p.root()), before_decision);
    assert!(c.list_snapshots().unwrap().iter().all(|s| s.key != "_safety_decision_review"));
}

#[test]
fn test_decision_yes_makes_step_runnable() {
    let p = conditional_project();
    let mut c = open(&p);
    run(&mut c, "trim");

    let outcome = c.resolve_decision("review", Decision::Yes).unwrap();
    assert!(outcome.skipped.is_empty());
    assert_eq!(c.status("review").unwrap(), StepStatus::Pending);
    assert!(run(&mut c, "review").is_success());

    let err = c.resolve_decision("review", Decision::No).unwrap_err();
    assert!(matches!(err, LabflowError::Step(StepError::NotAwaitingDecision { .. })));
}

#[test]
fn test_undoing_a_step_run_after_yes_asks_again() {
    let p = conditional_project();
    let mut c = open(&p);
    run(&mut c, "trim");
    c.resolve_decision("review", Decision::Yes).unwrap();
    run(&mut c, "review");

    c.undo().unwrap();
    assert_eq!(c.status("review").unwrap(), StepStatus::AwaitingDecision);
    assert_eq!(c.status("trim").unwrap(), StepStatus::Completed);
    assert!(matches!(
        c.start_step("review", &BTreeMap::new()).unwrap_err(),
        LabflowError::Step(StepError::NotRunnable { .. })
    ));

    let outcome = c.resolve_decision("review", Decision::No).unwrap();
    assert_eq!(outcome.skipped, ["review", "publish"]);
}

#[test]
fn test_undoing_a_skip_over_an_open_question_reopens_it() {
    let p = conditional_project();
    let mut c = open(&p);
    run(&mut c, "trim");

    let report = c.skip_to_step("retrim").unwrap();
    assert_eq!(report.skipped, ["review", "publish"]);
    assert_eq!(c.completion_order(), ["trim", "review", "publish"]);

    c.undo().unwrap();
    assert_eq!(c.status("publish").unwrap(), StepStatus::Pending);
    c.undo().unwrap();
    assert_eq!(c.status("review").unwrap(), StepStatus::AwaitingDecision);
    assert_eq!(c.completion_order(), ["trim"]);
    assert_eq!(snapshot_keys(&c), ["trim_run_1"]);
}

#[test]
fn test_undoing_trigger_withdraws_the_question() {
    let p = conditional_project();
    let mut c = open(&p);
    run(&mut c, "trim");
    assert_eq!(c.status("review").unwrap(), StepStatus::AwaitingDecision);

    c.undo().unwrap();
    assert_eq!(c.status("trim").unwrap(), StepStatus::Pending);
    assert_eq!(c.status("review").unwrap(), StepStatus::Pending);
}

#[test]
fn test_skip_to_and_undo_skip() {
    let p = conditional_project();
    let mut c = open(&p);

    let report = c.skip_to_step("publish").unwrap();
    assert_eq!(report.skipped, ["trim", "review"]);
    assert_eq!(report.safety_snapshot.as_deref(), Some("_safety_skip_to_publish"));
    assert_eq!(c.status("trim").unwrap(), StepStatus::Skipped);
    assert_eq!(c.status("publish").unwrap(), StepStatus::Pending);
    assert_eq!(c.completion_order(), ["trim", "review"]);

    let undo = c.undo().unwrap();
    assert_eq!(undo.kind, UndoKind::Skip);
    assert_eq!(c.status("review").unwrap(), StepStatus::Pending);
    assert_eq!(c.status("trim").unwrap(), StepStatus::Skipped);
    assert_eq!(snapshot_keys(&c), ["_safety_skip_to_publish"]);

    c.undo().unwrap();
    assert_eq!(c.status("trim").unwrap(), StepStatus::Pending);
    assert!(c.completion_order().is_empty());
    assert!(snapshot_keys(&c).is_empty());

    let nothing = c.skip_to_step("trim").unwrap();
    assert!(nothing.skipped.is_empty());
    assert_eq!(nothing.safety_snapshot, None);
    assert!(snapshot_keys(&c).is_empty());

    assert!(matches!(
        c.skip_to_step("nope").unwrap_err(),
        LabflowError::Step(StepError::UnknownStep { .. })
    ));
}

#[test]
fn test_termination_restores_pre_run_tree() {
    let p = TestProject::new();
    p.workflow("steps:\n  - {id: long, script: long.sh}\n");
    p.script(
        "long.sh",
        "mkdir -p out\necho half > out/partial.txt\ntouch \"$LABFLOW_SUCCESS_MARKER\"\nsleep 30",
    );
    p.write("raw/input.txt", "original\n");
    let mut c = open(&p);
    let before = tree(p.root());

    c.start_step("long", &BTreeMap::new()).unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    while !p.exists(".labflow/markers/long.success") {
        assert!(Instant::now() < deadline, "step never wrote its marker");
        thread::sleep(Duration::from_millis(10));
    }

    assert_eq!(c.terminate_running("long").unwrap(), RunOutcome::Terminated { run: 1 });
    assert_eq!(c.status("long").unwrap(), StepStatus::Pending);
    assert!(!p.exists(".labflow/markers/long.success"));
    assert_eq!(tree(p.root()), before);
}

/// Leaves a hangup-immune writer behind in the step's process group.
const LATE_WRITER: &str = "trap '' HUP\n(sleep 1; echo late > late.txt) &";

#[test]
fn test_failed_step_leaves_no_background_writer() {
    let p = TestProject::new();
    p.workflow("steps:\n  - {id: spawn, script: spawn.sh}\n");
    p.script("spawn.sh", &format!("{LATE_WRITER}\nexit 3"));
    let mut c = open(&p);
    let before = tree(p.root());

    assert!(matches!(run(&mut c, "spawn"), RunOutcome::Failed { exit_code: Some(3), .. }));
    thread::sleep(Duration::from_millis(1500));
    assert!(!p.exists("late.txt"));
    assert_eq!(tree(p.root()), before);
}

#[test]
fn test_terminating_an_exited_step_stops_its_background_writer() {
    let p = TestProject::new();
    p.workflow("steps:\n  - {id: spawn, script: spawn.sh}\n");
    p.script("spawn.sh", &format!("{LATE_WRITER}\necho up > started.txt\nexit 0"));
    let mut c = open(&p);
    let before = tree(p.root());

    c.start_step("spawn", &BTreeMap::new()).unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    while !p.exists("started.txt") {
        assert!(Instant::now() < deadline, "step never started");
        thread::sleep(Duration::from_millis(10));
    }
    // let the leader exit without being polled
    thread::sleep(Duration::from_millis(200));

    assert_eq!(c.terminate_running("spawn").unwrap(), RunOutcome::Terminated { run: 1 });
    thread::sleep(Duration::from_millis(1500));
    assert!(!p.exists("late.txt"));
    assert_eq!(tree(p.root()), before);
}

#[test]
fn test_repeated_failures_leave_no_trace() {
    let p = TestProject::new();
    p.workflow("steps:\n  - {id: bad, script: bad.sh}\n");
    p.script("bad.sh", &failing_body("results.csv"));
    p.write("results.csv", "kept\n");
    let mut c = open(&p);
    let before = tree(p.root());

    for _ in 0..3 {
        let outcome = run(&mut c, "bad");
        assert_eq!(outcome.run(), 1);
        assert!(matches!(outcome, RunOutcome::Failed { exit_code: Some(1), .. }));
    }
    assert_eq!(c.status("bad").unwrap(), StepStatus::Pending);
    assert_eq!(tree(p.root()), before);
    assert!(c.list_snapshots().unwrap().is_empty());
}

#[test]
fn test_missing_latest_snapshot_falls_back_to_earlier_run() {
    let p = TestProject::new();
    p.workflow("steps:\n  - {id: b, script: b.sh, allow_rerun: true}\n");
    p.script("b.sh", &succeeding_body("b.txt", "pass"));
    let mut c = open(&p);

    run(&mut c, "b");
    let end_of_run_1 = tree(p.root());
    run(&mut c, "b");
    run(&mut c, "b");
    drop_snapshot(&p, "b_run_3");

    let report = c.undo().unwrap();
    assert!(report.degraded);
    assert_eq!(report.restored.as_deref(), Some("b_run_2"));
    assert_eq!(report.also_undone, ["b"]);
    assert_eq!(c.completion_order(), ["b"]);
    assert_eq!(c.status("b").unwrap(), StepStatus::Completed);
    assert_eq!(tree(p.root()), end_of_run_1);

    let keys: Vec<String> = c.list_snapshots().unwrap().into_iter().map(|s| s.key).collect();
    assert_eq!(keys, ["b_run_1"]);
}

#[test]
fn test_rerun_after_lost_middle_snapshot_undoes_only_that_run() {
    let p = TestProject::new();
    p.workflow("steps:\n  - {id: b, script: b.sh, allow_rerun: true}\n");
    p.script("b.sh", &succeeding_body("b.txt", "pass"));
    let mut c = open(&p);
    let pristine = tree(p.root());

    run(&mut c, "b");
    run(&mut c, "b");
    drop_snapshot(&p, "b_run_2");
    let end_of_run_2 = tree(p.root());

    // The lost number is handed out again.
    assert_eq!(run(&mut c, "b"), RunOutcome::Completed { run: 2 });
    assert_eq!(p.read("b.txt").unwrap(), "pass\npass\npass\n");

    let report = c.undo().unwrap();
    assert_eq!(report.kind, UndoKind::Run { run: 2 });
    assert_eq!(report.restored.as_deref(), Some("b_run_2"));
    assert!(!report.degraded);
    assert!(report.also_undone.is_empty());
    assert_eq!(c.completion_order(), ["b", "b"]);
    assert_eq!(tree(p.root()), end_of_run_2);

    // The second run's own snapshot is still gone.
    let report = c.undo().unwrap();
    assert!(report.degraded);
    assert_eq!(report.restored.as_deref(), Some("b_run_1"));
    assert_eq!(report.also_undone, ["b"]);
    assert!(c.completion_order().is_empty());
    assert_eq!(tree(p.root()), pristine);
    assert!(snapshot_keys(&c).is_empty());
}

#[test]
fn test_missing_snapshot_falls_back_to_previous_step() {
    let p = TestProject::new();
    p.workflow("steps:\n  - {id: a, script: a.sh}\n  - {id: b, script: b.sh}\n");
    p.script("a.sh", &succeeding_body("a.txt", "a"));
    p.script("b.sh", &succeeding_body("b.txt", "b"));
    let mut c = open(&p);
    let pristine = tree(p.root());

    run(&mut c, "a");
    run(&mut c, "b");
    drop_snapshot(&p, "b_run_1");

    let report = c.undo().unwrap();
    assert!(report.degraded);
    assert_eq!(report.restored.as_deref(), Some("a_run_1"));
    assert_eq!(report.also_undone, ["a"]);
    assert_eq!(c.status("a").unwrap(), StepStatus::Pending);
    assert_eq!(c.status("b").unwrap(), StepStatus::Pending);
    assert_eq!(tree(p.root()), pristine);
}

#[test]
fn test_no_restore_point_changes_nothing() {
    let p = TestProject::new();
    p.workflow("steps:\n  - {id: a, script: a.sh}\n");
    p.script("a.sh", &succeeding_body("a.txt", "a"));
    let mut c = open(&p);

    run(&mut c, "a");
    drop_snapshot(&p, "a_run_1");
    let before = tree(p.root());

    let err = c.undo().unwrap_err();
    assert!(matches!(err, LabflowError::Snapshot(SnapshotError::NoRestorePoint { .. })));
    assert_eq!(err.to_exit_code(), labflow::ExitCode::SNAPSHOT_MISSING);
    assert_eq!(c.completion_order(), ["a"]);
    assert_eq!(c.status("a").unwrap(), StepStatus::Completed);
    assert_eq!(tree(p.root()), before);

    let findings = c.diagnose().unwrap();
    assert!(findings.ok);
    assert_eq!(findings.of_kind(labflow::FindingKind::MissingRunSnapshot).len(), 1);
}

#[test]
fn test_inputs_reach_the_executable() {
    let p = TestProject::new();
    p.workflow(
        "steps:\n  - id: norm\n    script: norm.sh\n    args: [--fast]\n    inputs:\n      - {name: plate, required: true}\n      - {name: out, flag: --out}\n",
    );
    p.script("norm.sh", "echo \"$@\" > argv.txt\ntouch \"$LABFLOW_SUCCESS_MARKER\"");
    let mut c = open(&p);

    let err = c.start_step("norm", &BTreeMap::new()).unwrap_err();
    assert!(matches!(err, LabflowError::Step(StepError::MissingInput { .. })));

    let inputs = BTreeMap::from([
        ("out".to_string(), "res.csv".to_string()),
        ("plate".to_string(), "p1.csv".to_string()),
    ]);
    assert!(c.run_step("norm", &inputs, |_| {}).unwrap().is_success());
    assert_eq!(p.read("argv.txt").unwrap(), "--fast p1.csv --out res.csv\n");
}
