use std::collections::HashSet;
use std::path::{Path, PathBuf};

use captain::benchmark::{summary_file_for, BenchmarkHarness, Pacing, RoundTrip};
use captain::capability::Direction;
use captain::error::{Error, Result};
use captain::migration::{MigrationResult, MigrationSpec, MigrationTimings, Workload};
use tempfile::TempDir;

/// Round trips that fail on chosen iterations (0 is the warm-up).
#[derive(Default)]
struct FakePair {
    failing: HashSet<usize>,
    erroring: bool,
    iteration: Option<usize>,
    migrations: usize,
    deploys: usize,
    removed: bool,
}

impl FakePair {
    fn failing(iterations: impl IntoIterator<Item = usize>) -> Self {
        Self {
            failing: iterations.into_iter().collect(),
            ..Default::default()
        }
    }
}

impl RoundTrip for FakePair {
    fn deploy(&mut self, workload: &Workload) -> Result<()> {
        assert_eq!(workload.name(), "counter");
        self.deploys += 1;
        Ok(())
    }

    fn migrate(&mut self, _workload: &Workload, direction: Direction) -> Result<MigrationResult> {
        if direction == Direction::SourceToDestination {
            self.iteration = Some(self.iteration.map_or(0, |i| i + 1));
        }
        let iteration = self.iteration.unwrap_or(0);
        self.migrations += 1;

        let failed = self.failing.contains(&iteration);
        if failed && self.erroring {
            return Err(Error::UnreachableHost {
                host: "destination".to_string(),
                reason: "connection reset".to_string(),
            });
        }

        // The warm-up is much slower, so it would show up in max if counted.
        let total = match (iteration, direction) {
            (0, _) => 100.0,
            (i, Direction::SourceToDestination) => i as f64,
            (_, Direction::DestinationToSource) => 2.0,
        };
        Ok(MigrationResult {
            checkpoint_id: self.migrations as u64,
            direction,
            timings: MigrationTimings {
                checkpoint: total / 2.0,
                copy: 0.0,
                restore: total / 2.0,
                total,
            },
            transfer: None,
            success: !failed,
            failure: failed.then(|| "restore failed".to_string()),
        })
    }

    fn remove(&mut self, _workload: &Workload) {
        self.removed = true;
    }
}

fn harness() -> BenchmarkHarness {
    BenchmarkHarness::new(Pacing::none(), false)
}

fn spec() -> MigrationSpec {
    MigrationSpec::command("counter", "while true; do sleep 1; done")
}

fn log_path(dir: &TempDir) -> PathBuf {
    dir.path().join("stats.csv")
}

fn rows(log: &Path) -> Vec<String> {
    std::fs::read_to_string(log)
        .unwrap()
        .lines()
        .skip(1)
        .map(str::to_string)
        .collect()
}

#[test]
fn test_warmup_is_not_measured() {
    let dir = TempDir::new().unwrap();
    let log = log_path(&dir);
    let mut pair = FakePair::default();

    let stats = harness().run(&mut pair, 3, &log, &spec()).unwrap();

    assert_eq!(stats.iterations, 3);
    assert_eq!(stats.warmup, 1);
    assert_eq!(stats.succeeded, 3);
    assert_eq!(stats.skipped, 0);
    assert_eq!((stats.to.min, stats.to.max), (1.0, 3.0));
    assert!((stats.to.avg - 2.0).abs() < 1e-9);
    assert_eq!((stats.back.min, stats.back.max), (2.0, 2.0));
    assert_eq!((stats.summary.min, stats.summary.max), (1.0, 3.0));

    // Both directions of the warm-up plus three measured round trips.
    assert_eq!(pair.migrations, 8);
    assert!(pair.removed);

    let rows = rows(&log);
    assert_eq!(rows.len(), 3);
    let indices: Vec<&str> = rows.iter().map(|r| r.split(';').next().unwrap()).collect();
    assert_eq!(indices, vec!["1", "2", "3"]);
    assert!(rows.iter().all(|r| r.split(';').count() == 10));

    let summary = std::fs::read_to_string(summary_file_for(&log)).unwrap();
    let lines: Vec<&str> = summary.lines().collect();
    assert_eq!(lines[0], "name;min;avg;max");
    assert_eq!(lines[1], "to;1.0000;2.0000;3.0000");
    assert_eq!(lines[2], "back;2.0000;2.0000;2.0000");
    assert!(lines[3].starts_with("summary;1.0000;"));
}

#[test]
fn test_failed_iterations_are_skipped_and_recovered() {
    let dir = TempDir::new().unwrap();
    let log = log_path(&dir);
    let mut pair = FakePair::failing([2]);

    let stats = harness().run(&mut pair, 4, &log, &spec()).unwrap();

    assert_eq!(stats.succeeded, 3);
    assert_eq!(stats.skipped, 1);
    // Initial deployment plus one recovery.
    assert_eq!(pair.deploys, 2);

    let indices: Vec<String> = rows(&log)
        .iter()
        .map(|r| r.split(';').next().unwrap().to_string())
        .collect();
    assert_eq!(indices, vec!["1", "3", "4"]);
}

#[test]
fn test_failed_warmup_is_not_skipped() {
    let dir = TempDir::new().unwrap();
    let mut pair = FakePair::failing([0]);

    let stats = harness()
        .run(&mut pair, 2, &log_path(&dir), &spec())
        .unwrap();

    assert_eq!(stats.succeeded, 2);
    assert_eq!(stats.skipped, 0);
}

#[test]
fn test_errors_count_as_failed_iterations() {
    let dir = TempDir::new().unwrap();
    let mut pair = FakePair::failing([1]);
    pair.erroring = true;

    let stats = harness()
        .run(&mut pair, 3, &log_path(&dir), &spec())
        .unwrap();

    assert_eq!(stats.succeeded, 2);
    assert_eq!(stats.skipped, 1);
}

#[test]
fn test_five_consecutive_failures_abort() {
    let dir = TempDir::new().unwrap();
    let log = log_path(&dir);
    let mut pair = FakePair::failing(1..=5);

    let err = harness().run(&mut pair, 20, &log, &spec()).unwrap_err();

    assert!(matches!(
        err,
        Error::BenchmarkAborted {
            consecutive: 5,
            succeeded: 0
        }
    ));
    // Warm-up round trip, then one failing migration per iteration.
    assert_eq!(pair.migrations, 2 + 5);
    assert!(pair.removed);
    assert!(rows(&log).is_empty());
    assert!(!summary_file_for(&log).exists());
}

#[test]
fn test_abort_after_successes_still_writes_the_summary() {
    let dir = TempDir::new().unwrap();
    let log = log_path(&dir);
    let mut pair = FakePair::failing(3..=7);

    let err = harness().run(&mut pair, 20, &log, &spec()).unwrap_err();

    assert!(matches!(
        err,
        Error::BenchmarkAborted {
            consecutive: 5,
            succeeded: 2
        }
    ));
    // Warm-up and two good round trips, then one failing migration each.
    assert_eq!(pair.migrations, 2 + 4 + 5);
    assert_eq!(rows(&log).len(), 2);

    let summary = std::fs::read_to_string(summary_file_for(&log)).unwrap();
    let lines: Vec<&str> = summary.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[1], "to;1.0000;1.5000;2.0000");
    assert_eq!(lines[2], "back;2.0000;2.0000;2.0000");
}

#[test]
fn test_single_iteration_run() {
    let dir = TempDir::new().unwrap();
    let log = log_path(&dir);
    let mut pair = FakePair::default();

    let stats = harness().run(&mut pair, 1, &log, &spec()).unwrap();

    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.to.min, stats.to.avg);
    assert_eq!(stats.to.avg, stats.to.max);
    assert_eq!(stats.to.min, 1.0);
    assert_eq!(stats.back.min, stats.back.avg);
    assert_eq!(stats.back.avg, stats.back.max);
    assert_eq!(stats.back.min, 2.0);
    // The summary spans both directions of the one round trip.
    assert_eq!((stats.summary.min, stats.summary.max), (1.0, 2.0));
    assert!((stats.summary.avg - 1.5).abs() < 1e-9);

    let contents = std::fs::read_to_string(&log).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(
        lines[0],
        "iteration;timestamp;\
         to_checkpoint;to_copy;to_restore;to_total;\
         back_checkpoint;back_copy;back_restore;back_total"
    );
    let fields: Vec<&str> = lines[1].split(';').collect();
    assert_eq!(fields[0], "1");
    assert!(chrono::DateTime::parse_from_rfc3339(fields[1]).is_ok());
    assert_eq!(
        &fields[2..],
        ["0.5000", "0.0000", "0.5000", "1.0000", "1.0000", "0.0000", "1.0000", "2.0000"]
    );
}

#[test]
fn test_success_resets_the_failure_streak() {
    let dir = TempDir::new().unwrap();
    let mut pair = FakePair::failing([1, 2, 3, 4, 6, 7, 8, 9]);

    let stats = harness()
        .run(&mut pair, 10, &log_path(&dir), &spec())
        .unwrap();

    assert_eq!(stats.succeeded, 2);
    assert_eq!(stats.skipped, 8);
}

#[test]
fn test_no_successful_iteration_is_a_failure() {
    let dir = TempDir::new().unwrap();
    let log = log_path(&dir);
    let mut pair = FakePair::failing([1, 2, 3]);

    let err = harness().run(&mut pair, 3, &log, &spec()).unwrap_err();

    assert!(matches!(err, Error::BenchmarkFailed(_)));
    assert!(!summary_file_for(&log).exists());
}

#[test]
fn test_log_is_truncated_between_runs() {
    let dir = TempDir::new().unwrap();
    let log = log_path(&dir);

    harness()
        .run(&mut FakePair::default(), 3, &log, &spec())
        .unwrap();
    harness()
        .run(&mut FakePair::default(), 1, &log, &spec())
        .unwrap();

    assert_eq!(rows(&log).len(), 1);
}

#[test]
fn test_bad_arguments_fail_before_deploying() {
    let dir = TempDir::new().unwrap();
    let mut pair = FakePair::default();

    let err = harness()
        .run(&mut pair, 0, &log_path(&dir), &spec())
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    let mut unsupported = spec();
    unsupported.kind = "compose".to_string();
    let err = harness()
        .run(&mut pair, 3, &log_path(&dir), &unsupported)
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    assert_eq!(pair.deploys, 0);
    assert!(!log_path(&dir).exists());
}
