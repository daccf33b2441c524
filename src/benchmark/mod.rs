//! Repeated round-trip migrations with timing statistics.
//!
//! A run is one unmeasured warm-up iteration followed by the measured ones.
//! Every iteration migrates source -> destination and back. Failed
//! iterations are skipped after a backoff; five failures in a row abort the
//! run.

pub mod log;
pub mod stats;

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use ::log::{debug, error, info, warn};
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;

use crate::capability::Direction;
use crate::config::BenchmarkConfig;
use crate::error::{Error, Result};
use crate::migration::{MigrationResult, MigrationSpec, MigrationTimings, Workload};

use self::log::{write_summary, DetailLog};
use self::stats::{Samples, Statistics};

/// Consecutive failed iterations that abort a run.
pub const CONSECUTIVE_FAILURE_LIMIT: u32 = 5;

/// Unmeasured iterations before the measured ones.
pub const WARMUP_ITERATIONS: usize = 1;

/// Something that can migrate a workload back and forth.
pub trait RoundTrip {
    /// Puts the workload in place: running on the source, created on the
    /// destination.
    fn deploy(&mut self, workload: &Workload) -> Result<()>;

    fn migrate(&mut self, workload: &Workload, direction: Direction) -> Result<MigrationResult>;

    /// Brings the workload back to its deployed state after a failure.
    fn recover(&mut self, workload: &Workload) -> Result<()> {
        self.deploy(workload)
    }

    /// Removes the workload from both hosts.
    fn remove(&mut self, workload: &Workload);
}

/// Pauses between iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub backoff: Duration,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
}

impl Pacing {
    pub fn none() -> Self {
        Self {
            backoff: Duration::ZERO,
            jitter_min: Duration::ZERO,
            jitter_max: Duration::ZERO,
        }
    }

    fn jitter(&self) -> Duration {
        let min = self.jitter_min.as_millis() as u64;
        let max = self.jitter_max.as_millis() as u64;
        if max <= min {
            return Duration::from_millis(min);
        }
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

impl From<&BenchmarkConfig> for Pacing {
    fn from(config: &BenchmarkConfig) -> Self {
        Self {
            backoff: Duration::from_millis(config.backoff_ms),
            jitter_min: Duration::from_millis(config.jitter_ms_min),
            jitter_max: Duration::from_millis(config.jitter_ms_max),
        }
    }
}

enum Iteration {
    Succeeded(MigrationTimings, MigrationTimings),
    Failed(String),
}

pub struct BenchmarkHarness {
    pacing: Pacing,
    show_progress: bool,
}

impl BenchmarkHarness {
    pub fn new(pacing: Pacing, show_progress: bool) -> Self {
        Self {
            pacing,
            show_progress,
        }
    }

    /// Runs `iterations` measured round trips of `spec` on `target`.
    ///
    /// The detail log at `log_path` is truncated first; the summary is
    /// written next to it once the run completes, or when it aborts after at
    /// least one measured iteration succeeded.
    ///
    /// # Errors
    ///
    /// - `Config` if `iterations` is zero or the workload type is unsupported
    /// - `BenchmarkAborted` after too many consecutive failures
    /// - `BenchmarkFailed` if no measured iteration succeeded
    pub fn run(
        &self,
        target: &mut dyn RoundTrip,
        iterations: usize,
        log_path: &Path,
        spec: &MigrationSpec,
    ) -> Result<Statistics> {
        if iterations < 1 {
            return Err(Error::Config(
                "The benchmark needs at least one iteration".to_string(),
            ));
        }
        let workload = spec.workload()?;

        target.deploy(&workload)?;
        let outcome = self.run_iterations(target, &workload, iterations, log_path);
        target.remove(&workload);
        outcome
    }

    fn run_iterations(
        &self,
        target: &mut dyn RoundTrip,
        workload: &Workload,
        iterations: usize,
        log_path: &Path,
    ) -> Result<Statistics> {
        let mut detail = DetailLog::create(log_path)?;
        let mut samples = Samples::default();
        let mut skipped = 0;
        let mut consecutive = 0u32;

        let progress = self.progress_bar(iterations + WARMUP_ITERATIONS);

        for iteration in 0..=iterations {
            let warmup = iteration < WARMUP_ITERATIONS;
            progress.set_message(if warmup {
                "warm-up".to_string()
            } else {
                format!("iteration {}", iteration)
            });

            match round_trip(target, workload) {
                Iteration::Succeeded(to, back) => {
                    consecutive = 0;
                    if warmup {
                        debug!("Warm-up iteration succeeded ({:.3}s, {:.3}s)", to.total, back.total);
                    } else {
                        let timestamp = chrono::Utc::now().to_rfc3339();
                        detail.append(iteration, &timestamp, &to, &back)?;
                        samples.push(to.total, back.total);
                    }
                    progress.inc(1);
                    thread::sleep(self.pacing.jitter());
                }
                Iteration::Failed(why) => {
                    consecutive += 1;
                    if !warmup {
                        skipped += 1;
                    }
                    warn!(
                        "Iteration {} failed ({} in a row): {}",
                        iteration, consecutive, why
                    );
                    progress.inc(1);

                    if consecutive >= CONSECUTIVE_FAILURE_LIMIT {
                        progress.abandon_with_message("aborted");
                        error!(
                            "Aborting after {} consecutive failures; {} iterations succeeded",
                            consecutive,
                            samples.len()
                        );
                        if !samples.is_empty() {
                            self.finalize(&detail, &samples, iterations, skipped)?;
                        }
                        return Err(Error::BenchmarkAborted {
                            consecutive,
                            succeeded: samples.len(),
                        });
                    }

                    thread::sleep(self.pacing.backoff);
                    if let Err(e) = target.recover(workload) {
                        warn!("Could not restore the workload after a failure: {}", e);
                    }
                }
            }
        }
        progress.finish_with_message("done");
        self.finalize(&detail, &samples, iterations, skipped)
    }

    /// Aggregates the successful iterations so far and writes the summary.
    fn finalize(
        &self,
        detail: &DetailLog,
        samples: &Samples,
        iterations: usize,
        skipped: usize,
    ) -> Result<Statistics> {
        let (to, back, summary) = samples.aggregate().ok_or_else(|| {
            Error::BenchmarkFailed(format!(
                "none of {} iterations succeeded ({} skipped)",
                iterations, skipped
            ))
        })?;
        let stats = Statistics {
            iterations,
            warmup: WARMUP_ITERATIONS,
            succeeded: samples.len(),
            skipped,
            to,
            back,
            summary,
        };

        let summary_file = write_summary(detail.path(), &stats)?;
        info!(
            "{} of {} iterations succeeded; summary in {}",
            stats.succeeded,
            iterations,
            summary_file.display()
        );
        Ok(stats)
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar
    }
}

fn round_trip(target: &mut dyn RoundTrip, workload: &Workload) -> Iteration {
    let outbound = Direction::SourceToDestination;
    let mut timings = Vec::with_capacity(2);
    for direction in [outbound, outbound.reverse()] {
        match target.migrate(workload, direction) {
            Ok(result) if result.success => timings.push(result.timings),
            Ok(result) => {
                return Iteration::Failed(
                    result
                        .failure
                        .unwrap_or_else(|| format!("{} migration failed", direction)),
                )
            }
            Err(e) => return Iteration::Failed(format!("{}: {}", direction, e)),
        }
    }
    Iteration::Succeeded(timings[0], timings[1])
}

/// Summary path for a detail log, as written by [`BenchmarkHarness::run`].
pub fn summary_file_for(log_path: &Path) -> PathBuf {
    self::log::summary_path(log_path)
}
