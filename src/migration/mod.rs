//! Checkpoint/restore migration of one container between two hosts.
//!
//! A migration checkpoints the running container on the sending host, moves
//! the checkpoint with the [`TransferResolver`] (or leaves it in place on
//! shared storage), and restores it into the stopped container on the
//! receiving host. Checkpoint files are removed afterwards on every host
//! that holds them, whatever the outcome.

pub mod checkpoint;
pub mod engine;

use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::Serialize;

use crate::capability::{Direction, Endpoint, PairCapabilities};
use crate::error::{Error, Result};
use crate::remote::{diagnose_migration_failure, output_reports_error, Phase};
use crate::storage::SharedMount;
use crate::transfer::{Strategy, TransferReport, TransferResolver};

pub use checkpoint::{next_checkpoint_id, Checkpoint};
pub use engine::{container_is_running, MigrationSpec, Workload};

/// Phase durations of one migration, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MigrationTimings {
    pub checkpoint: f64,
    pub copy: f64,
    pub restore: f64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationResult {
    pub checkpoint_id: u64,
    pub direction: Direction,
    pub timings: MigrationTimings,
    pub transfer: Option<TransferReport>,
    pub success: bool,
    /// Diagnosis of the failed phase
    pub failure: Option<String>,
}

impl MigrationResult {
    fn failed(checkpoint_id: u64, direction: Direction, timings: MigrationTimings, why: String) -> Self {
        Self {
            checkpoint_id,
            direction,
            timings,
            transfer: None,
            success: false,
            failure: Some(why),
        }
    }
}

pub struct MigrationOrchestrator<'a> {
    resolver: &'a TransferResolver,
    checkpoint_dir: String,
    shared: Option<&'a SharedMount>,
}

impl<'a> MigrationOrchestrator<'a> {
    /// `checkpoint_dir` is used on both hosts unless the resolver moves the
    /// checkpoint through `shared`.
    pub fn new(
        resolver: &'a TransferResolver,
        checkpoint_dir: &str,
        shared: Option<&'a SharedMount>,
    ) -> Self {
        Self {
            resolver,
            checkpoint_dir: checkpoint_dir.trim_end_matches('/').to_string(),
            shared,
        }
    }

    /// Migrates `from_container` on `from` into `to_container` on `to`.
    ///
    /// # Errors
    ///
    /// `ContainerNotRunning` before anything is timed; host failures other
    /// than a failed checkpoint, copy or restore propagate as errors. Those
    /// three produce a result with `success == false`.
    pub fn migrate(
        &self,
        from: Endpoint<'_>,
        to: Endpoint<'_>,
        from_container: &str,
        to_container: &str,
        pair: &PairCapabilities,
        direction: Direction,
    ) -> Result<MigrationResult> {
        if !container_is_running(from, from_container)? {
            return Err(Error::ContainerNotRunning(format!(
                "{} on {}",
                from_container,
                from.node.name()
            )));
        }

        let checkpoint = match (self.resolver.plan(pair, direction), self.shared) {
            (Strategy::SharedStorage, Some(mount)) => Checkpoint::on_shared_storage(
                from_container,
                &format!("{}/checkpoints", mount.mount_point),
            ),
            (Strategy::SharedStorage, None) => {
                return Err(Error::Config(
                    "shared storage is selected but not mounted".to_string(),
                ))
            }
            _ => Checkpoint::new(from_container, &self.checkpoint_dir, &self.checkpoint_dir),
        };
        debug!(
            "Migrating {} ({}) as checkpoint {}",
            from_container,
            direction,
            checkpoint.name()
        );

        let started = Instant::now();
        let mut copied = false;
        let outcome = self.run_phases(
            from,
            to,
            to_container,
            &checkpoint,
            pair,
            direction,
            started,
            &mut copied,
        );

        remove_checkpoint(from, &checkpoint.export_path());
        if copied {
            remove_checkpoint(to, &checkpoint.import_path());
        }

        let result = outcome?;
        if result.success {
            info!(
                "{} -> {}: checkpoint {:.3}s, copy {:.3}s, restore {:.3}s, total {:.3}s",
                from.node.name(),
                to.node.name(),
                result.timings.checkpoint,
                result.timings.copy,
                result.timings.restore,
                result.timings.total
            );
        }
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_phases(
        &self,
        from: Endpoint<'_>,
        to: Endpoint<'_>,
        to_container: &str,
        checkpoint: &Checkpoint,
        pair: &PairCapabilities,
        direction: Direction,
        started: Instant,
        copied: &mut bool,
    ) -> Result<MigrationResult> {
        let mut timings = MigrationTimings::default();
        let id = checkpoint.id;

        let phase_start = Instant::now();
        let command = engine::checkpoint_command(
            from.sudo(),
            &checkpoint.owner_container,
            &checkpoint.export_dir,
            &checkpoint.name(),
        );
        let result = from.node.run(&command)?;
        timings.checkpoint = seconds(phase_start.elapsed());
        if !result.is_success() {
            let why = diagnose_migration_failure(Phase::Checkpoint, &result, &command, from.node.name());
            warn!("{}", why);
            timings.total = seconds(started.elapsed());
            return Ok(MigrationResult::failed(id, direction, timings, why));
        }

        let phase_start = Instant::now();
        let transfer = if checkpoint.shared {
            None
        } else {
            from.node.execute(&engine::open_permissions_command(
                from.sudo(),
                &checkpoint.export_path(),
            ))?;
            to.node
                .execute(&engine::import_dir_command(to.sudo(), &checkpoint.import_dir))?;
            *copied = true;
            match self.resolver.copy(
                from.node,
                to.node,
                &checkpoint.export_path(),
                &checkpoint.import_path(),
                pair,
                direction,
            ) {
                Ok(report) => Some(report),
                Err(Error::CopyFailed(why)) => {
                    timings.copy = seconds(phase_start.elapsed());
                    timings.total = seconds(started.elapsed());
                    return Ok(MigrationResult::failed(id, direction, timings, why));
                }
                Err(e) => return Err(e),
            }
        };
        timings.copy = if transfer.is_some() {
            seconds(phase_start.elapsed())
        } else {
            0.0
        };

        let phase_start = Instant::now();
        let command = engine::restore_command(
            to.sudo(),
            to_container,
            &checkpoint.import_dir,
            &checkpoint.name(),
        );
        let result = to.node.run(&command)?;
        timings.restore = seconds(phase_start.elapsed());
        timings.total = seconds(started.elapsed());

        if !result.is_success() || output_reports_error(&result.combined()) {
            let why = diagnose_migration_failure(Phase::Restore, &result, &command, to.node.name());
            warn!("{}", why);
            let mut failed = MigrationResult::failed(id, direction, timings, why);
            failed.transfer = transfer;
            return Ok(failed);
        }

        Ok(MigrationResult {
            checkpoint_id: id,
            direction,
            timings,
            transfer,
            success: true,
            failure: None,
        })
    }
}

fn remove_checkpoint(endpoint: Endpoint<'_>, path: &str) {
    let command = engine::remove_path_command(endpoint.sudo(), path);
    if let Err(e) = endpoint.node.execute(&command) {
        warn!("Could not remove {} on {}: {}", path, endpoint.node.name(), e);
    }
}

fn seconds(duration: Duration) -> f64 {
    duration.as_secs_f64()
}
