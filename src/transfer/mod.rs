//! Moving files between the two hosts.
//!
//! [`TransferResolver::copy`] picks the cheapest way that works for a pair:
//!
//! 1. shared storage: nothing to move
//! 2. direct: the sender pushes to the receiver over ssh
//! 3. relay: through a throwaway directory on the machine running Captain
//!
//! Each of 2 and 3 can wrap the payload in a single tar or zip archive.

pub mod archive;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::capability::negotiate::prefer_private;
use crate::capability::{ArchiveFormat, Direction, PairCapabilities};
use crate::config::TransferConfig;
use crate::error::{Error, Result};
use crate::node::{peer_of, RemoteNode};

use archive::{
    is_directory_style, pack_command, prepare_destination_command, remove_command, should_skip,
    size_command, split_path, strip_directory_marker, unpack_command,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Strategy {
    SharedStorage,
    Direct,
    Relay,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::SharedStorage => write!(f, "shared storage"),
            Strategy::Direct => write!(f, "direct"),
            Strategy::Relay => write!(f, "relay"),
        }
    }
}

/// Outcome of one copy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferReport {
    pub strategy: Strategy,
    pub archive: Option<ArchiveFormat>,
    pub bytes: u64,
    pub duration: Duration,
}

impl TransferReport {
    fn shared() -> Self {
        Self {
            strategy: Strategy::SharedStorage,
            archive: None,
            bytes: 0,
            duration: Duration::ZERO,
        }
    }
}

/// Session-level switches for the resolver.
#[derive(Debug, Clone)]
pub struct TransferPolicy {
    /// Shared storage is mounted and the copied paths live on it.
    pub shared_storage: bool,
    /// Host-to-host pushes are allowed.
    pub direct: bool,
    pub skip_extensions: Vec<String>,
    /// Local directory under which relay directories are created.
    pub relay_root: PathBuf,
}

impl TransferPolicy {
    pub fn from_config(config: &TransferConfig, shared_storage: bool) -> Self {
        Self {
            shared_storage,
            direct: config.direct,
            skip_extensions: config.skip_compressed_extensions.clone(),
            relay_root: config
                .relay_dir
                .clone()
                .unwrap_or_else(|| std::env::temp_dir().join("captain")),
        }
    }
}

pub struct TransferResolver {
    policy: TransferPolicy,
}

impl TransferResolver {
    pub fn new(policy: TransferPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &TransferPolicy {
        &self.policy
    }

    /// Chooses the strategy for a copy without performing it.
    pub fn plan(&self, pair: &PairCapabilities, direction: Direction) -> Strategy {
        if self.policy.shared_storage && pair.shared_storage.usable {
            Strategy::SharedStorage
        } else if self.policy.direct && pair.direct_reach.allows(direction) {
            Strategy::Direct
        } else {
            Strategy::Relay
        }
    }

    /// Copies `from_path` on `from` to `to_path` on `to`.
    ///
    /// `to_path` is the final name of the copy. A directory-style
    /// `from_path` (trailing `/` or `*`) replaces `to_path` entirely.
    ///
    /// # Errors
    ///
    /// Any failure of the underlying transfer is reported as `CopyFailed`.
    /// Temporary archives and relay directories are removed either way.
    pub fn copy(
        &self,
        from: &dyn RemoteNode,
        to: &dyn RemoteNode,
        from_path: &str,
        to_path: &str,
        pair: &PairCapabilities,
        direction: Direction,
    ) -> Result<TransferReport> {
        let strategy = self.plan(pair, direction);
        if strategy == Strategy::SharedStorage {
            debug!("{} is on shared storage, nothing to copy", from_path);
            return Ok(TransferReport::shared());
        }

        let archive = pair
            .archive
            .filter(|_| !should_skip(from_path, &self.policy.skip_extensions));
        let job = CopyJob {
            from,
            to,
            source: strip_directory_marker(from_path),
            destination: to_path.trim_end_matches('/'),
            replace: is_directory_style(from_path),
            use_private: prefer_private(from.kind(), to.kind()),
        };

        info!(
            "Copying {}:{} to {}:{} ({}{})",
            from.name(),
            from_path,
            to.name(),
            to_path,
            strategy,
            archive.map(|a| format!(", {}", a.extension())).unwrap_or_default()
        );

        let started = Instant::now();
        let result = match archive {
            Some(format) => self.copy_archived(&job, strategy, format),
            None => self.copy_plain(&job, strategy),
        };

        match result {
            Ok(bytes) => Ok(TransferReport {
                strategy,
                archive,
                bytes,
                duration: started.elapsed(),
            }),
            Err(e) => {
                error!(
                    "Copy {}:{} -> {}:{} failed: {}",
                    from.name(),
                    from_path,
                    to.name(),
                    to_path,
                    e
                );
                Err(match e {
                    Error::CopyFailed(_) => e,
                    other => Error::CopyFailed(format!(
                        "{} -> {} ({}): {}",
                        from.name(),
                        to.name(),
                        strategy,
                        other
                    )),
                })
            }
        }
    }

    fn copy_plain(&self, job: &CopyJob<'_>, strategy: Strategy) -> Result<u64> {
        job.to
            .execute(&prepare_destination_command(job.destination, job.replace))?;
        let size = job.size_on_sender(job.source);

        match strategy {
            Strategy::Direct => {
                let peer = peer_of(job.to, job.use_private);
                job.from
                    .send_file_to_peer(&peer, job.source, job.destination)?;
                Ok(size)
            }
            _ => self.relay(job, job.source, job.destination),
        }
    }

    fn copy_archived(&self, job: &CopyJob<'_>, strategy: Strategy, format: ArchiveFormat) -> Result<u64> {
        let archive = format!("/tmp/captain-{}.{}", Uuid::new_v4(), format.extension());
        let result = self.move_archive(job, strategy, format, &archive);

        let stage = format!("{}.d", archive);
        cleanup(job.from, &[archive.as_str()]);
        cleanup(job.to, &[archive.as_str(), stage.as_str()]);
        result
    }

    fn move_archive(
        &self,
        job: &CopyJob<'_>,
        strategy: Strategy,
        format: ArchiveFormat,
        archive: &str,
    ) -> Result<u64> {
        let (_, base) = split_path(job.source);
        job.from.execute(&pack_command(format, job.source, archive))?;
        let size = job.size_on_sender(archive);

        let moved = match strategy {
            Strategy::Direct => {
                let peer = peer_of(job.to, job.use_private);
                job.from.send_file_to_peer(&peer, archive, archive)?;
                size
            }
            _ => self.relay(job, archive, archive)?,
        };

        job.to
            .execute(&unpack_command(format, archive, base, job.destination))?;
        Ok(moved)
    }

    /// Retrieves `remote` from the sender and pushes it to the receiver.
    fn relay(&self, job: &CopyJob<'_>, remote: &str, destination: &str) -> Result<u64> {
        std::fs::create_dir_all(&self.policy.relay_root)?;
        let relay_dir = tempfile::Builder::new()
            .prefix("relay-")
            .tempdir_in(&self.policy.relay_root)?;

        let (_, base) = split_path(remote);
        let local = relay_dir.path().join(base);
        debug!("Relaying {} through {}", remote, local.display());

        let retrieved = job.from.retrieve_file(remote, &local)?;
        job.to.send_file(&local, destination)?;

        if let Err(e) = relay_dir.close() {
            warn!("Could not remove relay directory: {}", e);
        }
        Ok(retrieved.bytes_transferred)
    }
}

struct CopyJob<'a> {
    from: &'a dyn RemoteNode,
    to: &'a dyn RemoteNode,
    source: &'a str,
    destination: &'a str,
    replace: bool,
    use_private: bool,
}

impl CopyJob<'_> {
    fn size_on_sender(&self, path: &str) -> u64 {
        self.from
            .execute(&size_command(path))
            .ok()
            .and_then(|out| out.trim().parse().ok())
            .unwrap_or(0)
    }
}

/// Best-effort removal of temporary paths on a host.
pub fn cleanup(node: &dyn RemoteNode, paths: &[&str]) {
    if let Err(e) = node.execute(&remove_command(paths)) {
        warn!("Could not clean up {} on {}: {}", paths.join(" "), node.name(), e);
    }
}
