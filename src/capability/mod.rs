//! Host capabilities and what a pair of hosts can do together.
//!
//! [`probe`] turns one host into a [`Capabilities`] value; [`negotiate`]
//! combines two of them, plus reachability tests, into
//! [`PairCapabilities`]. Both are plain values so every decision made from
//! them can be tested without real hosts.

pub mod keys;
pub mod negotiate;
pub mod probe;

use crate::config::{ArchivePreference, HostKind};
use crate::node::RemoteNode;
use serde::Serialize;

pub use negotiate::{negotiate, probe_reach, test_direct_reach, NegotiationOptions};
pub use probe::{probe, probe_pair};

/// Which way a migration or copy goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    SourceToDestination,
    DestinationToSource,
}

impl Direction {
    pub fn reverse(self) -> Self {
        match self {
            Direction::SourceToDestination => Direction::DestinationToSource,
            Direction::DestinationToSource => Direction::SourceToDestination,
        }
    }

    /// Short label used in log columns.
    pub fn label(self) -> &'static str {
        match self {
            Direction::SourceToDestination => "to",
            Direction::DestinationToSource => "back",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::SourceToDestination => write!(f, "source -> destination"),
            Direction::DestinationToSource => write!(f, "destination -> source"),
        }
    }
}

/// One of the two session hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Side {
    Source,
    Destination,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArchiveFormat {
    Tar,
    Zip,
}

impl ArchiveFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::Zip => "zip",
        }
    }
}

/// Archive tools available (per host) or usable (per pair).
///
/// `zip` means both `zip` and `unzip` are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ArchivingSupport {
    pub tar: bool,
    pub zip: bool,
}

impl ArchivingSupport {
    /// Picks the archive format for a preference.
    ///
    /// A zip preference only falls back to tar when `fallback` is set.
    pub fn select(self, preference: ArchivePreference, fallback: bool) -> Option<ArchiveFormat> {
        match preference {
            ArchivePreference::None => None,
            ArchivePreference::Tar => self.tar.then_some(ArchiveFormat::Tar),
            ArchivePreference::Zip if self.zip => Some(ArchiveFormat::Zip),
            ArchivePreference::Zip if fallback && self.tar => Some(ArchiveFormat::Tar),
            ArchivePreference::Zip => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SharedFsSupport {
    /// NFS server tooling (`exportfs`)
    pub server: bool,
    /// NFS client tooling (`mount.nfs`)
    pub client: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CpuIdentity {
    pub vendor: String,
    pub family: String,
    pub model: String,
}

impl std::fmt::Display for CpuIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} family {} model {}",
            self.vendor, self.family, self.model
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MemoryInfo {
    pub free_mb: u64,
    pub total_mb: u64,
}

/// Environment facts of one host.
///
/// Only produced for hosts that have the container engine, the checkpoint
/// tool and root or passwordless sudo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub host: String,
    pub kind: HostKind,
    pub os: String,
    pub kernel: String,
    pub root: bool,
    pub sudo: bool,
    pub container_engine: bool,
    pub checkpoint_tool: bool,
    pub archiving: ArchivingSupport,
    pub shared_fs: SharedFsSupport,
    pub tmpfs: bool,
    pub cpu: CpuIdentity,
    pub ram: MemoryInfo,
}

impl Capabilities {
    /// Prefix for commands that need root.
    pub fn sudo_prefix(&self) -> &'static str {
        if self.root {
            ""
        } else {
            "sudo -n "
        }
    }
}

/// A host together with the capabilities it was probed with.
#[derive(Clone, Copy)]
pub struct Endpoint<'a> {
    pub node: &'a dyn RemoteNode,
    pub caps: &'a Capabilities,
}

impl<'a> Endpoint<'a> {
    pub fn new(node: &'a dyn RemoteNode, caps: &'a Capabilities) -> Self {
        Self { node, caps }
    }

    pub fn sudo(&self) -> &'static str {
        self.caps.sudo_prefix()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DirectReach {
    pub source_to_dest: bool,
    pub dest_to_source: bool,
}

impl DirectReach {
    pub fn allows(&self, direction: Direction) -> bool {
        match direction {
            Direction::SourceToDestination => self.source_to_dest,
            Direction::DestinationToSource => self.dest_to_source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SharedStorage {
    pub usable: bool,
    pub server_side: Option<Side>,
}

/// What the two hosts can do together.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PairCapabilities {
    pub direct_reach: DirectReach,
    pub shared_storage: SharedStorage,
    pub archiving: ArchivingSupport,
    /// Format chosen from the configured preference, if any
    pub archive: Option<ArchiveFormat>,
    pub cpu_compatible: bool,
    /// Advisory findings to show before migrating
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_selection_policy() {
        let both = ArchivingSupport { tar: true, zip: true };
        let tar_only = ArchivingSupport { tar: true, zip: false };
        let none = ArchivingSupport::default();

        assert_eq!(both.select(ArchivePreference::None, true), None);
        assert_eq!(both.select(ArchivePreference::Zip, false), Some(ArchiveFormat::Zip));
        assert_eq!(both.select(ArchivePreference::Tar, false), Some(ArchiveFormat::Tar));
        assert_eq!(tar_only.select(ArchivePreference::Zip, false), None);
        assert_eq!(tar_only.select(ArchivePreference::Zip, true), Some(ArchiveFormat::Tar));
        assert_eq!(none.select(ArchivePreference::Zip, true), None);
        assert_eq!(none.select(ArchivePreference::Tar, true), None);
    }

    #[test]
    fn test_direction_reverse_and_reach() {
        let reach = DirectReach {
            source_to_dest: true,
            dest_to_source: false,
        };
        assert!(reach.allows(Direction::SourceToDestination));
        assert!(!reach.allows(Direction::SourceToDestination.reverse()));
        assert_eq!(Direction::DestinationToSource.label(), "back");
    }
}
