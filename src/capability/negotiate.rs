//! Combining two hosts' capabilities into what the pair can do.

use log::{debug, info, warn};

use crate::capability::keys::inject_key;
use crate::capability::probe::has_marker_line;
use crate::capability::{
    ArchiveFormat, ArchivingSupport, Capabilities, Direction, DirectReach, PairCapabilities,
    SharedStorage, Side,
};
use crate::config::{ArchivePreference, HostKind};
use crate::node::{peer_of, RemoteNode};

/// Token echoed by a host over a double hop to prove direct reachability.
pub const DIRECT_TOKEN: &str = "captain-direct";

/// Knobs from the configuration that shape negotiation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NegotiationOptions {
    /// Allow shared storage between hosts of different backend kinds.
    pub force_shared: bool,
    pub archive: ArchivePreference,
    pub archive_fallback: bool,
}

/// Whether host-to-host traffic should use private addresses.
///
/// Only hosts in the same provider network can route to each other's
/// private address.
pub fn prefer_private(a: HostKind, b: HostKind) -> bool {
    a == b && a == HostKind::Aws
}

/// Asks `from` to run a trivial command on `to`.
pub fn test_direct_reach(from: &dyn RemoteNode, to: &dyn RemoteNode, use_private: bool) -> bool {
    let peer = peer_of(to, use_private);
    match from.execute_on_peer(&peer, &format!("echo {}", DIRECT_TOKEN)) {
        Ok(out) => has_marker_line(&out, DIRECT_TOKEN),
        Err(e) => {
            debug!("{} cannot reach {} directly: {}", from.name(), peer, e);
            false
        }
    }
}

/// Tests reachability `from -> to`, injecting a key and re-testing once if
/// `inject_keys` is set. Injection failures are logged and otherwise ignored.
pub fn probe_reach(
    from: &dyn RemoteNode,
    to: &dyn RemoteNode,
    use_private: bool,
    inject_keys: bool,
) -> bool {
    if test_direct_reach(from, to, use_private) {
        return true;
    }
    if !inject_keys {
        return false;
    }

    info!("Installing an ssh key so {} can reach {}", from.name(), to.name());
    match inject_key(from, to) {
        Ok(()) => test_direct_reach(from, to, use_private),
        Err(e) => {
            warn!(
                "Key injection {} -> {} failed, falling back to relay: {}",
                from.name(),
                to.name(),
                e
            );
            false
        }
    }
}

/// Decides what `source` and `destination` can do together.
///
/// `reach` is asked once per direction; it is the only effectful input.
pub fn negotiate<F>(
    source: &Capabilities,
    destination: &Capabilities,
    mut reach: F,
    options: &NegotiationOptions,
) -> PairCapabilities
where
    F: FnMut(Direction) -> bool,
{
    let mut warnings = Vec::new();

    let direct_reach = DirectReach {
        source_to_dest: reach(Direction::SourceToDestination),
        dest_to_source: reach(Direction::DestinationToSource),
    };

    let shared_storage = negotiate_shared_storage(source, destination, options.force_shared);

    let archiving = ArchivingSupport {
        tar: source.archiving.tar && destination.archiving.tar,
        zip: source.archiving.zip && destination.archiving.zip,
    };
    let archive = archiving.select(options.archive, options.archive_fallback);
    if options.archive != ArchivePreference::None && archive.is_none() {
        warnings.push(format!(
            "{:?} archiving requested but not available on both hosts; copying without an archive",
            options.archive
        ));
    } else if options.archive == ArchivePreference::Zip && archive != Some(ArchiveFormat::Zip) {
        warnings.push("zip archiving not available on both hosts; falling back to tar".to_string());
    }

    let cpu_compatible = source.cpu == destination.cpu;
    if !cpu_compatible {
        warnings.push(format!(
            "CPU mismatch: {} has {}, {} has {}; restores may fail",
            source.host, source.cpu, destination.host, destination.cpu
        ));
    }

    for warning in &warnings {
        warn!("{}", warning);
    }

    PairCapabilities {
        direct_reach,
        shared_storage,
        archiving,
        archive,
        cpu_compatible,
        warnings,
    }
}

fn negotiate_shared_storage(
    source: &Capabilities,
    destination: &Capabilities,
    force: bool,
) -> SharedStorage {
    if !force && source.kind != destination.kind {
        debug!(
            "Shared storage needs hosts of the same kind ({} vs {})",
            source.kind, destination.kind
        );
        return SharedStorage::default();
    }

    let server_side = if source.shared_fs.server && destination.shared_fs.client {
        Some(Side::Source)
    } else if destination.shared_fs.server && source.shared_fs.client {
        Some(Side::Destination)
    } else {
        None
    };

    SharedStorage {
        usable: server_side.is_some(),
        server_side,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::probe::probe;
    use crate::node::testing::{Call, ScriptedNode};

    fn caps(node: &ScriptedNode) -> Capabilities {
        probe(node).unwrap()
    }

    fn all_reachable(_: Direction) -> bool {
        true
    }

    #[test]
    fn test_healthy_pair() {
        let a = caps(&ScriptedNode::healthy("source", "10.0.0.1"));
        let b = caps(&ScriptedNode::healthy("destination", "10.0.0.2"));
        let pair = negotiate(&a, &b, all_reachable, &NegotiationOptions::default());

        assert!(pair.direct_reach.source_to_dest && pair.direct_reach.dest_to_source);
        assert!(pair.shared_storage.usable);
        assert_eq!(pair.shared_storage.server_side, Some(Side::Source));
        assert!(pair.cpu_compatible);
        assert!(pair.warnings.is_empty());
        assert_eq!(pair.archive, None);
    }

    #[test]
    fn test_reach_is_per_direction() {
        let a = caps(&ScriptedNode::healthy("source", "10.0.0.1"));
        let b = caps(&ScriptedNode::healthy("destination", "10.0.0.2"));
        let pair = negotiate(
            &a,
            &b,
            |d| d == Direction::SourceToDestination,
            &NegotiationOptions::default(),
        );
        assert!(pair.direct_reach.source_to_dest);
        assert!(!pair.direct_reach.dest_to_source);
    }

    #[test]
    fn test_shared_storage_prefers_the_server_side() {
        let a = caps(&ScriptedNode::healthy("source", "10.0.0.1").with_fact("NFS_SERVER", ""));
        let b = caps(&ScriptedNode::healthy("destination", "10.0.0.2"));
        let pair = negotiate(&a, &b, all_reachable, &NegotiationOptions::default());
        assert_eq!(pair.shared_storage.server_side, Some(Side::Destination));

        let c = caps(&ScriptedNode::healthy("destination", "10.0.0.2").with_fact("NFS_CLIENT", ""));
        let d = caps(&ScriptedNode::healthy("source", "10.0.0.1").with_fact("NFS_CLIENT", ""));
        let pair = negotiate(&d, &c, all_reachable, &NegotiationOptions::default());
        assert!(!pair.shared_storage.usable);
        assert_eq!(pair.shared_storage.server_side, None);
    }

    #[test]
    fn test_shared_storage_needs_same_kind_unless_forced() {
        let a = caps(&ScriptedNode::healthy("source", "10.0.0.1").with_kind(HostKind::Aws));
        let b = caps(&ScriptedNode::healthy("destination", "10.0.0.2"));

        let pair = negotiate(&a, &b, all_reachable, &NegotiationOptions::default());
        assert!(!pair.shared_storage.usable);

        let forced = NegotiationOptions {
            force_shared: true,
            ..Default::default()
        };
        let pair = negotiate(&a, &b, all_reachable, &forced);
        assert!(pair.shared_storage.usable);
    }

    #[test]
    fn test_zip_does_not_silently_become_tar() {
        let a = caps(&ScriptedNode::healthy("source", "10.0.0.1").with_fact("ZIP", ""));
        let b = caps(&ScriptedNode::healthy("destination", "10.0.0.2"));

        let options = NegotiationOptions {
            archive: ArchivePreference::Zip,
            ..Default::default()
        };
        let pair = negotiate(&a, &b, all_reachable, &options);
        assert!(!pair.archiving.zip);
        assert!(pair.archiving.tar);
        assert_eq!(pair.archive, None);
        assert_eq!(pair.warnings.len(), 1);

        let options = NegotiationOptions {
            archive: ArchivePreference::Zip,
            archive_fallback: true,
            ..Default::default()
        };
        let pair = negotiate(&a, &b, all_reachable, &options);
        assert_eq!(pair.archive, Some(ArchiveFormat::Tar));
        assert!(pair.warnings[0].contains("falling back to tar"));
    }

    #[test]
    fn test_cpu_mismatch_is_advisory() {
        let a = caps(&ScriptedNode::healthy("source", "10.0.0.1"));
        let b = caps(
            &ScriptedNode::healthy("destination", "10.0.0.2").with_fact("CPU_VENDOR", "AuthenticAMD"),
        );
        let pair = negotiate(&a, &b, all_reachable, &NegotiationOptions::default());
        assert!(!pair.cpu_compatible);
        assert!(pair.warnings.iter().any(|w| w.contains("CPU mismatch")));
        assert!(pair.direct_reach.source_to_dest);
    }

    #[test]
    fn test_direct_reach_uses_double_hop() {
        let a = ScriptedNode::healthy("source", "54.0.0.1");
        let b = ScriptedNode::healthy("destination", "54.0.0.2").with_private_address("172.31.0.2");

        assert!(test_direct_reach(&a, &b, true));
        let calls = a.calls();
        assert_eq!(
            calls.last(),
            Some(&Call::Peer {
                peer: "root@172.31.0.2".to_string(),
                port: 22,
                command: format!("echo {}", DIRECT_TOKEN),
            })
        );
    }

    #[test]
    fn test_unreachable_peer_without_injection() {
        let a = ScriptedNode::healthy("source", "10.0.0.1").without_peer_access();
        let b = ScriptedNode::healthy("destination", "10.0.0.2");
        assert!(!probe_reach(&a, &b, false, false));
        assert!(!b.ran("authorized_keys"));
    }

    #[test]
    fn test_failed_injection_is_not_fatal() {
        let a = ScriptedNode::healthy("source", "10.0.0.1")
            .without_peer_access()
            .fail_on("ssh-keygen");
        let b = ScriptedNode::healthy("destination", "10.0.0.2");
        assert!(!probe_reach(&a, &b, false, true));
    }

    #[test]
    fn test_injection_installs_key_on_target() {
        let a = ScriptedNode::healthy("source", "10.0.0.1")
            .without_peer_access()
            .respond("id_rsa.pub", "ssh-rsa AAAAB3Nza source@host");
        let b = ScriptedNode::healthy("destination", "10.0.0.2");

        // Still unreachable afterwards in this script, but the key was pushed.
        assert!(!probe_reach(&a, &b, false, true));
        assert!(b.ran("authorized_keys"));
        assert!(b.ran("ssh-rsa AAAAB3Nza source@host"));
    }

    #[test]
    fn test_prefer_private() {
        assert!(prefer_private(HostKind::Aws, HostKind::Aws));
        assert!(!prefer_private(HostKind::Aws, HostKind::Generic));
        assert!(!prefer_private(HostKind::Generic, HostKind::Generic));
    }
}
