//! NFS shared storage between the two hosts.
//!
//! One host exports a directory and the other mounts it at the same path,
//! so a checkpoint written on one side is immediately visible on the other.
//! The export can be backed by tmpfs to keep checkpoints in memory.

use log::{info, warn};
use serde::Serialize;

use crate::capability::{Endpoint, Side};
use crate::config::SharedStorageConfig;
use crate::error::Result;
use crate::node::{peer_address, RemoteNode};

const EXPORTS_FILE: &str = "/etc/exports.d/captain.exports";

/// A mounted shared directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SharedMount {
    pub server: Side,
    pub mount_point: String,
    pub tmpfs: bool,
}

impl SharedMount {
    /// True if `path` lives inside the shared directory.
    pub fn contains(&self, path: &str) -> bool {
        let root = self.mount_point.trim_end_matches('/');
        path == root || path.starts_with(&format!("{}/", root))
    }
}

/// Exports `mount_point` on `server` and mounts it on `client`.
pub fn mount_shared(
    server: Endpoint<'_>,
    client: Endpoint<'_>,
    server_side: Side,
    config: &SharedStorageConfig,
    tmpfs: bool,
    use_private: bool,
) -> Result<SharedMount> {
    let mount_point = config.mount_point.trim_end_matches('/').to_string();
    let mp = quote(&mount_point);

    let sudo = server.caps.sudo_prefix();
    server.node.execute(&format!("{}mkdir -p {}", sudo, mp))?;
    if tmpfs {
        if !server.caps.tmpfs {
            warn!("{} does not list tmpfs support; trying anyway", server.node.name());
        }
        server.node.execute(&format!(
            "mountpoint -q {mp} || {sudo}mount -t tmpfs -o size={size}m tmpfs {mp}",
            mp = mp,
            sudo = sudo,
            size = config.tmpfs_size_mb
        ))?;
    }
    server.node.execute(&format!("{}chmod 777 {}", sudo, mp))?;

    let client_address = peer_address(client.node, use_private);
    let export = format!(
        "{} {}(rw,sync,no_subtree_check,no_root_squash)",
        mount_point, client_address
    );
    server.node.execute(&format!(
        "{sudo}mkdir -p /etc/exports.d && echo {export} | {sudo}tee {file} >/dev/null && {sudo}exportfs -ra",
        sudo = sudo,
        export = quote(&export),
        file = EXPORTS_FILE
    ))?;
    info!("{} exports {} to {}", server.node.name(), mount_point, client_address);

    let server_address = peer_address(server.node, use_private);
    let csudo = client.caps.sudo_prefix();
    client.node.execute(&format!("{}mkdir -p {}", csudo, mp))?;
    client.node.execute(&format!(
        "mountpoint -q {mp} || {sudo}mount -t nfs {remote} {mp}",
        mp = mp,
        sudo = csudo,
        remote = quote(&format!("{}:{}", server_address, mount_point))
    ))?;
    info!("{} mounted {}:{}", client.node.name(), server_address, mount_point);

    Ok(SharedMount {
        server: server_side,
        mount_point,
        tmpfs,
    })
}

/// Unmounts the client side and withdraws the export.
///
/// Every step is attempted; the first error is returned.
pub fn unmount_shared(
    server: Endpoint<'_>,
    client: Endpoint<'_>,
    mount: &SharedMount,
) -> Result<()> {
    let mp = quote(&mount.mount_point);
    let sudo = server.caps.sudo_prefix();

    let mut steps: Vec<(&dyn RemoteNode, String)> = vec![
        (
            client.node,
            format!(
                "! mountpoint -q {mp} || {sudo}umount -f {mp}",
                mp = mp,
                sudo = client.caps.sudo_prefix()
            ),
        ),
        (
            server.node,
            format!(
                "{sudo}rm -f {file} && {sudo}exportfs -ra",
                sudo = sudo,
                file = EXPORTS_FILE
            ),
        ),
    ];
    if mount.tmpfs {
        steps.push((
            server.node,
            format!("! mountpoint -q {mp} || {sudo}umount {mp}", mp = mp, sudo = sudo),
        ));
    }

    let mut first_error = None;
    for (node, command) in steps {
        if let Err(e) = node.execute(&command) {
            warn!("Shared storage teardown step failed on {}: {}", node.name(), e);
            if first_error.is_none() {
                first_error = Some(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => {
            info!("Shared storage at {} torn down", mount.mount_point);
            Ok(())
        }
    }
}

fn quote(s: &str) -> String {
    shell_words::quote(s).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::probe::probe;
    use crate::node::testing::ScriptedNode;

    fn config() -> SharedStorageConfig {
        SharedStorageConfig {
            enabled: true,
            force: false,
            mount_point: "/mnt/captain/".to_string(),
            tmpfs: false,
            tmpfs_size_mb: 512,
        }
    }

    #[test]
    fn test_mount_exports_and_mounts() {
        let server = ScriptedNode::healthy("source", "10.0.0.1");
        let client = ScriptedNode::healthy("destination", "10.0.0.2");
        let (sc, cc) = (probe(&server).unwrap(), probe(&client).unwrap());

        let mount = mount_shared(
            Endpoint::new(&server, &sc),
            Endpoint::new(&client, &cc),
            Side::Source,
            &config(),
            false,
            false,
        )
        .unwrap();

        assert_eq!(mount.mount_point, "/mnt/captain");
        assert!(server.ran("'/mnt/captain 10.0.0.2(rw,sync,no_subtree_check,no_root_squash)'"));
        assert!(server.ran("exportfs -ra"));
        assert!(!server.ran("mount -t tmpfs"));
        assert!(client.ran("mount -t nfs"));
        assert!(client.ran("10.0.0.1:/mnt/captain"));
    }

    #[test]
    fn test_tmpfs_backing() {
        let server = ScriptedNode::healthy("destination", "10.0.0.2");
        let client = ScriptedNode::healthy("source", "10.0.0.1").with_fact("USER", "ubuntu");
        let (sc, cc) = (probe(&server).unwrap(), probe(&client).unwrap());

        let mount = mount_shared(
            Endpoint::new(&server, &sc),
            Endpoint::new(&client, &cc),
            Side::Destination,
            &config(),
            true,
            false,
        )
        .unwrap();

        assert!(mount.tmpfs);
        assert!(server.ran("mount -t tmpfs -o size=512m tmpfs /mnt/captain"));
        assert!(client.ran("sudo -n mount -t nfs"));

        server.clear_calls();
        unmount_shared(
            Endpoint::new(&server, &sc),
            Endpoint::new(&client, &cc),
            &mount,
        )
        .unwrap();
        assert!(client.ran("sudo -n umount -f /mnt/captain"));
        assert!(server.ran("umount /mnt/captain"));
    }

    #[test]
    fn test_teardown_attempts_every_step() {
        let server = ScriptedNode::healthy("source", "10.0.0.1");
        let client = ScriptedNode::healthy("destination", "10.0.0.2");
        let (sc, cc) = (probe(&server).unwrap(), probe(&client).unwrap());
        let client = client.fail_on("umount");
        let mount = SharedMount {
            server: Side::Source,
            mount_point: "/mnt/captain".to_string(),
            tmpfs: false,
        };

        let result = unmount_shared(
            Endpoint::new(&server, &sc),
            Endpoint::new(&client, &cc),
            &mount,
        );
        assert!(result.is_err());
        assert!(server.ran("rm -f /etc/exports.d/captain.exports"));
    }

    #[test]
    fn test_contains() {
        let mount = SharedMount {
            server: Side::Source,
            mount_point: "/mnt/captain".to_string(),
            tmpfs: false,
        };
        assert!(mount.contains("/mnt/captain/chk1"));
        assert!(mount.contains("/mnt/captain"));
        assert!(!mount.contains("/mnt/captainx/chk1"));
    }
}
