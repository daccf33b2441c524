//! Hosts taking part in a migration.
//!
//! [`RemoteNode`] is what the migration core needs from a host: run a
//! command, move files, report addresses. [`HostBackend`] adds the lifecycle
//! steps (create, start, prepare, test, destroy) that differ per backend
//! kind. The backend is chosen once from the configuration by
//! [`build_backend`].

pub mod cloud;
pub mod generic;
pub mod local;
pub mod ssh;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

use crate::config::{HostConfig, HostKind};
use crate::error::{Error, Result};
use crate::remote::transfer::{port_option, OptionStyle};
use crate::remote::{ExecutionResult, TransferResult};
use log::{debug, info};
use std::fmt;
use std::path::Path;

pub use cloud::CloudHost;
pub use generic::GenericHost;
pub use local::LocalHost;
pub use ssh::SshNode;

/// Connect timeout for host-to-host ssh/scp, in seconds.
pub const PEER_CONNECT_TIMEOUT: u64 = 10;

/// Where a host reaches its peer: `user@address` and the peer's sshd port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub login: String,
    pub port: u16,
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.login, self.port)
    }
}

/// Options for ssh/scp commands a host runs against `peer`.
fn peer_options(peer: &Peer, style: OptionStyle) -> Vec<String> {
    let mut options = vec![
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=no".to_string(),
        "-o".to_string(),
        format!("ConnectTimeout={}", PEER_CONNECT_TIMEOUT),
    ];
    options.extend(port_option(peer.port, style));
    options
}

/// The command that runs `command` on `peer` from another host.
pub fn peer_command(peer: &Peer, command: &str) -> String {
    format!(
        "ssh {} {} {}",
        peer_options(peer, OptionStyle::Ssh).join(" "),
        shell_words::quote(&peer.login),
        shell_words::quote(command)
    )
}

/// The command that copies `path` from one host to `peer_path` on `peer`.
pub fn peer_copy_command(peer: &Peer, path: &str, peer_path: &str) -> String {
    format!(
        "scp -r {} {} {}",
        peer_options(peer, OptionStyle::Scp).join(" "),
        shell_words::quote(path),
        shell_words::quote(&format!("{}:{}", peer.login, peer_path))
    )
}

/// Command execution and file movement on one host.
pub trait RemoteNode: Send + Sync {
    /// Role label used in logs ("source", "destination").
    fn name(&self) -> &str;

    fn kind(&self) -> HostKind;

    /// Runs a command and returns its raw result, whatever the exit code.
    fn run(&self, command: &str) -> Result<ExecutionResult>;

    /// Runs a command and returns its trimmed stdout.
    ///
    /// A non-zero exit code is reported as `CommandFailed`.
    fn execute(&self, command: &str) -> Result<String> {
        let result = self.run(command)?;
        if !result.is_success() {
            return Err(Error::CommandFailed {
                command: command.to_string(),
                exit_code: result.exit_code,
                stderr: result.stderr.trim().to_string(),
            });
        }
        Ok(result.stdout.trim().to_string())
    }

    /// Runs `command` on `peer` by hopping through this host.
    fn execute_on_peer(&self, peer: &Peer, command: &str) -> Result<String> {
        self.execute(&peer_command(peer, command))
    }

    /// Copies a local file or directory onto this host.
    fn send_file(&self, local_path: &Path, remote_path: &str) -> Result<TransferResult>;

    /// Copies a file or directory from this host to the local machine.
    fn retrieve_file(&self, remote_path: &str, local_path: &Path) -> Result<TransferResult>;

    /// Pushes a path of this host straight to `peer`, without passing
    /// through the local machine.
    fn send_file_to_peer(
        &self,
        peer: &Peer,
        remote_path: &str,
        peer_path: &str,
    ) -> Result<TransferResult> {
        self.execute(&peer_copy_command(peer, remote_path, peer_path))?;
        Ok(TransferResult::default())
    }

    fn is_reachable(&self) -> bool;

    fn public_address(&self) -> String;

    /// Address inside the provider network; equals the public one when there
    /// is no such distinction.
    fn private_address(&self) -> String;

    /// Login user on this host.
    fn user(&self) -> String;

    /// Port sshd listens on.
    fn port(&self) -> u16 {
        22
    }
}

/// Lifecycle of a host, on top of command execution.
pub trait HostBackend: RemoteNode {
    /// Provisions the machine if it does not exist yet.
    fn create(&mut self) -> Result<()>;

    /// Makes the machine reachable and resolves its addresses.
    fn start(&mut self) -> Result<()>;

    /// Installs the container engine, checkpoint tool and helpers.
    fn prepare(&mut self) -> Result<()>;

    /// Checks that checkpointing works on this host.
    fn test(&mut self) -> Result<()>;

    /// Stops the machine.
    fn destroy(&mut self) -> Result<()>;

    fn as_node(&self) -> &dyn RemoteNode;
}

/// Builds the backend selected by the host's configured kind.
pub fn build_backend(name: &str, config: &HostConfig) -> Result<Box<dyn HostBackend>> {
    debug!("Building {} backend for {}", config.kind, name);
    match config.kind {
        HostKind::Aws => {
            let aws = config.aws.clone().ok_or_else(|| {
                Error::Config(format!("{} is of type aws but has no `aws` section", name))
            })?;
            Ok(Box::new(CloudHost::new(name, aws, config.ssh.clone())))
        }
        HostKind::Generic => {
            let generic = config.generic.as_ref().ok_or_else(|| {
                Error::Config(format!("No IP address specified for generic host {}", name))
            })?;
            Ok(Box::new(GenericHost::new(name, &generic.ip, config.ssh.clone())))
        }
        HostKind::Local => Ok(Box::new(LocalHost::new(name))),
    }
}

/// Address of `node` as seen from its peer.
pub fn peer_address(node: &dyn RemoteNode, use_private: bool) -> String {
    let private = node.private_address();
    if use_private && !private.is_empty() {
        private
    } else {
        node.public_address()
    }
}

/// How the other host reaches `node`.
pub fn peer_of(node: &dyn RemoteNode, use_private: bool) -> Peer {
    Peer {
        login: format!("{}@{}", node.user(), peer_address(node, use_private)),
        port: node.port(),
    }
}

/// `sudo -n ` unless the node logs in as root.
pub fn elevation_prefix(node: &dyn RemoteNode) -> Result<&'static str> {
    let user = node.execute("whoami")?;
    Ok(if user.lines().any(|l| l.trim() == "root") {
        ""
    } else {
        "sudo -n "
    })
}

/// Installs Docker with experimental checkpoints, CRIU and transfer helpers.
pub fn prepare_environment(node: &dyn RemoteNode) -> Result<()> {
    info!("Preparing environment on {}", node.name());
    let sudo = elevation_prefix(node)?;

    let steps = [
        format!("{}apt-get update -q", sudo),
        format!(
            "{}env DEBIAN_FRONTEND=noninteractive apt-get install -y -q \
             docker.io criu tar zip unzip nfs-kernel-server nfs-common",
            sudo
        ),
        format!(
            "echo '{{\"experimental\": true}}' | {}tee /etc/docker/daemon.json >/dev/null",
            sudo
        ),
        format!("{}systemctl restart docker", sudo),
    ];

    for step in &steps {
        node.execute(step)?;
    }

    info!("Environment ready on {}", node.name());
    Ok(())
}

/// Verifies that the container engine accepts checkpoint commands.
pub fn test_environment(node: &dyn RemoteNode) -> Result<()> {
    let sudo = elevation_prefix(node)?;

    node.execute(&format!("{}docker info >/dev/null", sudo))
        .map_err(|e| Error::MissingRequirement {
            host: node.name().to_string(),
            requirement: format!("working docker daemon ({})", e),
        })?;

    let experimental = node.execute(&format!("{}docker version --format '{{{{.Server.Experimental}}}}'", sudo))?;
    if experimental.trim() != "true" {
        return Err(Error::MissingRequirement {
            host: node.name().to_string(),
            requirement: "docker daemon with experimental features (checkpoints)".to_string(),
        });
    }

    node.execute(&format!("{}criu check", sudo))
        .map_err(|e| Error::MissingRequirement {
            host: node.name().to_string(),
            requirement: format!("criu check passing ({})", e),
        })?;

    info!("{} passed environment checks", node.name());
    Ok(())
}
