//! Generic backend: an already running machine with a fixed address.

use crate::config::{HostKind, SshConfig};
use crate::error::{Error, Result};
use crate::node::{
    elevation_prefix, prepare_environment, test_environment, HostBackend, RemoteNode, SshNode,
};
use crate::remote::{ExecutionResult, TransferResult};
use log::{debug, info};
use std::path::Path;

pub struct GenericHost {
    node: SshNode,
}

impl GenericHost {
    pub fn new(name: &str, ip: &str, ssh: SshConfig) -> Self {
        Self {
            node: SshNode::new(name, HostKind::Generic, ip, "", ssh),
        }
    }
}

impl RemoteNode for GenericHost {
    fn name(&self) -> &str {
        self.node.name()
    }

    fn kind(&self) -> HostKind {
        HostKind::Generic
    }

    fn run(&self, command: &str) -> Result<ExecutionResult> {
        self.node.run(command)
    }

    fn send_file(&self, local_path: &Path, remote_path: &str) -> Result<TransferResult> {
        self.node.send_file(local_path, remote_path)
    }

    fn retrieve_file(&self, remote_path: &str, local_path: &Path) -> Result<TransferResult> {
        self.node.retrieve_file(remote_path, local_path)
    }

    fn is_reachable(&self) -> bool {
        self.node.is_reachable()
    }

    fn public_address(&self) -> String {
        self.node.public_address()
    }

    fn private_address(&self) -> String {
        self.node.private_address()
    }

    fn user(&self) -> String {
        self.node.user()
    }

    fn port(&self) -> u16 {
        self.node.port()
    }
}

impl HostBackend for GenericHost {
    fn create(&mut self) -> Result<()> {
        Err(Error::Unsupported(
            "cannot create generic machines on the go".to_string(),
        ))
    }

    fn start(&mut self) -> Result<()> {
        if !self.node.is_reachable() {
            return Err(Error::UnreachableHost {
                host: self.node.public_address(),
                reason: "instance is not running".to_string(),
            });
        }
        info!("{} is ready at {}", self.name(), self.public_address());
        Ok(())
    }

    fn prepare(&mut self) -> Result<()> {
        prepare_environment(&self.node)
    }

    fn test(&mut self) -> Result<()> {
        test_environment(&self.node)
    }

    fn destroy(&mut self) -> Result<()> {
        if !self.node.is_reachable() {
            info!("{} already stopped", self.name());
            return Ok(());
        }
        let sudo = elevation_prefix(&self.node)?;
        // The connection drops while the machine powers off.
        match self.node.run(&format!("{}shutdown -P now", sudo)) {
            Ok(result) if !result.is_success() => {
                debug!("{}: shutdown exited {}: {}", self.name(), result.exit_code, result.combined())
            }
            Ok(_) => {}
            Err(e) => debug!("{}: shutdown: {}", self.name(), e),
        }
        info!("{} is shutting down", self.name());
        Ok(())
    }

    fn as_node(&self) -> &dyn RemoteNode {
        self
    }
}
