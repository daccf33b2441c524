//! `RemoteNode` over SSH, shared by the cloud and generic backends.

use crate::config::{HostKind, SshConfig};
use crate::error::Result;
use crate::node::RemoteNode;
use crate::remote::{ExecutionResult, RetryConfig, SCPTransfer, SSHExecutor, TransferResult};
use log::debug;
use std::path::Path;

/// A host reached through SSH at a known address.
pub struct SshNode {
    name: String,
    kind: HostKind,
    public_address: String,
    private_address: String,
    ssh: SshConfig,
    executor: SSHExecutor,
    scp: SCPTransfer,
}

impl SshNode {
    pub fn new(
        name: impl Into<String>,
        kind: HostKind,
        public_address: impl Into<String>,
        private_address: impl Into<String>,
        ssh: SshConfig,
    ) -> Self {
        let public_address = public_address.into();
        let private_address = private_address.into();
        let private_address = if private_address.is_empty() {
            public_address.clone()
        } else {
            private_address
        };

        Self {
            name: name.into(),
            kind,
            executor: SSHExecutor::new(public_address.clone(), ssh.clone())
                .with_retry_config(RetryConfig::for_host(kind)),
            scp: SCPTransfer::new(public_address.clone(), ssh.clone()),
            public_address,
            private_address,
            ssh,
        }
    }
}

impl RemoteNode for SshNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> HostKind {
        self.kind
    }

    fn run(&self, command: &str) -> Result<ExecutionResult> {
        self.executor.execute(command)
    }

    fn send_file(&self, local_path: &Path, remote_path: &str) -> Result<TransferResult> {
        debug!("[{}] upload {} -> {}", self.name, local_path.display(), remote_path);
        self.scp.upload(local_path, remote_path)
    }

    fn retrieve_file(&self, remote_path: &str, local_path: &Path) -> Result<TransferResult> {
        debug!("[{}] download {} -> {}", self.name, remote_path, local_path.display());
        self.scp.download(remote_path, local_path)
    }

    fn is_reachable(&self) -> bool {
        // One quick attempt: callers poll on their own schedule.
        SSHExecutor::new(self.public_address.clone(), self.ssh.clone())
            .with_retry_config(RetryConfig::no_retry())
            .test_connection()
            .is_ok()
    }

    fn public_address(&self) -> String {
        self.public_address.clone()
    }

    fn private_address(&self) -> String {
        self.private_address.clone()
    }

    fn user(&self) -> String {
        self.ssh.user.clone()
    }

    fn port(&self) -> u16 {
        self.ssh.port
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_address_defaults_to_public() {
        let node = SshNode::new("source", HostKind::Generic, "10.0.0.5", "", SshConfig::default());
        assert_eq!(node.private_address(), "10.0.0.5");
        assert_eq!(node.user(), "root");
        assert_eq!(node.name(), "source");
    }
}
