//! Local backend: the machine Captain itself runs on.

use crate::config::HostKind;
use crate::error::{Error, Result};
use crate::node::{test_environment, HostBackend, RemoteNode};
use crate::remote::transfer::{get_path_size, run_checked};
use crate::remote::{ExecutionResult, TransferResult};
use log::{debug, info, trace};
use std::path::Path;
use std::process::Command;

pub struct LocalHost {
    name: String,
    address: String,
}

impl LocalHost {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            address: "127.0.0.1".to_string(),
        }
    }
}

impl RemoteNode for LocalHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> HostKind {
        HostKind::Local
    }

    fn run(&self, command: &str) -> Result<ExecutionResult> {
        debug!("[{}] $ {}", self.name, command);
        let output = Command::new("sh").arg("-c").arg(command).output()?;

        let result = ExecutionResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        };
        trace!("[{}] exit={}", self.name, result.exit_code);
        Ok(result)
    }

    fn send_file(&self, local_path: &Path, remote_path: &str) -> Result<TransferResult> {
        let mut cmd = Command::new("cp");
        cmd.arg("-r").arg(local_path).arg(remote_path);
        run_checked(cmd, "local copy")?;
        Ok(TransferResult {
            bytes_transferred: get_path_size(local_path)?,
        })
    }

    fn retrieve_file(&self, remote_path: &str, local_path: &Path) -> Result<TransferResult> {
        let mut cmd = Command::new("cp");
        cmd.arg("-r").arg(remote_path).arg(local_path);
        run_checked(cmd, "local copy")?;
        Ok(TransferResult {
            bytes_transferred: get_path_size(local_path)?,
        })
    }

    fn is_reachable(&self) -> bool {
        true
    }

    fn public_address(&self) -> String {
        self.address.clone()
    }

    fn private_address(&self) -> String {
        self.address.clone()
    }

    fn user(&self) -> String {
        std::env::var("USER").unwrap_or_else(|_| "root".to_string())
    }
}

impl HostBackend for LocalHost {
    fn create(&mut self) -> Result<()> {
        Err(Error::Unsupported("cannot create local machine".to_string()))
    }

    fn start(&mut self) -> Result<()> {
        // Peers need an address they can route to, not loopback.
        let addresses = self.execute("hostname -I 2>/dev/null || true")?;
        if let Some(first) = addresses.split_whitespace().next() {
            self.address = first.to_string();
        }
        info!("{} is the local machine ({})", self.name, self.address);
        Ok(())
    }

    fn prepare(&mut self) -> Result<()> {
        info!("Leaving the local environment as it is");
        Ok(())
    }

    fn test(&mut self) -> Result<()> {
        test_environment(self)
    }

    fn destroy(&mut self) -> Result<()> {
        Err(Error::Unsupported("cannot destroy local machine".to_string()))
    }

    fn as_node(&self) -> &dyn RemoteNode {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_run_captures_output() {
        let host = LocalHost::new("source");
        let result = host.run("echo out; echo err >&2; exit 4").unwrap();
        assert_eq!(result.stdout.trim(), "out");
        assert_eq!(result.stderr.trim(), "err");
        assert_eq!(result.exit_code, 4);
    }

    #[test]
    fn test_local_send_and_retrieve() {
        let dir = tempfile::TempDir::new().unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"12345").unwrap();
        let host = LocalHost::new("source");

        let dest = dir.path().join("b.txt");
        let sent = host.send_file(&src, dest.to_str().unwrap()).unwrap();
        assert_eq!(sent.bytes_transferred, 5);

        let back = dir.path().join("c.txt");
        host.retrieve_file(dest.to_str().unwrap(), &back).unwrap();
        assert_eq!(std::fs::read(&back).unwrap(), b"12345");
    }

    #[test]
    fn test_local_lifecycle_limits() {
        let mut host = LocalHost::new("source");
        assert!(host.create().is_err());
        assert!(host.destroy().is_err());
        assert!(host.is_reachable());
    }
}
