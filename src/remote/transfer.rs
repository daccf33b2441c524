//! SCP-based transfer of files between this machine and a host.
//!
//! Used by the relay path of the transfer resolver and by ad-hoc copies.
//! Paths are copied recursively so checkpoint directories and single archive
//! files go through the same calls.

use crate::config::SshConfig;
use crate::error::{Error, Result};
use log::debug;
use std::path::Path;
use std::process::Command;

/// Result of a file transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferResult {
    /// Size of the transferred data in bytes, 0 if unknown
    pub bytes_transferred: u64,
}

/// Handles SCP-based file transfers to/from one host.
pub struct SCPTransfer {
    host: String,
    config: SshConfig,
}

impl SCPTransfer {
    /// Create a new SCP transfer handler for the given host.
    pub fn new(host: impl Into<String>, config: SshConfig) -> Self {
        Self {
            host: host.into(),
            config,
        }
    }

    fn remote_spec(&self, path: &str) -> String {
        format!("{}@{}:{}", self.config.user, self.host, path)
    }

    /// Upload a local file or directory to `remote_path`.
    pub fn upload(&self, local_path: &Path, remote_path: &str) -> Result<TransferResult> {
        let local_size = get_path_size(local_path)?;

        let mut cmd = Command::new("scp");
        cmd.arg("-r");
        cmd.args(ssh_options(&self.config, OptionStyle::Scp));
        cmd.arg(local_path);
        cmd.arg(self.remote_spec(remote_path));

        run_checked(cmd, "SCP upload")?;

        Ok(TransferResult {
            bytes_transferred: local_size,
        })
    }

    /// Download a remote file or directory into `local_path`.
    pub fn download(&self, remote_path: &str, local_path: &Path) -> Result<TransferResult> {
        let mut cmd = Command::new("scp");
        cmd.arg("-r");
        cmd.args(ssh_options(&self.config, OptionStyle::Scp));
        cmd.arg(self.remote_spec(remote_path));
        cmd.arg(local_path);

        run_checked(cmd, "SCP download")?;

        Ok(TransferResult {
            bytes_transferred: get_path_size(local_path)?,
        })
    }
}

/// `ssh` takes the port with `-p`, `scp` with `-P`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionStyle {
    Ssh,
    Scp,
}

/// Non-interactive options shared by every ssh/scp invocation.
pub fn ssh_options(config: &SshConfig, style: OptionStyle) -> Vec<String> {
    let mut args = vec![
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=no".to_string(),
        "-o".to_string(),
        format!("ConnectTimeout={}", config.timeout),
    ];

    if let Some(key) = config.expanded_key() {
        args.push("-i".to_string());
        args.push(key.to_string_lossy().to_string());
    }

    args.extend(port_option(config.port, style));
    args
}

/// Port flag for `port`, empty for the default port.
pub fn port_option(port: u16, style: OptionStyle) -> Vec<String> {
    if port == 22 {
        return Vec::new();
    }
    let flag = match style {
        OptionStyle::Ssh => "-p",
        OptionStyle::Scp => "-P",
    };
    vec![flag.to_string(), port.to_string()]
}

/// Runs a local command, turning a non-zero exit into `CommandFailed`.
pub fn run_checked(mut cmd: Command, what: &str) -> Result<String> {
    debug!("{}: {:?}", what, cmd);

    let output = cmd
        .output()
        .map_err(|e| Error::Io(std::io::Error::other(format!("{} failed to start: {}", what, e))))?;

    if !output.status.success() {
        return Err(Error::CommandFailed {
            command: format!("{:?}", cmd),
            exit_code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Get total size of a file or directory tree.
pub fn get_path_size(path: &Path) -> Result<u64> {
    let metadata = std::fs::symlink_metadata(path)?;
    if !metadata.is_dir() {
        return Ok(metadata.len());
    }

    let mut total = 0;
    for entry in std::fs::read_dir(path)? {
        total += get_path_size(&entry?.path())?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_options_default_port() {
        let args = ssh_options(&SshConfig::default(), OptionStyle::Ssh);
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ConnectTimeout=10".to_string()));
        assert!(!args.contains(&"-p".to_string()));
        assert!(!args.contains(&"-i".to_string()));
    }

    #[test]
    fn test_ssh_options_port_flag_differs() {
        let config = SshConfig {
            port: 2222,
            key: Some("/keys/id".to_string()),
            ..SshConfig::default()
        };
        let ssh = ssh_options(&config, OptionStyle::Ssh);
        let scp = ssh_options(&config, OptionStyle::Scp);
        assert!(ssh.windows(2).any(|w| w == ["-p", "2222"]));
        assert!(scp.windows(2).any(|w| w == ["-P", "2222"]));
        assert!(scp.windows(2).any(|w| w == ["-i", "/keys/id"]));
    }

    #[test]
    fn test_get_path_size() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a"), b"hello").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("b"), b"abc").unwrap();

        assert_eq!(get_path_size(dir.path()).unwrap(), 8);
        assert_eq!(get_path_size(&dir.path().join("a")).unwrap(), 5);
    }

    #[test]
    fn test_run_checked_reports_failure() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo nope >&2; exit 3"]);
        match run_checked(cmd, "test") {
            Err(Error::CommandFailed {
                exit_code, stderr, ..
            }) => {
                assert_eq!(exit_code, 3);
                assert_eq!(stderr, "nope");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
