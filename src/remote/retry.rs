//! Retrying SSH connects with exponential backoff.
//!
//! A cloud instance that has just reached `running` often refuses SSH for a
//! while longer, so connection attempts go through [`retry_with_backoff`].
//! Only connection-level errors are retried; a missing tool or a failing
//! command comes back immediately.

use crate::config::{HostKind, SshConfig};
use crate::error::{Error, Result};
use log::{debug, warn};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Attempts after the first one
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            ..Self::default()
        }
    }

    /// Cloud instances get more patience than hosts that are always up.
    pub fn for_host(kind: HostKind) -> Self {
        match kind {
            HostKind::Aws => Self {
                max_retries: 6,
                initial_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(30),
            },
            HostKind::Generic | HostKind::Local => Self::default(),
        }
    }

    /// A single attempt.
    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before retry number `retry` (1-based): doubles each time, capped.
    fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Errors worth another connection attempt.
pub fn is_transient(error: &Error) -> bool {
    matches!(error, Error::Io(_) | Error::UnreachableHost { .. })
}

/// Runs `operation` until it succeeds, fails permanently, or the retries in
/// `config` run out. The last error is returned.
pub fn retry_with_backoff<T, F>(config: &RetryConfig, mut operation: F, what: &str) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut retry = 0;
    loop {
        match operation() {
            Ok(value) => {
                if retry > 0 {
                    debug!("{} succeeded after {} retries", what, retry);
                }
                return Ok(value);
            }
            Err(e) if retry < config.max_retries && is_transient(&e) => {
                retry += 1;
                let delay = config.delay(retry);
                warn!(
                    "{} failed ({}); retry {}/{} in {:?}",
                    what, e, retry, config.max_retries, delay
                );
                thread::sleep(delay);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Explains an SSH connection failure to `address` with suggestions.
pub fn diagnose_ssh_error(error: &Error, address: &str, ssh: &SshConfig) -> String {
    let text = error.to_string().to_lowercase();
    let mut suggestions = Vec::new();

    if ["connection refused", "timed out", "timeout", "no route to host"]
        .iter()
        .any(|s| text.contains(s))
    {
        suggestions.push(format!(
            "• Check that sshd listens on {}:{} (try: ssh -p {} {}@{})",
            address, ssh.port, ssh.port, ssh.user, address
        ));
        suggestions.push(
            "• A freshly started cloud instance may need a minute before SSH answers".to_string(),
        );
        suggestions.push("• Check that the security group allows inbound SSH".to_string());
    }

    if ["authentication", "permission denied", "publickey"]
        .iter()
        .any(|s| text.contains(s))
    {
        match &ssh.key {
            Some(key) => {
                suggestions.push(format!("• Check that {} exists and is chmod 600", key));
                suggestions.push(format!(
                    "• Check that its public key is in ~{}/.ssh/authorized_keys on {}",
                    ssh.user, address
                ));
            }
            None => {
                suggestions.push("• Set `ssh.key` for this host in the configuration".to_string());
                suggestions.push("• Or load the key into your agent (ssh-add -l)".to_string());
            }
        }
    }

    if text.contains("host key") || text.contains("known_hosts") {
        suggestions.push(format!(
            "• Refresh the host key: ssh-keyscan -p {} {} >> ~/.ssh/known_hosts",
            ssh.port, address
        ));
    }

    if suggestions.is_empty() {
        suggestions.push(format!(
            "• Try the connection by hand: ssh -p {} {}@{}",
            ssh.port, ssh.user, address
        ));
    }

    format!(
        "SSH connection failed: {}\n\nTroubleshooting suggestions:\n{}",
        error,
        suggestions.join("\n")
    )
}
