//! Command execution on migration hosts over `ssh2`.

use crate::config::SshConfig;
use crate::error::{Error, Result};
use crate::remote::retry::{diagnose_ssh_error, retry_with_backoff, RetryConfig};
use log::{debug, trace, warn};
use ssh2::Session;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Output of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecutionResult {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout and stderr joined, for tools that report on either stream.
    pub fn combined(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            (out, "") => out.to_string(),
            ("", err) => err.to_string(),
            (out, err) => format!("{}\n{}", out, err),
        }
    }
}

/// Runs commands on one host over a fresh SSH session per command.
pub struct SSHExecutor {
    host: String,
    config: SshConfig,
    retry_config: RetryConfig,
}

impl SSHExecutor {
    pub fn new(host: impl Into<String>, config: SshConfig) -> Self {
        Self {
            host: host.into(),
            config,
            retry_config: RetryConfig::default(),
        }
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    fn unreachable(&self, reason: impl Into<String>) -> Error {
        Error::UnreachableHost {
            host: self.host.clone(),
            reason: reason.into(),
        }
    }

    /// Opens an authenticated session, retrying transient failures.
    ///
    /// # Errors
    ///
    /// `UnreachableHost` carrying a troubleshooting diagnosis once the
    /// retries run out.
    fn connect(&self) -> Result<Session> {
        let what = format!("ssh {}@{}:{}", self.config.user, self.host, self.config.port);
        retry_with_backoff(&self.retry_config, || self.open_session(), &what)
            .map_err(|e| self.unreachable(diagnose_ssh_error(&e, &self.host, &self.config)))
    }

    fn open_session(&self) -> Result<Session> {
        let target = format!("{}:{}", self.host, self.config.port);
        let addr = target
            .to_socket_addrs()
            .map_err(|e| self.unreachable(format!("cannot resolve {}: {}", target, e)))?
            .next()
            .ok_or_else(|| self.unreachable(format!("{} resolves to no address", target)))?;

        let timeout = Duration::from_secs(self.config.timeout);
        let tcp = TcpStream::connect_timeout(&addr, timeout)?;
        // Only writes are bounded; a checkpoint may keep stdout silent for minutes.
        tcp.set_write_timeout(Some(timeout))?;

        let mut session = Session::new().map_err(|e| Error::Backend(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| self.unreachable(format!("handshake failed: {}", e)))?;
        self.authenticate(&session)?;

        debug!("connected to {}", target);
        Ok(session)
    }

    /// Tries the configured key, then the agent.
    fn authenticate(&self, session: &Session) -> Result<()> {
        let user = &self.config.user;
        let mut tried = Vec::new();

        if let Some(key) = self.config.expanded_key() {
            match session.userauth_pubkey_file(user, None, &key, None) {
                Ok(()) => return Ok(()),
                Err(e) => warn!("{}: key {} rejected: {}", self.host, key.display(), e),
            }
            tried.push(key.display().to_string());
        }

        match session.userauth_agent(user) {
            Ok(()) => return Ok(()),
            Err(e) => warn!("{}: agent authentication failed: {}", self.host, e),
        }
        tried.push("ssh-agent".to_string());

        Err(Error::Backend(format!(
            "authentication failed for {} (tried {})",
            user,
            tried.join(", ")
        )))
    }

    /// Runs `command` and collects its output. A non-zero exit status is
    /// returned in the result, not as an error.
    pub fn execute(&self, command: &str) -> Result<ExecutionResult> {
        debug!("[{}] $ {}", self.host, command);

        let session = self.connect()?;
        let channel_error = |e: ssh2::Error| Error::Backend(format!("{}: {}", self.host, e));

        let mut channel = session.channel_session().map_err(channel_error)?;
        channel.exec(command).map_err(channel_error)?;

        let mut result = ExecutionResult::default();
        channel.read_to_string(&mut result.stdout)?;
        channel.stderr().read_to_string(&mut result.stderr)?;
        channel.wait_close().map_err(channel_error)?;
        result.exit_code = channel.exit_status().map_err(channel_error)?;

        trace!("[{}] exit {}: {:?}", self.host, result.exit_code, result);
        Ok(result)
    }

    /// Connects and authenticates without running anything.
    pub fn test_connection(&self) -> Result<()> {
        let session = self.connect()?;
        if session.authenticated() {
            Ok(())
        } else {
            Err(self.unreachable("session is not authenticated"))
        }
    }
}
