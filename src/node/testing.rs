//! Scripted `RemoteNode` for exercising the migration core without hosts.
//!
//! Commands are answered from substring rules (the most recently added
//! matching rule wins). Unmatched `echo` commands echo their argument and
//! everything else succeeds with empty output. Every call is recorded.
//!
//! Clones share their call log and reachability switches, so a test can keep
//! one handle while a session owns another.

use crate::capability::probe::{PROBE_BEGIN, PROBE_END};
use crate::config::HostKind;
use crate::error::{Error, Result};
use crate::node::{HostBackend, Peer, RemoteNode};
use crate::remote::{ExecutionResult, TransferResult};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A call made against a [`ScriptedNode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Run(String),
    Peer { peer: String, port: u16, command: String },
    Send { local: PathBuf, remote: String },
    Retrieve { remote: String, local: PathBuf },
    SendToPeer {
        peer: String,
        port: u16,
        remote: String,
        peer_path: String,
    },
    Lifecycle(&'static str),
}

impl Call {
    pub fn is_transfer(&self) -> bool {
        matches!(
            self,
            Call::Send { .. } | Call::Retrieve { .. } | Call::SendToPeer { .. }
        )
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Output(ExecutionResult),
    Drop(String),
}

#[derive(Clone)]
pub struct ScriptedNode {
    name: String,
    kind: HostKind,
    public_address: String,
    private_address: String,
    user: String,
    port: u16,
    facts: Vec<(String, String)>,
    rules: Vec<(String, Reply)>,
    failing_steps: Vec<&'static str>,
    fail_send: bool,
    fail_retrieve: bool,
    fail_peer_send: bool,
    reachable: Arc<AtomicBool>,
    peer_reachable: Arc<AtomicBool>,
    calls: Arc<Mutex<Vec<Call>>>,
}

/// Facts reported by a host that satisfies every requirement.
pub fn healthy_facts() -> Vec<(String, String)> {
    [
        ("USER", "root"),
        ("SUDO", "yes"),
        ("OS", "Linux"),
        ("KERNEL", "5.15.0-1051-aws"),
        ("CPU_VENDOR", "GenuineIntel"),
        ("CPU_FAMILY", "6"),
        ("CPU_MODEL", "85"),
        ("DOCKER", "/usr/bin/docker"),
        ("CRIU", "/usr/sbin/criu"),
        ("TAR", "/bin/tar"),
        ("ZIP", "/usr/bin/zip"),
        ("UNZIP", "/usr/bin/unzip"),
        ("NFS_SERVER", "/usr/sbin/exportfs"),
        ("NFS_CLIENT", "/sbin/mount.nfs"),
        ("TMPFS", "yes"),
        ("MEM_TOTAL_MB", "3936"),
        ("MEM_FREE_MB", "2210"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl ScriptedNode {
    pub fn new(name: &str, address: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: HostKind::Generic,
            public_address: address.to_string(),
            private_address: address.to_string(),
            user: "root".to_string(),
            port: 22,
            facts: Vec::new(),
            rules: Vec::new(),
            failing_steps: Vec::new(),
            fail_send: false,
            fail_retrieve: false,
            fail_peer_send: false,
            reachable: Arc::new(AtomicBool::new(true)),
            peer_reachable: Arc::new(AtomicBool::new(true)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A node whose probe reports every requirement present and whose
    /// containers are running.
    pub fn healthy(name: &str, address: &str) -> Self {
        let mut node = Self::new(name, address);
        node.facts = healthy_facts();
        node.respond("State.Running", "true")
    }

    pub fn with_kind(mut self, kind: HostKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_private_address(mut self, address: &str) -> Self {
        self.private_address = address.to_string();
        self
    }

    /// Overrides (or adds) one probe fact; an empty value means "absent".
    pub fn with_fact(mut self, key: &str, value: &str) -> Self {
        self.facts.retain(|(k, _)| k != key);
        self.facts.push((key.to_string(), value.to_string()));
        self
    }

    /// Answers commands containing `pattern` with `stdout`.
    pub fn respond(self, pattern: &str, stdout: &str) -> Self {
        self.respond_with(pattern, ExecutionResult::ok(stdout))
    }

    pub fn respond_with(mut self, pattern: &str, result: ExecutionResult) -> Self {
        self.rules.push((pattern.to_string(), Reply::Output(result)));
        self
    }

    /// Makes commands containing `pattern` fail as if the host dropped.
    pub fn fail_on(mut self, pattern: &str) -> Self {
        self.rules.push((
            pattern.to_string(),
            Reply::Drop(format!("scripted failure on `{}`", pattern)),
        ));
        self
    }

    /// Makes a lifecycle step ("create", "start", ...) fail.
    pub fn failing_step(mut self, step: &'static str) -> Self {
        self.failing_steps.push(step);
        self
    }

    pub fn unreachable(self) -> Self {
        self.reachable.store(false, Ordering::SeqCst);
        self
    }

    pub fn without_peer_access(self) -> Self {
        self.set_peer_reachable(false);
        self
    }

    pub fn failing_send(mut self) -> Self {
        self.fail_send = true;
        self
    }

    pub fn failing_retrieve(mut self) -> Self {
        self.fail_retrieve = true;
        self
    }

    pub fn failing_peer_send(mut self) -> Self {
        self.fail_peer_send = true;
        self
    }

    /// Opens or closes this node's ssh access to its peer, for every clone.
    pub fn set_peer_reachable(&self, reachable: bool) {
        self.peer_reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Commands run directly on this node, in order.
    pub fn commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Run(cmd) => Some(cmd),
                _ => None,
            })
            .collect()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.commands().iter().any(|c| c.contains(pattern))
    }

    /// How many commands containing `pattern` ran.
    pub fn count(&self, pattern: &str) -> usize {
        self.commands().iter().filter(|c| c.contains(pattern)).count()
    }

    pub fn transfer_count(&self) -> usize {
        self.calls().iter().filter(|c| c.is_transfer()).count()
    }

    pub fn lifecycle(&self) -> Vec<&'static str> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Lifecycle(step) => Some(step),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    fn record(&self, call: Call) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn is_up(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    fn dropped(&self, reason: &str) -> Error {
        Error::UnreachableHost {
            host: self.name.clone(),
            reason: reason.to_string(),
        }
    }

    fn probe_output(&self) -> String {
        let mut out = vec![PROBE_BEGIN.to_string()];
        out.extend(self.facts.iter().map(|(k, v)| format!("{}={}", k, v)));
        out.push(PROBE_END.to_string());
        out.join("\n")
    }

    fn answer(&self, command: &str) -> Result<ExecutionResult> {
        for (pattern, reply) in self.rules.iter().rev() {
            if command.contains(pattern.as_str()) {
                return match reply {
                    Reply::Output(r) => Ok(r.clone()),
                    Reply::Drop(reason) => Err(self.dropped(reason)),
                };
            }
        }

        if !self.facts.is_empty() && command.contains(PROBE_BEGIN) {
            return Ok(ExecutionResult::ok(self.probe_output()));
        }

        if let Some(rest) = command.strip_prefix("echo ") {
            return Ok(ExecutionResult::ok(format!("{}\n", rest.trim())));
        }

        Ok(ExecutionResult::ok(""))
    }

    fn step(&self, step: &'static str) -> Result<()> {
        self.record(Call::Lifecycle(step));
        if self.failing_steps.contains(&step) {
            return Err(Error::Backend(format!("scripted {} failure on {}", step, self.name)));
        }
        Ok(())
    }
}

impl RemoteNode for ScriptedNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> HostKind {
        self.kind
    }

    fn run(&self, command: &str) -> Result<ExecutionResult> {
        self.record(Call::Run(command.to_string()));
        if !self.is_up() {
            return Err(self.dropped("scripted host is down"));
        }
        self.answer(command)
    }

    fn execute_on_peer(&self, peer: &Peer, command: &str) -> Result<String> {
        self.record(Call::Peer {
            peer: peer.login.clone(),
            port: peer.port,
            command: command.to_string(),
        });
        if !self.is_up() {
            return Err(self.dropped("scripted host is down"));
        }
        if !self.peer_reachable.load(Ordering::SeqCst) {
            return Err(Error::CommandFailed {
                command: command.to_string(),
                exit_code: 255,
                stderr: format!(
                    "ssh: connect to host {} port {}: Connection refused",
                    peer.login, peer.port
                ),
            });
        }
        Ok(self.answer(command)?.stdout.trim().to_string())
    }

    fn send_file(&self, local_path: &Path, remote_path: &str) -> Result<TransferResult> {
        self.record(Call::Send {
            local: local_path.to_path_buf(),
            remote: remote_path.to_string(),
        });
        if self.fail_send || !self.is_up() {
            return Err(Error::Io(std::io::Error::other("scripted send failure")));
        }
        let bytes = std::fs::metadata(local_path).map(|m| m.len()).unwrap_or(0);
        Ok(TransferResult {
            bytes_transferred: bytes,
        })
    }

    fn retrieve_file(&self, remote_path: &str, local_path: &Path) -> Result<TransferResult> {
        self.record(Call::Retrieve {
            remote: remote_path.to_string(),
            local: local_path.to_path_buf(),
        });
        // Leave a partial artifact behind so cleanup is observable.
        std::fs::write(local_path, b"checkpoint-data")?;
        if self.fail_retrieve || !self.is_up() {
            return Err(Error::Io(std::io::Error::other("scripted retrieve failure")));
        }
        Ok(TransferResult {
            bytes_transferred: 15,
        })
    }

    fn send_file_to_peer(
        &self,
        peer: &Peer,
        remote_path: &str,
        peer_path: &str,
    ) -> Result<TransferResult> {
        self.record(Call::SendToPeer {
            peer: peer.login.clone(),
            port: peer.port,
            remote: remote_path.to_string(),
            peer_path: peer_path.to_string(),
        });
        if self.fail_peer_send || !self.is_up() || !self.peer_reachable.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::other("scripted peer send failure")));
        }
        Ok(TransferResult::default())
    }

    fn is_reachable(&self) -> bool {
        self.is_up()
    }

    fn public_address(&self) -> String {
        self.public_address.clone()
    }

    fn private_address(&self) -> String {
        self.private_address.clone()
    }

    fn user(&self) -> String {
        self.user.clone()
    }

    fn port(&self) -> u16 {
        self.port
    }
}

impl HostBackend for ScriptedNode {
    fn create(&mut self) -> Result<()> {
        self.step("create")
    }

    fn start(&mut self) -> Result<()> {
        self.step("start")
    }

    fn prepare(&mut self) -> Result<()> {
        self.step("prepare")
    }

    fn test(&mut self) -> Result<()> {
        self.step("test")
    }

    fn destroy(&mut self) -> Result<()> {
        self.step("destroy")
    }

    fn as_node(&self) -> &dyn RemoteNode {
        self
    }
}
