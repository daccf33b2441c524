//! Host capability probing.
//!
//! A trivial ping first tells unreachable hosts apart from broken ones. All
//! remaining facts are gathered by one probe script whose output is
//! `KEY=VALUE` lines between two marker lines, so shell banners or MOTD text
//! around it do not matter.

use std::collections::HashMap;

use log::{debug, info};

use crate::capability::{
    ArchivingSupport, Capabilities, CpuIdentity, MemoryInfo, SharedFsSupport,
};
use crate::config::HostKind;
use crate::error::{Error, Result};
use crate::node::RemoteNode;

pub const PING_TOKEN: &str = "captain-ping";

pub const PROBE_BEGIN: &str = "CAPTAIN_PROBE_BEGIN";
pub const PROBE_END: &str = "CAPTAIN_PROBE_END";

/// Read-only probe script; every line prints one fact.
const PROBE_SCRIPT: &str = r#"echo CAPTAIN_PROBE_BEGIN
echo "USER=$(whoami)"
echo "SUDO=$(sudo -n true 2>/dev/null && echo yes || echo no)"
echo "OS=$(uname -s)"
echo "KERNEL=$(uname -r)"
echo "CPU_VENDOR=$(grep -m1 -E '^(vendor_id|CPU implementer)' /proc/cpuinfo | cut -d: -f2 | tr -d ' ')"
echo "CPU_FAMILY=$(grep -m1 -E '^(cpu family|CPU architecture)' /proc/cpuinfo | cut -d: -f2 | tr -d ' ')"
echo "CPU_MODEL=$(grep -m1 -E '^(model|CPU part)[[:space:]]*:' /proc/cpuinfo | cut -d: -f2 | tr -d ' ')"
echo "DOCKER=$(command -v docker)"
echo "CRIU=$(command -v criu || ls /usr/sbin/criu /sbin/criu 2>/dev/null | head -n1)"
echo "TAR=$(command -v tar)"
echo "ZIP=$(command -v zip)"
echo "UNZIP=$(command -v unzip)"
echo "NFS_SERVER=$(command -v exportfs || ls /usr/sbin/exportfs /sbin/exportfs 2>/dev/null | head -n1)"
echo "NFS_CLIENT=$(command -v mount.nfs || ls /sbin/mount.nfs /usr/sbin/mount.nfs 2>/dev/null | head -n1)"
echo "TMPFS=$(grep -qw tmpfs /proc/filesystems && echo yes || echo no)"
echo "MEM_TOTAL_MB=$(awk '/^MemTotal:/ {print int($2/1024)}' /proc/meminfo)"
echo "MEM_FREE_MB=$(awk '/^MemAvailable:/ {print int($2/1024)}' /proc/meminfo)"
echo CAPTAIN_PROBE_END"#;

/// True if some output line, trimmed, equals `token`.
pub fn has_marker_line(output: &str, token: &str) -> bool {
    output.lines().any(|line| line.trim() == token)
}

/// Probes one host.
///
/// # Errors
///
/// - `UnreachableHost` if the host cannot run a trivial command
/// - `MissingRequirement` if docker or criu is absent, or the login is
///   neither root nor allowed passwordless sudo
pub fn probe(node: &dyn RemoteNode) -> Result<Capabilities> {
    debug!("Probing {} ({})", node.name(), node.public_address());

    let ping = node
        .execute(&format!("echo {}", PING_TOKEN))
        .map_err(|e| Error::UnreachableHost {
            host: node.name().to_string(),
            reason: e.to_string(),
        })?;
    if !has_marker_line(&ping, PING_TOKEN) {
        return Err(Error::UnreachableHost {
            host: node.name().to_string(),
            reason: format!("unexpected reply to ping: {:?}", ping),
        });
    }

    let output = node.execute(PROBE_SCRIPT)?;
    let facts = parse_probe_output(node.name(), &output)?;
    let capabilities = capabilities_from_facts(node.name(), node.kind(), &facts)?;

    info!(
        "{}: {} {}, {}, {} MB free of {} MB",
        node.name(),
        capabilities.os,
        capabilities.kernel,
        capabilities.cpu,
        capabilities.ram.free_mb,
        capabilities.ram.total_mb
    );
    Ok(capabilities)
}

/// Probes both hosts concurrently; they are independent remote calls.
pub fn probe_pair(
    source: &dyn RemoteNode,
    destination: &dyn RemoteNode,
) -> (Result<Capabilities>, Result<Capabilities>) {
    rayon::join(|| probe(source), || probe(destination))
}

/// Extracts the `KEY=VALUE` block between the probe markers.
pub fn parse_probe_output(host: &str, output: &str) -> Result<HashMap<String, String>> {
    let mut facts = HashMap::new();
    let mut inside = false;
    let mut complete = false;

    for line in output.lines().map(str::trim) {
        if line == PROBE_BEGIN {
            inside = true;
            facts.clear();
            continue;
        }
        if line == PROBE_END {
            complete = inside;
            break;
        }
        if inside {
            if let Some((key, value)) = line.split_once('=') {
                facts.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
    }

    if !complete {
        return Err(Error::Backend(format!(
            "incomplete capability probe output from {}",
            host
        )));
    }
    Ok(facts)
}

fn capabilities_from_facts(
    host: &str,
    kind: HostKind,
    facts: &HashMap<String, String>,
) -> Result<Capabilities> {
    let fact = |key: &str| facts.get(key).map(String::as_str).unwrap_or("");
    let present = |key: &str| !fact(key).is_empty();
    let number = |key: &str| fact(key).parse::<u64>().unwrap_or(0);
    let missing = |requirement: &str| Error::MissingRequirement {
        host: host.to_string(),
        requirement: requirement.to_string(),
    };

    let root = fact("USER") == "root";
    let sudo = fact("SUDO") == "yes";
    if !root && !sudo {
        return Err(missing("root login or passwordless sudo"));
    }
    if !present("DOCKER") {
        return Err(missing("container engine (docker)"));
    }
    if !present("CRIU") {
        return Err(missing("checkpoint tool (criu)"));
    }

    Ok(Capabilities {
        host: host.to_string(),
        kind,
        os: fact("OS").to_string(),
        kernel: fact("KERNEL").to_string(),
        root,
        sudo,
        container_engine: true,
        checkpoint_tool: true,
        archiving: ArchivingSupport {
            tar: present("TAR"),
            zip: present("ZIP") && present("UNZIP"),
        },
        shared_fs: SharedFsSupport {
            server: present("NFS_SERVER"),
            client: present("NFS_CLIENT"),
        },
        tmpfs: fact("TMPFS") == "yes",
        cpu: CpuIdentity {
            vendor: fact("CPU_VENDOR").to_string(),
            family: fact("CPU_FAMILY").to_string(),
            model: fact("CPU_MODEL").to_string(),
        },
        ram: MemoryInfo {
            free_mb: number("MEM_FREE_MB"),
            total_mb: number("MEM_TOTAL_MB"),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::testing::ScriptedNode;

    #[test]
    fn test_probe_healthy_host() {
        let node = ScriptedNode::healthy("source", "10.0.0.1");
        let caps = probe(&node).unwrap();

        assert!(caps.root);
        assert!(caps.container_engine && caps.checkpoint_tool);
        assert_eq!(caps.archiving, ArchivingSupport { tar: true, zip: true });
        assert!(caps.shared_fs.server && caps.shared_fs.client);
        assert!(caps.tmpfs);
        assert_eq!(caps.cpu.vendor, "GenuineIntel");
        assert_eq!(caps.ram.total_mb, 3936);
        assert_eq!(caps.sudo_prefix(), "");
    }

    #[test]
    fn test_probe_missing_checkpoint_tool_fails() {
        let node = ScriptedNode::healthy("source", "10.0.0.1").with_fact("CRIU", "");
        match probe(&node) {
            Err(Error::MissingRequirement { requirement, .. }) => {
                assert!(requirement.contains("criu"))
            }
            other => panic!("expected MissingRequirement, got {:?}", other),
        }
    }

    #[test]
    fn test_probe_missing_container_engine_fails() {
        let node = ScriptedNode::healthy("destination", "10.0.0.2").with_fact("DOCKER", "");
        assert!(matches!(
            probe(&node),
            Err(Error::MissingRequirement { .. })
        ));
    }

    #[test]
    fn test_probe_unprivileged_fails_fast() {
        let node = ScriptedNode::healthy("source", "10.0.0.1")
            .with_fact("USER", "ubuntu")
            .with_fact("SUDO", "no");
        let err = probe(&node).unwrap_err();
        assert!(err.to_string().contains("sudo"));
        // nothing ran after the probe script
        assert_eq!(node.commands().len(), 2);
    }

    #[test]
    fn test_probe_sudo_user() {
        let node = ScriptedNode::healthy("source", "10.0.0.1").with_fact("USER", "ubuntu");
        let caps = probe(&node).unwrap();
        assert!(!caps.root);
        assert!(caps.sudo);
        assert_eq!(caps.sudo_prefix(), "sudo -n ");
    }

    #[test]
    fn test_zip_needs_unzip() {
        let node = ScriptedNode::healthy("source", "10.0.0.1").with_fact("UNZIP", "");
        let caps = probe(&node).unwrap();
        assert!(!caps.archiving.zip);
        assert!(caps.archiving.tar);
    }

    #[test]
    fn test_probe_unreachable_host() {
        let node = ScriptedNode::healthy("source", "10.0.0.1").unreachable();
        assert!(matches!(
            probe(&node),
            Err(Error::UnreachableHost { .. })
        ));
    }

    #[test]
    fn test_ping_tolerates_banner() {
        let node = ScriptedNode::healthy("source", "10.0.0.1").respond(
            PING_TOKEN,
            "Welcome to Ubuntu 22.04 LTS\n * Documentation: https://help.ubuntu.com\ncaptain-ping\n",
        );
        assert!(probe(&node).is_ok());
    }

    #[test]
    fn test_ping_rejects_wrong_reply() {
        let node = ScriptedNode::healthy("source", "10.0.0.1").respond(PING_TOKEN, "captain-pingx");
        assert!(matches!(
            probe(&node),
            Err(Error::UnreachableHost { .. })
        ));
    }

    #[test]
    fn test_parse_probe_output_ignores_noise() {
        let output = "motd line\nCAPTAIN_PROBE_BEGIN\nUSER=root\nnot a fact\nOS=Linux\nCAPTAIN_PROBE_END\ntrailing";
        let facts = parse_probe_output("h", output).unwrap();
        assert_eq!(facts.get("USER").map(String::as_str), Some("root"));
        assert_eq!(facts.len(), 2);
    }

    #[test]
    fn test_parse_probe_output_requires_end_marker() {
        assert!(parse_probe_output("h", "CAPTAIN_PROBE_BEGIN\nUSER=root").is_err());
    }

    #[test]
    fn test_probe_pair_runs_both() {
        let a = ScriptedNode::healthy("source", "10.0.0.1");
        let b = ScriptedNode::healthy("destination", "10.0.0.2").with_fact("DOCKER", "");
        let (ra, rb) = probe_pair(&a, &b);
        assert!(ra.is_ok());
        assert!(rb.is_err());
    }
}
