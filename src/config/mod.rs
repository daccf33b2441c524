//! Configuration management for Captain.
//!
//! This module handles loading and saving the session configuration: the two
//! hosts taking part in a migration, transfer preferences, shared storage and
//! benchmark settings.
//!
//! # Configuration File Location
//!
//! The configuration file is stored at:
//! - Linux: `~/.config/captain/config.yml`
//! - macOS: `~/Library/Application Support/captain/config.yml`
//!
//! # Example Configuration
//!
//! ```yaml
//! source:
//!   type: aws
//!   ssh:
//!     user: "ubuntu"
//!     key: "~/.ssh/captain.pem"
//!   aws:
//!     ami: "0abcdef1234567890"
//!     key_pair: "captain"
//!     security_group: "sg-0123456789"
//!   setup:
//!     create: true
//!     environment: true
//! destination:
//!   type: generic
//!   ssh:
//!     user: "root"
//!   generic:
//!     ip: "10.0.0.12"
//! transfer:
//!   archive: tar
//!   direct: true
//! shared_storage:
//!   enabled: true
//!   tmpfs: true
//! benchmark:
//!   iterations: 50
//!   log: "/tmp/stats.csv"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Default SSH port
const DEFAULT_SSH_PORT: u16 = 22;

/// Default SSH connect timeout in seconds
const DEFAULT_TIMEOUT: u64 = 10;

/// Default EC2 instance type
const DEFAULT_INSTANCE_TYPE: &str = "t2.micro";

/// Default directory for checkpoints when no shared storage is used
const DEFAULT_CHECKPOINT_DIR: &str = "/tmp/captain/checkpoints";

/// Default mount point of the shared checkpoint storage
const DEFAULT_MOUNT_POINT: &str = "/mnt/captain";

/// Image used to run `command` workloads
const DEFAULT_BASE_IMAGE: &str = "busybox";

/// Main configuration structure for Captain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host the containers start on
    pub source: HostConfig,

    /// Host the containers are migrated to
    pub destination: HostConfig,

    #[serde(default)]
    pub transfer: TransferConfig,

    #[serde(default)]
    pub shared_storage: SharedStorageConfig,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    #[serde(default)]
    pub benchmark: BenchmarkConfig,
}

/// Backend kind of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostKind {
    /// EC2 instance managed through the `aws` CLI
    Aws,
    /// Already running machine with a fixed address
    Generic,
    /// The machine Captain runs on
    Local,
}

impl std::fmt::Display for HostKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostKind::Aws => write!(f, "aws"),
            HostKind::Generic => write!(f, "generic"),
            HostKind::Local => write!(f, "local"),
        }
    }
}

/// Configuration for one side of the migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(rename = "type")]
    pub kind: HostKind,

    #[serde(default)]
    pub ssh: SshConfig,

    pub aws: Option<AwsConfig>,

    pub generic: Option<GenericConfig>,

    #[serde(default)]
    pub setup: SetupSteps,
}

/// SSH credentials used to reach a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshConfig {
    /// Login user
    #[serde(default = "default_ssh_user")]
    pub user: String,

    /// Path to the private key (optional, agent is used otherwise)
    pub key: Option<String>,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Connect timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

/// EC2 instance parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwsConfig {
    /// AMI id without the `ami-` prefix
    pub ami: Option<String>,

    /// Existing instance to reuse
    pub instance: Option<String>,

    #[serde(default = "default_instance_type")]
    pub instance_type: String,

    /// EC2 key pair name used when creating the instance
    pub key_pair: Option<String>,

    pub security_group: Option<String>,

    pub region: Option<String>,
}

/// Fixed address of a generic host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericConfig {
    pub ip: String,
}

/// Which lifecycle steps run during host setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupSteps {
    #[serde(default)]
    pub create: bool,
    #[serde(default)]
    pub environment: bool,
    #[serde(default = "default_true")]
    pub test: bool,
    #[serde(default)]
    pub destroy: bool,
}

/// Archive format preference for copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchivePreference {
    #[default]
    None,
    Tar,
    Zip,
}

/// How checkpoint files are moved between hosts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferConfig {
    #[serde(default)]
    pub archive: ArchivePreference,

    /// Use tar when zip was requested but cannot be negotiated
    #[serde(default)]
    pub archive_fallback: bool,

    /// Extensions that are sent as-is because they are already compressed
    #[serde(default = "default_compressed_extensions")]
    pub skip_compressed_extensions: Vec<String>,

    /// Allow host-to-host copies without relaying through this machine
    #[serde(default = "default_true")]
    pub direct: bool,

    /// Install SSH keys between the hosts when they cannot reach each other
    #[serde(default)]
    pub inject_keys: bool,

    /// Local directory used for relay copies (system temp dir if unset)
    pub relay_dir: Option<PathBuf>,
}

/// NFS-backed storage shared by both hosts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedStorageConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Allow shared storage between hosts of different backend kinds
    #[serde(default)]
    pub force: bool,

    #[serde(default = "default_mount_point")]
    pub mount_point: String,

    /// Back the exported directory with a RAM filesystem
    #[serde(default)]
    pub tmpfs: bool,

    #[serde(default = "default_tmpfs_size")]
    pub tmpfs_size_mb: u64,
}

/// Checkpoint storage and container image settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_checkpoint_dir")]
    pub dir: String,

    #[serde(default = "default_base_image")]
    pub base_image: String,
}

/// Benchmark loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    #[serde(default = "default_iterations")]
    pub iterations: usize,

    #[serde(default = "default_log_path")]
    pub log: PathBuf,

    /// Pause after a failed iteration
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    #[serde(default = "default_jitter_min")]
    pub jitter_ms_min: u64,

    #[serde(default = "default_jitter_max")]
    pub jitter_ms_max: u64,
}

fn default_true() -> bool {
    true
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT
}

fn default_instance_type() -> String {
    DEFAULT_INSTANCE_TYPE.to_string()
}

fn default_compressed_extensions() -> Vec<String> {
    ["gz", "tgz", "zip", "xz", "bz2", "zst", "7z"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_mount_point() -> String {
    DEFAULT_MOUNT_POINT.to_string()
}

fn default_tmpfs_size() -> u64 {
    2048
}

fn default_checkpoint_dir() -> String {
    DEFAULT_CHECKPOINT_DIR.to_string()
}

fn default_base_image() -> String {
    DEFAULT_BASE_IMAGE.to_string()
}

fn default_iterations() -> usize {
    10
}

fn default_log_path() -> PathBuf {
    PathBuf::from("stats.csv")
}

fn default_backoff_ms() -> u64 {
    5000
}

fn default_jitter_min() -> u64 {
    1000
}

fn default_jitter_max() -> u64 {
    3000
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: default_ssh_user(),
            key: None,
            port: DEFAULT_SSH_PORT,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl Default for SetupSteps {
    fn default() -> Self {
        Self {
            create: false,
            environment: false,
            test: true,
            destroy: false,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            archive: ArchivePreference::None,
            archive_fallback: false,
            skip_compressed_extensions: default_compressed_extensions(),
            direct: true,
            inject_keys: false,
            relay_dir: None,
        }
    }
}

impl Default for SharedStorageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            force: false,
            mount_point: default_mount_point(),
            tmpfs: false,
            tmpfs_size_mb: default_tmpfs_size(),
        }
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: default_checkpoint_dir(),
            base_image: default_base_image(),
        }
    }
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            log: default_log_path(),
            backoff_ms: default_backoff_ms(),
            jitter_ms_min: default_jitter_min(),
            jitter_ms_max: default_jitter_max(),
        }
    }
}

impl Config {
    /// Returns the default configuration file path for the current platform.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("captain").join("config.yml"))
    }

    /// Loads configuration from the given path, or the default location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => match Self::default_path() {
                Some(path) => Self::load_from(&path),
                None => Err(Error::Config(
                    "Could not determine config directory; pass --config <path>".to_string(),
                )),
            },
        }
    }

    /// Loads and validates configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file {}: {}\n\n\
                 Suggestions:\n\
                 • Create one with: captain config init\n\
                 • Check file permissions: ls -la {}",
                path.display(),
                e,
                path.display()
            ))
        })?;

        let config = Self::from_yaml(&contents).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{} (file: {})", msg, path.display())),
            other => other,
        })?;

        Ok(config)
    }

    /// Parses and validates configuration from a YAML string.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(contents).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config: {}\n\n\
                 Suggestions:\n\
                 • Check YAML syntax and indentation (spaces, not tabs)\n\
                 • Host `type` must be one of: aws, generic, local",
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a specific file path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let contents = serde_yaml::to_string(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, contents)?;
        Ok(())
    }

    /// Checks the cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        self.source.validate("source")?;
        self.destination.validate("destination")?;

        if self.benchmark.jitter_ms_min > self.benchmark.jitter_ms_max {
            return Err(Error::Config(format!(
                "benchmark.jitter_ms_min ({}) is larger than jitter_ms_max ({})",
                self.benchmark.jitter_ms_min, self.benchmark.jitter_ms_max
            )));
        }

        if self.shared_storage.tmpfs && self.shared_storage.tmpfs_size_mb == 0 {
            return Err(Error::Config(
                "shared_storage.tmpfs_size_mb must be positive when tmpfs is enabled".to_string(),
            ));
        }

        Ok(())
    }

    /// Example configuration written by `captain config init`.
    pub fn example() -> Self {
        Self {
            source: HostConfig {
                kind: HostKind::Local,
                ssh: SshConfig::default(),
                aws: None,
                generic: None,
                setup: SetupSteps::default(),
            },
            destination: HostConfig {
                kind: HostKind::Generic,
                ssh: SshConfig::default(),
                aws: None,
                generic: Some(GenericConfig {
                    ip: "192.168.1.20".to_string(),
                }),
                setup: SetupSteps::default(),
            },
            transfer: TransferConfig::default(),
            shared_storage: SharedStorageConfig::default(),
            checkpoint: CheckpointConfig::default(),
            benchmark: BenchmarkConfig::default(),
        }
    }
}

impl HostConfig {
    fn validate(&self, role: &str) -> Result<()> {
        match self.kind {
            HostKind::Aws => {
                if self.aws.is_none() {
                    return Err(Error::Config(format!(
                        "{} is of type aws but has no `aws` section",
                        role
                    )));
                }
            }
            HostKind::Generic => match &self.generic {
                Some(generic) if !generic.ip.trim().is_empty() => {}
                _ => {
                    return Err(Error::Config(format!(
                        "No IP address specified for generic host {}",
                        role
                    )))
                }
            },
            HostKind::Local => {
                if self.setup.create || self.setup.destroy {
                    return Err(Error::Config(format!(
                        "{} is the local machine; create/destroy steps are not supported",
                        role
                    )));
                }
            }
        }
        Ok(())
    }
}

impl SshConfig {
    /// Expands the SSH key path, replacing ~ with the home directory.
    pub fn expanded_key(&self) -> Option<PathBuf> {
        self.key.as_deref().map(expand_home)
    }
}

/// Expands a leading `~/` to the current user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
