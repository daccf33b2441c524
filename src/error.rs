use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptainError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Host '{host}' is unreachable: {reason}")]
    UnreachableHost { host: String, reason: String },

    #[error("Missing requirement on '{host}': {requirement}")]
    MissingRequirement { host: String, requirement: String },

    #[error("Command failed with exit code {exit_code}: {command}\n{stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Copy failed: {0}")]
    CopyFailed(String),

    #[error("Container '{0}' is not running")]
    ContainerNotRunning(String),

    #[error("Source and destination resolve to the same address: {0}")]
    SameHost(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Benchmark aborted after {consecutive} consecutive failures ({succeeded} iterations succeeded)")]
    BenchmarkAborted { consecutive: u32, succeeded: usize },

    #[error("Benchmark failed: {0}")]
    BenchmarkFailed(String),
}

pub type Error = CaptainError;
pub type Result<T> = std::result::Result<T, Error>;
