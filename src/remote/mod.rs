//! Remote execution infrastructure.
//!
//! SSH command execution (via `ssh2`), SCP transfers, retry with backoff and
//! failure diagnostics. Host backends in [`crate::node`] are built on top of
//! these pieces.

pub mod diagnostics;
pub mod executor;
pub mod retry;
pub mod transfer;

pub use diagnostics::{diagnose_migration_failure, output_reports_error, Phase};
pub use executor::{ExecutionResult, SSHExecutor};
pub use retry::{diagnose_ssh_error, retry_with_backoff, RetryConfig};
pub use transfer::{SCPTransfer, TransferResult};
