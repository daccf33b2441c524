//! Diagnostic utilities for checkpoint and restore failures.
//!
//! Docker and CRIU report failures in a handful of recognisable ways. This
//! module turns the raw output of a failed checkpoint or restore into a
//! message with concrete suggestions, logged by the orchestrator.

use crate::remote::executor::ExecutionResult;

/// Migration phase a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Checkpoint,
    Restore,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Checkpoint => write!(f, "checkpoint"),
            Phase::Restore => write!(f, "restore"),
        }
    }
}

/// Returns true when tool output reports an error, regardless of exit code.
///
/// `docker start --checkpoint` may exit 0 while CRIU logged a failure, so the
/// output is searched case-insensitively for "error".
pub fn output_reports_error(output: &str) -> bool {
    output.to_lowercase().contains("error")
}

/// Analyzes a failed migration phase and provides helpful diagnostics.
pub fn diagnose_migration_failure(
    phase: Phase,
    result: &ExecutionResult,
    command: &str,
    host: &str,
) -> String {
    let combined = result.combined().to_lowercase();

    let mut suggestions = Vec::new();

    if combined.contains("command not found") || result.exit_code == 127 {
        suggestions.push(format!(
            "• `{}` is not installed or not in PATH on {}",
            extract_command_name(command),
            host
        ));
    } else if combined.contains("experimental") || combined.contains("checkpoint is only supported")
    {
        suggestions.push("• Docker checkpoints need the experimental daemon flag".to_string());
        suggestions.push(format!(
            "• Add {{\"experimental\": true}} to /etc/docker/daemon.json on {} and restart docker",
            host
        ));
    } else if combined.contains("permission denied") || combined.contains("operation not permitted")
    {
        suggestions.push("• CRIU needs root privileges".to_string());
        suggestions.push(format!(
            "• Log in as root or allow passwordless sudo on {}",
            host
        ));
    } else if combined.contains("cpu") || combined.contains("cpuinfo") {
        suggestions.push("• The checkpoint was taken on an incompatible CPU".to_string());
        suggestions.push("• Migrate between hosts with the same CPU vendor, family and model".to_string());
    } else if combined.contains("no such container") {
        suggestions.push(format!("• The container does not exist on {}", host));
        suggestions.push("• Re-run the benchmark so the containers are recreated".to_string());
    } else if combined.contains("no such file") || combined.contains("checkpoint") {
        suggestions.push("• The checkpoint files are missing or incomplete".to_string());
        if phase == Phase::Restore {
            suggestions.push(
                "• Check that the copy reached the destination checkpoint directory".to_string(),
            );
        }
    }

    if suggestions.is_empty() {
        suggestions.push(format!("• Test the command manually: ssh {} '{}'", host, command));
    }

    let mut error_msg = format!("Migration {} failed on {}\n", phase, host);
    error_msg.push_str(&format!("Command: {}\n", command));
    error_msg.push_str(&format!("Exit code: {}\n\n", result.exit_code));

    let output = result.combined();
    if !output.is_empty() {
        error_msg.push_str("Output:\n");
        error_msg.push_str(&indent_text(&output, 2));
        error_msg.push_str("\n\n");
    }

    error_msg.push_str("Troubleshooting suggestions:\n");
    error_msg.push_str(&suggestions.join("\n"));

    error_msg
}

/// Extracts the program name, skipping a leading `sudo`.
fn extract_command_name(command: &str) -> &str {
    let mut words = command.split_whitespace();
    match words.next() {
        Some("sudo") => words.find(|w| !w.starts_with('-')).unwrap_or("sudo"),
        Some(first) => first,
        None => command,
    }
}

fn indent_text(text: &str, spaces: usize) -> String {
    let indent = " ".repeat(spaces);
    text.lines()
        .map(|line| format!("{}{}", indent, line))
        .collect::<Vec<_>>()
        .join("\n")
}
