pub mod local;

pub use local::LocalExecutor;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::errors::ChronodError;
use crate::models::{Job, RunStatus};

/// Outcome of one subprocess execution. `status` is always terminal;
/// `error` is populated iff the status is not `succeeded`.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub status: RunStatus,
    pub output: String,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Capability for running one job attempt to completion. The worker holds
/// one instance; local subprocess execution is the default backend, with
/// test fakes substituting freely.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, job: &Job, cancel: CancellationToken) -> ExecutionResult;
}

/// Check that a command resolves on PATH without running it, so job
/// creation can reject obvious typos up front.
pub fn validate_command(command: &str) -> Result<(), ChronodError> {
    which::which(command).map_err(|e| {
        ChronodError::Validation(format!("command '{}' not found in PATH: {}", command, e))
    })?;
    Ok(())
}

/// Bound output to a preview length for log lines. Storage keeps the full
/// buffer; this is display-only.
pub fn truncate_output(output: &str, max_len: usize) -> String {
    let trimmed = output.trim();
    match trimmed.char_indices().nth(max_len) {
        Some((idx, _)) => format!("{}... (truncated)", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_output_unchanged() {
        assert_eq!(truncate_output("hello\n", 200), "hello");
    }

    #[test]
    fn test_truncate_long_output() {
        let long = "x".repeat(300);
        let out = truncate_output(&long, 200);
        assert!(out.starts_with(&"x".repeat(200)));
        assert!(out.ends_with("... (truncated)"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let s = "é".repeat(10);
        let out = truncate_output(&s, 5);
        assert!(out.starts_with(&"é".repeat(5)));
        assert!(out.ends_with("... (truncated)"));
    }

    #[test]
    fn test_validate_command_known() {
        // `sh` is present on any unix host this runs on.
        #[cfg(unix)]
        assert!(validate_command("sh").is_ok());
    }

    #[test]
    fn test_validate_command_unknown() {
        match validate_command("definitely-not-a-real-binary-1f2e3d") {
            Err(ChronodError::Validation(msg)) => assert!(msg.contains("not found in PATH")),
            other => panic!("Expected Validation, got: {:?}", other),
        }
    }
}
