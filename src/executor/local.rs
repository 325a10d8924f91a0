//! Local subprocess execution.
//!
//! The child gets a fresh environment containing exactly the job's `env` —
//! nothing is inherited from the host, so a run is reproducible from its job
//! definition alone. Combined stdout/stderr is captured into a single buffer.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::executor::{ExecutionResult, Executor};
use crate::models::duration::format_go;
use crate::models::{Job, RunStatus};

/// How long a terminated process gets to exit after SIGTERM before it is
/// forcibly killed.
const TERM_GRACE: Duration = Duration::from_secs(5);

pub struct LocalExecutor {
    default_timeout: Option<Duration>,
    preview_len: usize,
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

impl LocalExecutor {
    pub fn new(default_timeout: Option<Duration>, preview_len: usize) -> Self {
        Self {
            default_timeout,
            preview_len,
        }
    }

    /// SIGTERM, bounded grace, then SIGKILL.
    async fn terminate(child: &mut Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }

        if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_err() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    async fn execute(&self, job: &Job, cancel: CancellationToken) -> ExecutionResult {
        let started_at = Utc::now();

        tracing::info!(
            job_id = %job.id,
            job_name = %job.name,
            command = %job.command,
            "starting job execution"
        );

        let mut cmd = Command::new(&job.command);
        cmd.args(&job.args)
            .env_clear()
            .envs(&job.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let finished_at = Utc::now();
                let error = format!("failed to start command '{}': {}", job.command, e);
                tracing::error!(job_id = %job.id, "{}", error);
                return ExecutionResult {
                    status: RunStatus::Failed,
                    output: String::new(),
                    error: Some(error),
                    started_at,
                    finished_at,
                };
            }
        };

        // Drain both streams into one combined buffer while the process runs.
        let buffer: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(drain(stdout, Arc::clone(&buffer))));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(drain(stderr, Arc::clone(&buffer))));
        }

        let effective_timeout = job.timeout.or(self.default_timeout);
        let timeout_fut = async {
            match effective_timeout {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(timeout_fut);

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = &mut timeout_fut => Outcome::TimedOut,
            _ = cancel.cancelled() => Outcome::Cancelled,
        };

        if !matches!(outcome, Outcome::Exited(_)) {
            Self::terminate(&mut child).await;
        }
        for reader in readers {
            let _ = reader.await;
        }

        let finished_at = Utc::now();
        let output = {
            let buf = buffer.lock().unwrap_or_else(|e| e.into_inner());
            String::from_utf8_lossy(&buf).into_owned()
        };

        let (status, error) = match outcome {
            Outcome::TimedOut => {
                let human = effective_timeout.map(format_go).unwrap_or_default();
                (
                    RunStatus::TimedOut,
                    Some(format!("job timed out after {}", human)),
                )
            }
            Outcome::Cancelled => (RunStatus::Cancelled, Some("job was cancelled".to_string())),
            Outcome::Exited(Ok(exit)) if exit.success() => (RunStatus::Succeeded, None),
            Outcome::Exited(Ok(exit)) => {
                let reason = match exit.code() {
                    Some(code) => format!("command failed: exit status {}", code),
                    None => "command failed: terminated by signal".to_string(),
                };
                (RunStatus::Failed, Some(reason))
            }
            Outcome::Exited(Err(e)) => (
                RunStatus::Failed,
                Some(format!("command failed: {}", e)),
            ),
        };

        tracing::info!(
            job_id = %job.id,
            job_name = %job.name,
            status = %status,
            output_preview = %super::truncate_output(&output, self.preview_len),
            "job execution completed"
        );

        ExecutionResult {
            status,
            output,
            error,
            started_at,
            finished_at,
        }
    }
}

async fn drain(mut reader: impl AsyncRead + Unpin + Send, buffer: Arc<Mutex<Vec<u8>>>) {
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let mut buf = buffer.lock().unwrap_or_else(|e| e.into_inner());
                buf.extend_from_slice(&chunk[..n]);
            }
            Err(_) => break,
        }
    }
}
