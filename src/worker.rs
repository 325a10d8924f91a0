//! The worker loop: claims pending runs, executes them through the
//! [`Executor`], records outcomes, and schedules retries.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::errors::ChronodError;
use crate::executor::Executor;
use crate::models::{Job, Run, RunStatus};
use crate::store::{JobStore, RunStore};

#[derive(Clone)]
pub struct Worker {
    id: String,
    job_store: Arc<dyn JobStore>,
    run_store: Arc<dyn RunStore>,
    executor: Arc<dyn Executor>,
    poll_interval: Duration,
    max_concurrent: usize,
    retry_enabled: bool,
    shutdown_grace: Duration,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        job_store: Arc<dyn JobStore>,
        run_store: Arc<dyn RunStore>,
        executor: Arc<dyn Executor>,
        poll_interval: Duration,
        max_concurrent: usize,
    ) -> Self {
        Self {
            id: id.into(),
            job_store,
            run_store,
            executor,
            poll_interval,
            max_concurrent: max_concurrent.max(1),
            retry_enabled: true,
            shutdown_grace: Duration::from_secs(30),
        }
    }

    /// An identity string for claim diagnostics: stable per process.
    pub fn default_id() -> String {
        match std::env::var("HOSTNAME") {
            Ok(host) if !host.is_empty() => {
                format!("worker-{}-{}", host, std::process::id())
            }
            _ => format!("worker-{}", std::process::id()),
        }
    }

    pub fn set_retry_enabled(&mut self, enabled: bool) {
        self.retry_enabled = enabled;
    }

    pub fn set_shutdown_grace(&mut self, grace: Duration) {
        self.shutdown_grace = grace;
    }

    /// Main worker loop. Claims up to the available concurrency budget each
    /// tick and spawns one execution task per claimed run. On cancellation
    /// it stops claiming, cancels in-flight executions, and waits a bounded
    /// grace period for them to finalize.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ChronodError> {
        tracing::info!(
            worker_id = %self.id,
            poll_interval = ?self.poll_interval,
            max_concurrent = self.max_concurrent,
            "starting worker"
        );

        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    while in_flight.try_join_next().is_some() {}

                    let available = self.max_concurrent.saturating_sub(in_flight.len());
                    if available == 0 {
                        continue;
                    }

                    let claimed = match self.run_store.claim(available as i64, &self.id).await {
                        Ok(runs) => runs,
                        Err(e) => {
                            tracing::error!(error = %e, "failed to claim runs");
                            continue;
                        }
                    };
                    if claimed.is_empty() {
                        tracing::debug!("no scheduled runs found");
                        continue;
                    }

                    tracing::info!(count = claimed.len(), "claimed runs");
                    for run in claimed {
                        let worker = self.clone();
                        let run_cancel = cancel.child_token();
                        in_flight.spawn(async move {
                            worker.execute_run(run, run_cancel).await;
                        });
                    }
                }
            }
        }

        tracing::info!(worker_id = %self.id, "worker stopping; draining in-flight runs");
        let drain = async {
            while in_flight.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.shutdown_grace, drain).await.is_err() {
            tracing::warn!(
                grace = ?self.shutdown_grace,
                "in-flight runs did not finalize within the grace period"
            );
        }
        Ok(())
    }

    /// Execute one claimed run to a terminal state. Errors are recorded on
    /// the run where possible; they never propagate out of the task.
    async fn execute_run(&self, run: Run, cancel: CancellationToken) {
        let job = match self.job_store.get_job(run.job_id).await {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(run_id = %run.id, error = %e, "failed to load job for run");
                let msg = format!("owning job could not be loaded: {}", e);
                if let Err(e) = self
                    .run_store
                    .mark_finished(run.id, RunStatus::Failed, "", Some(&msg))
                    .await
                {
                    tracing::error!(run_id = %run.id, error = %e, "failed to finalize orphaned run");
                }
                return;
            }
        };

        tracing::info!(
            run_id = %run.id,
            job_id = %job.id,
            job_name = %job.name,
            attempt = run.attempt_num,
            "executing run"
        );

        if let Err(e) = self.run_store.mark_started(run.id).await {
            tracing::error!(run_id = %run.id, error = %e, "failed to mark run as started");
            return;
        }

        let result = self.executor.execute(&job, cancel).await;

        if let Err(e) = self
            .run_store
            .mark_finished(run.id, result.status, &result.output, result.error.as_deref())
            .await
        {
            tracing::error!(run_id = %run.id, error = %e, "failed to mark run as finished");
        }

        tracing::info!(
            run_id = %run.id,
            job_name = %job.name,
            status = %result.status,
            duration_ms = result.duration().num_milliseconds(),
            "run execution completed"
        );

        self.maybe_retry(&run, &job, result.status).await;
    }

    /// On `failed` or `timed_out`, schedule a follow-up attempt until the
    /// job's retry budget (`max_retries + 1` total attempts) is spent.
    async fn maybe_retry(&self, run: &Run, job: &Job, status: RunStatus) {
        if !self.retry_enabled {
            return;
        }
        if !matches!(status, RunStatus::Failed | RunStatus::TimedOut) {
            return;
        }
        if run.attempt_num >= job.max_retries + 1 {
            return;
        }

        let now = Utc::now();
        let retry = Run::scheduled(job.id, run.attempt_num + 1, now, now);
        match self.run_store.create_run(retry).await {
            Ok(retry) => {
                tracing::info!(
                    run_id = %retry.id,
                    job_name = %job.name,
                    attempt = retry.attempt_num,
                    "scheduled retry"
                );
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "failed to schedule retry");
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
