pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::ChronodError;
use crate::models::{Job, JobUpdate, NewJob, Run, RunStatus};

/// Persistent mapping of job identity to job definition and next-fire
/// pointer. Shared by the scheduler, the workers, and the API.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, new: NewJob) -> Result<Job, ChronodError>;
    async fn get_job(&self, id: Uuid) -> Result<Job, ChronodError>;
    async fn find_by_name(&self, name: &str) -> Result<Option<Job>, ChronodError>;
    async fn list_jobs(&self, limit: i64, offset: i64) -> Result<Vec<Job>, ChronodError>;
    async fn update_job(&self, id: Uuid, update: JobUpdate) -> Result<Job, ChronodError>;
    async fn delete_job(&self, id: Uuid) -> Result<(), ChronodError>;

    /// Advance (or clear) a job's next-fire pointer.
    async fn update_next_run(
        &self,
        id: Uuid,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), ChronodError>;

    /// All active jobs whose `next_run_at` has elapsed at `now`.
    async fn get_active_due(&self, now: DateTime<Utc>) -> Result<Vec<Job>, ChronodError>;
}

/// Persistent ordered log of runs. `claim` is the mutual-exclusion point
/// between concurrent workers: two concurrent callers receive disjoint sets.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(&self, run: Run) -> Result<Run, ChronodError>;
    async fn get_run(&self, id: Uuid) -> Result<Run, ChronodError>;
    async fn list_runs(
        &self,
        job_id: Option<Uuid>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Run>, ChronodError>;
    async fn get_runs_by_status(
        &self,
        status: RunStatus,
        limit: i64,
    ) -> Result<Vec<Run>, ChronodError>;

    /// Atomically move up to `limit` runs `scheduled → claimed`, stamping
    /// the caller's identity, oldest `scheduled_at` first.
    async fn claim(&self, limit: i64, worker_id: &str) -> Result<Vec<Run>, ChronodError>;

    /// `claimed → running`; stamps `started_at`.
    async fn mark_started(&self, id: Uuid) -> Result<(), ChronodError>;

    /// Transition to a terminal status; stamps `finished_at` and records
    /// the captured output and error.
    async fn mark_finished(
        &self,
        id: Uuid,
        status: RunStatus,
        output: &str,
        error_msg: Option<&str>,
    ) -> Result<(), ChronodError>;
}
