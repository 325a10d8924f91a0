//! In-memory stores for single-host embedded deployments and tests.
//!
//! The claim contract holds here the same way it does in Postgres: the whole
//! selection-and-transition happens under one write lock, so concurrent
//! claimers always see disjoint sets.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::ChronodError;
use crate::models::{Job, JobStatus, JobUpdate, NewJob, Run, RunStatus};
use crate::store::{JobStore, RunStore};

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<Vec<Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a job bypassing validation. Lets tests stage states that can
    /// no longer be created through the front door (e.g. an expression that
    /// stopped parsing after a migration).
    pub async fn insert_job_raw(&self, job: Job) {
        self.jobs.write().await.push(job);
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, new: NewJob) -> Result<Job, ChronodError> {
        let job = Job::from_new(new, Utc::now())?;
        let mut jobs = self.jobs.write().await;
        if jobs
            .iter()
            .any(|j| j.name == job.name && j.status != JobStatus::Archived)
        {
            return Err(ChronodError::Conflict(format!(
                "a job with name '{}' already exists",
                job.name
            )));
        }
        jobs.push(job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: Uuid) -> Result<Job, ChronodError> {
        self.jobs
            .read()
            .await
            .iter()
            .find(|j| j.id == id)
            .cloned()
            .ok_or_else(|| ChronodError::NotFound(format!("job '{}' not found", id)))
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Job>, ChronodError> {
        Ok(self
            .jobs
            .read()
            .await
            .iter()
            .find(|j| j.name == name)
            .cloned())
    }

    async fn list_jobs(&self, limit: i64, offset: i64) -> Result<Vec<Job>, ChronodError> {
        let jobs = self.jobs.read().await;
        let mut sorted: Vec<Job> = jobs.clone();
        sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sorted
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn update_job(&self, id: Uuid, update: JobUpdate) -> Result<Job, ChronodError> {
        let mut jobs = self.jobs.write().await;
        if let Some(ref new_name) = update.name {
            if jobs
                .iter()
                .any(|j| j.name == *new_name && j.id != id && j.status != JobStatus::Archived)
            {
                return Err(ChronodError::Conflict(format!(
                    "a job with name '{}' already exists",
                    new_name
                )));
            }
        }
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| ChronodError::NotFound(format!("job '{}' not found", id)))?;
        job.apply_update(update, Utc::now())?;
        Ok(job.clone())
    }

    async fn delete_job(&self, id: Uuid) -> Result<(), ChronodError> {
        let mut jobs = self.jobs.write().await;
        let len_before = jobs.len();
        jobs.retain(|j| j.id != id);
        if jobs.len() == len_before {
            return Err(ChronodError::NotFound(format!("job '{}' not found", id)));
        }
        Ok(())
    }

    async fn update_next_run(
        &self,
        id: Uuid,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), ChronodError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| ChronodError::NotFound(format!("job '{}' not found", id)))?;
        job.next_run_at = next_run_at;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn get_active_due(&self, now: DateTime<Utc>) -> Result<Vec<Job>, ChronodError> {
        let jobs = self.jobs.read().await;
        let mut due: Vec<Job> = jobs
            .iter()
            .filter(|j| {
                j.status == JobStatus::Active
                    && j.next_run_at.map(|t| t <= now).unwrap_or(false)
            })
            .cloned()
            .collect();
        due.sort_by_key(|j| j.next_run_at);
        Ok(due)
    }
}

#[derive(Default)]
pub struct MemoryRunStore {
    runs: RwLock<Vec<Run>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn create_run(&self, run: Run) -> Result<Run, ChronodError> {
        self.runs.write().await.push(run.clone());
        Ok(run)
    }

    async fn get_run(&self, id: Uuid) -> Result<Run, ChronodError> {
        self.runs
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| ChronodError::NotFound(format!("run '{}' not found", id)))
    }

    async fn list_runs(
        &self,
        job_id: Option<Uuid>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Run>, ChronodError> {
        let runs = self.runs.read().await;
        let mut filtered: Vec<Run> = runs
            .iter()
            .filter(|r| job_id.map(|id| r.job_id == id).unwrap_or(true))
            .cloned()
            .collect();
        filtered.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(filtered
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn get_runs_by_status(
        &self,
        status: RunStatus,
        limit: i64,
    ) -> Result<Vec<Run>, ChronodError> {
        let runs = self.runs.read().await;
        let mut filtered: Vec<Run> = runs.iter().filter(|r| r.status == status).cloned().collect();
        filtered.sort_by(|a, b| {
            a.scheduled_at
                .cmp(&b.scheduled_at)
                .then(a.created_at.cmp(&b.created_at))
        });
        filtered.truncate(limit.max(0) as usize);
        Ok(filtered)
    }

    async fn claim(&self, limit: i64, worker_id: &str) -> Result<Vec<Run>, ChronodError> {
        let mut runs = self.runs.write().await;
        let mut candidates: Vec<usize> = runs
            .iter()
            .enumerate()
            .filter(|(_, r)| r.status == RunStatus::Scheduled)
            .map(|(i, _)| i)
            .collect();
        candidates.sort_by(|&a, &b| {
            runs[a]
                .scheduled_at
                .cmp(&runs[b].scheduled_at)
                .then(runs[a].created_at.cmp(&runs[b].created_at))
        });
        candidates.truncate(limit.max(0) as usize);

        let now = Utc::now();
        let mut claimed = Vec::with_capacity(candidates.len());
        for idx in candidates {
            let run = &mut runs[idx];
            run.status = RunStatus::Claimed;
            run.claimed_by = Some(worker_id.to_string());
            run.updated_at = now;
            claimed.push(run.clone());
        }
        Ok(claimed)
    }

    async fn mark_started(&self, id: Uuid) -> Result<(), ChronodError> {
        let mut runs = self.runs.write().await;
        let run = runs
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| ChronodError::NotFound(format!("run '{}' not found", id)))?;
        if run.status != RunStatus::Claimed {
            return Err(ChronodError::Validation(format!(
                "run '{}' is {}, not claimed",
                id, run.status
            )));
        }
        let now = Utc::now();
        run.status = RunStatus::Running;
        run.started_at = Some(now);
        run.updated_at = now;
        Ok(())
    }

    async fn mark_finished(
        &self,
        id: Uuid,
        status: RunStatus,
        output: &str,
        error_msg: Option<&str>,
    ) -> Result<(), ChronodError> {
        if !status.is_terminal() {
            return Err(ChronodError::Validation(format!(
                "'{}' is not a terminal status",
                status
            )));
        }
        let mut runs = self.runs.write().await;
        let run = runs
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| ChronodError::NotFound(format!("run '{}' not found", id)))?;
        if run.status.is_terminal() {
            return Err(ChronodError::Validation(format!(
                "run '{}' is already {}",
                id, run.status
            )));
        }
        let now = Utc::now();
        run.status = status;
        run.finished_at = Some(now);
        run.output = output.to_string();
        run.error_msg = error_msg.map(|s| s.to_string());
        run.updated_at = now;
        Ok(())
    }
}
