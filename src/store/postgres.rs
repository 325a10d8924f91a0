//! Postgres-backed stores. The `runs` table doubles as the coordination
//! point between workers: `claim` relies on `FOR UPDATE SKIP LOCKED` so
//! concurrent claimers never receive the same run.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::ChronodError;
use crate::models::{Job, JobUpdate, NewJob, Run, RunStatus};
use crate::store::{JobStore, RunStore};

/// Connect to Postgres and run pending migrations.
///
/// Pool sizing: max 10, min 2, 30 s acquire timeout for the initial
/// connection; individual queries are bounded by caller cancellation.
pub async fn connect(database_url: &str) -> Result<PgPool, ChronodError> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| ChronodError::Storage(format!("migration failed: {}", e)))?;

    Ok(pool)
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    name: String,
    description: String,
    cron_expr: String,
    command: String,
    args: Json<Vec<String>>,
    env: Json<HashMap<String, String>>,
    status: String,
    max_retries: i32,
    timeout_ms: Option<i64>,
    next_run_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = ChronodError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            id: row.id,
            name: row.name,
            description: row.description,
            cron_expr: row.cron_expr,
            command: row.command,
            args: row.args.0,
            env: row.env.0,
            status: row.status.parse()?,
            max_retries: row.max_retries.max(0) as u32,
            timeout: row.timeout_ms.map(|ms| Duration::from_millis(ms.max(0) as u64)),
            created_at: row.created_at,
            updated_at: row.updated_at,
            next_run_at: row.next_run_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    job_id: Uuid,
    status: String,
    attempt_num: i32,
    scheduled_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    output: String,
    error_msg: Option<String>,
    claimed_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RunRow> for Run {
    type Error = ChronodError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        Ok(Run {
            id: row.id,
            job_id: row.job_id,
            status: row.status.parse()?,
            attempt_num: row.attempt_num.max(0) as u32,
            scheduled_at: row.scheduled_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            output: row.output,
            error_msg: row.error_msg,
            claimed_by: row.claimed_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn timeout_ms(timeout: Option<Duration>) -> Option<i64> {
    timeout.map(|t| t.as_millis() as i64)
}

const JOB_COLUMNS: &str = "id, name, description, cron_expr, command, args, env, \
     status, max_retries, timeout_ms, next_run_at, created_at, updated_at";

const RUN_COLUMNS: &str = "id, job_id, status, attempt_num, scheduled_at, started_at, \
     finished_at, output, error_msg, claimed_by, created_at, updated_at";

// ---------------------------------------------------------------------------
// Job store
// ---------------------------------------------------------------------------

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create_job(&self, new: NewJob) -> Result<Job, ChronodError> {
        let job = Job::from_new(new, Utc::now())?;
        sqlx::query(
            "INSERT INTO jobs (id, name, description, cron_expr, command, args, env, \
             status, max_retries, timeout_ms, next_run_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(job.id)
        .bind(&job.name)
        .bind(&job.description)
        .bind(&job.cron_expr)
        .bind(&job.command)
        .bind(Json(&job.args))
        .bind(Json(&job.env))
        .bind(job.status.as_str())
        .bind(job.max_retries as i32)
        .bind(timeout_ms(job.timeout))
        .bind(job.next_run_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(job)
    }

    async fn get_job(&self, id: Uuid) -> Result<Job, ChronodError> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM jobs WHERE id = $1",
            JOB_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| ChronodError::NotFound(format!("job '{}' not found", id)))?
            .try_into()
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Job>, ChronodError> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM jobs WHERE name = $1",
            JOB_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Job::try_from).transpose()
    }

    async fn list_jobs(&self, limit: i64, offset: i64) -> Result<Vec<Job>, ChronodError> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM jobs ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            JOB_COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn update_job(&self, id: Uuid, update: JobUpdate) -> Result<Job, ChronodError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM jobs WHERE id = $1 FOR UPDATE",
            JOB_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let mut job: Job = row
            .ok_or_else(|| ChronodError::NotFound(format!("job '{}' not found", id)))?
            .try_into()?;

        job.apply_update(update, Utc::now())?;

        sqlx::query(
            "UPDATE jobs SET name = $2, description = $3, cron_expr = $4, command = $5, \
             args = $6, env = $7, status = $8, max_retries = $9, timeout_ms = $10, \
             next_run_at = $11, updated_at = $12 WHERE id = $1",
        )
        .bind(job.id)
        .bind(&job.name)
        .bind(&job.description)
        .bind(&job.cron_expr)
        .bind(&job.command)
        .bind(Json(&job.args))
        .bind(Json(&job.env))
        .bind(job.status.as_str())
        .bind(job.max_retries as i32)
        .bind(timeout_ms(job.timeout))
        .bind(job.next_run_at)
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(job)
    }

    async fn delete_job(&self, id: Uuid) -> Result<(), ChronodError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ChronodError::NotFound(format!("job '{}' not found", id)));
        }
        Ok(())
    }

    async fn update_next_run(
        &self,
        id: Uuid,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), ChronodError> {
        let result =
            sqlx::query("UPDATE jobs SET next_run_at = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(next_run_at)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(ChronodError::NotFound(format!("job '{}' not found", id)));
        }
        Ok(())
    }

    async fn get_active_due(&self, now: DateTime<Utc>) -> Result<Vec<Job>, ChronodError> {
        // Served by the partial index on (next_run_at) WHERE status = 'active'.
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM jobs \
             WHERE status = 'active' AND next_run_at IS NOT NULL AND next_run_at <= $1 \
             ORDER BY next_run_at ASC",
            JOB_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Job::try_from).collect()
    }
}

// ---------------------------------------------------------------------------
// Run store
// ---------------------------------------------------------------------------

pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn create_run(&self, run: Run) -> Result<Run, ChronodError> {
        sqlx::query(
            "INSERT INTO runs (id, job_id, status, attempt_num, scheduled_at, started_at, \
             finished_at, output, error_msg, claimed_by, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(run.id)
        .bind(run.job_id)
        .bind(run.status.as_str())
        .bind(run.attempt_num as i32)
        .bind(run.scheduled_at)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(&run.output)
        .bind(&run.error_msg)
        .bind(&run.claimed_by)
        .bind(run.created_at)
        .bind(run.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(run)
    }

    async fn get_run(&self, id: Uuid) -> Result<Run, ChronodError> {
        let row: Option<RunRow> = sqlx::query_as(&format!(
            "SELECT {} FROM runs WHERE id = $1",
            RUN_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| ChronodError::NotFound(format!("run '{}' not found", id)))?
            .try_into()
    }

    async fn list_runs(
        &self,
        job_id: Option<Uuid>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Run>, ChronodError> {
        let rows: Vec<RunRow> = match job_id {
            Some(job_id) => {
                sqlx::query_as(&format!(
                    "SELECT {} FROM runs WHERE job_id = $1 \
                     ORDER BY created_at DESC LIMIT $2 OFFSET $3",
                    RUN_COLUMNS
                ))
                .bind(job_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {} FROM runs ORDER BY created_at DESC LIMIT $1 OFFSET $2",
                    RUN_COLUMNS
                ))
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter().map(Run::try_from).collect()
    }

    async fn get_runs_by_status(
        &self,
        status: RunStatus,
        limit: i64,
    ) -> Result<Vec<Run>, ChronodError> {
        let rows: Vec<RunRow> = sqlx::query_as(&format!(
            "SELECT {} FROM runs WHERE status = $1 \
             ORDER BY scheduled_at ASC, created_at ASC LIMIT $2",
            RUN_COLUMNS
        ))
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Run::try_from).collect()
    }

    async fn claim(&self, limit: i64, worker_id: &str) -> Result<Vec<Run>, ChronodError> {
        // SKIP LOCKED makes concurrent claimers pass over each other's
        // selections instead of blocking or double-claiming.
        let rows: Vec<RunRow> = sqlx::query_as(&format!(
            "WITH due AS ( \
                 SELECT id FROM runs \
                 WHERE status = 'scheduled' \
                 ORDER BY scheduled_at ASC, created_at ASC \
                 LIMIT $1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             UPDATE runs SET status = 'claimed', claimed_by = $2, updated_at = NOW() \
             WHERE id IN (SELECT id FROM due) \
             RETURNING {}",
            RUN_COLUMNS
        ))
        .bind(limit)
        .bind(worker_id)
        .fetch_all(&self.pool)
        .await?;

        let mut runs: Vec<Run> = rows
            .into_iter()
            .map(Run::try_from)
            .collect::<Result<_, _>>()?;
        // UPDATE ... RETURNING does not preserve the CTE's ordering.
        runs.sort_by(|a, b| {
            a.scheduled_at
                .cmp(&b.scheduled_at)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(runs)
    }

    async fn mark_started(&self, id: Uuid) -> Result<(), ChronodError> {
        let result = sqlx::query(
            "UPDATE runs SET status = 'running', started_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status = 'claimed'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ChronodError::NotFound(format!(
                "run '{}' not found or not claimed",
                id
            )));
        }
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
        let result = sqlx::query(
            "UPDATE runs SET status = $2, finished_at = NOW(), output = $3, \
             error_msg = $4, updated_at = NOW() \
             WHERE id = $1 AND status IN ('claimed', 'running')",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(output)
        .bind(error_msg)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ChronodError::NotFound(format!(
                "run '{}' not found or already finalized",
                id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;

    #[test]
    fn test_job_row_conversion() {
        let now = Utc::now();
        let row = JobRow {
            id: Uuid::now_v7(),
            name: "n".to_string(),
            description: String::new(),
            cron_expr: "* * * * *".to_string(),
            command: "echo".to_string(),
            args: Json(vec!["x".to_string()]),
            env: Json(HashMap::new()),
            status: "active".to_string(),
            max_retries: 3,
            timeout_ms: Some(90_000),
            next_run_at: Some(now),
            created_at: now,
            updated_at: now,
        };
        let job: Job = row.try_into().expect("convert");
        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.timeout, Some(Duration::from_secs(90)));
        assert_eq!(job.args, vec!["x".to_string()]);
    }

    #[test]
    fn test_job_row_rejects_unknown_status() {
        let now = Utc::now();
        let row = JobRow {
            id: Uuid::now_v7(),
            name: "n".to_string(),
            description: String::new(),
            cron_expr: "* * * * *".to_string(),
            command: "echo".to_string(),
            args: Json(Vec::new()),
            env: Json(HashMap::new()),
            status: "exploded".to_string(),
            max_retries: 0,
            timeout_ms: None,
            next_run_at: None,
            created_at: now,
            updated_at: now,
        };
        assert!(Job::try_from(row).is_err());
    }

    #[test]
    fn test_run_row_conversion() {
        let now = Utc::now();
        let row = RunRow {
            id: Uuid::now_v7(),
            job_id: Uuid::now_v7(),
            status: "timed_out".to_string(),
            attempt_num: 2,
            scheduled_at: now,
            started_at: Some(now),
            finished_at: Some(now),
            output: "partial".to_string(),
            error_msg: Some("job timed out after 5s".to_string()),
            claimed_by: Some("worker-1".to_string()),
            created_at: now,
            updated_at: now,
        };
        let run: Run = row.try_into().expect("convert");
        assert_eq!(run.status, RunStatus::TimedOut);
        assert_eq!(run.attempt_num, 2);
        assert_eq!(run.claimed_by.as_deref(), Some("worker-1"));
    }
}
