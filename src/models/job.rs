use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cron::Schedule;
use crate::errors::ChronodError;
use crate::models::duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Active,
    Inactive,
    Archived,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Active => "active",
            JobStatus::Inactive => "inactive",
            JobStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ChronodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(JobStatus::Active),
            "inactive" => Ok(JobStatus::Inactive),
            "archived" => Ok(JobStatus::Archived),
            other => Err(ChronodError::Validation(format!(
                "unknown job status '{}'",
                other
            ))),
        }
    }
}

/// A registered recurring job: an immutable identity plus a mutable schedule
/// pointer (`next_run_at`). Only `active` jobs are picked up by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub cron_expr: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub status: JobStatus,
    pub max_retries: u32,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "duration::option_go"
    )]
    pub timeout: Option<Duration>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub cron_expr: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_status")]
    pub status: JobStatus,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "duration::option_go"
    )]
    pub timeout: Option<Duration>,
}

fn default_status() -> JobStatus {
    JobStatus::Active
}

fn default_max_retries() -> u32 {
    3
}

/// A partial update. Absent fields are left unchanged; `timeout` distinguishes
/// "leave unchanged" (absent) from "clear" (null).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub cron_expr: Option<String>,
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub env: Option<HashMap<String, String>>,
    pub status: Option<JobStatus>,
    pub max_retries: Option<u32>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "duration::double_option_go"
    )]
    pub timeout: Option<Option<Duration>>,
}

/// Validate a NewJob before creation.
pub fn validate_new_job(job: &NewJob) -> Result<(), ChronodError> {
    if job.name.trim().is_empty() {
        return Err(ChronodError::Validation(
            "Job name cannot be empty".to_string(),
        ));
    }
    if job.command.trim().is_empty() {
        return Err(ChronodError::Validation(
            "Job command cannot be empty".to_string(),
        ));
    }
    Schedule::parse(&job.cron_expr)?;
    validate_timeout(job.timeout)?;
    Ok(())
}

/// Validate a JobUpdate before applying.
pub fn validate_job_update(update: &JobUpdate) -> Result<(), ChronodError> {
    if let Some(ref name) = update.name {
        if name.trim().is_empty() {
            return Err(ChronodError::Validation(
                "Job name cannot be empty".to_string(),
            ));
        }
    }
    if let Some(ref command) = update.command {
        if command.trim().is_empty() {
            return Err(ChronodError::Validation(
                "Job command cannot be empty".to_string(),
            ));
        }
    }
    if let Some(ref cron_expr) = update.cron_expr {
        Schedule::parse(cron_expr)?;
    }
    if let Some(timeout) = update.timeout {
        validate_timeout(timeout)?;
    }
    Ok(())
}

fn validate_timeout(timeout: Option<Duration>) -> Result<(), ChronodError> {
    if let Some(t) = timeout {
        if t.is_zero() {
            return Err(ChronodError::Validation(
                "Job timeout must be positive".to_string(),
            ));
        }
    }
    Ok(())
}

impl Job {
    /// Build a Job from a validated NewJob, computing the initial
    /// `next_run_at` from the cron expression and the creation instant.
    ///
    /// A schedule with no reachable firing leaves `next_run_at` unset; the
    /// job exists but will never be picked up until its expression changes.
    pub fn from_new(new: NewJob, now: DateTime<Utc>) -> Result<Self, ChronodError> {
        validate_new_job(&new)?;

        let next_run_at = if new.status == JobStatus::Active {
            match Schedule::parse(&new.cron_expr)?.next_after(now) {
                Ok(next) => Some(next),
                Err(ChronodError::ScheduleUnreachable(msg)) => {
                    tracing::warn!("{}; job will be idle", msg);
                    None
                }
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        Ok(Job {
            id: Uuid::now_v7(),
            name: new.name,
            description: new.description,
            cron_expr: new.cron_expr,
            command: new.command,
            args: new.args,
            env: new.env,
            status: new.status,
            max_retries: new.max_retries,
            timeout: new.timeout,
            created_at: now,
            updated_at: now,
            next_run_at,
        })
    }

    /// Apply a validated JobUpdate in place. Recomputes `next_run_at` when
    /// the schedule or status changed; non-active jobs carry no next fire.
    pub fn apply_update(&mut self, update: JobUpdate, now: DateTime<Utc>) -> Result<(), ChronodError> {
        validate_job_update(&update)?;

        let mut reschedule = false;
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(description) = update.description {
            self.description = description;
        }
        if let Some(cron_expr) = update.cron_expr {
            if cron_expr != self.cron_expr {
                reschedule = true;
            }
            self.cron_expr = cron_expr;
        }
        if let Some(command) = update.command {
            self.command = command;
        }
        if let Some(args) = update.args {
            self.args = args;
        }
        if let Some(env) = update.env {
            self.env = env;
        }
        if let Some(status) = update.status {
            if status != self.status {
                reschedule = true;
            }
            self.status = status;
        }
        if let Some(max_retries) = update.max_retries {
            self.max_retries = max_retries;
        }
        if let Some(timeout) = update.timeout {
            self.timeout = timeout;
        }

        if reschedule {
            self.next_run_at = if self.status == JobStatus::Active {
                match Schedule::parse(&self.cron_expr)?.next_after(now) {
                    Ok(next) => Some(next),
                    Err(ChronodError::ScheduleUnreachable(_)) => None,
                    Err(e) => return Err(e),
                }
            } else {
                None
            };
        }
        self.updated_at = now;
        Ok(())
    }
}
