//! The scheduler loop: turns due jobs into pending runs and advances each
//! job's next-fire pointer.
//!
//! One scheduler instance is expected to advance schedules at a time; a
//! second concurrent instance may create duplicate runs for the same firing.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::cron::Schedule;
use crate::errors::ChronodError;
use crate::models::{Job, Run};
use crate::store::{JobStore, RunStore};

// ---------------------------------------------------------------------------
// Time source
// ---------------------------------------------------------------------------

/// Where the loop reads "now" from. Swapped out in tests to drive the
/// schedule by hand instead of waiting on wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that stands still until a test moves it.
pub struct FakeClock {
    instant: std::sync::Mutex<DateTime<Utc>>,
}

impl FakeClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            instant: std::sync::Mutex::new(at),
        }
    }

    /// Jump to an absolute instant.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.guard() = at;
    }

    /// Step forward by the given amount.
    pub fn advance(&self, by: chrono::Duration) {
        let mut instant = self.guard();
        *instant = *instant + by;
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        self.instant.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.guard()
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct Scheduler {
    job_store: Arc<dyn JobStore>,
    run_store: Arc<dyn RunStore>,
    clock: Arc<dyn Clock>,
    tick_interval: Duration,
}

impl Scheduler {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        run_store: Arc<dyn RunStore>,
        clock: Arc<dyn Clock>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            job_store,
            run_store,
            clock,
            tick_interval,
        }
    }

    /// Main scheduler loop. Ticks until the cancellation signal fires; the
    /// first check runs immediately.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ChronodError> {
        tracing::info!(interval = ?self.tick_interval, "starting scheduler");

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("scheduler stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::error!(error = %e, "error checking for due jobs");
                        // Keep running; transient storage failures retry next tick.
                    }
                }
            }
        }
    }

    /// One scheduling pass: materialize a run for every due job and advance
    /// its next-fire pointer. A failure on one job never blocks the rest.
    pub async fn tick(&self) -> Result<(), ChronodError> {
        let now = self.clock.now();
        let due = self.job_store.get_active_due(now).await?;
        tracing::debug!(count = due.len(), %now, "checked for due jobs");

        for job in due {
            match self.schedule_job(&job, now).await {
                Ok(()) => {
                    tracing::info!(job_id = %job.id, job_name = %job.name, "job scheduled");
                }
                Err(e) => {
                    // next_run_at stays put so the condition re-surfaces.
                    tracing::error!(
                        job_id = %job.id,
                        job_name = %job.name,
                        error = %e,
                        "failed to schedule job"
                    );
                }
            }
        }
        Ok(())
    }

    async fn schedule_job(&self, job: &Job, now: DateTime<Utc>) -> Result<(), ChronodError> {
        self.run_store
            .create_run(Run::scheduled(job.id, 1, now, now))
            .await?;

        // Anchor to `now`, not to the missed firing: downtime yields one
        // make-up run, never a backfilled burst.
        match Schedule::parse(&job.cron_expr)?.next_after(now) {
            Ok(next) => self.job_store.update_next_run(job.id, Some(next)).await?,
            Err(ChronodError::ScheduleUnreachable(msg)) => {
                tracing::warn!(job_id = %job.id, "{}; leaving job idle", msg);
                self.job_store.update_next_run(job.id, None).await?;
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
