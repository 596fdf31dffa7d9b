//! Background scheduler: selects due schedules and dispatches them.
//!
//! A single service task wakes on a fixed interval (and on pokes from the
//! web layer when schedules change), snapshots the due set, and processes
//! each schedule independently: compute the advanced state, claim the row
//! with a conditional write, then submit the job. Claiming before dispatch
//! means overlapping checker runs cannot double-dispatch; a failed
//! submission is retried with backoff up to a bounded number of attempts.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::broadcast;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, trace, warn};

use crate::config::SchedulerConfig;
use crate::database::Database;
use crate::jobs::{JobQueue, JobRequest};
use crate::models::{Frequency, Schedule};

pub mod recurrence;

use recurrence::advance;

pub type SchedulerWakeupSender = broadcast::Sender<()>;
pub type SchedulerWakeupReceiver = broadcast::Receiver<()>;

/// Channel the web layer uses to poke the scheduler after schedule changes,
/// so a newly due schedule doesn't wait out the remainder of the interval.
pub fn create_wakeup_channel() -> (SchedulerWakeupSender, SchedulerWakeupReceiver) {
    broadcast::channel(100)
}

/// Cap on the computed retry backoff.
const MAX_RETRY_DELAY_SECS: f64 = 3600.0;

pub struct SchedulerService {
    database: Database,
    queue: Arc<dyn JobQueue>,
    config: SchedulerConfig,
    wakeup_rx: Option<SchedulerWakeupReceiver>,
}

impl SchedulerService {
    pub fn new(
        database: Database,
        queue: Arc<dyn JobQueue>,
        config: SchedulerConfig,
        wakeup_rx: Option<SchedulerWakeupReceiver>,
    ) -> Self {
        Self {
            database,
            queue,
            config,
            wakeup_rx,
        }
    }

    pub async fn start(mut self) -> Result<()> {
        info!(
            "Starting scheduler service (check interval: {}s)",
            self.config.check_interval_secs
        );

        let mut check_interval = interval(Duration::from_secs(self.config.check_interval_secs));

        loop {
            tokio::select! {
                _ = check_interval.tick() => {
                    trace!("Scheduler tick - checking for due schedules");
                    if let Err(e) = self.check_and_dispatch_due_schedules().await {
                        error!("Error checking due schedules: {}", e);
                    }
                }
                _ = Self::receive_wakeup(&mut self.wakeup_rx), if self.wakeup_rx.is_some() => {
                    debug!("Received scheduler wakeup signal");
                    if let Err(e) = self.check_and_dispatch_due_schedules().await {
                        error!("Error checking due schedules after wakeup: {}", e);
                    }
                }
            }
        }
    }

    async fn receive_wakeup(rx: &mut Option<SchedulerWakeupReceiver>) {
        if let Some(rx) = rx {
            let _ = rx.recv().await;
        } else {
            std::future::pending::<()>().await;
        }
    }

    /// One checker pass: snapshot the due set and process each schedule
    /// independently. Per-schedule errors are logged and never abort the
    /// loop. Returns the number of dispatched schedules.
    pub async fn check_and_dispatch_due_schedules(&self) -> Result<usize> {
        let now = Utc::now();
        let due_schedules = self.database.find_due_schedules(now).await?;

        if due_schedules.is_empty() {
            return Ok(0);
        }

        info!("Found {} due schedules", due_schedules.len());

        let mut dispatched = 0;
        for schedule in &due_schedules {
            match self.process_due_schedule(schedule, now).await {
                Ok(true) => dispatched += 1,
                Ok(false) => {}
                Err(e) => {
                    error!("Error processing schedule ({}): {}", schedule.id, e);
                }
            }
        }

        Ok(dispatched)
    }

    /// Advance, claim, dispatch. Returns true when a job was submitted.
    async fn process_due_schedule(
        &self,
        schedule: &Schedule,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let outcome = advance(schedule, now);

        // A cron schedule that no longer yields occurrences is
        // misconfiguration, not work: deactivate instead of dispatching.
        if schedule.frequency == Frequency::Cron && !outcome.is_active {
            warn!(
                "Schedule ({}) has frequency 'cron' but no usable cron expression, deactivating",
                schedule.id
            );
            self.database
                .claim_due_schedule(schedule, &outcome, now)
                .await?;
            return Ok(false);
        }

        if !self
            .database
            .claim_due_schedule(schedule, &outcome, now)
            .await?
        {
            debug!(
                "Schedule ({}) already claimed by a concurrent checker run",
                schedule.id
            );
            return Ok(false);
        }

        let job = JobRequest::execute_task_config(schedule.task_config_id);
        let job_id = job.id;

        match self.queue.submit(job).await {
            Ok(_) => {
                info!(
                    "Dispatched job {} for task config ({}) from schedule ({}); next run at {:?}",
                    job_id, schedule.task_config_id, schedule.id, outcome.next_run_at
                );
                Ok(true)
            }
            Err(e) => {
                warn!(
                    "Failed to submit job for schedule ({}): {}",
                    schedule.id, e
                );
                self.handle_dispatch_failure(schedule, now).await?;
                Ok(false)
            }
        }
    }

    /// Bounded retry: back the schedule off exponentially, dead-letter it
    /// once the failure budget is exhausted.
    async fn handle_dispatch_failure(
        &self,
        schedule: &Schedule,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let failures = schedule.dispatch_failures + 1;

        if failures >= self.config.max_dispatch_failures as i32 {
            warn!(
                "Schedule ({}) failed dispatch {} times, dead-lettering",
                schedule.id, failures
            );
            self.database
                .dead_letter_schedule(schedule.id, failures, now)
                .await?;
            return Ok(());
        }

        let retry_at = now + self.retry_delay(failures);
        warn!(
            "Schedule ({}) dispatch failed ({}/{}), retrying at {}",
            schedule.id, failures, self.config.max_dispatch_failures, retry_at
        );
        self.database
            .reschedule_after_failure(schedule.id, failures, retry_at, now)
            .await?;

        Ok(())
    }

    fn retry_delay(&self, failures: i32) -> ChronoDuration {
        let base = self.config.retry_backoff_secs as f64;
        let exponential = base * 2f64.powi(failures.saturating_sub(1));
        // +/-12% jitter spreads retries from schedules that failed together.
        let jitter = 0.88 + fastrand::f64() * 0.24;
        let secs = (exponential * jitter).min(MAX_RETRY_DELAY_SECS);
        ChronoDuration::seconds(secs as i64)
    }
}
