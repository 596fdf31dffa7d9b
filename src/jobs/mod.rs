//! Job submission and execution.
//!
//! The dispatcher hands work to a [`JobQueue`] and never waits for
//! completion; the queue transport is replaceable behind the trait. The
//! in-process implementation pairs an unbounded channel with a worker task
//! that executes jobs as they arrive.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database::Database;
use crate::errors::{AppError, SchedulerError};

/// Job name for executing a task config by id.
pub const EXECUTE_TASK_CONFIG: &str = "execute_task_config";

#[derive(Debug, Clone)]
pub struct JobRequest {
    pub id: Uuid,
    pub job_name: String,
    pub task_config_id: Uuid,
    pub submitted_at: DateTime<Utc>,
}

impl JobRequest {
    pub fn execute_task_config(task_config_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_name: EXECUTE_TASK_CONFIG.to_string(),
            task_config_id,
            submitted_at: Utc::now(),
        }
    }
}

/// Fire-and-forget job submission boundary. Implementations report only
/// whether the job was accepted; execution outcomes are not surfaced to the
/// caller.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn submit(&self, job: JobRequest) -> Result<Uuid>;
}

/// Queue backed by an in-process channel drained by a [`JobWorker`].
#[derive(Clone)]
pub struct InProcessJobQueue {
    tx: mpsc::UnboundedSender<JobRequest>,
}

#[async_trait]
impl JobQueue for InProcessJobQueue {
    async fn submit(&self, job: JobRequest) -> Result<Uuid> {
        let job_id = job.id;
        self.tx
            .send(job)
            .map_err(|_| SchedulerError::QueueClosed)?;
        Ok(job_id)
    }
}

/// Executes queued jobs against the database.
pub struct JobWorker {
    database: Database,
    rx: mpsc::UnboundedReceiver<JobRequest>,
}

impl JobWorker {
    /// Build a connected queue/worker pair.
    pub fn channel(database: Database) -> (InProcessJobQueue, JobWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        (InProcessJobQueue { tx }, JobWorker { database, rx })
    }

    pub async fn run(mut self) {
        info!("Job worker started");
        while let Some(job) = self.rx.recv().await {
            self.execute(job).await;
        }
        info!("Job worker stopped: queue closed");
    }

    async fn execute(&self, job: JobRequest) {
        match job.job_name.as_str() {
            EXECUTE_TASK_CONFIG => {
                match execute_task_config(&self.database, job.id, job.task_config_id).await {
                    Ok(summary) => info!("Job {} completed: {}", job.id, summary),
                    Err(e) => error!("Job {} failed: {}", job.id, e),
                }
            }
            other => warn!("Job {} has unknown job name '{}', skipping", job.id, other),
        }
    }
}

/// Execute a configured task. The referenced config may have been deleted
/// between dispatch and execution; that is a failed job outcome, logged by
/// the worker and not retried.
pub async fn execute_task_config(
    database: &Database,
    job_id: Uuid,
    task_config_id: Uuid,
) -> Result<String, AppError> {
    info!(
        "Job {} received task_config_id={}",
        job_id, task_config_id
    );

    let config = database
        .find_task_config(task_config_id)
        .await?
        .ok_or_else(|| AppError::not_found("task_config", task_config_id.to_string()))?;

    info!(
        "Executing task config '{}' ({}) of type '{}' via provider '{}'",
        config.name, config.id, config.task_type, config.ai_provider
    );

    // Provider invocation lives outside this subsystem; the dispatcher's
    // contract ends at handing over the config.

    Ok(format!("executed task config {}", config.id))
}
