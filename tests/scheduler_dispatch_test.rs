//! End-to-end dispatcher tests against an in-memory database: due-schedule
//! selection, the claim protocol under concurrent checker runs, and the
//! bounded-retry path for failed dispatch submissions.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use ai_task_scheduler::config::{DatabaseConfig, SchedulerConfig};
use ai_task_scheduler::database::Database;
use ai_task_scheduler::jobs::{JobQueue, JobRequest};
use ai_task_scheduler::models::{
    Frequency, Schedule, ScheduleCreateRequest, TaskConfig, TaskConfigCreateRequest,
};
use ai_task_scheduler::scheduler::recurrence::advance;
use ai_task_scheduler::scheduler::SchedulerService;

/// Queue that records submitted jobs.
#[derive(Clone, Default)]
struct RecordingQueue {
    jobs: Arc<Mutex<Vec<JobRequest>>>,
}

impl RecordingQueue {
    fn submitted(&self) -> Vec<JobRequest> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn submit(&self, job: JobRequest) -> Result<Uuid> {
        let job_id = job.id;
        self.jobs.lock().unwrap().push(job);
        Ok(job_id)
    }
}

/// Queue whose submissions always fail.
struct FailingQueue;

#[async_trait]
impl JobQueue for FailingQueue {
    async fn submit(&self, _job: JobRequest) -> Result<Uuid> {
        Err(anyhow::anyhow!("queue unavailable"))
    }
}

async fn test_database() -> Database {
    let config = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: Some(1),
    };
    let database = Database::new(&config).await.unwrap();
    database.migrate().await.unwrap();
    database
}

fn scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        check_interval_secs: 30,
        max_dispatch_failures: 3,
        retry_backoff_secs: 60,
    }
}

async fn seed_task_config(database: &Database, suffix: &str) -> TaskConfig {
    let user = database
        .upsert_google_user(
            &format!("sub-{suffix}"),
            &format!("{suffix}@example.com"),
            None,
        )
        .await
        .unwrap();

    database
        .create_task_config(
            user.id,
            &TaskConfigCreateRequest {
                name: format!("config-{suffix}"),
                task_type: "email_generation".to_string(),
                ai_provider: "openai".to_string(),
                ai_model_name: None,
                prompt_template: "Draft the weekly update".to_string(),
                output_constraints: None,
                refinement_iterations: 1,
                target_email_recipients: None,
                email_subject_template: None,
                linked_credentials_id: None,
            },
        )
        .await
        .unwrap()
}

async fn seed_schedule(
    database: &Database,
    config: &TaskConfig,
    frequency: Frequency,
    cron_expression: Option<&str>,
    next_run_at: Option<DateTime<Utc>>,
    is_active: bool,
) -> Schedule {
    database
        .create_schedule(
            config.user_id,
            &ScheduleCreateRequest {
                task_config_id: config.id,
                frequency,
                cron_expression: cron_expression.map(String::from),
                next_run_at,
                is_active,
            },
            next_run_at,
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn selects_exactly_the_due_subset() {
    let database = test_database().await;
    let config = seed_task_config(&database, "selection").await;
    let now = Utc::now();

    let due_past = seed_schedule(
        &database,
        &config,
        Frequency::Daily,
        None,
        Some(now - Duration::minutes(5)),
        true,
    )
    .await;
    // Active but not yet due
    seed_schedule(
        &database,
        &config,
        Frequency::Daily,
        None,
        Some(now + Duration::hours(1)),
        true,
    )
    .await;
    // Due time passed but deactivated
    seed_schedule(
        &database,
        &config,
        Frequency::Weekly,
        None,
        Some(now - Duration::hours(1)),
        false,
    )
    .await;
    // Fired once-schedule with no next run
    seed_schedule(&database, &config, Frequency::Once, None, None, true).await;

    let due = database.find_due_schedules(now).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, due_past.id);
}

#[tokio::test]
async fn daily_dispatch_worked_example() {
    let database = test_database().await;
    let config = seed_task_config(&database, "worked").await;

    let scheduled_for = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap();

    let schedule = seed_schedule(
        &database,
        &config,
        Frequency::Daily,
        None,
        Some(scheduled_for),
        true,
    )
    .await;

    let due = database.find_due_schedules(now).await.unwrap();
    assert_eq!(due.len(), 1);

    let outcome = advance(&due[0], now);
    assert!(database
        .claim_due_schedule(&due[0], &outcome, now)
        .await
        .unwrap());

    let updated = database
        .get_schedule(schedule.id, config.user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.last_run_at, Some(now));
    assert_eq!(
        updated.next_run_at,
        Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 5, 0).unwrap())
    );
    assert!(updated.is_active);

    // A second claim against the same snapshot must lose.
    assert!(!database
        .claim_due_schedule(&due[0], &outcome, now)
        .await
        .unwrap());
}

#[tokio::test]
async fn checker_dispatches_due_schedule_and_advances_it() {
    let database = test_database().await;
    let config = seed_task_config(&database, "checker").await;
    let schedule = seed_schedule(
        &database,
        &config,
        Frequency::Daily,
        None,
        Some(Utc::now() - Duration::minutes(5)),
        true,
    )
    .await;

    let queue = RecordingQueue::default();
    let service = SchedulerService::new(
        database.clone(),
        Arc::new(queue.clone()),
        scheduler_config(),
        None,
    );

    let dispatched = service.check_and_dispatch_due_schedules().await.unwrap();
    assert_eq!(dispatched, 1);

    let jobs = queue.submitted();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].task_config_id, config.id);
    assert_eq!(jobs[0].job_name, "execute_task_config");

    let updated = database
        .get_schedule(schedule.id, config.user_id)
        .await
        .unwrap()
        .unwrap();
    assert!(updated.is_active);
    assert_eq!(updated.dispatch_failures, 0);
    let last_run_at = updated.last_run_at.unwrap();
    assert_eq!(updated.next_run_at, Some(last_run_at + Duration::days(1)));

    // Nothing left due afterwards.
    let dispatched_again = service.check_and_dispatch_due_schedules().await.unwrap();
    assert_eq!(dispatched_again, 0);
    assert_eq!(queue.submitted().len(), 1);
}

#[tokio::test]
async fn once_schedule_fires_at_most_once() {
    let database = test_database().await;
    let config = seed_task_config(&database, "once").await;
    let schedule = seed_schedule(
        &database,
        &config,
        Frequency::Once,
        None,
        Some(Utc::now() - Duration::minutes(1)),
        true,
    )
    .await;

    let queue = RecordingQueue::default();
    let service = SchedulerService::new(
        database.clone(),
        Arc::new(queue.clone()),
        scheduler_config(),
        None,
    );

    assert_eq!(service.check_and_dispatch_due_schedules().await.unwrap(), 1);
    assert_eq!(service.check_and_dispatch_due_schedules().await.unwrap(), 0);
    assert_eq!(queue.submitted().len(), 1);

    let updated = database
        .get_schedule(schedule.id, config.user_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!updated.is_active);
    assert_eq!(updated.next_run_at, None);
    assert!(updated.last_run_at.is_some());
}

#[tokio::test]
async fn misconfigured_cron_schedule_deactivates_without_dispatch() {
    let database = test_database().await;
    let config = seed_task_config(&database, "badcron").await;
    let schedule = seed_schedule(
        &database,
        &config,
        Frequency::Cron,
        Some("definitely not cron"),
        Some(Utc::now() - Duration::minutes(1)),
        true,
    )
    .await;

    let queue = RecordingQueue::default();
    let service = SchedulerService::new(
        database.clone(),
        Arc::new(queue.clone()),
        scheduler_config(),
        None,
    );

    assert_eq!(service.check_and_dispatch_due_schedules().await.unwrap(), 0);
    assert!(queue.submitted().is_empty());

    let updated = database
        .get_schedule(schedule.id, config.user_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!updated.is_active);
    assert_eq!(updated.next_run_at, None);
}

#[tokio::test]
async fn concurrent_checker_runs_dispatch_exactly_once() {
    let database = test_database().await;
    let config = seed_task_config(&database, "race").await;
    seed_schedule(
        &database,
        &config,
        Frequency::Daily,
        None,
        Some(Utc::now() - Duration::minutes(5)),
        true,
    )
    .await;

    let queue = RecordingQueue::default();
    let first = SchedulerService::new(
        database.clone(),
        Arc::new(queue.clone()),
        scheduler_config(),
        None,
    );
    let second = SchedulerService::new(
        database.clone(),
        Arc::new(queue.clone()),
        scheduler_config(),
        None,
    );

    let (a, b) = tokio::join!(
        first.check_and_dispatch_due_schedules(),
        second.check_and_dispatch_due_schedules(),
    );

    assert_eq!(a.unwrap() + b.unwrap(), 1);
    assert_eq!(queue.submitted().len(), 1);
}

#[tokio::test]
async fn failed_dispatch_backs_off_then_dead_letters() {
    let database = test_database().await;
    let config = seed_task_config(&database, "deadletter").await;
    let schedule = seed_schedule(
        &database,
        &config,
        Frequency::Daily,
        None,
        Some(Utc::now() - Duration::minutes(5)),
        true,
    )
    .await;

    let service = SchedulerService::new(
        database.clone(),
        Arc::new(FailingQueue),
        scheduler_config(),
        None,
    );

    // First failure: still active, due again after an explicit backoff.
    assert_eq!(service.check_and_dispatch_due_schedules().await.unwrap(), 0);
    let after_first = database
        .get_schedule(schedule.id, config.user_id)
        .await
        .unwrap()
        .unwrap();
    assert!(after_first.is_active);
    assert_eq!(after_first.dispatch_failures, 1);
    assert!(after_first.next_run_at.unwrap() > Utc::now());

    // Force the retry time into the past to drive the next attempts.
    for expected_failures in 2..=3 {
        sqlx::query("UPDATE schedules SET next_run_at = ? WHERE id = ?")
            .bind((Utc::now() - Duration::minutes(1)).to_rfc3339())
            .bind(schedule.id.to_string())
            .execute(&database.pool())
            .await
            .unwrap();

        assert_eq!(service.check_and_dispatch_due_schedules().await.unwrap(), 0);

        let current = database
            .get_schedule(schedule.id, config.user_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.dispatch_failures, expected_failures);
    }

    // Third consecutive failure exhausts the budget.
    let dead = database
        .get_schedule(schedule.id, config.user_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!dead.is_active);
    assert_eq!(dead.next_run_at, None);

    // Dead-lettered schedules are never selected again.
    assert_eq!(service.check_and_dispatch_due_schedules().await.unwrap(), 0);
}
