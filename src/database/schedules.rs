use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::Database;
use crate::models::{Frequency, Schedule, ScheduleCreateRequest, ScheduleUpdateRequest};
use crate::scheduler::recurrence::AdvanceOutcome;
use crate::utils::datetime::DateTimeParser;

fn schedule_from_row(row: &SqliteRow) -> Result<Schedule> {
    let frequency_str: String = row.get("frequency");
    let frequency = Frequency::from_db(&frequency_str)
        .ok_or_else(|| anyhow::anyhow!("Unknown schedule frequency: {}", frequency_str))?;

    let next_run_at: Option<String> = row.get("next_run_at");
    let last_run_at: Option<String> = row.get("last_run_at");

    Ok(Schedule {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        user_id: Uuid::parse_str(&row.get::<String, _>("user_id"))?,
        task_config_id: Uuid::parse_str(&row.get::<String, _>("task_config_id"))?,
        frequency,
        cron_expression: row.get("cron_expression"),
        next_run_at: next_run_at
            .map(|s| DateTimeParser::parse_flexible(&s))
            .transpose()?,
        last_run_at: last_run_at
            .map(|s| DateTimeParser::parse_flexible(&s))
            .transpose()?,
        is_active: row.get("is_active"),
        dispatch_failures: row.get("dispatch_failures"),
        created_at: DateTimeParser::parse_flexible(&row.get::<String, _>("created_at"))?,
        updated_at: DateTimeParser::parse_flexible(&row.get::<String, _>("updated_at"))?,
    })
}

const SCHEDULE_COLUMNS: &str = "id, user_id, task_config_id, frequency, cron_expression, \
     next_run_at, last_run_at, is_active, dispatch_failures, created_at, updated_at";

impl Database {
    pub async fn list_schedules(&self, user_id: Uuid) -> Result<Vec<Schedule>> {
        let rows = sqlx::query(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules
             WHERE user_id = ? ORDER BY created_at DESC"
        ))
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(schedule_from_row).collect()
    }

    pub async fn get_schedule(&self, id: Uuid, user_id: Uuid) -> Result<Option<Schedule>> {
        let row = sqlx::query(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = ? AND user_id = ?"
        ))
        .bind(id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(schedule_from_row).transpose()
    }

    pub async fn create_schedule(
        &self,
        user_id: Uuid,
        request: &ScheduleCreateRequest,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<Schedule> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        info!(
            "Creating {} schedule ({}) for task config ({})",
            request.frequency.as_str(),
            id,
            request.task_config_id
        );

        sqlx::query(
            "INSERT INTO schedules
             (id, user_id, task_config_id, frequency, cron_expression, next_run_at,
              last_run_at, is_active, dispatch_failures, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, NULL, ?, 0, ?, ?)",
        )
        .bind(id.to_string())
        .bind(user_id.to_string())
        .bind(request.task_config_id.to_string())
        .bind(request.frequency.as_str())
        .bind(&request.cron_expression)
        .bind(next_run_at.map(|t| DateTimeParser::format_for_storage(&t)))
        .bind(request.is_active)
        .bind(DateTimeParser::format_for_storage(&now))
        .bind(DateTimeParser::format_for_storage(&now))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create schedule ({}): {}", id, e);
            e
        })?;

        Ok(Schedule {
            id,
            user_id,
            task_config_id: request.task_config_id,
            frequency: request.frequency,
            cron_expression: request.cron_expression.clone(),
            next_run_at,
            last_run_at: None,
            is_active: request.is_active,
            dispatch_failures: 0,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn update_schedule(
        &self,
        id: Uuid,
        user_id: Uuid,
        request: &ScheduleUpdateRequest,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Schedule>> {
        let now = Utc::now();

        // A user edit is a reconfiguration: clear any accumulated dispatch
        // failure bookkeeping along with it.
        let result = sqlx::query(
            "UPDATE schedules
             SET frequency = ?, cron_expression = ?, next_run_at = ?, is_active = ?,
                 dispatch_failures = 0, updated_at = ?
             WHERE id = ? AND user_id = ?",
        )
        .bind(request.frequency.as_str())
        .bind(&request.cron_expression)
        .bind(next_run_at.map(|t| DateTimeParser::format_for_storage(&t)))
        .bind(request.is_active)
        .bind(DateTimeParser::format_for_storage(&now))
        .bind(id.to_string())
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!("Schedule ({}) not found for update", id);
            return Ok(None);
        }

        self.get_schedule(id, user_id).await
    }

    pub async fn delete_schedule(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM schedules WHERE id = ? AND user_id = ?")
            .bind(id.to_string())
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!("Deleted schedule ({})", id);
        } else {
            warn!("Schedule ({}) not found for deletion", id);
        }

        Ok(deleted)
    }

    /// Snapshot every schedule that is due at `now`: active with a next-run
    /// time at or before `now`.
    pub async fn find_due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<Schedule>> {
        let rows = sqlx::query(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules
             WHERE is_active = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?
             ORDER BY next_run_at"
        ))
        .bind(DateTimeParser::format_for_storage(&now))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(schedule_from_row).collect()
    }

    /// Claim a due schedule by writing the advanced state in a single
    /// conditional update. The write only succeeds while the row still
    /// carries the snapshot's `next_run_at` and is active, so overlapping
    /// checker runs resolve to exactly one claim per due time.
    ///
    /// Returns false when another run already claimed the schedule.
    pub async fn claim_due_schedule(
        &self,
        schedule: &Schedule,
        outcome: &AdvanceOutcome,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(snapshot_next_run_at) = schedule.next_run_at else {
            return Ok(false);
        };

        let result = sqlx::query(
            "UPDATE schedules
             SET next_run_at = ?, last_run_at = ?, is_active = ?, dispatch_failures = 0,
                 updated_at = ?
             WHERE id = ? AND is_active = 1 AND next_run_at = ?",
        )
        .bind(
            outcome
                .next_run_at
                .map(|t| DateTimeParser::format_for_storage(&t)),
        )
        .bind(DateTimeParser::format_for_storage(&now))
        .bind(outcome.is_active)
        .bind(DateTimeParser::format_for_storage(&now))
        .bind(schedule.id.to_string())
        .bind(DateTimeParser::format_for_storage(&snapshot_next_run_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a failed dispatch submission and make the schedule due again
    /// at `retry_at`.
    pub async fn reschedule_after_failure(
        &self,
        id: Uuid,
        dispatch_failures: i32,
        retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE schedules
             SET dispatch_failures = ?, next_run_at = ?, is_active = 1, updated_at = ?
             WHERE id = ?",
        )
        .bind(dispatch_failures)
        .bind(DateTimeParser::format_for_storage(&retry_at))
        .bind(DateTimeParser::format_for_storage(&now))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Take a schedule out of rotation after repeated dispatch failures.
    pub async fn dead_letter_schedule(
        &self,
        id: Uuid,
        dispatch_failures: i32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE schedules
             SET dispatch_failures = ?, next_run_at = NULL, is_active = 0, updated_at = ?
             WHERE id = ?",
        )
        .bind(dispatch_failures)
        .bind(DateTimeParser::format_for_storage(&now))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
