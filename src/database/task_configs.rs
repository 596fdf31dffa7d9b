use anyhow::Result;
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::Database;
use crate::models::{TaskConfig, TaskConfigCreateRequest, TaskConfigUpdateRequest};
use crate::utils::datetime::DateTimeParser;

fn task_config_from_row(row: &SqliteRow) -> Result<TaskConfig> {
    let output_constraints: Option<String> = row.get("output_constraints");
    let linked_credentials_id: Option<String> = row.get("linked_credentials_id");
    Ok(TaskConfig {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        user_id: Uuid::parse_str(&row.get::<String, _>("user_id"))?,
        name: row.get("name"),
        task_type: row.get("task_type"),
        ai_provider: row.get("ai_provider"),
        ai_model_name: row.get("ai_model_name"),
        prompt_template: row.get("prompt_template"),
        output_constraints: output_constraints
            .map(|s| serde_json::from_str(&s))
            .transpose()?,
        refinement_iterations: row.get("refinement_iterations"),
        target_email_recipients: row.get("target_email_recipients"),
        email_subject_template: row.get("email_subject_template"),
        linked_credentials_id: linked_credentials_id
            .map(|s| Uuid::parse_str(&s))
            .transpose()?,
        created_at: DateTimeParser::parse_flexible(&row.get::<String, _>("created_at"))?,
        updated_at: DateTimeParser::parse_flexible(&row.get::<String, _>("updated_at"))?,
    })
}

const TASK_CONFIG_COLUMNS: &str = "id, user_id, name, task_type, ai_provider, ai_model_name, \
     prompt_template, output_constraints, refinement_iterations, target_email_recipients, \
     email_subject_template, linked_credentials_id, created_at, updated_at";

impl Database {
    pub async fn list_task_configs(&self, user_id: Uuid) -> Result<Vec<TaskConfig>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_CONFIG_COLUMNS} FROM task_configs
             WHERE user_id = ? ORDER BY created_at DESC"
        ))
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(task_config_from_row).collect()
    }

    pub async fn get_task_config(&self, id: Uuid, user_id: Uuid) -> Result<Option<TaskConfig>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_CONFIG_COLUMNS} FROM task_configs WHERE id = ? AND user_id = ?"
        ))
        .bind(id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(task_config_from_row).transpose()
    }

    /// Lookup without owner scoping, used by the job worker when executing a
    /// dispatched task config id.
    pub async fn find_task_config(&self, id: Uuid) -> Result<Option<TaskConfig>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_CONFIG_COLUMNS} FROM task_configs WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(task_config_from_row).transpose()
    }

    pub async fn create_task_config(
        &self,
        user_id: Uuid,
        request: &TaskConfigCreateRequest,
    ) -> Result<TaskConfig> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        info!("Creating task config '{}' ({})", request.name, id);

        let output_constraints = request
            .output_constraints
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "INSERT INTO task_configs
             (id, user_id, name, task_type, ai_provider, ai_model_name, prompt_template,
              output_constraints, refinement_iterations, target_email_recipients,
              email_subject_template, linked_credentials_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(user_id.to_string())
        .bind(&request.name)
        .bind(&request.task_type)
        .bind(&request.ai_provider)
        .bind(&request.ai_model_name)
        .bind(&request.prompt_template)
        .bind(&output_constraints)
        .bind(request.refinement_iterations)
        .bind(&request.target_email_recipients)
        .bind(&request.email_subject_template)
        .bind(request.linked_credentials_id.map(|c| c.to_string()))
        .bind(DateTimeParser::format_for_storage(&now))
        .bind(DateTimeParser::format_for_storage(&now))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create task config '{}': {}", request.name, e);
            e
        })?;

        Ok(TaskConfig {
            id,
            user_id,
            name: request.name.clone(),
            task_type: request.task_type.clone(),
            ai_provider: request.ai_provider.clone(),
            ai_model_name: request.ai_model_name.clone(),
            prompt_template: request.prompt_template.clone(),
            output_constraints: request.output_constraints.clone(),
            refinement_iterations: request.refinement_iterations,
            target_email_recipients: request.target_email_recipients.clone(),
            email_subject_template: request.email_subject_template.clone(),
            linked_credentials_id: request.linked_credentials_id,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn update_task_config(
        &self,
        id: Uuid,
        user_id: Uuid,
        request: &TaskConfigUpdateRequest,
    ) -> Result<Option<TaskConfig>> {
        let now = Utc::now();

        let output_constraints = request
            .output_constraints
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            "UPDATE task_configs
             SET name = ?, task_type = ?, ai_provider = ?, ai_model_name = ?,
                 prompt_template = ?, output_constraints = ?, refinement_iterations = ?,
                 target_email_recipients = ?, email_subject_template = ?,
                 linked_credentials_id = ?, updated_at = ?
             WHERE id = ? AND user_id = ?",
        )
        .bind(&request.name)
        .bind(&request.task_type)
        .bind(&request.ai_provider)
        .bind(&request.ai_model_name)
        .bind(&request.prompt_template)
        .bind(&output_constraints)
        .bind(request.refinement_iterations)
        .bind(&request.target_email_recipients)
        .bind(&request.email_subject_template)
        .bind(request.linked_credentials_id.map(|c| c.to_string()))
        .bind(DateTimeParser::format_for_storage(&now))
        .bind(id.to_string())
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to update task config '{}' ({}): {}", request.name, id, e);
            e
        })?;

        if result.rows_affected() == 0 {
            warn!("Task config ({}) not found for update", id);
            return Ok(None);
        }

        self.get_task_config(id, user_id).await
    }

    pub async fn delete_task_config(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM task_configs WHERE id = ? AND user_id = ?")
            .bind(id.to_string())
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!("Deleted task config ({})", id);
        } else {
            warn!("Task config ({}) not found for deletion", id);
        }

        Ok(deleted)
    }
}
