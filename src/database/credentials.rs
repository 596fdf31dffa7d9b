use anyhow::Result;
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::Database;
use crate::models::{Credentials, CredentialsCreateRequest, CredentialsUpdateRequest};
use crate::utils::datetime::DateTimeParser;

fn credentials_from_row(row: &SqliteRow) -> Result<Credentials> {
    let other_config: Option<String> = row.get("other_config");
    Ok(Credentials {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        user_id: Uuid::parse_str(&row.get::<String, _>("user_id"))?,
        provider_name: row.get("provider_name"),
        api_key: row.get("api_key"),
        api_secret: row.get("api_secret"),
        other_config: other_config.map(|s| serde_json::from_str(&s)).transpose()?,
        created_at: DateTimeParser::parse_flexible(&row.get::<String, _>("created_at"))?,
        updated_at: DateTimeParser::parse_flexible(&row.get::<String, _>("updated_at"))?,
    })
}

const CREDENTIALS_COLUMNS: &str =
    "id, user_id, provider_name, api_key, api_secret, other_config, created_at, updated_at";

impl Database {
    pub async fn list_credentials(&self, user_id: Uuid) -> Result<Vec<Credentials>> {
        let rows = sqlx::query(&format!(
            "SELECT {CREDENTIALS_COLUMNS} FROM credentials
             WHERE user_id = ? ORDER BY created_at DESC"
        ))
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(credentials_from_row).collect()
    }

    pub async fn get_credentials(&self, id: Uuid, user_id: Uuid) -> Result<Option<Credentials>> {
        let row = sqlx::query(&format!(
            "SELECT {CREDENTIALS_COLUMNS} FROM credentials WHERE id = ? AND user_id = ?"
        ))
        .bind(id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(credentials_from_row).transpose()
    }

    pub async fn provider_credentials_exist(
        &self,
        user_id: Uuid,
        provider_name: &str,
    ) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM credentials WHERE user_id = ? AND provider_name = ?",
        )
        .bind(user_id.to_string())
        .bind(provider_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    pub async fn create_credentials(
        &self,
        user_id: Uuid,
        request: &CredentialsCreateRequest,
    ) -> Result<Credentials> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        info!(
            "Creating credentials for provider '{}' ({})",
            request.provider_name, id
        );

        let other_config = request
            .other_config
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "INSERT INTO credentials
             (id, user_id, provider_name, api_key, api_secret, other_config, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(user_id.to_string())
        .bind(&request.provider_name)
        .bind(&request.api_key)
        .bind(&request.api_secret)
        .bind(&other_config)
        .bind(DateTimeParser::format_for_storage(&now))
        .bind(DateTimeParser::format_for_storage(&now))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(
                "Failed to create credentials for provider '{}': {}",
                request.provider_name, e
            );
            e
        })?;

        Ok(Credentials {
            id,
            user_id,
            provider_name: request.provider_name.clone(),
            api_key: request.api_key.clone(),
            api_secret: request.api_secret.clone(),
            other_config: request.other_config.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn update_credentials(
        &self,
        id: Uuid,
        user_id: Uuid,
        request: &CredentialsUpdateRequest,
    ) -> Result<Option<Credentials>> {
        let now = Utc::now();

        let other_config = request
            .other_config
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            "UPDATE credentials
             SET provider_name = ?, api_key = ?, api_secret = ?, other_config = ?, updated_at = ?
             WHERE id = ? AND user_id = ?",
        )
        .bind(&request.provider_name)
        .bind(&request.api_key)
        .bind(&request.api_secret)
        .bind(&other_config)
        .bind(DateTimeParser::format_for_storage(&now))
        .bind(id.to_string())
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!("Credentials ({}) not found for update", id);
            return Ok(None);
        }

        self.get_credentials(id, user_id).await
    }

    pub async fn delete_credentials(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM credentials WHERE id = ? AND user_id = ?")
            .bind(id.to_string())
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!("Deleted credentials ({})", id);
        } else {
            warn!("Credentials ({}) not found for deletion", id);
        }

        Ok(deleted)
    }
}
