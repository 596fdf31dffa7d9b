use anyhow::Result;
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};
use tracing::info;
use uuid::Uuid;

use super::Database;
use crate::models::User;
use crate::utils::datetime::DateTimeParser;

fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        email: row.get("email"),
        display_name: row.get("display_name"),
        google_sub: row.get("google_sub"),
        created_at: DateTimeParser::parse_flexible(&row.get::<String, _>("created_at"))?,
        updated_at: DateTimeParser::parse_flexible(&row.get::<String, _>("updated_at"))?,
    })
}

impl Database {
    /// Find or create the user for a Google identity, refreshing the email
    /// and display name on every login.
    pub async fn upsert_google_user(
        &self,
        google_sub: &str,
        email: &str,
        display_name: Option<&str>,
    ) -> Result<User> {
        let now = Utc::now();

        let existing = sqlx::query(
            "SELECT id, email, display_name, google_sub, created_at, updated_at
             FROM users WHERE google_sub = ?",
        )
        .bind(google_sub)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            let user = user_from_row(&row)?;
            sqlx::query("UPDATE users SET email = ?, display_name = ?, updated_at = ? WHERE id = ?")
                .bind(email)
                .bind(display_name)
                .bind(DateTimeParser::format_for_storage(&now))
                .bind(user.id.to_string())
                .execute(&self.pool)
                .await?;

            return Ok(User {
                email: email.to_string(),
                display_name: display_name.map(String::from),
                updated_at: now,
                ..user
            });
        }

        let id = Uuid::new_v4();
        info!("Creating user {} for Google subject", id);

        sqlx::query(
            "INSERT INTO users (id, email, display_name, google_sub, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(email)
        .bind(display_name)
        .bind(google_sub)
        .bind(DateTimeParser::format_for_storage(&now))
        .bind(DateTimeParser::format_for_storage(&now))
        .execute(&self.pool)
        .await?;

        Ok(User {
            id,
            email: email.to_string(),
            display_name: display_name.map(String::from),
            google_sub: google_sub.to_string(),
            created_at: now,
            updated_at: now,
        })
    }
}
