use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    Extension,
};
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use super::auth::AuthenticatedUser;
use super::AppState;
use crate::errors::AppError;
use crate::models::*;
use crate::scheduler::recurrence;

// Health endpoints

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

pub async fn readiness_check(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    // A trivial query confirms the pool can reach the database.
    sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&state.database.pool())
        .await?;
    Ok(Json(json!({ "status": "ready" })))
}

pub async fn liveness_check() -> Json<Value> {
    Json(json!({ "status": "alive" }))
}

// Task configs API

pub async fn list_task_configs(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<TaskConfig>>, AppError> {
    let configs = state.database.list_task_configs(user.id).await?;
    Ok(Json(configs))
}

pub async fn create_task_config(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(payload): Json<TaskConfigCreateRequest>,
) -> Result<Json<TaskConfig>, AppError> {
    payload.validate()?;

    if let Some(credentials_id) = payload.linked_credentials_id {
        state
            .database
            .get_credentials(credentials_id, user.id)
            .await?
            .ok_or_else(|| AppError::not_found("credentials", credentials_id.to_string()))?;
    }

    let config = state.database.create_task_config(user.id, &payload).await?;
    Ok(Json(config))
}

pub async fn get_task_config(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<TaskConfig>, AppError> {
    let config = state
        .database
        .get_task_config(id, user.id)
        .await?
        .ok_or_else(|| AppError::not_found("task_config", id.to_string()))?;
    Ok(Json(config))
}

pub async fn update_task_config(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(payload): Json<TaskConfigUpdateRequest>,
) -> Result<Json<TaskConfig>, AppError> {
    payload.validate()?;

    if let Some(credentials_id) = payload.linked_credentials_id {
        state
            .database
            .get_credentials(credentials_id, user.id)
            .await?
            .ok_or_else(|| AppError::not_found("credentials", credentials_id.to_string()))?;
    }

    let config = state
        .database
        .update_task_config(id, user.id, &payload)
        .await?
        .ok_or_else(|| AppError::not_found("task_config", id.to_string()))?;
    Ok(Json(config))
}

pub async fn delete_task_config(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<StatusCode, AppError> {
    if !state.database.delete_task_config(id, user.id).await? {
        return Err(AppError::not_found("task_config", id.to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}

// Credentials API

pub async fn list_credentials(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<CredentialsResponse>>, AppError> {
    let credentials = state.database.list_credentials(user.id).await?;
    Ok(Json(
        credentials.into_iter().map(CredentialsResponse::from).collect(),
    ))
}

pub async fn create_credentials(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(payload): Json<CredentialsCreateRequest>,
) -> Result<Json<CredentialsResponse>, AppError> {
    payload.validate()?;

    if state
        .database
        .provider_credentials_exist(user.id, &payload.provider_name)
        .await?
    {
        return Err(AppError::validation(format!(
            "credentials for provider '{}' already exist",
            payload.provider_name
        )));
    }

    let credentials = state.database.create_credentials(user.id, &payload).await?;
    Ok(Json(credentials.into()))
}

pub async fn get_credentials(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<CredentialsResponse>, AppError> {
    let credentials = state
        .database
        .get_credentials(id, user.id)
        .await?
        .ok_or_else(|| AppError::not_found("credentials", id.to_string()))?;
    Ok(Json(credentials.into()))
}

pub async fn update_credentials(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(payload): Json<CredentialsUpdateRequest>,
) -> Result<Json<CredentialsResponse>, AppError> {
    payload.validate()?;
    let credentials = state
        .database
        .update_credentials(id, user.id, &payload)
        .await?
        .ok_or_else(|| AppError::not_found("credentials", id.to_string()))?;
    Ok(Json(credentials.into()))
}

pub async fn delete_credentials(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<StatusCode, AppError> {
    if !state.database.delete_credentials(id, user.id).await? {
        return Err(AppError::not_found("credentials", id.to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}

// Schedules API

pub async fn list_schedules(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<Schedule>>, AppError> {
    let schedules = state.database.list_schedules(user.id).await?;
    Ok(Json(schedules))
}

pub async fn create_schedule(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(mut payload): Json<ScheduleCreateRequest>,
) -> Result<Json<Schedule>, AppError> {
    payload.validate()?;

    state
        .database
        .get_task_config(payload.task_config_id, user.id)
        .await?
        .ok_or_else(|| {
            AppError::not_found("task_config", payload.task_config_id.to_string())
        })?;

    let next_run_at = payload.next_run_at.or_else(|| {
        recurrence::first_run_at(
            payload.frequency,
            payload.cron_expression.as_deref(),
            Utc::now(),
        )
    });

    let schedule = state
        .database
        .create_schedule(user.id, &payload, next_run_at)
        .await?;

    // Poke the scheduler so an already-due schedule doesn't wait out the
    // rest of the check interval.
    let _ = state.scheduler_wakeup_tx.send(());

    Ok(Json(schedule))
}

pub async fn get_schedule(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Schedule>, AppError> {
    let schedule = state
        .database
        .get_schedule(id, user.id)
        .await?
        .ok_or_else(|| AppError::not_found("schedule", id.to_string()))?;
    Ok(Json(schedule))
}

pub async fn update_schedule(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(mut payload): Json<ScheduleUpdateRequest>,
) -> Result<Json<Schedule>, AppError> {
    payload.validate()?;

    let next_run_at = payload.next_run_at.or_else(|| {
        recurrence::first_run_at(
            payload.frequency,
            payload.cron_expression.as_deref(),
            Utc::now(),
        )
    });

    let schedule = state
        .database
        .update_schedule(id, user.id, &payload, next_run_at)
        .await?
        .ok_or_else(|| AppError::not_found("schedule", id.to_string()))?;

    let _ = state.scheduler_wakeup_tx.send(());

    Ok(Json(schedule))
}

pub async fn delete_schedule(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<StatusCode, AppError> {
    if !state.database.delete_schedule(id, user.id).await? {
        return Err(AppError::not_found("schedule", id.to_string()));
    }

    let _ = state.scheduler_wakeup_tx.send(());

    Ok(StatusCode::NO_CONTENT)
}
