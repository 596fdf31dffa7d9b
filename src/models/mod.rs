use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::scheduler::recurrence;

/// Providers a task config may target.
pub const SUPPORTED_AI_PROVIDERS: &[&str] = &["openai", "gemini", "anthropic"];

/// Upper bound on refinement loops for a single task execution.
pub const MAX_REFINEMENT_ITERATIONS: i32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    /// Stable subject identifier from the Google identity token.
    pub google_sub: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Provider credentials owned by a user. Secret fields are write-only at the
/// API boundary; responses use [`CredentialsResponse`].
#[derive(Debug, Clone)]
pub struct Credentials {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider_name: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub other_config: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsResponse {
    pub id: Uuid,
    pub provider_name: String,
    pub has_api_key: bool,
    pub has_api_secret: bool,
    pub other_config: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Credentials> for CredentialsResponse {
    fn from(c: Credentials) -> Self {
        Self {
            id: c.id,
            provider_name: c.provider_name,
            has_api_key: c.api_key.is_some(),
            has_api_secret: c.api_secret.is_some(),
            other_config: c.other_config,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsCreateRequest {
    pub provider_name: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub other_config: Option<serde_json::Value>,
}

impl CredentialsCreateRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.provider_name.trim().is_empty() {
            return Err(AppError::validation("provider_name must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsUpdateRequest {
    pub provider_name: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub other_config: Option<serde_json::Value>,
}

impl CredentialsUpdateRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.provider_name.trim().is_empty() {
            return Err(AppError::validation("provider_name must not be empty"));
        }
        Ok(())
    }
}

/// An AI task definition. Immutable from the scheduler's perspective; the
/// dispatcher only reads its id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub task_type: String,
    pub ai_provider: String,
    pub ai_model_name: Option<String>,
    pub prompt_template: String,
    pub output_constraints: Option<serde_json::Value>,
    pub refinement_iterations: i32,
    pub target_email_recipients: Option<String>,
    pub email_subject_template: Option<String>,
    pub linked_credentials_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_refinement_iterations() -> i32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfigCreateRequest {
    pub name: String,
    pub task_type: String,
    pub ai_provider: String,
    pub ai_model_name: Option<String>,
    pub prompt_template: String,
    pub output_constraints: Option<serde_json::Value>,
    #[serde(default = "default_refinement_iterations")]
    pub refinement_iterations: i32,
    pub target_email_recipients: Option<String>,
    pub email_subject_template: Option<String>,
    pub linked_credentials_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfigUpdateRequest {
    pub name: String,
    pub task_type: String,
    pub ai_provider: String,
    pub ai_model_name: Option<String>,
    pub prompt_template: String,
    pub output_constraints: Option<serde_json::Value>,
    #[serde(default = "default_refinement_iterations")]
    pub refinement_iterations: i32,
    pub target_email_recipients: Option<String>,
    pub email_subject_template: Option<String>,
    pub linked_credentials_id: Option<Uuid>,
}

fn validate_task_config_fields(ai_provider: &str, refinement_iterations: i32) -> Result<(), AppError> {
    if !SUPPORTED_AI_PROVIDERS.contains(&ai_provider.to_lowercase().as_str()) {
        return Err(AppError::validation(format!(
            "Unsupported AI provider. Must be one of: {}",
            SUPPORTED_AI_PROVIDERS.join(", ")
        )));
    }
    if refinement_iterations < 0 {
        return Err(AppError::validation(
            "refinement_iterations cannot be negative",
        ));
    }
    if refinement_iterations > MAX_REFINEMENT_ITERATIONS {
        return Err(AppError::validation(format!(
            "refinement_iterations cannot exceed {MAX_REFINEMENT_ITERATIONS}"
        )));
    }
    Ok(())
}

impl TaskConfigCreateRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        validate_task_config_fields(&self.ai_provider, self.refinement_iterations)
    }
}

impl TaskConfigUpdateRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        validate_task_config_fields(&self.ai_provider, self.refinement_iterations)
    }
}

/// Schedule frequency. Closed enumeration; stored as lowercase text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Once,
    Daily,
    Weekly,
    Monthly,
    Cron,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Once => "once",
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Cron => "cron",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "once" => Some(Frequency::Once),
            "daily" => Some(Frequency::Daily),
            "weekly" => Some(Frequency::Weekly),
            "monthly" => Some(Frequency::Monthly),
            "cron" => Some(Frequency::Cron),
            _ => None,
        }
    }
}

/// A persisted rule describing when a task config should next be dispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub user_id: Uuid,
    pub task_config_id: Uuid,
    pub frequency: Frequency,
    /// Present only when `frequency` is `cron`.
    pub cron_expression: Option<String>,
    /// Next due time; None for a fired `once` schedule or a deactivated
    /// misconfigured cron schedule.
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    /// Consecutive failed dispatch submissions; reset on success.
    pub dispatch_failures: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleCreateRequest {
    pub task_config_id: Uuid,
    pub frequency: Frequency,
    pub cron_expression: Option<String>,
    /// Required for `once`; computed from the frequency when omitted otherwise.
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleUpdateRequest {
    pub frequency: Frequency,
    pub cron_expression: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn validate_schedule_fields(
    frequency: Frequency,
    cron_expression: &mut Option<String>,
    next_run_at: Option<DateTime<Utc>>,
) -> Result<(), AppError> {
    match frequency {
        Frequency::Cron => {
            let expression = cron_expression
                .as_deref()
                .ok_or_else(|| {
                    AppError::validation("cron_expression is required when frequency is 'cron'")
                })?;
            recurrence::parse_cron(expression).map_err(|e| AppError::validation(e.to_string()))?;
        }
        Frequency::Once => {
            // A one-shot schedule has no recurrence to derive its due time from.
            if next_run_at.is_none() {
                return Err(AppError::validation(
                    "next_run_at is required when frequency is 'once'",
                ));
            }
            *cron_expression = None;
        }
        _ => {
            *cron_expression = None;
        }
    }
    Ok(())
}

impl ScheduleCreateRequest {
    pub fn validate(&mut self) -> Result<(), AppError> {
        validate_schedule_fields(self.frequency, &mut self.cron_expression, self.next_run_at)
    }
}

impl ScheduleUpdateRequest {
    pub fn validate(&mut self) -> Result<(), AppError> {
        validate_schedule_fields(self.frequency, &mut self.cron_expression, self.next_run_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule_request(frequency: Frequency) -> ScheduleCreateRequest {
        ScheduleCreateRequest {
            task_config_id: Uuid::new_v4(),
            frequency,
            cron_expression: None,
            next_run_at: None,
            is_active: true,
        }
    }

    #[test]
    fn cron_frequency_requires_expression() {
        let mut req = schedule_request(Frequency::Cron);
        assert!(req.validate().is_err());

        req.cron_expression = Some("0 0 9 * * *".to_string());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn cron_expression_must_parse() {
        let mut req = schedule_request(Frequency::Cron);
        req.cron_expression = Some("not a cron".to_string());
        assert!(req.validate().is_err());
    }

    #[test]
    fn once_requires_next_run_at() {
        let mut req = schedule_request(Frequency::Once);
        assert!(req.validate().is_err());

        req.next_run_at = Some(Utc::now());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn non_cron_frequency_clears_expression() {
        let mut req = schedule_request(Frequency::Daily);
        req.cron_expression = Some("0 0 9 * * *".to_string());
        req.validate().unwrap();
        assert!(req.cron_expression.is_none());
    }

    #[test]
    fn task_config_provider_must_be_supported() {
        let mut req = TaskConfigCreateRequest {
            name: "Weekly digest".to_string(),
            task_type: "email_generation".to_string(),
            ai_provider: "openai".to_string(),
            ai_model_name: None,
            prompt_template: "Summarize the week".to_string(),
            output_constraints: None,
            refinement_iterations: 1,
            target_email_recipients: None,
            email_subject_template: None,
            linked_credentials_id: None,
        };
        assert!(req.validate().is_ok());

        req.ai_provider = "Anthropic".to_string();
        assert!(req.validate().is_ok());

        req.ai_provider = "mystery".to_string();
        assert!(req.validate().is_err());
    }

    #[test]
    fn refinement_iterations_bounds() {
        let mut req = TaskConfigCreateRequest {
            name: "t".to_string(),
            task_type: "t".to_string(),
            ai_provider: "openai".to_string(),
            ai_model_name: None,
            prompt_template: "p".to_string(),
            output_constraints: None,
            refinement_iterations: 11,
            target_email_recipients: None,
            email_subject_template: None,
            linked_credentials_id: None,
        };
        assert!(req.validate().is_err());
        req.refinement_iterations = -1;
        assert!(req.validate().is_err());
        req.refinement_iterations = 0;
        assert!(req.validate().is_ok());
    }
}
