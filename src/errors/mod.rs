//! Error types for the AI task scheduler application.

pub mod types;

pub use types::{AppError, RepositoryError, SchedulerError, WebError};
