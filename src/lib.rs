//! AI task scheduler service library.
//!
//! A CRUD backend for AI task definitions, provider credentials, and
//! time-based schedules, with a background dispatcher that submits due
//! work to a job queue.

pub mod assets;
pub mod config;
pub mod database;
pub mod errors;
pub mod jobs;
pub mod models;
pub mod scheduler;
pub mod utils;
pub mod web;

pub use errors::AppError;
