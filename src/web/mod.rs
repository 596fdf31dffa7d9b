//! Web layer: HTTP interface for the AI task scheduler.
//!
//! Thin handlers over the database layer. All `/api/v1` routes except the
//! login endpoint sit behind the JWT auth middleware; errors convert to
//! HTTP responses through `AppError`.

use anyhow::Result;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{config::Config, database::Database, scheduler::SchedulerWakeupSender};

pub mod api;
pub mod auth;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub database: Database,
    pub config: Config,
    pub scheduler_wakeup_tx: SchedulerWakeupSender,
    pub http_client: reqwest::Client,
}

/// Web server configuration and setup
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(
        config: Config,
        database: Database,
        scheduler_wakeup_tx: SchedulerWakeupSender,
    ) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.web.host, config.web.port).parse()?;

        let app = Self::router(AppState {
            database,
            config,
            scheduler_wakeup_tx,
            http_client: reqwest::Client::new(),
        });

        Ok(Self { app, addr })
    }

    /// Build the full application router for the given state.
    pub fn router(state: AppState) -> Router {
        Router::new()
            // Health check endpoints (no auth required)
            .route("/health", get(api::health_check))
            .route("/ready", get(api::readiness_check))
            .route("/live", get(api::liveness_check))
            // API v1 routes
            .nest("/api/v1", Self::api_v1_routes(state.clone()))
            // Middleware (applied in reverse order)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            // Shared state
            .with_state(state)
    }

    fn api_v1_routes(state: AppState) -> Router<AppState> {
        let protected = Router::new()
            // Task configs
            .route(
                "/task-configs",
                get(api::list_task_configs).post(api::create_task_config),
            )
            .route(
                "/task-configs/:id",
                get(api::get_task_config)
                    .put(api::update_task_config)
                    .delete(api::delete_task_config),
            )
            // Provider credentials
            .route(
                "/credentials",
                get(api::list_credentials).post(api::create_credentials),
            )
            .route(
                "/credentials/:id",
                get(api::get_credentials)
                    .put(api::update_credentials)
                    .delete(api::delete_credentials),
            )
            // Schedules
            .route(
                "/schedules",
                get(api::list_schedules).post(api::create_schedule),
            )
            .route(
                "/schedules/:id",
                get(api::get_schedule)
                    .put(api::update_schedule)
                    .delete(api::delete_schedule),
            )
            .route_layer(middleware::from_fn_with_state(state, auth::require_auth));

        Router::new()
            .route("/auth/google", post(auth::google_login))
            .merge(protected)
    }

    /// Start the web server
    pub async fn serve(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(listener, self.app).await?;
        Ok(())
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}
