use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ai_task_scheduler::{
    config::Config,
    database::Database,
    jobs::JobWorker,
    scheduler::{create_wakeup_channel, SchedulerService},
    web::WebServer,
};

#[derive(Parser)]
#[command(name = "ai-task-scheduler")]
#[command(version = "0.1.0")]
#[command(about = "An AI task configuration service with schedule management and background dispatch")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Database URL (overrides config file)
    #[arg(short = 'd', long, value_name = "URL")]
    database_url: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging with specified level
    let log_filter = if cli.log_level == "trace" {
        format!("ai_task_scheduler={},tower_http=trace", cli.log_level)
    } else {
        format!("ai_task_scheduler={}", cli.log_level)
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting AI Task Scheduler v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration from specified file
    std::env::set_var("CONFIG_FILE", &cli.config);
    let mut config = Config::load()?;
    info!("Configuration loaded from: {}", cli.config);

    // Override config with CLI arguments
    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }
    if let Some(database_url) = cli.database_url {
        config.database.url = database_url;
    }

    info!("Using database: {}", config.database.url);

    let database = Database::new(&config.database).await?;
    database.migrate().await?;
    info!("Database connection established and migrations applied");

    // Start the job worker draining the in-process queue
    let (job_queue, job_worker) = JobWorker::channel(database.clone());
    tokio::spawn(job_worker.run());
    info!("Job worker started");

    // Wakeup channel lets the web layer poke the scheduler on schedule changes
    let (scheduler_wakeup_tx, scheduler_wakeup_rx) = create_wakeup_channel();

    let scheduler = SchedulerService::new(
        database.clone(),
        Arc::new(job_queue),
        config.scheduler.clone(),
        Some(scheduler_wakeup_rx),
    );

    tokio::spawn(async move {
        if let Err(e) = scheduler.start().await {
            tracing::error!("Scheduler service failed: {}", e);
        }
    });
    info!("Scheduler service started");

    let web_server = WebServer::new(config, database, scheduler_wakeup_tx)?;

    info!(
        "Starting web server on {}:{}",
        web_server.host(),
        web_server.port()
    );
    web_server.serve().await?;

    Ok(())
}
