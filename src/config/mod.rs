use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub auth: AuthConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for signing session tokens. Must be overridden in production.
    pub jwt_secret: String,
    pub token_expiry_secs: u64,
    pub google_client_id: String,
    pub google_client_secret: String,
    /// Must match the redirect URI registered in the Google Cloud Console.
    pub google_redirect_url: String,
    pub google_token_endpoint: String,
    pub google_userinfo_endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub check_interval_secs: u64,
    pub max_dispatch_failures: u32,
    pub retry_backoff_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://./ai-task-scheduler.db".to_string(),
                max_connections: Some(10),
            },
            web: WebConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                base_url: "http://localhost:8080".to_string(),
            },
            auth: AuthConfig {
                jwt_secret: "insecure-dev-secret".to_string(),
                token_expiry_secs: 86400,
                google_client_id: String::new(),
                google_client_secret: String::new(),
                google_redirect_url: "http://localhost:3000/auth/google/callback".to_string(),
                google_token_endpoint: "https://oauth2.googleapis.com/token".to_string(),
                google_userinfo_endpoint: "https://www.googleapis.com/oauth2/v3/userinfo"
                    .to_string(),
            },
            scheduler: SchedulerConfig {
                check_interval_secs: 30,
                max_dispatch_failures: 5,
                retry_backoff_secs: 60,
            },
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_file =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());

        if std::path::Path::new(&config_file).exists() {
            let contents = std::fs::read_to_string(&config_file)?;
            Ok(toml::from_str(&contents)?)
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            std::fs::write(&config_file, contents)?;
            Ok(default_config)
        }
    }
}
