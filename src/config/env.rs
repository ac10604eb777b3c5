use std::{net::IpAddr, time::Duration};

use thiserror::Error;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub token: String,
    pub external_url: String,
    pub bot_username: Option<String>,
    pub webhook: WebhookConfig,
    pub workers: WorkerConfig,
    pub store: StoreConfig,
    pub shutdown_timeout: Duration,
    pub(super) webhook_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookMode {
    /// `setWebhook` through the teloxide client.
    SetWebhook,
    /// Plain HTTPS POST to the Bot API registration endpoint.
    DirectApi,
    /// Registered out of band; nothing to do at startup.
    Manual,
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub listen_addr: IpAddr,
    pub mode: WebhookMode,
    pub secret: Option<String>,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub creators: u32,
    pub watch_interval: Duration,
    pub creator_idle: Duration,
    pub chapter_max_attempts: u32,
    pub fetch_timeout: Duration,
    pub fault_backoff: Duration,
    pub fault_backoff_max: Duration,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub connect_attempts: u32,
    pub retry_delay: Duration,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub logs_dir: String,
    pub data_dir: String,
    pub db_filename: String,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl AppConfig {
    /// `<EXTERNAL_URL>/<TOKEN>`, fixed at load time.
    pub fn webhook_url(&self) -> &str {
        &self.webhook_url
    }

    pub fn log_resolved(&self) {
        tracing::info!(
            target: "bootstrap",
            port = self.port,
            token = %mask_secret(&self.token),
            external_url = %self.external_url,
            webhook_url = %self.webhook_url.replace(&self.token, &mask_secret(&self.token)),
            webhook_mode = ?self.webhook.mode,
            creators = self.workers.creators,
            "configuration resolved"
        );
    }
}

pub fn derive_webhook_url(external_url: &str, token: &str) -> String {
    format!("{}/{}", external_url.trim_end_matches('/'), token)
}

/// Keeps the bot id prefix of a token and hides the rest.
pub fn mask_secret(secret: &str) -> String {
    match secret.split_once(':') {
        Some((bot_id, _)) => format!("{bot_id}:***"),
        None => "***".to_string(),
    }
}
