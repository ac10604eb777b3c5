use std::{net::IpAddr, str::FromStr, time::Duration};

use url::Url;

use super::env::{
    derive_webhook_url, AppConfig, ConfigError, DirectoryConfig, LoggingConfig, StoreConfig,
    WebhookConfig, WebhookMode, WorkerConfig,
};

/// Environment lookup that treats empty values as unset.
pub fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

impl AppConfig {
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Both required values are checked before anything else is parsed.
        let token = required(&lookup, "TOKEN")?;
        let external_url = required(&lookup, "EXTERNAL_URL")
            .or_else(|_| required(&lookup, "RENDER_EXTERNAL_URL"))
            .map_err(|_| ConfigError::Missing("EXTERNAL_URL"))?;
        Url::parse(&external_url).map_err(|err| ConfigError::Invalid {
            key: "EXTERNAL_URL",
            reason: err.to_string(),
        })?;

        let port = parse_or(&lookup, "PORT", 8443u16)?;
        let bot_username = lookup("BOT_USERNAME").map(|name| name.trim_start_matches('@').to_string());

        let webhook = WebhookConfig {
            listen_addr: parse_or(&lookup, "WEBHOOK_LISTEN_ADDR", IpAddr::from([0, 0, 0, 0]))?,
            mode: match lookup("WEBHOOK_MODE") {
                Some(raw) => parse_mode(&raw)?,
                None => WebhookMode::SetWebhook,
            },
            secret: lookup("WEBHOOK_SECRET"),
            queue_capacity: parse_or(&lookup, "WEBHOOK_QUEUE_CAPACITY", 1024usize)?.max(1),
        };

        let workers = WorkerConfig {
            creators: parse_or(&lookup, "CREATOR_WORKERS", 10u32)?,
            watch_interval: Duration::from_secs(parse_or(&lookup, "WATCH_INTERVAL_SECS", 300u64)?),
            creator_idle: Duration::from_millis(parse_or(&lookup, "CREATOR_IDLE_MS", 2_000u64)?),
            chapter_max_attempts: parse_or(&lookup, "CHAPTER_MAX_ATTEMPTS", 3u32)?.max(1),
            fetch_timeout: Duration::from_millis(parse_or(&lookup, "FETCH_TIMEOUT_MS", 10_000u64)?),
            fault_backoff: Duration::from_millis(parse_or(
                &lookup,
                "WORKER_FAULT_BACKOFF_MS",
                1_000u64,
            )?),
            fault_backoff_max: Duration::from_millis(parse_or(
                &lookup,
                "WORKER_FAULT_BACKOFF_MAX_MS",
                60_000u64,
            )?),
        };

        let store = StoreConfig::from_lookup(&lookup)?;
        let shutdown_timeout =
            Duration::from_secs(parse_or(&lookup, "SHUTDOWN_TIMEOUT_SECS", 5u64)?);

        let webhook_url = derive_webhook_url(&external_url, &token);
        Ok(Self {
            port,
            token,
            external_url,
            bot_username,
            webhook,
            workers,
            store,
            shutdown_timeout,
            webhook_url,
        })
    }
}

impl StoreConfig {
    pub fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            connect_attempts: parse_or(lookup, "STORE_CONNECT_ATTEMPTS", 5u32)?.max(1),
            retry_delay: Duration::from_millis(parse_or(lookup, "STORE_CONNECT_RETRY_MS", 1_000u64)?),
            max_connections: parse_or(lookup, "STORE_MAX_CONNECTIONS", 5u32)?.max(1),
        })
    }
}

impl DirectoryConfig {
    pub fn from_lookup<F>(lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            logs_dir: lookup("LOGS_DIR").unwrap_or_else(|| "logs".to_string()),
            data_dir: lookup("DATA_DIR").unwrap_or_else(|| "data".to_string()),
            db_filename: lookup("DB_FILENAME").unwrap_or_else(|| "manga.db".to_string()),
        }
    }
}

impl LoggingConfig {
    pub fn from_lookup<F>(lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        }
    }
}

fn required<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|value| !value.trim().is_empty())
        .ok_or(ConfigError::Missing(key))
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse::<T>().map_err(|err| ConfigError::Invalid {
            key,
            reason: format!("{raw:?}: {err}"),
        }),
        None => Ok(default),
    }
}

fn parse_mode(raw: &str) -> Result<WebhookMode, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "set-webhook" | "set_webhook" => Ok(WebhookMode::SetWebhook),
        "direct-api" | "direct_api" => Ok(WebhookMode::DirectApi),
        "manual" | "none" => Ok(WebhookMode::Manual),
        other => Err(ConfigError::Invalid {
            key: "WEBHOOK_MODE",
            reason: format!("unknown mode {other:?}"),
        }),
    }
}
