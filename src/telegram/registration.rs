use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use teloxide::{prelude::*, Bot};
use url::Url;

use crate::config::{AppConfig, WebhookMode};

const BOT_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Serialize)]
struct SetWebhookRequest<'a> {
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret_token: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct BotApiResponse {
    ok: bool,
    description: Option<String>,
}

/// Makes the platform deliver updates to `<EXTERNAL_URL>/<TOKEN>`.
pub async fn register_webhook(bot: &Bot, http: &Client, config: &AppConfig) -> Result<()> {
    let webhook_url = Url::parse(config.webhook_url()).context("webhook url is not a valid url")?;
    match config.webhook.mode {
        WebhookMode::SetWebhook => {
            let mut request = bot.set_webhook(webhook_url);
            if let Some(secret) = &config.webhook.secret {
                request = request.secret_token(secret.clone());
            }
            request.await.context("setWebhook request failed")?;
        }
        WebhookMode::DirectApi => {
            let endpoint = format!("{BOT_API_BASE}/bot{}/setWebhook", config.token);
            let body = SetWebhookRequest {
                url: webhook_url.as_str(),
                secret_token: config.webhook.secret.as_deref(),
            };
            let response: BotApiResponse = http
                .post(&endpoint)
                .json(&body)
                .send()
                .await
                .context("setWebhook POST failed")?
                .json()
                .await
                .context("unexpected setWebhook response")?;
            if !response.ok {
                bail!(
                    "setWebhook rejected: {}",
                    response.description.unwrap_or_else(|| "no description".into())
                );
            }
        }
        WebhookMode::Manual => {
            tracing::info!(target: "telegram", "webhook registration skipped (manual mode)");
            return Ok(());
        }
    }
    tracing::info!(target: "telegram", mode = ?config.webhook.mode, "webhook registered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_request_omits_missing_secret() {
        let body = SetWebhookRequest {
            url: "https://bot.example/tok",
            secret_token: None,
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"url":"https://bot.example/tok"}"#
        );
    }
}
