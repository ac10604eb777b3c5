use std::sync::Arc;

use anyhow::Result;
use reqwest::Client;
use teloxide::Bot;

use crate::{config::AppConfig, db::Database};

/// Everything the workers and the bot pipeline share, built once after the
/// store is connected.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub store: Database,
    pub bot: Bot,
    pub http: Client,
}

impl AppContext {
    pub fn new(config: Arc<AppConfig>, store: Database) -> Result<Self> {
        let http = http_client()?;
        let bot = Bot::new(&config.token);
        Ok(Self {
            config,
            store,
            bot,
            http,
        })
    }
}

pub fn http_client() -> Result<Client> {
    Ok(Client::builder()
        .user_agent(format!("manga-feed-bot/{}", env!("CARGO_PKG_VERSION")))
        .build()?)
}
