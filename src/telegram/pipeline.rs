use std::sync::Arc;

use futures::future::BoxFuture;
use teloxide::{
    prelude::*,
    types::{Message, UpdateKind},
    utils::command::BotCommands,
};

use crate::{
    context::AppContext,
    domain::UpdateEnvelope,
    tasks::supervisor::StatusProvider,
};

use super::{
    types::{BotResult, Command},
    utils::{format_manga_list, format_status, parse_track_args},
};

/// Bot-processing pipeline fed by the webhook bridge. Fire-and-forget: the
/// returned future owns everything it needs and reports its own errors.
pub trait UpdatePipeline: Send + Sync + 'static {
    fn handle(&self, update: UpdateEnvelope) -> BoxFuture<'static, ()>;
}

pub struct TelegramPipeline {
    state: Arc<PipelineState>,
}

struct PipelineState {
    context: AppContext,
    bot_username: String,
    worker_status: StatusProvider,
}

impl TelegramPipeline {
    pub fn new(context: AppContext, bot_username: String, worker_status: StatusProvider) -> Self {
        Self {
            state: Arc::new(PipelineState {
                context,
                bot_username,
                worker_status,
            }),
        }
    }
}

/// Configured `BOT_USERNAME`, otherwise asks the Bot API once.
pub async fn resolve_bot_username(context: &AppContext) -> String {
    if let Some(name) = &context.config.bot_username {
        return name.clone();
    }
    match context.bot.get_me().await {
        Ok(me) => {
            tracing::info!(target: "telegram", bot_id = me.id.0, username = ?me.username, "bot identity resolved");
            me.username.clone().unwrap_or_default()
        }
        Err(err) => {
            tracing::warn!(
                target: "telegram",
                error = %err,
                "getMe failed; commands addressed as /cmd@bot will be ignored"
            );
            String::new()
        }
    }
}

/// Commands addressed to another bot, or plain chatter, yield `None`.
fn parse_command(text: &str, bot_username: &str) -> Option<Command> {
    Command::parse(text, bot_username).ok()
}

impl UpdatePipeline for TelegramPipeline {
    fn handle(&self, envelope: UpdateEnvelope) -> BoxFuture<'static, ()> {
        let state = self.state.clone();
        Box::pin(async move {
            let update_id = envelope.update_id;
            let update = match envelope.into_update() {
                Ok(update) => update,
                Err(err) => {
                    tracing::warn!(
                        target: "telegram",
                        update_id,
                        error = %err,
                        "update does not match the Bot API schema"
                    );
                    return;
                }
            };
            if let Err(err) = state.process(update).await {
                tracing::warn!(target: "telegram", update_id, error = %err, "failed to handle update");
            }
        })
    }
}

impl PipelineState {
    async fn process(&self, update: Update) -> BotResult<()> {
        let UpdateKind::Message(msg) = update.kind else {
            tracing::debug!(target: "telegram", update_id = update.id.0, "ignoring non-message update");
            return Ok(());
        };
        let Some(text) = msg.text() else {
            return Ok(());
        };
        match parse_command(text, &self.bot_username) {
            Some(command) => self.on_command(&msg, command).await,
            None => Ok(()),
        }
    }

    async fn on_command(&self, msg: &Message, command: Command) -> BotResult<()> {
        let bot = &self.context.bot;
        let chat_id = msg.chat.id;
        let reply = match command {
            Command::Start => {
                "Hi! I follow manga feeds and tell you when new chapters are ready.\n\
                 Use /track <feed_url> <title> to start."
                    .to_string()
            }
            Command::Help => Command::descriptions().to_string(),
            Command::Track(args) => self.track(chat_id, &args).await,
            Command::Untrack(args) => self.untrack(chat_id, &args).await,
            Command::List => match self.context.store.subscriptions().for_chat(chat_id.0).await {
                Ok(entries) => format_manga_list(&entries),
                Err(err) => {
                    tracing::error!(target: "telegram", error = %err, chat_id = chat_id.0, "failed to list subscriptions");
                    "Could not load your list right now.".to_string()
                }
            },
            Command::Status => match self.context.store.chapters().stats().await {
                Ok(stats) => format_status(&stats, &(self.worker_status)()),
                Err(err) => {
                    tracing::error!(target: "telegram", error = %err, "failed to read queue stats");
                    "Status is unavailable right now.".to_string()
                }
            },
        };
        bot.send_message(chat_id, reply).await?;
        Ok(())
    }

    async fn track(&self, chat_id: ChatId, args: &str) -> String {
        let Some(args) = parse_track_args(args) else {
            return "Usage: /track <feed_url> <title>".to_string();
        };
        let store = &self.context.store;
        let result = async {
            let manga = store.manga().track(&args.title, args.feed_url.as_str()).await?;
            let added = store.subscriptions().subscribe(chat_id.0, manga.id).await?;
            anyhow::Ok((manga, added))
        }
        .await;
        match result {
            Ok((manga, true)) => {
                tracing::info!(target: "telegram", chat_id = chat_id.0, manga_id = manga.id, "subscription added");
                format!("Now following #{} {}.", manga.id, manga.title)
            }
            Ok((manga, false)) => format!("You already follow #{} {}.", manga.id, manga.title),
            Err(err) => {
                tracing::error!(target: "telegram", error = %err, chat_id = chat_id.0, "failed to track manga");
                "Could not save that feed right now.".to_string()
            }
        }
    }

    async fn untrack(&self, chat_id: ChatId, args: &str) -> String {
        let Ok(manga_id) = args.trim().trim_start_matches('#').parse::<i64>() else {
            return "Usage: /untrack <id> (see /list)".to_string();
        };
        match self
            .context
            .store
            .subscriptions()
            .unsubscribe(chat_id.0, manga_id)
            .await
        {
            Ok(true) => format!("Stopped following #{manga_id}."),
            Ok(false) => format!("You are not following #{manga_id}."),
            Err(err) => {
                tracing::error!(target: "telegram", error = %err, chat_id = chat_id.0, "failed to untrack manga");
                "Could not update your list right now.".to_string()
            }
        }
    }
}
